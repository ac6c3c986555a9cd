use super::{JobError, JobReport, conclude};
use crate::config::UpdateArgs;
use crate::counters::{self, CounterSet};
use crate::error::Result;
use crate::io::{DelimitedReader, input_files};
use crate::runner::Runner;
use crate::store::StoreConnector;
use crate::task::RecordSource;
use crate::update::{BulkUpdatePipeline, ShutdownMode, UpdateMapper};
use crate::writer::BackoffWriter;
use std::sync::Arc;
use tracing::info;

/// Read-merge-write every input line through a [`BulkUpdatePipeline`].
///
/// Each input file is one partition with its own pipeline and [`BackoffWriter`]. Lines are
/// handed to `mapper` as their split fields.
///
/// # Errors
///
/// Fails if the input cannot be resolved or read, a merge fails, or a write exhausts its
/// retry budget.
pub fn update<M>(
    connector: Arc<dyn StoreConnector>,
    mapper: Arc<M>,
    args: &UpdateArgs,
    runner: &Runner,
) -> std::result::Result<JobReport, JobError>
where
    M: UpdateMapper<Vec<String>> + 'static,
{
    let counters = CounterSet::new();
    counters.record_start();
    let files = match input_files(&args.input) {
        Ok(f) => f,
        Err(e) => return Err(JobError::new(e.into(), &counters)),
    };
    let count = files.len();
    info!(input = %args.input, files = count, shutdown = ?args.shutdown, "updating store");

    let outcome = runner.run(files, &counters, |path, ctx| {
        let mut reader = DelimitedReader::open(&path, args.delimiter)?;
        let writer = BackoffWriter::new(Arc::clone(&connector), args.backoff)
            .with_counters(ctx.counters.clone());
        let pipeline = BulkUpdatePipeline::start(
            Arc::clone(&connector),
            Arc::clone(&mapper),
            Box::new(writer),
            args.pipeline,
            ctx.counters.clone(),
        )?;

        let fed = feed(&mut reader, &pipeline, &ctx.counters);
        reader.close();
        let mode = if fed.is_ok() {
            args.shutdown
        } else {
            ShutdownMode::Abandon
        };
        pipeline.finish(mode)?;
        fed
    });
    conclude("update", counters, count, outcome)
}

fn feed<M>(
    reader: &mut DelimitedReader,
    pipeline: &BulkUpdatePipeline<Vec<String>, M>,
    counters: &CounterSet,
) -> Result<()>
where
    M: UpdateMapper<Vec<String>> + 'static,
{
    while let Some((_, fields)) = reader.next_record()? {
        counters.increment(counters::LINES_READ, 1);
        pipeline.submit(&fields)?;
    }
    Ok(())
}
