use super::{JobError, JobReport, conclude};
use crate::action::StoreAction;
use crate::config::ExportArgs;
use crate::counters::{self, CounterSet};
use crate::error::Result;
use crate::io::{DelimitedReader, input_files};
use crate::mappers::DelimitedLineMapper;
use crate::runner::Runner;
use crate::store::StoreConnector;
use crate::task::{RecordSink, RecordSource};
use crate::writer::BackoffWriter;
use std::sync::Arc;
use tracing::info;

/// Write delimited input lines to the store, one partition per input file.
///
/// Each line becomes one [`StoreAction`] through [`DelimitedLineMapper`] and is applied by a
/// per-partition [`BackoffWriter`].
///
/// # Errors
///
/// Fails if the input cannot be resolved or read, or when a write exhausts its retry budget.
pub fn export(
    connector: Arc<dyn StoreConnector>,
    args: &ExportArgs,
    runner: &Runner,
) -> std::result::Result<JobReport, JobError> {
    let counters = CounterSet::new();
    counters.record_start();
    let files = match input_files(&args.input) {
        Ok(f) => f,
        Err(e) => return Err(JobError::new(e.into(), &counters)),
    };
    let count = files.len();
    info!(input = %args.input, files = count, operation = %args.operation, "exporting to store");

    let mapper = DelimitedLineMapper::new(args.operation, args.expiry);
    let outcome = runner.run(files, &counters, |path, ctx| {
        let mut reader = DelimitedReader::open(&path, args.delimiter)?;
        let mut writer = BackoffWriter::new(Arc::clone(&connector), args.backoff)
            .with_counters(ctx.counters.clone());

        let written = write_lines(&mut reader, &mut writer, mapper, &ctx.counters);
        reader.close();
        RecordSink::<String, StoreAction>::close(&mut writer)?;
        written
    });
    conclude("export", counters, count, outcome)
}

fn write_lines(
    reader: &mut DelimitedReader,
    writer: &mut BackoffWriter,
    mapper: DelimitedLineMapper,
    counters: &CounterSet,
) -> Result<()> {
    while let Some((_, fields)) = reader.next_record()? {
        counters.increment(counters::LINES_READ, 1);
        if let Some((key, action)) = mapper.map_fields(&fields, counters) {
            writer.emit(key, action)?;
        }
    }
    Ok(())
}
