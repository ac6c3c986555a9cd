use super::{JobError, JobReport, conclude};
use crate::config::ImportViewArgs;
use crate::counters::{self, CounterSet};
use crate::error::Result;
use crate::io::{PageFileWriter, open_part_writer};
use crate::partition::partition;
use crate::reader::PaginatedViewReader;
use crate::runner::Runner;
use crate::store::StoreConnector;
use crate::task::{RecordSink, RecordSource};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Import the rows of a view into one part file per key partition.
///
/// Keys are split with [`partition`] and every partition runs its own
/// [`PaginatedViewReader`], writing `part-m-NNNNN` in `args.output`. Rows without a document
/// are read but not written.
///
/// # Errors
///
/// Fails with the first partition error: a view query that kept getting cancelled, a store
/// error, or an output file that cannot be written.
pub fn import_view(
    connector: Arc<dyn StoreConnector>,
    args: &ImportViewArgs,
    runner: &Runner,
) -> std::result::Result<JobReport, JobError> {
    let counters = CounterSet::new();
    counters.record_start();
    let partitions = match partition(args.keys.clone(), args.partitions) {
        Ok(p) => p,
        Err(e) => return Err(JobError::new(e, &counters)),
    };
    let count = partitions.len();
    info!(view = %args.target, keys = args.keys.len(), partitions = count, output = %args.output.display(), "importing view");

    let outcome = runner.run(partitions, &counters, |part, ctx| {
        let mut reader =
            PaginatedViewReader::new(Arc::clone(&connector), args.reader_config(), part.keys);
        let mut sink = open_part_writer(&args.output, part.index, args.format)?;

        let copied = copy_rows(&mut reader, sink.as_mut(), &ctx.counters);
        reader.close();
        ctx.counters
            .increment(counters::KEYS_READ, reader.keys_started() as u64);
        let closed = sink.close();
        copied?;
        closed
    });
    conclude("import_view", counters, count, outcome)
}

fn copy_rows(
    reader: &mut PaginatedViewReader,
    sink: &mut (dyn RecordSink<String, Value> + Send),
    counters: &CounterSet,
) -> Result<()> {
    while let Some((id, row)) = reader.next_record()? {
        counters.increment(counters::ROWS_READ, 1);
        if let Some(doc) = row.document {
            sink.emit(id, doc)?;
        }
    }
    Ok(())
}

/// Import the rows of a view over a single connection, one file per view page.
///
/// Every key is queried in order and every page lands in its own `part-NNNNN` file in
/// `args.output`, numbered across keys. `args.partitions` is ignored.
///
/// # Errors
///
/// Fails on a view query that kept getting cancelled, a store error, or a page file that
/// cannot be written.
pub fn serial_import(
    connector: Arc<dyn StoreConnector>,
    args: &ImportViewArgs,
) -> std::result::Result<JobReport, JobError> {
    let counters = CounterSet::new();
    counters.record_start();
    info!(view = %args.target, keys = args.keys.len(), output = %args.output.display(), "importing view serially");

    let mut reader = PaginatedViewReader::new(connector, args.reader_config(), args.keys.clone());
    let mut pages = PageFileWriter::new(args.output.clone());
    let outcome = copy_pages(&mut reader, &mut pages, &counters);
    reader.close();
    counters.increment(counters::KEYS_READ, reader.keys_started() as u64);
    conclude("serial_import", counters, 1, outcome)
}

fn copy_pages(
    reader: &mut PaginatedViewReader,
    pages: &mut PageFileWriter,
    counters: &CounterSet,
) -> Result<()> {
    while let Some(page) = reader.next_page()? {
        counters.increment(counters::ROWS_READ, page.len() as u64);
        pages.write_page(&page)?;
    }
    Ok(())
}
