//! Job drivers.
//!
//! Each driver wires the building blocks into one bulk transfer and runs its partitions on a
//! [`Runner`](crate::runner::Runner):
//!
//! - [`import_view`]: view rows into partition part files, one reader per key partition
//! - [`serial_import`]: view rows into page files over a single connection
//! - [`export`]: delimited lines into store mutations, one partition per input file
//! - [`update`]: delimited lines into read-merge-write updates through a bulk pipeline
//!
//! Drivers return a [`JobReport`] with the merged counters, or a [`JobError`] that carries the
//! counters gathered before the failure.

mod bulk_export;
mod bulk_update;
mod view_import;

pub use bulk_export::export;
pub use bulk_update::update;
pub use view_import::{import_view, serial_import};

use crate::counters::CounterSet;
use crate::error::BulkIoError;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Summary of a finished job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub counters: CounterSet,
    pub partitions: usize,
    pub elapsed: Option<Duration>,
}

impl JobReport {
    /// Shorthand for `self.counters.get(name)`.
    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name)
    }
}

/// A failed job, with the counters it accumulated before failing.
#[derive(Debug, Error)]
#[error("{source} (counters: {counters:?})")]
pub struct JobError {
    pub source: BulkIoError,
    pub counters: CounterSet,
}

impl JobError {
    #[must_use]
    pub fn new(source: BulkIoError, counters: &CounterSet) -> Self {
        Self {
            source,
            counters: counters.clone(),
        }
    }
}

/// Stamp the end time and turn a partition outcome into the job outcome.
fn conclude<T>(
    job: &str,
    counters: CounterSet,
    partitions: usize,
    outcome: crate::error::Result<T>,
) -> Result<JobReport, JobError> {
    counters.record_end();
    match outcome {
        Ok(_) => {
            let elapsed = counters.elapsed();
            info!(
                job,
                partitions,
                elapsed_ms = elapsed.map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
                counters = %counters.to_json(),
                "job finished"
            );
            Ok(JobReport {
                counters,
                partitions,
                elapsed,
            })
        }
        Err(source) => {
            warn!(job, error = %source, "job failed");
            Err(JobError { source, counters })
        }
    }
}
