//! Partition execution.
//!
//! A job splits its input into partitions and hands them to a [`Runner`] together with a
//! per-partition task. Every partition runs on its own worker with its own [`CounterSet`];
//! the partition counters are merged into the job counters whether the task succeeds or not,
//! so a failed job still reports what it did.
//!
//! Partitions share nothing else. Each task opens its own store connection, which is why the
//! runner itself never touches the store.

use crate::counters::CounterSet;
use crate::error::{BulkIoError, Result};
use anyhow::anyhow;
use rayon::prelude::*;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecMode {
    /// Run partitions one after the other on the calling thread.
    Sequential,
    /// Run partitions on a dedicated rayon pool. `threads` defaults to the number of CPUs.
    Parallel { threads: Option<usize> },
}

#[derive(Clone, Copy, Debug)]
pub struct Runner {
    pub mode: ExecMode,
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            mode: ExecMode::Parallel { threads: None },
        }
    }
}

/// What a partition task gets to know about its partition.
#[derive(Debug, Clone)]
pub struct PartitionContext {
    pub index: usize,
    /// Counters of this partition only; merged into the job counters afterwards.
    pub counters: CounterSet,
}

impl Runner {
    #[must_use]
    pub const fn sequential() -> Self {
        Self {
            mode: ExecMode::Sequential,
        }
    }

    #[must_use]
    pub const fn with_threads(threads: usize) -> Self {
        Self {
            mode: ExecMode::Parallel {
                threads: Some(threads),
            },
        }
    }

    /// Run `task` once per partition and return the results in partition order.
    ///
    /// # Errors
    ///
    /// Returns the error of the lowest-indexed failed partition, or an error if the worker
    /// pool cannot be built. Every partition runs to completion either way.
    pub fn run<P, T, F>(&self, partitions: Vec<P>, counters: &CounterSet, task: F) -> Result<Vec<T>>
    where
        P: Send,
        T: Send,
        F: Fn(P, &PartitionContext) -> Result<T> + Sync,
    {
        let count = partitions.len();
        let run_one = |(index, partition): (usize, P)| {
            let ctx = PartitionContext {
                index,
                counters: CounterSet::new(),
            };
            debug!(partition = index, "partition started");
            let result = task(partition, &ctx);
            counters.merge(&ctx.counters);
            match &result {
                Ok(_) => info!(partition = index, "partition finished"),
                Err(e) => info!(partition = index, error = %e, "partition failed"),
            }
            result
        };

        let results: Vec<Result<T>> = match self.mode {
            ExecMode::Sequential => partitions.into_iter().enumerate().map(run_one).collect(),
            ExecMode::Parallel { threads } => {
                let threads = threads.unwrap_or_else(num_cpus::get).clamp(1, count.max(1));
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("couchbeam-partition-{i}"))
                    .build()
                    .map_err(|e| BulkIoError::Other(anyhow!(e).context("build worker pool")))?;
                pool.install(|| {
                    partitions
                        .into_par_iter()
                        .enumerate()
                        .map(run_one)
                        .collect()
                })
            }
        };

        results.into_iter().collect()
    }
}
