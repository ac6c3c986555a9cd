//! Writing store actions with exponential backoff.
//!
//! [`BackoffWriter`] issues one store mutation per record. A transient failure (the store's
//! "Temporary failure" status, or a cancelled operation) is retried after
//! `min(2^attempt * base, max_retry_interval)` milliseconds, where `attempt` starts at 0.
//! Three independent ceilings end the loop:
//!
//! - a non-transient failure ends it at once with [`WriteOutcome::FailedExhausted`]
//! - `max_tries` retries end it with [`WriteOutcome::FailedExhausted`]
//! - once the cumulative wait reaches `max_total_timeout`, the record fails with
//!   [`WriteOutcome::FailedFatalTimeout`], which callers must treat as fatal to the unit of
//!   work: the store is unhealthy beyond the allowed budget
//!
//! Sleeping blocks the calling thread on purpose. One writer serves one partition serially,
//! and a partition should not race ahead of a struggling store.

use crate::action::{StoreAction, StoreOperation};
use crate::counters::{self, CounterSet};
use crate::error::{BulkIoError, Result};
use crate::store::{ErrorKind, OpStatus, StoreConnector, StoreHandle, StoreResult};
use crate::task::RecordSink;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Retries allowed per record before a transient failure is given up on.
    pub max_tries: u32,
    /// Upper bound of a single backoff delay.
    pub max_retry_interval_ms: u64,
    /// Cumulative backoff per record after which the write is fatal.
    pub max_total_timeout_ms: u64,
    /// Delay of the first retry; doubles per attempt.
    pub base_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_tries: 16,
            max_retry_interval_ms: 1000,
            max_total_timeout_ms: 60_000,
            base_delay_ms: 1,
        }
    }
}

impl BackoffConfig {
    /// Backoff before retry number `attempt + 1`.
    #[must_use]
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        1u64.checked_shl(attempt)
            .unwrap_or(u64::MAX)
            .saturating_mul(self.base_delay_ms)
            .min(self.max_retry_interval_ms)
    }
}

/// Blocks the calling thread between retries.
pub trait Sleeper: Send {
    fn sleep(&self, duration: Duration);
}

/// Sleeps for real.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

// ============================================================================
// Outcomes and tallies
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Success,
    /// The action was `NONE`; the store was not contacted.
    SkippedNoop,
    FailedExhausted,
    FailedFatalTimeout,
}

/// Retry bookkeeping of one `write` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub cumulative_delay_ms: u64,
}

/// Outcome tallies of one writer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub successful: u64,
    pub skipped: u64,
    pub failed_store_operations: u64,
    pub timeout_operations: u64,
    pub total_timeout_ms: u64,
    pub existent_keys: u64,
    pub non_existent_touched_keys: u64,
    /// Index `i` counts how often retry number `i` happened. Index 0 stays zero. Grows with
    /// the deepest retry seen, not with `max_tries`.
    pub retries_per_attempt: Vec<u64>,
}

impl WriterStats {
    fn record_retry(&mut self, attempt: u32) {
        let i = attempt as usize;
        if self.retries_per_attempt.len() <= i {
            self.retries_per_attempt.resize(i + 1, 0);
        }
        self.retries_per_attempt[i] += 1;
    }

    /// Add these tallies to `counters`. Zero tallies are left out.
    pub fn publish(&self, counters: &CounterSet) {
        counters.increment(counters::SUCCESSFUL_STORE_OPERATIONS, self.successful);
        counters.increment(counters::SKIPPED_ACTIONS, self.skipped);
        counters.increment(counters::FAILED_STORE_OPERATIONS, self.failed_store_operations);
        counters.increment(counters::TIMEOUT_OPERATIONS, self.timeout_operations);
        counters.increment(counters::TOTAL_TIMEOUT, self.total_timeout_ms);
        counters.increment(counters::EXISTENT_KEYS, self.existent_keys);
        counters.increment(
            counters::NON_EXISTENT_TOUCHED_KEYS,
            self.non_existent_touched_keys,
        );
        for (i, n) in self.retries_per_attempt.iter().enumerate() {
            counters.increment(&counters::backoff_counter(i), *n);
        }
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Per-partition store writer. See the module docs for the retry policy.
pub struct BackoffWriter {
    handle: StoreHandle,
    config: BackoffConfig,
    sleeper: Box<dyn Sleeper>,
    stats: WriterStats,
    last: RetryState,
    counters: Option<CounterSet>,
    published: bool,
}

impl BackoffWriter {
    #[must_use]
    pub fn new(connector: Arc<dyn StoreConnector>, config: BackoffConfig) -> Self {
        Self {
            handle: StoreHandle::new(connector),
            config,
            sleeper: Box::new(ThreadSleeper),
            stats: WriterStats::default(),
            last: RetryState::default(),
            counters: None,
            published: false,
        }
    }

    /// Replace the sleeper, typically with a recording one in tests.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    /// Publish the tallies into `counters` when the writer is closed.
    #[must_use]
    pub fn with_counters(mut self, counters: CounterSet) -> Self {
        self.counters = Some(counters);
        self
    }

    /// Apply `action` to `key`, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns an error only if no connection to the store can be opened. Store-side
    /// failures are reported through the outcome.
    pub fn write(&mut self, key: &str, action: &StoreAction) -> Result<WriteOutcome> {
        self.last = RetryState::default();
        if action.is_noop() {
            self.stats.skipped += 1;
            return Ok(WriteOutcome::SkippedNoop);
        }

        let mut retry = RetryState::default();
        loop {
            let status = self.dispatch(key, action)?;
            if status.is_success() {
                self.stats.successful += 1;
                self.last = retry;
                return Ok(WriteOutcome::Success);
            }

            if !status.is_temporary_failure() || retry.attempt >= self.config.max_tries {
                self.tally_failure(action.operation, &status);
                self.last = retry;
                debug!(key, operation = %action.operation, status = %status, retries = retry.attempt, "store operation failed");
                return Ok(WriteOutcome::FailedExhausted);
            }

            let delay = self.config.delay_ms(retry.attempt);
            self.sleeper.sleep(Duration::from_millis(delay));
            retry.attempt += 1;
            retry.cumulative_delay_ms = retry.cumulative_delay_ms.saturating_add(delay);
            self.stats.total_timeout_ms = self.stats.total_timeout_ms.saturating_add(delay);
            self.stats.record_retry(retry.attempt);
            debug!(key, attempt = retry.attempt, delay_ms = delay, "retrying after temporary failure");

            if retry.cumulative_delay_ms >= self.config.max_total_timeout_ms {
                self.stats.failed_store_operations += 1;
                self.last = retry;
                warn!(
                    key,
                    waited_ms = retry.cumulative_delay_ms,
                    retries = retry.attempt,
                    "retry budget exhausted, store looks unhealthy"
                );
                return Ok(WriteOutcome::FailedFatalTimeout);
            }
        }
    }

    /// Retry bookkeeping of the most recent `write`.
    #[must_use]
    pub const fn last_retry_state(&self) -> RetryState {
        self.last
    }

    #[must_use]
    pub const fn stats(&self) -> &WriterStats {
        &self.stats
    }

    #[must_use]
    pub const fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Release the connection and publish tallies. Idempotent.
    pub fn close(&mut self) {
        self.handle.close();
        if !self.published {
            self.published = true;
            if let Some(counters) = &self.counters {
                self.stats.publish(counters);
            }
            info!(
                written = self.stats.successful,
                failed = self.stats.failed_store_operations,
                skipped = self.stats.skipped,
                "writer closed"
            );
        }
    }

    fn dispatch(&mut self, key: &str, action: &StoreAction) -> Result<OpStatus> {
        let client = self.handle.client()?;
        let expiry = action.expiry;
        let null = serde_json::Value::Null;
        let value = action.value.as_ref().unwrap_or(&null);
        let result: StoreResult<OpStatus> = match action.operation {
            StoreOperation::Set => client.set(key, expiry, value),
            StoreOperation::Add => client.add(key, expiry, value),
            StoreOperation::Replace => client.replace(key, expiry, value),
            StoreOperation::Append => client.append(key, value),
            StoreOperation::Prepend => client.prepend(key, value),
            StoreOperation::Delete => client.delete(key),
            StoreOperation::Touch => client.touch(key, expiry),
            StoreOperation::None => Ok(OpStatus::ok()),
        };
        Ok(result.unwrap_or_else(|err| {
            if err.kind == ErrorKind::Timeout {
                self.stats.timeout_operations += 1;
            }
            OpStatus::from_error(&err)
        }))
    }

    fn tally_failure(&mut self, operation: StoreOperation, status: &OpStatus) {
        self.stats.failed_store_operations += 1;
        match operation {
            StoreOperation::Add if status.indicates_existing_key() => self.stats.existent_keys += 1,
            StoreOperation::Touch if !status.is_temporary_failure() => {
                self.stats.non_existent_touched_keys += 1;
            }
            _ => {}
        }
    }
}

impl Drop for BackoffWriter {
    fn drop(&mut self) {
        self.close();
    }
}

impl RecordSink<String, StoreAction> for BackoffWriter {
    /// Write one action; a fatal timeout becomes [`BulkIoError::FatalTimeout`].
    fn emit(&mut self, key: String, action: StoreAction) -> Result<()> {
        match self.write(&key, &action)? {
            WriteOutcome::FailedFatalTimeout => Err(BulkIoError::FatalTimeout {
                key,
                waited_ms: self.last.cumulative_delay_ms,
                attempts: self.last.attempt,
            }),
            _ => Ok(()),
        }
    }

    fn close(&mut self) -> Result<()> {
        Self::close(self);
        Ok(())
    }
}
