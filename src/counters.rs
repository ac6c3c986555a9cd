//! Named counters reported to the host framework.
//!
//! The transfer logic only ever adds to counters; aggregation and display belong to the
//! host. [`CounterSet`] is a cheap, cloneable handle to one shared set, so a job can hand a
//! clone to every partition and read the totals afterwards.
//!
//! Zero-valued counters are never created: incrementing by zero is a no-op, which keeps
//! reports limited to what actually happened.
//!
//! # Example
//!
//! ```
//! use couchbeam::counters::{self, CounterSet};
//!
//! let c = CounterSet::new();
//! c.increment(counters::BULKS_COUNT, 1);
//! c.increment(counters::BULK_SIZES_SUM, 42);
//! c.increment(counters::ABANDONED_ITEMS, 0);
//! assert_eq!(c.get(counters::BULK_SIZES_SUM), 42);
//! assert_eq!(c.snapshot().len(), 2);
//! ```

use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// Writer tallies.
pub const NON_EXISTENT_TOUCHED_KEYS: &str = "NON_EXISTENT_TOUCHED_KEYS";
pub const FAILED_STORE_OPERATIONS: &str = "FAILED_STORE_OPERATIONS";
pub const TIMEOUT_OPERATIONS: &str = "TIMEOUT_OPERATIONS";
pub const TOTAL_TIMEOUT: &str = "TOTAL_TIMEOUT";
pub const EXISTENT_KEYS: &str = "EXISTENT_KEYS";
pub const SUCCESSFUL_STORE_OPERATIONS: &str = "SUCCESSFUL_STORE_OPERATIONS";
pub const SKIPPED_ACTIONS: &str = "SKIPPED_ACTIONS";

// Update pipeline.
pub const QUEUE_PUT_TIMES_SUM: &str = "QUEUE_PUT_TIMES_SUM";
pub const QUEUE_TAKE_TIMES_SUM: &str = "QUEUE_TAKE_TIMES_SUM";
pub const BULKS_COUNT: &str = "BULKS_COUNT";
pub const BULK_SIZES_SUM: &str = "BULK_SIZES_SUM";
pub const ABANDONED_ITEMS: &str = "ABANDONED_ITEMS";

// Readers and mappers.
pub const ROWS_READ: &str = "ROWS_READ";
pub const KEYS_READ: &str = "KEYS_READ";
pub const LINES_READ: &str = "LINES_READ";
pub const LINES_WITH_WRONG_COLUMNS_COUNT: &str = "LINES_WITH_WRONG_COLUMNS_COUNT";
pub const NULL_DOCS: &str = "NULL_DOCS";

/// Name of the counter for backoff retry number `attempt`.
#[must_use]
pub fn backoff_counter(attempt: usize) -> String {
    format!("EXP_BACKOFF_COUNT_FOR_TRY_{attempt}")
}

/// Thread-safe set of named `u64` counters.
#[derive(Clone, Default)]
pub struct CounterSet {
    inner: Arc<Mutex<CounterSetInner>>,
}

#[derive(Default)]
struct CounterSetInner {
    counters: BTreeMap<String, u64>,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
}

impl CounterSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` to a counter, creating it on first use. Adding zero does nothing.
    ///
    /// # Panics
    ///
    /// Panics if the counters mutex is poisoned.
    pub fn increment(&self, name: &str, value: u64) {
        if value == 0 {
            return;
        }
        let mut inner = self.inner.lock().expect("counters mutex poisoned");
        let slot = inner.counters.entry(name.to_string()).or_insert(0);
        *slot = slot.saturating_add(value);
    }

    /// Overwrite a counter.
    ///
    /// # Panics
    ///
    /// Panics if the counters mutex is poisoned.
    pub fn set(&self, name: &str, value: u64) {
        self.inner
            .lock()
            .expect("counters mutex poisoned")
            .counters
            .insert(name.to_string(), value);
    }

    /// Current value of a counter; absent counters read as zero.
    ///
    /// # Panics
    ///
    /// Panics if the counters mutex is poisoned.
    #[must_use]
    pub fn get(&self, name: &str) -> u64 {
        self.inner
            .lock()
            .expect("counters mutex poisoned")
            .counters
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Add every counter of `other` into this set.
    pub fn merge(&self, other: &Self) {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return;
        }
        for (name, value) in other.snapshot() {
            self.increment(&name, value);
        }
    }

    /// All counters, sorted by name.
    ///
    /// # Panics
    ///
    /// Panics if the counters mutex is poisoned.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.inner
            .lock()
            .expect("counters mutex poisoned")
            .counters
            .clone()
    }

    /// # Panics
    ///
    /// Panics if the counters mutex is poisoned.
    pub fn record_start(&self) {
        self.inner.lock().expect("counters mutex poisoned").start_time = Some(Instant::now());
    }

    /// # Panics
    ///
    /// Panics if the counters mutex is poisoned.
    pub fn record_end(&self) {
        self.inner.lock().expect("counters mutex poisoned").end_time = Some(Instant::now());
    }

    /// Time between [`CounterSet::record_start`] and [`CounterSet::record_end`].
    ///
    /// # Panics
    ///
    /// Panics if the counters mutex is poisoned.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        let inner = self.inner.lock().expect("counters mutex poisoned");
        match (inner.start_time, inner.end_time) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }

    /// Counters as a JSON object, plus `execution_time_ms` when timing was recorded.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut map: serde_json::Map<String, Value> = self
            .snapshot()
            .into_iter()
            .map(|(name, value)| (name, json!(value)))
            .collect();
        if let Some(elapsed) = self.elapsed() {
            map.insert(
                "execution_time_ms".to_string(),
                json!(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)),
            );
        }
        Value::Object(map)
    }

    /// Print all counters to stdout.
    pub fn print(&self) {
        println!("\n========== Transfer Counters ==========");
        if let Some(elapsed) = self.elapsed() {
            println!(
                "Execution Time: {:.3}s ({} ms)",
                elapsed.as_secs_f64(),
                elapsed.as_millis()
            );
            println!("---------------------------------------");
        }
        for (name, value) in self.snapshot() {
            println!("{name}: {value}");
        }
        println!("=======================================\n");
    }

    /// Save all counters to a pretty-printed JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written to.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let formatted = serde_json::to_string_pretty(&self.to_json())?;
        let mut file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        file.write_all(formatted.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}

impl std::fmt::Debug for CounterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.snapshot()).finish()
    }
}
