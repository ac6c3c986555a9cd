//! Test doubles for the writer and sink seams.

use crate::error::{BulkIoError, Result};
use crate::task::RecordSink;
use crate::writer::Sleeper;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A [`Sleeper`] that records requested delays instead of sleeping.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in order.
    ///
    /// # Panics
    ///
    /// Panics if the sleeps mutex is poisoned.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("sleeps mutex poisoned").clone()
    }

    /// Sum of all requested delays.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .expect("sleeps mutex poisoned")
            .push(duration);
    }
}

/// A [`RecordSink`] that keeps every record in memory. Clones share the same buffer.
#[derive(Debug)]
pub struct CollectingSink<K, V> {
    records: Arc<Mutex<Vec<(K, V)>>>,
    closes: Arc<Mutex<u32>>,
    fail_at: Option<usize>,
}

impl<K, V> Clone for CollectingSink<K, V> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
            closes: Arc::clone(&self.closes),
            fail_at: self.fail_at,
        }
    }
}

impl<K, V> Default for CollectingSink<K, V> {
    fn default() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(Mutex::new(0)),
            fail_at: None,
        }
    }
}

impl<K: Clone, V: Clone> CollectingSink<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the record with zero-based position `index` instead of storing it.
    #[must_use]
    pub const fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// # Panics
    ///
    /// Panics if the records mutex is poisoned.
    #[must_use]
    pub fn records(&self) -> Vec<(K, V)> {
        self.records.lock().expect("records mutex poisoned").clone()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        self.records().into_iter().map(|(k, _)| k).collect()
    }

    /// How often `close` was called.
    ///
    /// # Panics
    ///
    /// Panics if the closes mutex is poisoned.
    #[must_use]
    pub fn closes(&self) -> u32 {
        *self.closes.lock().expect("closes mutex poisoned")
    }
}

impl<K, V> RecordSink<K, V> for CollectingSink<K, V> {
    fn emit(&mut self, key: K, value: V) -> Result<()> {
        let mut records = self.records.lock().expect("records mutex poisoned");
        if self.fail_at == Some(records.len()) {
            self.fail_at = None;
            return Err(BulkIoError::WorkerFailed(format!(
                "sink rejected record {}",
                records.len()
            )));
        }
        records.push((key, value));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        *self.closes.lock().expect("closes mutex poisoned") += 1;
        Ok(())
    }
}
