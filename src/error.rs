//! Error taxonomy for bulk transfers.
//!
//! Each variant maps to a distinct operational cause, so a failed job tells an operator
//! whether the input was bad ([`BulkIoError::MalformedKeySpec`]), the store was unreachable
//! ([`BulkIoError::ConnectExhausted`]) or the store was overloaded
//! ([`BulkIoError::FatalTimeout`]). Transient store failures never appear here: they are
//! absorbed by the backoff loop unless they degrade into a fatal timeout.

use crate::store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BulkIoError>;

#[derive(Debug, Error)]
pub enum BulkIoError {
    /// The view key specification could not be parsed. Fatal to job setup.
    #[error("malformed key spec {spec:?}: {reason}")]
    MalformedKeySpec { spec: String, reason: String },

    /// Opening a view query kept getting cancelled. Fatal to the partition.
    #[error("gave up opening view query for key {key:?} after {attempts} attempts: {source}")]
    ConnectExhausted {
        key: String,
        attempts: u32,
        source: StoreError,
    },

    /// A non-retryable store failure outside the write path.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The cumulative backoff budget for one record ran out.
    #[error(
        "store unhealthy: write for key {key:?} exceeded the retry budget ({waited_ms} ms over {attempts} retries)"
    )]
    FatalTimeout {
        key: String,
        waited_ms: u64,
        attempts: u32,
    },

    /// A caller-supplied merge function failed.
    #[error("merge failed for key {key:?}: {message}")]
    Merge { key: String, message: String },

    /// The background update worker stopped on an earlier error.
    #[error("update worker failed: {0}")]
    WorkerFailed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BulkIoError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn malformed(spec: &str, reason: impl Into<String>) -> Self {
        Self::MalformedKeySpec {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }
}
