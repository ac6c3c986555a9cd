//! Core traits for talking to the document store.
//!
//! The store's wire protocol is out of scope; these traits describe the capability the
//! transfer logic needs and nothing more. All operations are blocking, matching the
//! one-thread-per-partition execution model.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;

/// Message the store client reports for a retryable mutation failure.
pub const TEMPORARY_FAILURE_MESSAGE: &str = "Temporary failure";

/// Substring the store client uses when a mutation hits a key that already exists.
pub const KEY_EXISTS_FRAGMENT: &str = "exists";

// ============================================================================
// Core Error Type
// ============================================================================

/// Transport-level error raised by a store client.
#[derive(Debug, Clone)]
pub struct StoreError {
    pub message: String,
    pub kind: ErrorKind,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    NotFound,
    AlreadyExists,
    InvalidInput,
    Network,
    Timeout,
    /// The client cancelled the operation, typically because a node went away mid-flight.
    Cancelled,
    TemporaryFailure,
    InternalError,
    Other,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for StoreError {}

impl StoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Whether the operation was cancelled by the client.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled | ErrorKind::TemporaryFailure)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Mutation status
// ============================================================================

/// Structured status codes, for clients that expose them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    TemporaryFailure,
    KeyExists,
    NotFound,
    Cancelled,
    Timeout,
    Other,
}

/// Outcome of a single mutation as reported by the store client.
///
/// Older clients only report a boolean and a human-readable message. Newer ones also
/// carry a [`StatusCode`]. The predicates below prefer the code and fall back to matching
/// the message text verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpStatus {
    pub success: bool,
    pub code: Option<StatusCode>,
    pub message: String,
}

impl OpStatus {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            code: Some(StatusCode::Success),
            message: "OK".to_string(),
        }
    }

    /// A failed status carrying only a message, as untyped clients report it.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            code: None,
            message: message.into(),
        }
    }

    /// A failed status with a structured code.
    pub fn failed_with(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn temporary_failure() -> Self {
        Self::failed(TEMPORARY_FAILURE_MESSAGE)
    }

    /// Convert a transport error into the status the writer reasons about.
    #[must_use]
    pub fn from_error(err: &StoreError) -> Self {
        let code = match err.kind {
            ErrorKind::Cancelled => StatusCode::Cancelled,
            ErrorKind::TemporaryFailure => StatusCode::TemporaryFailure,
            ErrorKind::Timeout => StatusCode::Timeout,
            ErrorKind::NotFound => StatusCode::NotFound,
            ErrorKind::AlreadyExists => StatusCode::KeyExists,
            _ => StatusCode::Other,
        };
        Self::failed_with(code, err.message.clone())
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.success
    }

    /// Whether this failure should be retried with backoff.
    #[must_use]
    pub fn is_temporary_failure(&self) -> bool {
        if self.success {
            return false;
        }
        match self.code {
            Some(StatusCode::TemporaryFailure | StatusCode::Cancelled) => true,
            Some(StatusCode::Other) | None => self.message == TEMPORARY_FAILURE_MESSAGE,
            Some(_) => false,
        }
    }

    /// Whether this failure reports that the key was already present.
    #[must_use]
    pub fn indicates_existing_key(&self) -> bool {
        if self.success {
            return false;
        }
        match self.code {
            Some(StatusCode::KeyExists) => true,
            Some(StatusCode::Other) | None => self.message.contains(KEY_EXISTS_FRAGMENT),
            Some(_) => false,
        }
    }
}

impl fmt::Display for OpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{code:?}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

// ============================================================================
// Views
// ============================================================================

/// One result row of a view query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRow {
    pub id: String,
    /// Present only when the query asked for documents and the document still exists.
    pub document: Option<Value>,
}

impl ViewRow {
    pub fn new(id: impl Into<String>, document: Option<Value>) -> Self {
        Self {
            id: id.into(),
            document,
        }
    }
}

/// A design document / view pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewTarget {
    pub design_doc: String,
    pub view: String,
}

impl ViewTarget {
    pub fn new(design_doc: impl Into<String>, view: impl Into<String>) -> Self {
        Self {
            design_doc: design_doc.into(),
            view: view.into(),
        }
    }
}

impl fmt::Display for ViewTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_design/{}/_view/{}", self.design_doc, self.view)
    }
}

/// A paginated, single-key view query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewQuery {
    pub target: ViewTarget,
    pub key: String,
    pub include_docs: bool,
    pub page_size: usize,
}

/// Page-wise cursor over the rows of one view query.
pub trait ViewPages: Send {
    /// Fetch the next page. `Ok(None)` means the query is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be fetched.
    fn next_page(&mut self) -> StoreResult<Option<Vec<ViewRow>>>;
}

// ============================================================================
// Store client capability
// ============================================================================

/// An open connection to the document store.
///
/// A connection is exclusively owned by the component that opened it and must be shut
/// down exactly once; [`crate::store::StoreHandle`] enforces that.
pub trait DocumentStore: Send {
    /// Get one document.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Get many documents in a single round trip. Missing keys are absent from the map.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    fn bulk_get(&self, keys: &[String]) -> StoreResult<HashMap<String, Value>>;

    /// Unconditionally store a document.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure; store-side rejections are reported in the status.
    fn set(&self, key: &str, expiry: u32, value: &Value) -> StoreResult<OpStatus>;

    /// Store a document only if the key does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure; store-side rejections are reported in the status.
    fn add(&self, key: &str, expiry: u32, value: &Value) -> StoreResult<OpStatus>;

    /// Store a document only if the key already exists.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure; store-side rejections are reported in the status.
    fn replace(&self, key: &str, expiry: u32, value: &Value) -> StoreResult<OpStatus>;

    /// Append raw content to an existing document.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure; store-side rejections are reported in the status.
    fn append(&self, key: &str, value: &Value) -> StoreResult<OpStatus>;

    /// Prepend raw content to an existing document.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure; store-side rejections are reported in the status.
    fn prepend(&self, key: &str, value: &Value) -> StoreResult<OpStatus>;

    /// Delete a document.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure; store-side rejections are reported in the status.
    fn delete(&self, key: &str) -> StoreResult<OpStatus>;

    /// Re-stamp a document's expiry. Fails with a not-found status for missing keys, which
    /// makes it usable as an existence check.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure; store-side rejections are reported in the status.
    fn touch(&self, key: &str, expiry: u32) -> StoreResult<OpStatus>;

    /// Open a paginated view query.
    ///
    /// # Errors
    ///
    /// Returns an error if the view does not exist or the query cannot be opened. A
    /// cancelled open is reported with [`ErrorKind::Cancelled`].
    fn query_view(&self, query: &ViewQuery) -> StoreResult<Box<dyn ViewPages>>;

    /// Release the connection.
    fn shutdown(&mut self);
}

/// Factory for store connections; shared across partitions, each of which opens its own.
pub trait StoreConnector: Send + Sync {
    /// Open a new connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster cannot be reached or the credentials are rejected.
    fn connect(&self) -> StoreResult<Box<dyn DocumentStore>>;

    /// A short human-readable description of where this connector points.
    fn describe(&self) -> String {
        "document store".to_string()
    }
}
