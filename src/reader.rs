//! Paginated, resumable reading of a view over one partition of keys.
//!
//! [`PaginatedViewReader`] walks the partition's keys in order, opens one document-inclusive
//! paginated query per key and yields rows page by page. Rows come out in key order, then
//! page order, then row order within a page.
//!
//! ## Reconnects
//!
//! A store client may cancel a query open when a cluster node goes away. The reader treats
//! that as a connection-level fault: it shuts the connection down, reconnects and re-opens the
//! same key, up to `connect_retries` extra attempts back to back. Any other error, and a
//! cancellation past the retry budget, ends the partition.
//!
//! ## Lifecycle
//!
//! ```text
//! Unstarted -> Connecting -> Querying -> HasRow / Drained -> Closed
//!                  ^            |
//!                  +------------+  (next key, or reconnect after a cancellation)
//! ```
//!
//! The connection is owned by the reader and released exactly once, on [`close`], on the
//! first error, or on drop.
//!
//! [`close`]: PaginatedViewReader::close

use crate::error::{BulkIoError, Result};
use crate::store::{StoreConnector, StoreHandle, ViewPages, ViewQuery, ViewRow, ViewTarget};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// Rows fetched per view page unless configured otherwise.
pub const DEFAULT_PAGE_SIZE: usize = 1024;

/// Extra attempts to open a query after a cancellation.
pub const DEFAULT_CONNECT_RETRIES: u32 = 5;

/// What a reader queries and how.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub target: ViewTarget,
    pub page_size: usize,
    pub connect_retries: u32,
    pub include_docs: bool,
}

impl ReaderConfig {
    #[must_use]
    pub const fn new(target: ViewTarget) -> Self {
        Self {
            target,
            page_size: DEFAULT_PAGE_SIZE,
            connect_retries: DEFAULT_CONNECT_RETRIES,
            include_docs: true,
        }
    }

    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub const fn with_connect_retries(mut self, retries: u32) -> Self {
        self.connect_retries = retries;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Unstarted,
    Connecting,
    Querying,
    HasRow,
    Drained,
    Closed,
}

pub struct PaginatedViewReader {
    config: ReaderConfig,
    handle: StoreHandle,
    pending: VecDeque<String>,
    total_keys: usize,
    current_key: Option<String>,
    pages: Option<Box<dyn ViewPages>>,
    page: VecDeque<ViewRow>,
    state: ReaderState,
    rows_read: u64,
}

impl PaginatedViewReader {
    /// Create a reader over `keys`. Nothing is opened until the first row is requested.
    #[must_use]
    pub fn new(connector: Arc<dyn StoreConnector>, config: ReaderConfig, keys: Vec<String>) -> Self {
        Self {
            config,
            handle: StoreHandle::new(connector),
            total_keys: keys.len(),
            pending: keys.into(),
            current_key: None,
            pages: None,
            page: VecDeque::new(),
            state: ReaderState::Unstarted,
            rows_read: 0,
        }
    }

    /// The next row of the partition, or `None` once every key is drained.
    ///
    /// # Errors
    ///
    /// Returns [`BulkIoError::ConnectExhausted`] if opening a key keeps getting cancelled, and
    /// [`BulkIoError::Store`] for any other store failure. The reader is closed on error.
    pub fn next_row(&mut self) -> Result<Option<ViewRow>> {
        loop {
            if matches!(self.state, ReaderState::Drained | ReaderState::Closed) {
                return Ok(None);
            }
            if let Some(row) = self.page.pop_front() {
                self.state = ReaderState::HasRow;
                self.rows_read += 1;
                return Ok(Some(row));
            }
            if !self.advance_or_close()? {
                return Ok(None);
            }
        }
    }

    /// The rest of the current page, or the next non-empty page.
    ///
    /// # Errors
    ///
    /// Same as [`PaginatedViewReader::next_row`].
    pub fn next_page(&mut self) -> Result<Option<Vec<ViewRow>>> {
        loop {
            if matches!(self.state, ReaderState::Drained | ReaderState::Closed) {
                return Ok(None);
            }
            if !self.page.is_empty() {
                let rows: Vec<ViewRow> = self.page.drain(..).collect();
                self.state = ReaderState::HasRow;
                self.rows_read += rows.len() as u64;
                return Ok(Some(rows));
            }
            if !self.advance_or_close()? {
                return Ok(None);
            }
        }
    }

    /// Fraction of the partition's keys started so far. An empty partition reports `1.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self) -> f32 {
        if self.total_keys == 0 {
            return 1.0;
        }
        self.keys_started() as f32 / self.total_keys as f32
    }

    #[must_use]
    pub fn keys_started(&self) -> usize {
        self.total_keys - self.pending.len()
    }

    #[must_use]
    pub const fn rows_read(&self) -> u64 {
        self.rows_read
    }

    #[must_use]
    pub const fn state(&self) -> ReaderState {
        self.state
    }

    /// The key whose query is currently open.
    #[must_use]
    pub fn current_key(&self) -> Option<&str> {
        self.current_key.as_deref()
    }

    /// Connections opened so far, reconnects included.
    #[must_use]
    pub const fn connects(&self) -> u64 {
        self.handle.connects()
    }

    /// Release the connection. Safe to call more than once.
    pub fn close(&mut self) {
        self.pages = None;
        self.page.clear();
        self.handle.close();
        self.state = ReaderState::Closed;
    }

    fn advance_or_close(&mut self) -> Result<bool> {
        self.advance().inspect_err(|_| self.close())
    }

    /// Load the next page into the buffer, moving on to the next key when the current query
    /// is exhausted. Returns `false` once the partition is drained.
    fn advance(&mut self) -> Result<bool> {
        if let Some(pages) = self.pages.as_mut() {
            if let Some(rows) = pages.next_page()? {
                self.page = rows.into();
                return Ok(true);
            }
            self.pages = None;
        }

        match self.pending.pop_front() {
            Some(key) => {
                self.open_query(key)?;
                Ok(true)
            }
            None => {
                self.current_key = None;
                self.state = ReaderState::Drained;
                Ok(false)
            }
        }
    }

    fn open_query(&mut self, key: String) -> Result<()> {
        let query = ViewQuery {
            target: self.config.target.clone(),
            key,
            include_docs: self.config.include_docs,
            page_size: self.config.page_size,
        };
        let attempts = self.config.connect_retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.state = ReaderState::Connecting;
            debug!(key = %query.key, view = %query.target, attempt, "opening view query");

            match self.handle.client().and_then(|c| c.query_view(&query)) {
                Ok(pages) => {
                    self.pages = Some(pages);
                    self.current_key = Some(query.key);
                    self.state = ReaderState::Querying;
                    return Ok(());
                }
                Err(err) if err.is_cancellation() => {
                    self.handle.close();
                    if attempt >= attempts {
                        return Err(BulkIoError::ConnectExhausted {
                            key: query.key,
                            attempts: attempt,
                            source: err,
                        });
                    }
                    warn!(key = %query.key, attempt, error = %err, "view query cancelled, reconnecting");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl Iterator for PaginatedViewReader {
    type Item = Result<(String, ViewRow)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row()
            .map(|row| row.map(|r| (r.id.clone(), r)))
            .transpose()
    }
}
