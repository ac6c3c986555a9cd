//! Owned store connection that is shut down exactly once.

use crate::store::traits::{DocumentStore, ErrorKind, StoreConnector, StoreError, StoreResult};
use std::sync::Arc;
use tracing::info;

/// A lazily opened, exclusively owned store connection.
///
/// The handle connects on first use, can be closed explicitly any number of times (only
/// the first close reaches the store), and closes itself when dropped. After a close the
/// next [`StoreHandle::client`] call opens a fresh connection, so a stale client is never
/// reused.
pub struct StoreHandle {
    connector: Arc<dyn StoreConnector>,
    client: Option<Box<dyn DocumentStore>>,
    connects: u64,
}

impl StoreHandle {
    #[must_use]
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            connector,
            client: None,
            connects: 0,
        }
    }

    /// Open a handle and connect immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open(connector: Arc<dyn StoreConnector>) -> StoreResult<Self> {
        let mut handle = Self::new(connector);
        handle.client()?;
        Ok(handle)
    }

    /// The open client, connecting first if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn client(&mut self) -> StoreResult<&dyn DocumentStore> {
        if self.client.is_none() {
            info!(store = %self.connector.describe(), "connecting to store");
            let client = self.connector.connect()?;
            self.connects += 1;
            self.client = Some(client);
        }
        self.client
            .as_deref()
            .ok_or_else(|| StoreError::new(ErrorKind::InternalError, "store handle has no client"))
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.client.is_some()
    }

    /// Number of connections opened through this handle.
    #[must_use]
    pub const fn connects(&self) -> u64 {
        self.connects
    }

    /// Shut down the current connection, if any. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut client) = self.client.take() {
            info!(store = %self.connector.describe(), "disconnecting from store");
            client.shutdown();
        }
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        self.close();
    }
}
