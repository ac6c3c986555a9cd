//! In-memory fake of the document store.
//!
//! [`FakeStore`] simulates a single-bucket store with views, so every transfer path can be
//! exercised without a cluster. Clones share state, which lets a test keep one handle for
//! scripting and inspection while the code under test opens its own connections.
//!
//! ## Features
//!
//! - **Scripted mutation replies** - queue failure statuses or transport errors that the next
//!   mutations return instead of touching the data
//! - **View-open cancellations** - make the next N view opens fail as cancelled
//! - **Paused bulk-gets** - block bulk-get callers until the test resumes them
//! - **Accounting** - connects, shutdowns, bulk-get batches and mutation calls are recorded
//! - **Untyped mode** - report failures as bare messages, like older store clients

use crate::store::traits::{
    DocumentStore, ErrorKind, OpStatus, StatusCode, StoreConnector, StoreError, StoreResult,
    ViewPages, ViewQuery, ViewRow, ViewTarget,
};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

/// Message reported for mutations on a key that does not exist.
pub const NOT_FOUND_MESSAGE: &str = "Not found";

/// Message reported by ADD when the key is already present.
pub const KEY_EXISTS_MESSAGE: &str = "Data exists for key";

/// Reply a scripted mutation returns instead of executing.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Status(OpStatus),
    Error(StoreError),
}

#[derive(Debug, Clone)]
struct StoredDoc {
    value: Value,
    expiry: u32,
}

#[derive(Default)]
struct FakeState {
    docs: HashMap<String, StoredDoc>,
    views: HashMap<ViewTarget, HashMap<String, Vec<String>>>,
    scripted: VecDeque<ScriptedReply>,
    sticky: Option<ScriptedReply>,
    cancel_view_opens: u32,
    failing_page_fetches: u32,
    failing_connects: u32,
    connects: u64,
    shutdowns: u64,
    view_opens: u64,
    mutations: u64,
    bulk_gets: Vec<Vec<String>>,
    untyped: bool,
}

#[derive(Default)]
struct PauseGate {
    paused: bool,
    waiting: usize,
}

/// Shared in-memory store. See the module docs.
#[derive(Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<FakeState>>,
    gate: Arc<(Mutex<PauseGate>, Condvar)>,
}

impl FakeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that reports failures as bare messages without status codes.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    #[must_use]
    pub fn untyped() -> Self {
        let store = Self::new();
        store.state.lock().expect("state mutex poisoned").untyped = true;
        store
    }

    /// Insert or overwrite a document.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn insert(&self, key: &str, value: Value) {
        self.state
            .lock()
            .expect("state mutex poisoned")
            .docs
            .insert(key.to_string(), StoredDoc { value, expiry: 0 });
    }

    /// Register the rows a view returns for one query key, in order.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn add_view_rows<I, S>(&self, target: &ViewTarget, key: &str, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().expect("state mutex poisoned");
        state
            .views
            .entry(target.clone())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .extend(ids.into_iter().map(Into::into));
    }

    /// Make the next mutation return `reply` without executing.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn push_reply(&self, reply: ScriptedReply) {
        self.state
            .lock()
            .expect("state mutex poisoned")
            .scripted
            .push_back(reply);
    }

    /// Make the next `n` mutations report a temporary failure.
    pub fn fail_next_mutations(&self, n: usize) {
        for _ in 0..n {
            self.push_reply(ScriptedReply::Status(OpStatus::temporary_failure()));
        }
    }

    /// Make every mutation return `reply` until cleared with `None`.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn set_sticky_reply(&self, reply: Option<ScriptedReply>) {
        self.state.lock().expect("state mutex poisoned").sticky = reply;
    }

    /// Make the next `n` view opens fail as cancelled.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn cancel_next_view_opens(&self, n: u32) {
        self.state.lock().expect("state mutex poisoned").cancel_view_opens = n;
    }

    /// Make the next `n` page fetches fail with a network error.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn fail_next_page_fetches(&self, n: u32) {
        self.state.lock().expect("state mutex poisoned").failing_page_fetches = n;
    }

    /// Make the next `n` connection attempts fail with a network error.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    pub fn fail_next_connects(&self, n: u32) {
        self.state.lock().expect("state mutex poisoned").failing_connects = n;
    }

    /// Block bulk-get callers until [`FakeStore::resume_bulk_gets`].
    ///
    /// # Panics
    ///
    /// Panics if the gate mutex is poisoned.
    pub fn pause_bulk_gets(&self) {
        self.gate.0.lock().expect("gate mutex poisoned").paused = true;
    }

    /// Release blocked bulk-get callers.
    ///
    /// # Panics
    ///
    /// Panics if the gate mutex is poisoned.
    pub fn resume_bulk_gets(&self) {
        let (lock, cvar) = &*self.gate;
        lock.lock().expect("gate mutex poisoned").paused = false;
        cvar.notify_all();
    }

    /// Number of bulk-get callers currently blocked on the pause gate.
    ///
    /// # Panics
    ///
    /// Panics if the gate mutex is poisoned.
    #[must_use]
    pub fn waiting_bulk_gets(&self) -> usize {
        self.gate.0.lock().expect("gate mutex poisoned").waiting
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    #[must_use]
    pub fn document(&self, key: &str) -> Option<Value> {
        self.state
            .lock()
            .expect("state mutex poisoned")
            .docs
            .get(key)
            .map(|d| d.value.clone())
    }

    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    #[must_use]
    pub fn expiry_of(&self, key: &str) -> Option<u32> {
        self.state
            .lock()
            .expect("state mutex poisoned")
            .docs
            .get(key)
            .map(|d| d.expiry)
    }

    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().expect("state mutex poisoned").docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.state.lock().expect("state mutex poisoned").connects
    }

    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    #[must_use]
    pub fn shutdowns(&self) -> u64 {
        self.state.lock().expect("state mutex poisoned").shutdowns
    }

    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    #[must_use]
    pub fn view_opens(&self) -> u64 {
        self.state.lock().expect("state mutex poisoned").view_opens
    }

    /// Number of mutation calls that reached the store, scripted ones included.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    #[must_use]
    pub fn mutation_calls(&self) -> u64 {
        self.state.lock().expect("state mutex poisoned").mutations
    }

    /// The key lists of every bulk-get issued so far.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned.
    #[must_use]
    pub fn bulk_get_calls(&self) -> Vec<Vec<String>> {
        self.state.lock().expect("state mutex poisoned").bulk_gets.clone()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn wait_if_paused(&self) {
        let (lock, cvar) = &*self.gate;
        let mut gate = lock.lock().expect("gate mutex poisoned");
        if !gate.paused {
            return;
        }
        gate.waiting += 1;
        while gate.paused {
            gate = cvar.wait(gate).expect("gate mutex poisoned");
        }
        gate.waiting -= 1;
    }

    /// Run a mutation unless a scripted reply preempts it.
    fn mutate<F>(&self, apply: F) -> StoreResult<OpStatus>
    where
        F: FnOnce(&mut HashMap<String, StoredDoc>, bool) -> OpStatus,
    {
        let mut state = self.state.lock().expect("state mutex poisoned");
        state.mutations += 1;
        let scripted = state.scripted.pop_front().or_else(|| state.sticky.clone());
        match scripted {
            Some(ScriptedReply::Status(status)) => Ok(status),
            Some(ScriptedReply::Error(err)) => Err(err),
            None => {
                let untyped = state.untyped;
                Ok(apply(&mut state.docs, untyped))
            }
        }
    }
}

fn failure(untyped: bool, code: StatusCode, message: &str) -> OpStatus {
    if untyped {
        OpStatus::failed(message)
    } else {
        OpStatus::failed_with(code, message)
    }
}

fn raw_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn concat(
    docs: &mut HashMap<String, StoredDoc>,
    untyped: bool,
    key: &str,
    value: &Value,
    append: bool,
) -> OpStatus {
    match docs.get_mut(key) {
        Some(doc) => {
            let (old, new) = (raw_text(&doc.value), raw_text(value));
            doc.value = Value::String(if append { old + &new } else { new + &old });
            OpStatus::ok()
        }
        None => failure(untyped, StatusCode::NotFound, NOT_FOUND_MESSAGE),
    }
}

impl StoreConnector for FakeStore {
    fn connect(&self) -> StoreResult<Box<dyn DocumentStore>> {
        let mut state = self.state.lock().expect("state mutex poisoned");
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(StoreError::new(ErrorKind::Network, "cluster unreachable"));
        }
        state.connects += 1;
        Ok(Box::new(FakeClient {
            store: self.clone(),
            closed: false,
        }))
    }

    fn describe(&self) -> String {
        "fake store".to_string()
    }
}

/// One connection to a [`FakeStore`]. Operations fail once it has been shut down.
struct FakeClient {
    store: FakeStore,
    closed: bool,
}

impl FakeClient {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed {
            return Err(StoreError::new(
                ErrorKind::InternalError,
                "client used after shutdown",
            ));
        }
        Ok(())
    }
}

impl DocumentStore for FakeClient {
    fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        self.ensure_open()?;
        Ok(self.store.document(key))
    }

    fn bulk_get(&self, keys: &[String]) -> StoreResult<HashMap<String, Value>> {
        self.ensure_open()?;
        self.store.wait_if_paused();
        let mut state = self.store.state.lock().expect("state mutex poisoned");
        state.bulk_gets.push(keys.to_vec());
        Ok(keys
            .iter()
            .filter_map(|k| state.docs.get(k).map(|d| (k.clone(), d.value.clone())))
            .collect())
    }

    fn set(&self, key: &str, expiry: u32, value: &Value) -> StoreResult<OpStatus> {
        self.ensure_open()?;
        self.store.mutate(|docs, _| {
            docs.insert(
                key.to_string(),
                StoredDoc {
                    value: value.clone(),
                    expiry,
                },
            );
            OpStatus::ok()
        })
    }

    fn add(&self, key: &str, expiry: u32, value: &Value) -> StoreResult<OpStatus> {
        self.ensure_open()?;
        self.store.mutate(|docs, untyped| {
            if docs.contains_key(key) {
                return failure(untyped, StatusCode::KeyExists, KEY_EXISTS_MESSAGE);
            }
            docs.insert(
                key.to_string(),
                StoredDoc {
                    value: value.clone(),
                    expiry,
                },
            );
            OpStatus::ok()
        })
    }

    fn replace(&self, key: &str, expiry: u32, value: &Value) -> StoreResult<OpStatus> {
        self.ensure_open()?;
        self.store.mutate(|docs, untyped| match docs.get_mut(key) {
            Some(doc) => {
                doc.value = value.clone();
                doc.expiry = expiry;
                OpStatus::ok()
            }
            None => failure(untyped, StatusCode::NotFound, NOT_FOUND_MESSAGE),
        })
    }

    fn append(&self, key: &str, value: &Value) -> StoreResult<OpStatus> {
        self.ensure_open()?;
        self.store
            .mutate(|docs, untyped| concat(docs, untyped, key, value, true))
    }

    fn prepend(&self, key: &str, value: &Value) -> StoreResult<OpStatus> {
        self.ensure_open()?;
        self.store
            .mutate(|docs, untyped| concat(docs, untyped, key, value, false))
    }

    fn delete(&self, key: &str) -> StoreResult<OpStatus> {
        self.ensure_open()?;
        self.store.mutate(|docs, untyped| {
            if docs.remove(key).is_some() {
                OpStatus::ok()
            } else {
                failure(untyped, StatusCode::NotFound, NOT_FOUND_MESSAGE)
            }
        })
    }

    fn touch(&self, key: &str, expiry: u32) -> StoreResult<OpStatus> {
        self.ensure_open()?;
        self.store.mutate(|docs, untyped| match docs.get_mut(key) {
            Some(doc) => {
                doc.expiry = expiry;
                OpStatus::ok()
            }
            None => failure(untyped, StatusCode::NotFound, NOT_FOUND_MESSAGE),
        })
    }

    fn query_view(&self, query: &ViewQuery) -> StoreResult<Box<dyn ViewPages>> {
        self.ensure_open()?;
        let mut state = self.store.state.lock().expect("state mutex poisoned");
        state.view_opens += 1;
        if state.cancel_view_opens > 0 {
            state.cancel_view_opens -= 1;
            return Err(StoreError::new(
                ErrorKind::Cancelled,
                "view query cancelled",
            ));
        }
        let Some(view) = state.views.get(&query.target) else {
            return Err(StoreError::new(
                ErrorKind::NotFound,
                format!("no such view: {}", query.target),
            ));
        };
        let ids = view.get(&query.key).cloned().unwrap_or_default();
        let rows: Vec<ViewRow> = ids
            .into_iter()
            .map(|id| {
                let document = if query.include_docs {
                    state.docs.get(&id).map(|d| d.value.clone())
                } else {
                    None
                };
                ViewRow { id, document }
            })
            .collect();
        Ok(Box::new(FakePages {
            store: self.store.clone(),
            rows: rows.into(),
            page_size: query.page_size.max(1),
        }))
    }

    fn shutdown(&mut self) {
        if !self.closed {
            self.closed = true;
            self.store
                .state
                .lock()
                .expect("state mutex poisoned")
                .shutdowns += 1;
        }
    }
}

struct FakePages {
    store: FakeStore,
    rows: VecDeque<ViewRow>,
    page_size: usize,
}

impl ViewPages for FakePages {
    fn next_page(&mut self) -> StoreResult<Option<Vec<ViewRow>>> {
        {
            let mut state = self.store.state.lock().expect("state mutex poisoned");
            if state.failing_page_fetches > 0 {
                state.failing_page_fetches -= 1;
                return Err(StoreError::new(ErrorKind::Network, "page fetch failed"));
            }
        }
        if self.rows.is_empty() {
            return Ok(None);
        }
        let take = self.page_size.min(self.rows.len());
        Ok(Some(self.rows.drain(..take).collect()))
    }
}
