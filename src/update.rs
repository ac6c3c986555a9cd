//! Bulk update pipeline: bounded queue, one batching consumer, one bulk-get per batch.
//!
//! Producers hand records to [`BulkUpdatePipeline::submit`]. The mapper turns each record
//! into a [`BulkInput`] (a store key plus a side payload) and the input is queued. A full
//! queue blocks the producer, which bounds memory when the store is slower than the input.
//!
//! A single background worker blocks until one input is available, then takes up to
//! `bulk_size - 1` more inputs that are already queued, without waiting for new ones. It
//! fetches the batch's distinct keys with one bulk-get, merges every input with its fetched
//! document (or `None`), and emits the resulting action downstream, usually into a
//! [`BackoffWriter`](crate::writer::BackoffWriter).
//!
//! ## Failures
//!
//! A failing merge or a fatal downstream error stops the rest of the current batch. The
//! worker keeps serving later batches, but the first error is recorded: further submits fail
//! with [`BulkIoError::WorkerFailed`] and [`BulkUpdatePipeline::finish`] returns it.
//!
//! ## Shutdown
//!
//! [`ShutdownMode::Drain`] closes the queue and waits until everything queued is processed.
//! [`ShutdownMode::Abandon`] stops the worker after its current batch; whatever is still
//! queued is dropped and reported in `ABANDONED_ITEMS`.

use crate::action::StoreAction;
use crate::counters::{self, CounterSet};
use crate::error::{BulkIoError, Result};
use crate::store::{StoreConnector, StoreHandle};
use crate::task::RecordSink;
use crossbeam_channel as xchan;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;
pub const DEFAULT_BULK_SIZE: usize = 1024;

/// A store key paired with data from the input record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkInput<T> {
    pub store_key: String,
    pub payload: T,
}

impl<T> BulkInput<T> {
    pub fn new(store_key: impl Into<String>, payload: T) -> Self {
        Self {
            store_key: store_key.into(),
            payload,
        }
    }
}

/// Use-case logic plugged into the pipeline.
pub trait UpdateMapper<R>: Send + Sync {
    type Payload: Send + 'static;

    /// Turn an input record into a queued input, or `None` to skip it.
    fn transform(&self, record: &R) -> Option<BulkInput<Self::Payload>>;

    /// Decide what to write for `key`. `fetched` is `None` when the store has no document;
    /// return [`StoreAction::none`] to write nothing.
    ///
    /// # Errors
    ///
    /// An error aborts the rest of the batch and fails the pipeline. It is never retried.
    fn merge(
        &self,
        key: &str,
        payload: Self::Payload,
        fetched: Option<&Value>,
        counters: &CounterSet,
    ) -> anyhow::Result<StoreAction>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Process everything still queued, then stop.
    #[default]
    Drain,
    /// Stop after the current batch and drop what is still queued.
    Abandon,
}

impl FromStr for ShutdownMode {
    type Err = BulkIoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drain" => Ok(Self::Drain),
            "abandon" => Ok(Self::Abandon),
            other => Err(BulkIoError::config(format!("unknown shutdown mode {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub bulk_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            bulk_size: DEFAULT_BULK_SIZE,
        }
    }
}

/// Live pipeline tallies, shared between producer and worker.
#[derive(Debug, Default)]
pub struct PipelineStats {
    put_wait_micros: AtomicU64,
    take_wait_micros: AtomicU64,
    bulks: AtomicU64,
    bulk_sizes_sum: AtomicU64,
    submitted: AtomicU64,
    skipped: AtomicU64,
    emitted: AtomicU64,
}

impl PipelineStats {
    /// Batches formed so far.
    pub fn bulks(&self) -> u64 {
        self.bulks.load(Ordering::Relaxed)
    }

    /// Inputs taken into batches so far; with [`PipelineStats::bulks`] this gives the
    /// average batch size.
    pub fn bulk_sizes_sum(&self) -> u64 {
        self.bulk_sizes_sum.load(Ordering::Relaxed)
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Records the mapper declined to queue.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Actions handed downstream.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn put_wait(&self) -> Duration {
        Duration::from_micros(self.put_wait_micros.load(Ordering::Relaxed))
    }

    pub fn take_wait(&self) -> Duration {
        Duration::from_micros(self.take_wait_micros.load(Ordering::Relaxed))
    }

    fn add_wait(slot: &AtomicU64, since: Instant) {
        let micros = u64::try_from(since.elapsed().as_micros()).unwrap_or(u64::MAX);
        slot.fetch_add(micros, Ordering::Relaxed);
    }

    fn publish(&self, counters: &CounterSet) {
        counters.increment(counters::QUEUE_PUT_TIMES_SUM, self.put_wait_micros.load(Ordering::Relaxed) / 1000);
        counters.increment(counters::QUEUE_TAKE_TIMES_SUM, self.take_wait_micros.load(Ordering::Relaxed) / 1000);
        counters.increment(counters::BULKS_COUNT, self.bulks());
        counters.increment(counters::BULK_SIZES_SUM, self.bulk_sizes_sum());
    }
}

/// Result of a non-blocking submit.
#[derive(Debug)]
pub enum TrySubmit<T> {
    Queued,
    /// The mapper declined the record.
    Skipped,
    /// The queue is at capacity; the input is handed back.
    Full(BulkInput<T>),
}

/// Totals of a finished pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub submitted: u64,
    pub skipped: u64,
    pub bulks: u64,
    pub bulk_sizes_sum: u64,
    pub emitted: u64,
    pub abandoned: u64,
}

type Failure = Arc<Mutex<Option<BulkIoError>>>;

/// What the worker hands back when it stops.
struct WorkerExit<T> {
    queue: xchan::Receiver<BulkInput<T>>,
}

pub struct BulkUpdatePipeline<R, M: UpdateMapper<R>> {
    mapper: Arc<M>,
    sender: Option<xchan::Sender<BulkInput<M::Payload>>>,
    stop_flag: Arc<AtomicBool>,
    stop_tx: xchan::Sender<()>,
    worker: Option<JoinHandle<WorkerExit<M::Payload>>>,
    stats: Arc<PipelineStats>,
    failure: Failure,
    counters: CounterSet,
    _record: std::marker::PhantomData<fn(&R)>,
}

impl<R, M> BulkUpdatePipeline<R, M>
where
    R: 'static,
    M: UpdateMapper<R> + 'static,
{
    /// Start the worker. It opens its own store connection for bulk-gets and owns `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`BulkIoError::Config`] for a zero queue capacity or bulk size, and an I/O
    /// error if the worker thread cannot be spawned.
    pub fn start(
        connector: Arc<dyn StoreConnector>,
        mapper: Arc<M>,
        sink: Box<dyn RecordSink<String, StoreAction> + Send>,
        config: PipelineConfig,
        counters: CounterSet,
    ) -> Result<Self> {
        if config.queue_capacity == 0 {
            return Err(BulkIoError::config("update queue capacity must be positive"));
        }
        if config.bulk_size == 0 {
            return Err(BulkIoError::config("update bulk size must be positive"));
        }

        let (sender, receiver) = xchan::bounded(config.queue_capacity);
        let (stop_tx, stop_rx) = xchan::bounded(1);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(PipelineStats::default());
        let failure: Failure = Arc::new(Mutex::new(None));

        let worker = Worker {
            queue: receiver,
            stop_rx,
            stop_flag: Arc::clone(&stop_flag),
            handle: StoreHandle::new(connector),
            mapper: Arc::clone(&mapper),
            sink,
            bulk_size: config.bulk_size,
            stats: Arc::clone(&stats),
            failure: Arc::clone(&failure),
            counters: counters.clone(),
            _record: std::marker::PhantomData,
        };
        let worker = std::thread::Builder::new()
            .name("couchbeam-update".to_string())
            .spawn(move || worker.run())?;

        info!(
            queue_capacity = config.queue_capacity,
            bulk_size = config.bulk_size,
            "update pipeline started"
        );
        Ok(Self {
            mapper,
            sender: Some(sender),
            stop_flag,
            stop_tx,
            worker: Some(worker),
            stats,
            failure,
            counters,
            _record: std::marker::PhantomData,
        })
    }

    /// Transform and queue one record, blocking while the queue is full.
    ///
    /// Returns `false` if the mapper skipped the record.
    ///
    /// # Errors
    ///
    /// Returns [`BulkIoError::WorkerFailed`] once the worker has recorded an error or is gone.
    pub fn submit(&self, record: &R) -> Result<bool> {
        self.check_worker()?;
        let Some(input) = self.mapper.transform(record) else {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        };
        self.enqueue(input)?;
        Ok(true)
    }

    /// Queue an already transformed input, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`BulkIoError::WorkerFailed`] once the worker has recorded an error or is gone.
    pub fn enqueue(&self, input: BulkInput<M::Payload>) -> Result<()> {
        self.check_worker()?;
        let sender = self.sender()?;
        let t0 = Instant::now();
        sender
            .send(input)
            .map_err(|_| BulkIoError::WorkerFailed("update worker has stopped".to_string()))?;
        PipelineStats::add_wait(&self.stats.put_wait_micros, t0);
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Like [`BulkUpdatePipeline::submit`], but reports a full queue instead of blocking.
    ///
    /// # Errors
    ///
    /// Returns [`BulkIoError::WorkerFailed`] once the worker has recorded an error or is gone.
    pub fn try_submit(&self, record: &R) -> Result<TrySubmit<M::Payload>> {
        self.check_worker()?;
        let Some(input) = self.mapper.transform(record) else {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(TrySubmit::Skipped);
        };
        match self.sender()?.try_send(input) {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(TrySubmit::Queued)
            }
            Err(xchan::TrySendError::Full(input)) => Ok(TrySubmit::Full(input)),
            Err(xchan::TrySendError::Disconnected(_)) => Err(BulkIoError::WorkerFailed(
                "update worker has stopped".to_string(),
            )),
        }
    }

    /// Inputs currently waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.sender.as_ref().map_or(0, xchan::Sender::len)
    }

    #[must_use]
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Stop the worker and publish the pipeline counters.
    ///
    /// # Errors
    ///
    /// Returns the first error the worker recorded, or [`BulkIoError::WorkerFailed`] if it
    /// panicked.
    pub fn finish(mut self, mode: ShutdownMode) -> Result<PipelineReport> {
        let abandoned = self.shutdown(mode)?;
        self.stats.publish(&self.counters);
        self.counters.increment(counters::ABANDONED_ITEMS, abandoned);

        let report = PipelineReport {
            submitted: self.stats.submitted(),
            skipped: self.stats.skipped(),
            bulks: self.stats.bulks(),
            bulk_sizes_sum: self.stats.bulk_sizes_sum(),
            emitted: self.stats.emitted(),
            abandoned,
        };
        info!(
            bulks = report.bulks,
            bulk_sizes_sum = report.bulk_sizes_sum,
            abandoned,
            "update pipeline finished"
        );

        match self.failure.lock().expect("failure mutex poisoned").take() {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Signal the worker, join it and count what it left behind.
    fn shutdown(&mut self, mode: ShutdownMode) -> Result<u64> {
        if mode == ShutdownMode::Abandon {
            self.stop_flag.store(true, Ordering::SeqCst);
            let _ = self.stop_tx.try_send(());
        }
        self.sender = None;

        let Some(worker) = self.worker.take() else {
            return Ok(0);
        };
        let exit = worker
            .join()
            .map_err(|_| BulkIoError::WorkerFailed("update worker panicked".to_string()))?;

        let abandoned = exit.queue.len() as u64;
        if abandoned > 0 {
            warn!(abandoned, "update pipeline stopped with inputs still queued");
        }
        Ok(abandoned)
    }

    fn sender(&self) -> Result<&xchan::Sender<BulkInput<M::Payload>>> {
        self.sender
            .as_ref()
            .ok_or_else(|| BulkIoError::WorkerFailed("update pipeline is shut down".to_string()))
    }

    fn check_worker(&self) -> Result<()> {
        match self.failure.lock().expect("failure mutex poisoned").as_ref() {
            Some(err) => Err(BulkIoError::WorkerFailed(err.to_string())),
            None => Ok(()),
        }
    }
}

impl<R, M: UpdateMapper<R>> Drop for BulkUpdatePipeline<R, M> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            warn!("update pipeline dropped without finish, abandoning queued inputs");
            self.stop_flag.store(true, Ordering::SeqCst);
            let _ = self.stop_tx.try_send(());
            self.sender = None;
            let _ = worker.join();
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

struct Worker<R, M: UpdateMapper<R>> {
    queue: xchan::Receiver<BulkInput<M::Payload>>,
    stop_rx: xchan::Receiver<()>,
    stop_flag: Arc<AtomicBool>,
    handle: StoreHandle,
    mapper: Arc<M>,
    sink: Box<dyn RecordSink<String, StoreAction> + Send>,
    bulk_size: usize,
    stats: Arc<PipelineStats>,
    failure: Failure,
    counters: CounterSet,
    _record: std::marker::PhantomData<fn(&R)>,
}

impl<R, M: UpdateMapper<R>> Worker<R, M> {
    fn run(mut self) -> WorkerExit<M::Payload> {
        let mut batch = Vec::with_capacity(self.bulk_size);
        while !self.stop_flag.load(Ordering::SeqCst) {
            let t0 = Instant::now();
            let mut first = None;
            xchan::select! {
                // An error means closed and empty: drained.
                recv(self.queue) -> msg => first = msg.ok(),
                recv(self.stop_rx) -> _ => {},
            }
            let Some(first) = first else { break };
            PipelineStats::add_wait(&self.stats.take_wait_micros, t0);

            batch.push(first);
            batch.extend(self.queue.try_iter().take(self.bulk_size - 1));
            self.stats.bulks.fetch_add(1, Ordering::Relaxed);
            self.stats
                .bulk_sizes_sum
                .fetch_add(batch.len() as u64, Ordering::Relaxed);

            if let Err(err) = self.process(&mut batch) {
                warn!(error = %err, "update batch aborted");
                self.record(err);
            }
            batch.clear();
        }

        if let Err(err) = self.sink.close() {
            self.record(err);
        }
        self.handle.close();
        WorkerExit { queue: self.queue }
    }

    fn process(&mut self, batch: &mut Vec<BulkInput<M::Payload>>) -> Result<()> {
        let mut seen = HashSet::with_capacity(batch.len());
        let keys: Vec<String> = batch
            .iter()
            .filter(|input| seen.insert(input.store_key.as_str()))
            .map(|input| input.store_key.clone())
            .collect();
        debug!(batch = batch.len(), distinct_keys = keys.len(), "bulk get");
        let docs: HashMap<String, Value> = self.handle.client()?.bulk_get(&keys)?;

        for input in batch.drain(..) {
            let BulkInput { store_key, payload } = input;
            let action = self
                .mapper
                .merge(&store_key, payload, docs.get(&store_key), &self.counters)
                .map_err(|e| BulkIoError::Merge {
                    key: store_key.clone(),
                    message: format!("{e:#}"),
                })?;
            self.sink.emit(store_key, action)?;
            self.stats.emitted.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn record(&self, err: BulkIoError) {
        let mut slot = self.failure.lock().expect("failure mutex poisoned");
        if slot.is_none() {
            *slot = Some(err);
        }
    }
}
