//! Bulk update pipeline: batching, backpressure, merge failures and shutdown.

use anyhow::{Result, bail};
use couchbeam::counters::{self, CounterSet};
use couchbeam::store::FakeStore;
use couchbeam::testing::CollectingSink;
use couchbeam::update::{PipelineConfig, TrySubmit};
use couchbeam::{
    BackoffConfig, BackoffWriter, BulkInput, BulkIoError, BulkUpdatePipeline, CaseFlipUpdate,
    ShutdownMode, StoreAction, UpdateMapper,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Writes the key as the document; refuses to merge `bad`.
struct Stamp;

impl UpdateMapper<String> for Stamp {
    type Payload = ();

    fn transform(&self, record: &String) -> Option<BulkInput<()>> {
        (!record.is_empty()).then(|| BulkInput::new(record.clone(), ()))
    }

    fn merge(
        &self,
        key: &str,
        _payload: (),
        _fetched: Option<&Value>,
        _counters: &CounterSet,
    ) -> Result<StoreAction> {
        if key == "bad" {
            bail!("cannot merge {key}");
        }
        Ok(StoreAction::set(json!(key)))
    }
}

type Collected = CollectingSink<String, StoreAction>;

fn start_stamp(
    store: &FakeStore,
    sink: &Collected,
    queue_capacity: usize,
    bulk_size: usize,
) -> couchbeam::Result<BulkUpdatePipeline<String, Stamp>> {
    BulkUpdatePipeline::start(
        Arc::new(store.clone()),
        Arc::new(Stamp),
        Box::new(sink.clone()),
        PipelineConfig {
            queue_capacity,
            bulk_size,
        },
        CounterSet::new(),
    )
}

/// Wait until the worker is parked inside a paused bulk-get.
fn wait_for_blocked_worker(store: &FakeStore) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while store.waiting_bulk_gets() == 0 {
        assert!(Instant::now() < deadline, "worker never reached the bulk-get");
        thread::sleep(Duration::from_millis(1));
    }
}

#[mark_flaky_tests::flaky]
#[test]
fn test_full_queue_blocks_producer_until_worker_drains() {
    let store = FakeStore::new();
    let sink = Collected::new();
    store.pause_bulk_gets();
    let pipeline = start_stamp(&store, &sink, 2, 1).expect("pipeline starts");

    assert!(pipeline.submit(&"first".to_string()).expect("submit"));
    wait_for_blocked_worker(&store);

    assert!(matches!(pipeline.try_submit(&"q1".to_string()), Ok(TrySubmit::Queued)));
    assert!(matches!(pipeline.try_submit(&"q2".to_string()), Ok(TrySubmit::Queued)));
    match pipeline.try_submit(&"q3".to_string()) {
        Ok(TrySubmit::Full(input)) => assert_eq!(input.store_key, "q3"),
        other => panic!("expected a full queue, got {other:?}"),
    }
    assert_eq!(pipeline.queued(), 2);

    thread::scope(|s| {
        let producer = s.spawn(|| pipeline.submit(&"q3".to_string()));
        thread::sleep(Duration::from_millis(100));
        assert!(!producer.is_finished(), "submit returned while the queue was full");

        store.resume_bulk_gets();
        let queued = producer.join().expect("producer thread").expect("submit");
        assert!(queued);
    });

    let report = pipeline.finish(ShutdownMode::Drain).expect("finish");
    assert_eq!(report.submitted, 4);
    assert_eq!(report.emitted, 4);
    assert_eq!(report.abandoned, 0);
    assert_eq!(sink.keys(), vec!["first", "q1", "q2", "q3"]);
    assert_eq!(report.bulks, 4);
    assert_eq!(report.bulk_sizes_sum, 4);
}

#[test]
fn test_missing_documents_write_nothing_but_count_in_batches() -> Result<()> {
    let store = FakeStore::new();
    store.insert("a", json!({"letters": "abc", "number": 1}));
    let totals = CounterSet::new();
    let writer = BackoffWriter::new(Arc::new(store.clone()), BackoffConfig::default())
        .with_counters(totals.clone());
    let pipeline: BulkUpdatePipeline<Vec<String>, CaseFlipUpdate> = BulkUpdatePipeline::start(
        Arc::new(store.clone()),
        Arc::new(CaseFlipUpdate),
        Box::new(writer),
        PipelineConfig::default(),
        totals.clone(),
    )?;

    for key in ["a", "missing-1", "missing-2"] {
        assert!(pipeline.submit(&vec![key.to_string()])?);
    }
    assert!(!pipeline.submit(&vec![String::new()])?);
    let report = pipeline.finish(ShutdownMode::Drain)?;

    assert_eq!(report.skipped, 1);
    assert_eq!(store.document("a"), Some(json!({"letters": "ABC", "number": -1})));
    assert_eq!(store.mutation_calls(), 1);
    assert_eq!(store.len(), 1);
    assert_eq!(totals.get(counters::NULL_DOCS), 2);
    assert_eq!(totals.get(counters::SKIPPED_ACTIONS), 2);
    assert_eq!(totals.get(counters::SUCCESSFUL_STORE_OPERATIONS), 1);
    assert_eq!(totals.get(counters::BULK_SIZES_SUM), 3);
    assert!(totals.get(counters::BULKS_COUNT) >= 1);
    Ok(())
}

#[test]
fn test_one_bulk_get_per_batch_with_distinct_keys() -> Result<()> {
    let store = FakeStore::new();
    let sink = Collected::new();
    store.pause_bulk_gets();
    let pipeline = start_stamp(&store, &sink, 16, 8)?;

    pipeline.submit(&"blocker".to_string())?;
    wait_for_blocked_worker(&store);
    for key in ["x", "x", "y", "x"] {
        pipeline.submit(&key.to_string())?;
    }
    store.resume_bulk_gets();
    let report = pipeline.finish(ShutdownMode::Drain)?;

    assert_eq!(
        store.bulk_get_calls(),
        vec![vec!["blocker".to_string()], vec!["x".to_string(), "y".to_string()]]
    );
    assert_eq!(report.bulks, 2);
    assert_eq!(report.bulk_sizes_sum, 5);
    assert_eq!(sink.keys(), vec!["blocker", "x", "x", "y", "x"]);
    Ok(())
}

#[test]
fn test_merge_failure_aborts_batch_and_fails_pipeline() -> Result<()> {
    let store = FakeStore::new();
    let sink = Collected::new();
    store.pause_bulk_gets();
    let pipeline = start_stamp(&store, &sink, 16, 2)?;

    pipeline.submit(&"blocker".to_string())?;
    wait_for_blocked_worker(&store);
    for key in ["ok1", "bad", "ok2", "ok3"] {
        pipeline.submit(&key.to_string())?;
    }
    store.resume_bulk_gets();

    match pipeline.finish(ShutdownMode::Drain) {
        Err(BulkIoError::Merge { key, message }) => {
            assert_eq!(key, "bad");
            assert!(message.contains("cannot merge bad"), "{message}");
        }
        other => panic!("expected a merge error, got {other:?}"),
    }
    assert_eq!(sink.keys(), vec!["blocker", "ok1", "ok2", "ok3"]);
    assert_eq!(sink.closes(), 1);
    Ok(())
}

#[test]
fn test_sink_failure_rejects_later_submits() -> Result<()> {
    let store = FakeStore::new();
    let sink = Collected::new().failing_at(0);
    let pipeline = start_stamp(&store, &sink, 4, 4)?;

    pipeline.submit(&"a".to_string())?;
    let deadline = Instant::now() + Duration::from_secs(5);
    let err = loop {
        match pipeline.submit(&"b".to_string()) {
            Err(err) => break err,
            Ok(_) => {
                assert!(Instant::now() < deadline, "worker failure never surfaced");
                thread::sleep(Duration::from_millis(1));
            }
        }
    };
    assert!(matches!(err, BulkIoError::WorkerFailed(_)));
    assert!(matches!(
        pipeline.finish(ShutdownMode::Drain),
        Err(BulkIoError::WorkerFailed(_))
    ));
    Ok(())
}

#[mark_flaky_tests::flaky]
#[test]
fn test_abandon_drops_queued_inputs_and_counts_them() {
    let store = FakeStore::new();
    let sink = Collected::new();
    let totals = CounterSet::new();
    store.pause_bulk_gets();
    let pipeline: BulkUpdatePipeline<String, Stamp> = BulkUpdatePipeline::start(
        Arc::new(store.clone()),
        Arc::new(Stamp),
        Box::new(sink.clone()),
        PipelineConfig {
            queue_capacity: 8,
            bulk_size: 1,
        },
        totals.clone(),
    )
    .expect("pipeline starts");

    pipeline.submit(&"blocker".to_string()).expect("submit");
    wait_for_blocked_worker(&store);
    for key in ["a", "b", "c"] {
        pipeline.submit(&key.to_string()).expect("submit");
    }

    let resumer = {
        let store = store.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            store.resume_bulk_gets();
        })
    };
    let report = pipeline.finish(ShutdownMode::Abandon).expect("finish");
    resumer.join().expect("resumer thread");

    assert_eq!(report.emitted, 1);
    assert_eq!(report.abandoned, 3);
    assert_eq!(totals.get(counters::ABANDONED_ITEMS), 3);
    assert_eq!(sink.keys(), vec!["blocker"]);
}

#[test]
fn test_zero_sizes_are_rejected() {
    let store = FakeStore::new();
    let sink = Collected::new();
    assert!(matches!(
        start_stamp(&store, &sink, 0, 1),
        Err(BulkIoError::Config(_))
    ));
    assert!(matches!(
        start_stamp(&store, &sink, 1, 0),
        Err(BulkIoError::Config(_))
    ));
}

#[test]
fn test_shutdown_mode_parses() -> Result<()> {
    assert_eq!("Drain".parse::<ShutdownMode>()?, ShutdownMode::Drain);
    assert_eq!(" abandon ".parse::<ShutdownMode>()?, ShutdownMode::Abandon);
    assert!("later".parse::<ShutdownMode>().is_err());
    Ok(())
}
