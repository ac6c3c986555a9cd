//! Paginated view reading against the in-memory store.

use anyhow::Result;
use couchbeam::keys::expand;
use couchbeam::reader::ReaderState;
use couchbeam::store::{ErrorKind, FakeStore, ViewTarget};
use couchbeam::task::RecordSource;
use couchbeam::{BulkIoError, PaginatedViewReader, ReaderConfig, partition};
use serde_json::json;
use std::sync::Arc;

fn target() -> ViewTarget {
    ViewTarget::new("reports", "by_key")
}

/// Three keys with two documents each.
fn seeded_store() -> FakeStore {
    let store = FakeStore::new();
    for key in ["A", "B", "C"] {
        let ids = [format!("{key}-row1"), format!("{key}-row2")];
        for id in &ids {
            store.insert(id, json!({ "id": id }));
        }
        store.add_view_rows(&target(), key, ids);
    }
    store
}

fn reader(store: &FakeStore, keys: Vec<String>) -> PaginatedViewReader {
    PaginatedViewReader::new(
        Arc::new(store.clone()),
        ReaderConfig::new(target()).with_page_size(2),
        keys,
    )
}

fn drain_ids(reader: &mut PaginatedViewReader) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    while let Some(row) = reader.next_row()? {
        ids.push(row.id);
    }
    Ok(ids)
}

#[test]
fn test_first_partition_yields_rows_in_key_then_page_order() -> Result<()> {
    let store = seeded_store();
    let parts = partition(expand("A;B;C")?, Some(2))?;
    let mut r = reader(&store, parts[0].keys.clone());

    let mut rows = Vec::new();
    while let Some((id, row)) = r.next_record()? {
        assert_eq!(row.document, Some(json!({ "id": id })));
        rows.push(id);
    }
    assert_eq!(rows, vec!["A-row1", "A-row2", "B-row1", "B-row2"]);
    assert_eq!(r.rows_read(), 4);
    assert_eq!(r.state(), ReaderState::Drained);
    assert!((RecordSource::progress(&r) - 1.0).abs() < f32::EPSILON);
    Ok(())
}

#[test]
fn test_progress_counts_started_keys() -> Result<()> {
    let store = seeded_store();
    let mut r = reader(&store, vec!["A".into(), "B".into(), "C".into()]);
    assert!(r.progress().abs() < f32::EPSILON);
    assert_eq!(r.state(), ReaderState::Unstarted);

    r.next_row()?;
    assert!((r.progress() - 1.0 / 3.0).abs() < 1e-6);
    assert_eq!(r.current_key(), Some("A"));
    assert_eq!(r.state(), ReaderState::HasRow);
    Ok(())
}

#[test]
fn test_pages_follow_page_size() -> Result<()> {
    let store = FakeStore::new();
    store.add_view_rows(&target(), "K", ["1", "2", "3", "4", "5"]);
    let mut r = PaginatedViewReader::new(
        Arc::new(store.clone()),
        ReaderConfig::new(target()).with_page_size(2),
        vec!["K".into()],
    );
    let mut sizes = Vec::new();
    while let Some(page) = r.next_page()? {
        sizes.push(page.len());
    }
    assert_eq!(sizes, vec![2, 2, 1]);
    Ok(())
}

#[test]
fn test_keys_without_rows_are_skipped() -> Result<()> {
    let store = seeded_store();
    let mut r = reader(&store, vec!["missing".into(), "C".into()]);
    assert_eq!(drain_ids(&mut r)?, vec!["C-row1", "C-row2"]);
    assert_eq!(r.keys_started(), 2);
    Ok(())
}

#[test]
fn test_cancelled_open_reconnects_and_resumes() -> Result<()> {
    let store = seeded_store();
    store.cancel_next_view_opens(2);
    let mut r = reader(&store, vec!["A".into()]);

    assert_eq!(drain_ids(&mut r)?, vec!["A-row1", "A-row2"]);
    assert_eq!(store.view_opens(), 3);
    assert_eq!(store.connects(), 3);
    assert_eq!(r.connects(), 3);
    assert_eq!(store.shutdowns(), 2);

    r.close();
    assert_eq!(store.shutdowns(), 3);
    Ok(())
}

#[test]
fn test_exhausted_reconnects_fail_the_partition() -> Result<()> {
    let store = seeded_store();
    store.cancel_next_view_opens(10);
    let mut r = PaginatedViewReader::new(
        Arc::new(store.clone()),
        ReaderConfig::new(target()).with_connect_retries(2),
        vec!["A".into()],
    );

    match r.next_row() {
        Err(BulkIoError::ConnectExhausted { key, attempts, source }) => {
            assert_eq!(key, "A");
            assert_eq!(attempts, 3);
            assert_eq!(source.kind, ErrorKind::Cancelled);
        }
        other => panic!("expected ConnectExhausted, got {other:?}"),
    }
    assert_eq!(r.state(), ReaderState::Closed);
    assert_eq!(store.connects(), 3);
    assert_eq!(store.shutdowns(), 3);
    assert!(r.next_row()?.is_none());
    Ok(())
}

#[test]
fn test_other_store_errors_are_not_retried() {
    let store = seeded_store();
    store.fail_next_connects(1);
    let mut r = reader(&store, vec!["A".into()]);
    match r.next_row() {
        Err(BulkIoError::Store(err)) => assert_eq!(err.kind, ErrorKind::Network),
        other => panic!("expected a store error, got {other:?}"),
    }
    assert_eq!(r.state(), ReaderState::Closed);
}

#[test]
fn test_page_fetch_failure_closes_reader() {
    let store = seeded_store();
    store.fail_next_page_fetches(1);
    let mut r = reader(&store, vec!["A".into()]);
    assert!(matches!(r.next_row(), Err(BulkIoError::Store(_))));
    assert_eq!(store.shutdowns(), 1);
}

#[test]
fn test_unknown_view_is_a_store_error() {
    let store = seeded_store();
    let mut r = PaginatedViewReader::new(
        Arc::new(store),
        ReaderConfig::new(ViewTarget::new("reports", "nope")),
        vec!["A".into()],
    );
    match r.next_row() {
        Err(BulkIoError::Store(err)) => assert_eq!(err.kind, ErrorKind::NotFound),
        other => panic!("expected a store error, got {other:?}"),
    }
}

#[test]
fn test_close_is_idempotent() -> Result<()> {
    let store = seeded_store();
    let mut r = reader(&store, vec!["A".into(), "B".into()]);
    assert!(r.next_row()?.is_some());

    r.close();
    r.close();
    drop(r);
    assert_eq!(store.connects(), 1);
    assert_eq!(store.shutdowns(), 1);
    Ok(())
}

#[test]
fn test_reader_is_an_iterator() -> Result<()> {
    let store = seeded_store();
    let r = reader(&store, vec!["B".into()]);
    let ids = r.map(|item| item.map(|(id, _)| id)).collect::<couchbeam::Result<Vec<_>>>()?;
    assert_eq!(ids, vec!["B-row1", "B-row2"]);
    Ok(())
}
