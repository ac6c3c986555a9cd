//! End-to-end job runs against the in-memory store.

use anyhow::Result;
use couchbeam::config::{ExportArgs, ImportViewArgs, Properties, UpdateArgs};
use couchbeam::counters;
use couchbeam::store::{FakeStore, OpStatus, ScriptedReply, ViewTarget};
use couchbeam::testing::{TempDirPath, read_lines};
use couchbeam::{BulkIoError, CaseFlipUpdate, Runner, export, import_view, serial_import, update};
use serde_json::json;
use std::sync::Arc;

fn target() -> ViewTarget {
    ViewTarget::new("reports", "by_day")
}

/// Keys A, B and C with two rows each. `C-row2` has no document.
fn seeded_store() -> FakeStore {
    let store = FakeStore::new();
    for key in ["A", "B", "C"] {
        let ids = [format!("{key}-row1"), format!("{key}-row2")];
        for id in &ids {
            if id != "C-row2" {
                store.insert(id, json!({ "n": id }));
            }
        }
        store.add_view_rows(&target(), key, ids);
    }
    store
}

fn import_props(out: &TempDirPath) -> Properties {
    Properties::from_pairs([
        ("couchbase.urls", "http://localhost:8091/pools"),
        ("couchbase.designdoc.name", "reports"),
        ("couchbase.view.name", "by_day"),
        ("couchbase.view.keys", "A;B;C"),
        ("couchbase.view.docsPerPage", "1"),
    ])
    .with("output", out.path().to_string_lossy())
}

#[test]
fn test_import_view_writes_one_part_file_per_partition() -> Result<()> {
    let store = seeded_store();
    let out = TempDirPath::new()?;
    let args = ImportViewArgs::from_properties(&import_props(&out).with("hadoop.mappers", "2"))?;

    let report = import_view(Arc::new(store.clone()), &args, &Runner::with_threads(2))?;

    assert_eq!(report.partitions, 2);
    assert_eq!(out.file_names()?, vec!["part-m-00000", "part-m-00001"]);
    assert_eq!(
        read_lines(out.file_path("part-m-00000"))?,
        vec![
            "A-row1\t{\"n\":\"A-row1\"}",
            "A-row2\t{\"n\":\"A-row2\"}",
            "B-row1\t{\"n\":\"B-row1\"}",
            "B-row2\t{\"n\":\"B-row2\"}",
        ]
    );
    assert_eq!(
        read_lines(out.file_path("part-m-00001"))?,
        vec!["C-row1\t{\"n\":\"C-row1\"}"]
    );
    assert_eq!(report.counter(counters::ROWS_READ), 6);
    assert_eq!(report.counter(counters::KEYS_READ), 3);
    assert!(report.elapsed.is_some());
    assert_eq!(store.shutdowns(), store.connects());
    Ok(())
}

#[test]
fn test_import_view_defaults_to_one_partition_per_key() -> Result<()> {
    let store = seeded_store();
    let out = TempDirPath::new()?;
    let args = ImportViewArgs::from_properties(&import_props(&out))?;

    let report = import_view(Arc::new(store), &args, &Runner::sequential())?;
    assert_eq!(report.partitions, 3);
    assert_eq!(out.file_names()?.len(), 3);
    Ok(())
}

#[cfg(feature = "io-jsonl")]
#[test]
fn test_import_view_jsonl_rows() -> Result<()> {
    let store = seeded_store();
    let out = TempDirPath::new()?;
    let props = import_props(&out)
        .with("couchbase.view.keys", "A")
        .with("couchbeam.output.format", "jsonl");
    let args = ImportViewArgs::from_properties(&props)?;

    import_view(Arc::new(store), &args, &Runner::sequential())?;
    let rows: Vec<serde_json::Value> = read_lines(out.file_path("part-m-00000"))?
        .iter()
        .map(|l| serde_json::from_str(l))
        .collect::<Result<_, _>>()?;
    assert_eq!(
        rows,
        vec![
            json!({"id": "A-row1", "doc": {"n": "A-row1"}}),
            json!({"id": "A-row2", "doc": {"n": "A-row2"}}),
        ]
    );
    Ok(())
}

#[test]
fn test_import_view_failure_carries_counters() -> Result<()> {
    let store = seeded_store();
    store.cancel_next_view_opens(100);
    let out = TempDirPath::new()?;
    let args = ImportViewArgs::from_properties(
        &import_props(&out)
            .with("hadoop.mappers", "1")
            .with("couchbase.view.connectRetries", "1"),
    )?;

    let err = import_view(Arc::new(store.clone()), &args, &Runner::sequential()).unwrap_err();
    assert!(matches!(err.source, BulkIoError::ConnectExhausted { attempts: 2, .. }));
    assert_eq!(err.counters.get(counters::KEYS_READ), 1);
    assert!(err.to_string().contains("KEYS_READ"), "{err}");
    assert_eq!(store.shutdowns(), store.connects());
    Ok(())
}

#[test]
fn test_serial_import_writes_one_file_per_page() -> Result<()> {
    let store = seeded_store();
    let out = TempDirPath::new()?;
    let args = ImportViewArgs::from_properties(
        &import_props(&out).with("couchbase.view.docsPerPage", "2"),
    )?;

    let report = serial_import(Arc::new(store.clone()), &args)?;

    assert_eq!(out.file_names()?, vec!["part-00000", "part-00001", "part-00002"]);
    assert_eq!(
        read_lines(out.file_path("part-00000"))?,
        vec!["A-row1\0{\"n\":\"A-row1\"}", "A-row2\0{\"n\":\"A-row2\"}"]
    );
    assert_eq!(
        read_lines(out.file_path("part-00002"))?,
        vec!["C-row1\0{\"n\":\"C-row1\"}"]
    );
    assert_eq!(report.counter(counters::ROWS_READ), 6);
    assert_eq!(store.connects(), 1);
    assert_eq!(store.shutdowns(), 1);
    Ok(())
}

fn export_props(input: &str) -> Properties {
    Properties::from_pairs([("couchbase.urls", "http://localhost:8091/pools")]).with("input", input)
}

#[test]
fn test_export_writes_every_file_as_a_partition() -> Result<()> {
    let store = FakeStore::new();
    let dir = TempDirPath::new()?;
    dir.write_delimited("a.tsv", '\t', &[&["k1", r#"{"v":1}"#], &["k2", "plain"]])?;
    dir.write_delimited("b.tsv", '\t', &[&["k3", "3"], &["short"]])?;
    dir.write_delimited("_SUCCESS", '\t', &[&["ignored", "x"]])?;

    let args = ExportArgs::from_properties(
        &export_props(&dir.path().to_string_lossy()).with("couchbase.expiry", "30"),
    )?;
    let report = export(Arc::new(store.clone()), &args, &Runner::default())?;

    assert_eq!(report.partitions, 2);
    assert_eq!(store.document("k1"), Some(json!({"v": 1})));
    assert_eq!(store.document("k2"), Some(json!("plain")));
    assert_eq!(store.document("k3"), Some(json!(3)));
    assert_eq!(store.expiry_of("k3"), Some(30));
    assert!(store.document("ignored").is_none());
    assert_eq!(report.counter(counters::LINES_READ), 4);
    assert_eq!(report.counter(counters::LINES_WITH_WRONG_COLUMNS_COUNT), 1);
    assert_eq!(report.counter(counters::SUCCESSFUL_STORE_OPERATIONS), 3);
    Ok(())
}

#[test]
fn test_export_delete_needs_only_keys() -> Result<()> {
    let store = FakeStore::new();
    store.insert("gone", json!(1));
    store.insert("kept", json!(2));
    let dir = TempDirPath::new()?;
    let input = dir.write_delimited("keys.csv", ',', &[&["gone"], &["missing"]])?;

    let args = ExportArgs::from_properties(
        &export_props(&input.to_string_lossy())
            .with("couchbase.operation", "delete")
            .with("delimiter.fields", ","),
    )?;
    let report = export(Arc::new(store.clone()), &args, &Runner::sequential())?;

    assert!(store.document("gone").is_none());
    assert_eq!(store.document("kept"), Some(json!(2)));
    assert_eq!(report.counter(counters::SUCCESSFUL_STORE_OPERATIONS), 1);
    assert_eq!(report.counter(counters::FAILED_STORE_OPERATIONS), 1);
    Ok(())
}

#[test]
fn test_export_fatal_timeout_fails_the_job() -> Result<()> {
    let store = FakeStore::new();
    store.set_sticky_reply(Some(ScriptedReply::Status(OpStatus::temporary_failure())));
    let dir = TempDirPath::new()?;
    let input = dir.write_delimited("in.tsv", '\t', &[&["k", "v"]])?;

    let args = ExportArgs::from_properties(
        &export_props(&input.to_string_lossy()).with("couchbeam.backoff.maxTotalTimeoutMs", "5"),
    )?;
    let err = export(Arc::new(store), &args, &Runner::sequential()).unwrap_err();

    assert!(matches!(err.source, BulkIoError::FatalTimeout { .. }), "{err}");
    assert!(err.to_string().contains("store unhealthy"));
    assert_eq!(err.counters.get(counters::FAILED_STORE_OPERATIONS), 1);
    Ok(())
}

#[test]
fn test_export_without_input_files_fails() -> Result<()> {
    let dir = TempDirPath::new()?;
    let missing = dir.file_path("nothing-*.tsv");
    let args = ExportArgs::from_properties(&export_props(&missing.to_string_lossy()))?;
    let err = export(Arc::new(FakeStore::new()), &args, &Runner::sequential()).unwrap_err();
    assert!(err.to_string().contains("no input files"), "{err}");
    Ok(())
}

#[test]
fn test_update_flips_documents_through_the_pipeline() -> Result<()> {
    let store = FakeStore::new();
    store.insert("lower", json!({"letters": "abc", "number": 4}));
    store.insert("upper", json!({"letters": "XYZ", "number": -9}));
    let dir = TempDirPath::new()?;
    dir.write_delimited("part-0", '\t', &[&["lower", "extra"], &["upper"]])?;
    dir.write_delimited("part-1", '\t', &[&["absent"]])?;

    let args = UpdateArgs::from_properties(
        &export_props(&dir.path().to_string_lossy()).with("couchbase.update.bulk.size", "2"),
    )?;
    let report = update(
        Arc::new(store.clone()),
        Arc::new(CaseFlipUpdate),
        &args,
        &Runner::with_threads(2),
    )?;

    assert_eq!(report.partitions, 2);
    assert_eq!(store.document("lower"), Some(json!({"letters": "ABC", "number": -4})));
    assert_eq!(store.document("upper"), Some(json!({"letters": "xyz", "number": 9})));
    assert!(store.document("absent").is_none());
    assert_eq!(report.counter(counters::LINES_READ), 3);
    assert_eq!(report.counter(counters::NULL_DOCS), 1);
    assert_eq!(report.counter(counters::BULK_SIZES_SUM), 3);
    assert_eq!(report.counter(counters::SUCCESSFUL_STORE_OPERATIONS), 2);
    assert_eq!(report.counter(counters::SKIPPED_ACTIONS), 1);
    assert_eq!(store.shutdowns(), store.connects());
    Ok(())
}

#[test]
fn test_update_merge_error_fails_the_job() -> Result<()> {
    let store = FakeStore::new();
    store.insert("broken", json!("not a letters document"));
    let dir = TempDirPath::new()?;
    let input = dir.write_delimited("in", '\t', &[&["broken"]])?;

    let args = UpdateArgs::from_properties(&export_props(&input.to_string_lossy()))?;
    let err = update(
        Arc::new(store),
        Arc::new(CaseFlipUpdate),
        &args,
        &Runner::sequential(),
    )
    .unwrap_err();
    match err.source {
        BulkIoError::Merge { key, message } => {
            assert_eq!(key, "broken");
            assert!(message.contains("invalid JSON format"), "{message}");
        }
        other => panic!("expected a merge error, got {other}"),
    }
    Ok(())
}
