//! Job properties and typed argument validation.

use anyhow::Result;
use couchbeam::config::{
    ConnectionArgs, ExportArgs, ImportViewArgs, Properties, UpdateArgs, parse_delimiter,
};
use couchbeam::io::RowFormat;
use couchbeam::{BackoffConfig, BulkIoError, ShutdownMode, StoreOperation};
use std::path::Path;
use tempfile::TempDir;

fn base() -> Properties {
    Properties::from_pairs([("couchbase.urls", "http://cb1:8091/pools, http://cb2:8091/pools")])
}

fn import_base() -> Properties {
    base()
        .with("couchbase.designdoc.name", "dd")
        .with("couchbase.view.name", "v")
        .with("couchbase.view.keys", "a;b((1-3))")
        .with("output", "/tmp/out")
}

#[test]
fn test_lookups_ignore_case() {
    let props = Properties::new().with("Couchbase.View.DocsPerPage", "7");
    assert_eq!(props.get("couchbase.view.docsperpage"), Some("7"));
    assert_eq!(props.get("COUCHBASE.VIEW.DOCSPERPAGE"), Some("7"));
}

#[test]
fn test_connection_defaults() -> Result<()> {
    let conn = ConnectionArgs::from_properties(&base())?;
    assert_eq!(conn.urls, vec!["http://cb1:8091/pools", "http://cb2:8091/pools"]);
    assert_eq!(conn.bucket, "default");
    assert_eq!(conn.password, "");
    Ok(())
}

#[test]
fn test_missing_urls_is_a_config_error() {
    let err = ConnectionArgs::from_properties(&Properties::new()).unwrap_err();
    assert!(matches!(err, BulkIoError::Config(ref m) if m.contains("couchbase.urls")), "{err}");
    assert!(ConnectionArgs::from_properties(&Properties::new().with("couchbase.urls", " , ")).is_err());
}

#[test]
fn test_import_args_defaults_and_expansion() -> Result<()> {
    let args = ImportViewArgs::from_properties(&import_base())?;
    assert_eq!(args.keys, vec!["a", "b1", "b2", "b3"]);
    assert_eq!(args.page_size, 1024);
    assert_eq!(args.connect_retries, 5);
    assert_eq!(args.partitions, None);
    assert_eq!(args.format, RowFormat::Text);
    assert_eq!(args.output, Path::new("/tmp/out"));
    assert_eq!(args.target.to_string(), "_design/dd/_view/v");
    assert_eq!(args.reader_config().page_size, 1024);
    Ok(())
}

#[test]
fn test_import_args_reject_bad_values() {
    let zero_page = import_base().with("couchbase.view.docsPerPage", "0");
    assert!(matches!(ImportViewArgs::from_properties(&zero_page), Err(BulkIoError::Config(_))));

    let zero_mappers = import_base().with("hadoop.mappers", "0");
    assert!(matches!(ImportViewArgs::from_properties(&zero_mappers), Err(BulkIoError::Config(_))));

    let not_a_number = import_base().with("couchbase.view.connectRetries", "many");
    assert!(matches!(ImportViewArgs::from_properties(&not_a_number), Err(BulkIoError::Config(_))));

    let no_keys = import_base().with("couchbase.view.keys", "");
    assert!(matches!(ImportViewArgs::from_properties(&no_keys), Err(BulkIoError::Config(_))));

    let malformed = import_base().with("couchbase.view.keys", "((9-1))");
    assert!(matches!(
        ImportViewArgs::from_properties(&malformed),
        Err(BulkIoError::MalformedKeySpec { .. })
    ));

    let format = import_base().with("couchbeam.output.format", "parquet");
    assert!(matches!(ImportViewArgs::from_properties(&format), Err(BulkIoError::Config(_))));
}

#[test]
fn test_export_args() -> Result<()> {
    let args = ExportArgs::from_properties(
        &base()
            .with("input", "/data/*.tsv")
            .with("couchbase.operation", "exists")
            .with("couchbase.expiry", "300")
            .with("couchbeam.backoff.maxTries", "4"),
    )?;
    assert_eq!(args.operation, StoreOperation::Touch);
    assert_eq!(args.expiry, 300);
    assert_eq!(args.delimiter, b'\t');
    assert_eq!(
        args.backoff,
        BackoffConfig {
            max_tries: 4,
            ..BackoffConfig::default()
        }
    );
    Ok(())
}

#[test]
fn test_export_args_reject_unknown_operation() {
    let props = base().with("input", "x").with("couchbase.operation", "upsert");
    assert!(matches!(ExportArgs::from_properties(&props), Err(BulkIoError::Config(_))));
}

#[test]
fn test_delimiters() -> Result<()> {
    assert_eq!(parse_delimiter(",")?, b',');
    assert_eq!(parse_delimiter("\t")?, b'\t');
    assert_eq!(parse_delimiter(r"\t")?, b'\t');
    assert!(parse_delimiter("::").is_err());
    assert!(parse_delimiter("").is_err());
    Ok(())
}

#[test]
fn test_update_args() -> Result<()> {
    let args = UpdateArgs::from_properties(
        &base()
            .with("input", "in")
            .with("couchbase.update.queue.size", "10")
            .with("couchbeam.update.shutdown", "abandon"),
    )?;
    assert_eq!(args.pipeline.queue_capacity, 10);
    assert_eq!(args.pipeline.bulk_size, 1024);
    assert_eq!(args.shutdown, ShutdownMode::Abandon);

    let zero = base().with("input", "in").with("couchbase.update.bulk.size", "0");
    assert!(matches!(UpdateArgs::from_properties(&zero), Err(BulkIoError::Config(_))));
    Ok(())
}

#[test]
fn test_properties_from_json_file() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("job.json");
    std::fs::write(
        &path,
        r#"{"couchbase.urls": "http://cb:8091/pools", "hadoop.mappers": 4, "couchbase.view.connectRetries": "2"}"#,
    )?;
    let props = Properties::from_json_file(&path)?;
    assert_eq!(props.len(), 3);
    assert_eq!(props.parse_opt::<usize>("hadoop.mappers")?, Some(4));
    assert_eq!(props.parse_or("couchbase.view.connectRetries", 5u32)?, 2);

    std::fs::write(&path, r#"{"nested": {"a": 1}}"#)?;
    assert!(Properties::from_json_file(&path).is_err());
    std::fs::write(&path, "[1, 2]")?;
    assert!(Properties::from_json_file(&path).is_err());
    Ok(())
}

#[test]
fn test_properties_from_env() {
    // SAFETY: the variable name is unique to this test.
    unsafe {
        std::env::set_var("COUCHBEAM_TEST_ENV_COUCHBASE_BUCKET", "beer-sample");
    }
    let props = Properties::from_env("COUCHBEAM_TEST_ENV_");
    assert_eq!(props.get("couchbase.bucket"), Some("beer-sample"));
}
