//! Job configuration.
//!
//! Jobs are configured through a flat map of string properties, the way batch frameworks
//! pass job settings around. [`Properties`] can be built from pairs, loaded from a flat JSON
//! object, or read from prefixed environment variables (`COUCHBEAM_COUCHBASE_URLS` becomes
//! `couchbase.urls`). Property names are case-insensitive.
//!
//! The typed argument objects ([`ImportViewArgs`], [`ExportArgs`], [`UpdateArgs`]) validate
//! the properties a job needs and apply defaults.
//!
//! # Example
//!
//! ```
//! use couchbeam::config::{ImportViewArgs, Properties};
//!
//! let props = Properties::from_pairs([
//!     ("couchbase.urls", "http://cb1:8091/pools"),
//!     ("couchbase.designdoc.name", "dd"),
//!     ("couchbase.view.name", "by_day"),
//!     ("couchbase.view.keys", "2014-07-((08-12))"),
//!     ("output", "/tmp/out"),
//! ]);
//! let args = ImportViewArgs::from_properties(&props)?;
//! assert_eq!(args.keys.len(), 5);
//! assert_eq!(args.partitions, None);
//! # Ok::<(), couchbeam::BulkIoError>(())
//! ```

use crate::action::StoreOperation;
use crate::error::{BulkIoError, Result};
use crate::io::RowFormat;
use crate::keys;
use crate::reader::{DEFAULT_CONNECT_RETRIES, DEFAULT_PAGE_SIZE, ReaderConfig};
use crate::store::ViewTarget;
use crate::update::{DEFAULT_BULK_SIZE, DEFAULT_QUEUE_CAPACITY, PipelineConfig, ShutdownMode};
use crate::writer::BackoffConfig;
use anyhow::Context;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// Connection.
pub const URLS: &str = "couchbase.urls";
pub const BUCKET: &str = "couchbase.bucket";
pub const PASSWORD: &str = "couchbase.password";

// View import.
pub const DESIGN_DOC: &str = "couchbase.designdoc.name";
pub const VIEW: &str = "couchbase.view.name";
pub const VIEW_KEYS: &str = "couchbase.view.keys";
pub const OUTPUT: &str = "output";
pub const DOCS_PER_PAGE: &str = "couchbase.view.docsPerPage";
pub const MAPPERS: &str = "hadoop.mappers";
pub const CONNECT_RETRIES: &str = "couchbase.view.connectRetries";
pub const OUTPUT_FORMAT: &str = "couchbeam.output.format";

// Export and update.
pub const INPUT: &str = "input";
pub const OPERATION: &str = "couchbase.operation";
pub const EXPIRY: &str = "couchbase.expiry";
pub const FIELDS_DELIMITER: &str = "delimiter.fields";
pub const MAX_TRIES: &str = "couchbeam.backoff.maxTries";
pub const MAX_RETRY_INTERVAL_MS: &str = "couchbeam.backoff.maxRetryIntervalMs";
pub const MAX_TOTAL_TIMEOUT_MS: &str = "couchbeam.backoff.maxTotalTimeoutMs";
pub const BASE_DELAY_MS: &str = "couchbeam.backoff.baseDelayMs";
pub const QUEUE_SIZE: &str = "couchbase.update.queue.size";
pub const BULK_SIZE: &str = "couchbase.update.bulk.size";
pub const SHUTDOWN: &str = "couchbeam.update.shutdown";

pub const DEFAULT_BUCKET: &str = "default";
pub const DEFAULT_DELIMITER: u8 = b'\t';

// ============================================================================
// Properties
// ============================================================================

/// Case-insensitive string property map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut props = Self::new();
        for (k, v) in pairs {
            props.set(k.as_ref(), v);
        }
        props
    }

    /// Load a flat JSON object. Non-string scalars are stored in their JSON text form.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not JSON, or is not a flat object.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("parse {}", path.display()))?;
        let Value::Object(map) = value else {
            return Err(BulkIoError::config(format!(
                "{} must hold a JSON object",
                path.display()
            )));
        };

        let mut props = Self::new();
        for (k, v) in map {
            let v = match v {
                Value::String(s) => s,
                Value::Number(_) | Value::Bool(_) => v.to_string(),
                _ => {
                    return Err(BulkIoError::config(format!(
                        "property {k} in {} must be a scalar",
                        path.display()
                    )));
                }
            };
            props.set(&k, v);
        }
        Ok(props)
    }

    /// Read every environment variable starting with `prefix`. The prefix is stripped, the
    /// rest lowercased and `_` turned into `.`.
    #[must_use]
    pub fn from_env(prefix: &str) -> Self {
        let mut props = Self::new();
        for (key, value) in std::env::vars() {
            if let Some(name) = key.strip_prefix(prefix) {
                props.set(&name.replace('_', "."), value);
            }
        }
        props
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_ascii_lowercase(), value.into());
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Overlay `other` on top of these properties.
    pub fn extend(&mut self, other: &Self) {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), v.clone());
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    /// # Errors
    ///
    /// Returns [`BulkIoError::Config`] if the property is missing or blank.
    pub fn require(&self, key: &str) -> Result<&str> {
        match self.get(key) {
            Some(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(BulkIoError::config(format!("missing required property {key}"))),
        }
    }

    /// Parse a property, falling back to `default` when it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`BulkIoError::Config`] if the property is present but does not parse.
    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.parse_opt(key).map(|v| v.unwrap_or(default))
    }

    /// Parse a property if present.
    ///
    /// # Errors
    ///
    /// Returns [`BulkIoError::Config`] if the property is present but does not parse.
    pub fn parse_opt<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(key)
            .map(|raw| {
                raw.trim()
                    .parse::<T>()
                    .map_err(|e| BulkIoError::config(format!("property {key}={raw:?}: {e}")))
            })
            .transpose()
    }

    fn positive(&self, key: &str, default: usize) -> Result<usize> {
        let v = self.parse_or(key, default)?;
        if v == 0 {
            return Err(BulkIoError::config(format!("property {key} must be positive")));
        }
        Ok(v)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ============================================================================
// Typed arguments
// ============================================================================

/// Where the store lives. Used by hosts to build a connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionArgs {
    pub urls: Vec<String>,
    pub bucket: String,
    pub password: String,
}

impl ConnectionArgs {
    /// # Errors
    ///
    /// Returns [`BulkIoError::Config`] if no URL is given.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let urls: Vec<String> = props
            .require(URLS)?
            .split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect();
        if urls.is_empty() {
            return Err(BulkIoError::config(format!("property {URLS} lists no URL")));
        }
        Ok(Self {
            urls,
            bucket: props.get(BUCKET).unwrap_or(DEFAULT_BUCKET).to_string(),
            password: props.get(PASSWORD).unwrap_or_default().to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportViewArgs {
    pub connection: ConnectionArgs,
    pub target: ViewTarget,
    /// Expanded query keys, in order.
    pub keys: Vec<String>,
    pub output: PathBuf,
    pub page_size: usize,
    /// Desired reader partitions; `None` means one per key.
    pub partitions: Option<usize>,
    pub connect_retries: u32,
    pub format: RowFormat,
}

impl ImportViewArgs {
    /// # Errors
    ///
    /// Returns [`BulkIoError::MalformedKeySpec`] for a bad key spec and
    /// [`BulkIoError::Config`] for missing or invalid properties, including a key spec that
    /// expands to no keys.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let spec = props.require(VIEW_KEYS)?;
        let keys = keys::expand(spec)?;
        if keys.is_empty() {
            return Err(BulkIoError::config(format!("property {VIEW_KEYS} expands to no keys")));
        }

        let partitions = props.parse_opt::<usize>(MAPPERS)?;
        if partitions == Some(0) {
            return Err(BulkIoError::config(format!("property {MAPPERS} must be positive")));
        }

        Ok(Self {
            connection: ConnectionArgs::from_properties(props)?,
            target: ViewTarget::new(props.require(DESIGN_DOC)?, props.require(VIEW)?),
            keys,
            output: PathBuf::from(props.require(OUTPUT)?),
            page_size: props.positive(DOCS_PER_PAGE, DEFAULT_PAGE_SIZE)?,
            partitions,
            connect_retries: props.parse_or(CONNECT_RETRIES, DEFAULT_CONNECT_RETRIES)?,
            format: parse_format(props.get(OUTPUT_FORMAT))?,
        })
    }

    #[must_use]
    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig::new(self.target.clone())
            .with_page_size(self.page_size)
            .with_connect_retries(self.connect_retries)
    }
}

fn parse_format(raw: Option<&str>) -> Result<RowFormat> {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("text" | "tsv") => Ok(RowFormat::Text),
        #[cfg(feature = "io-jsonl")]
        Some("jsonl") => Ok(RowFormat::Jsonl),
        Some(other) => Err(BulkIoError::config(format!(
            "unsupported output format {other:?}"
        ))),
    }
}

/// Parse a field delimiter: one byte, or the escape `\t`.
///
/// # Errors
///
/// Returns [`BulkIoError::Config`] for anything else.
pub fn parse_delimiter(raw: &str) -> Result<u8> {
    match raw.as_bytes() {
        [b] => Ok(*b),
        br"\t" => Ok(b'\t'),
        _ => Err(BulkIoError::config(format!(
            "property {FIELDS_DELIMITER}={raw:?} must be a single byte"
        ))),
    }
}

fn backoff_from(props: &Properties) -> Result<BackoffConfig> {
    let d = BackoffConfig::default();
    Ok(BackoffConfig {
        max_tries: props.parse_or(MAX_TRIES, d.max_tries)?,
        max_retry_interval_ms: props.parse_or(MAX_RETRY_INTERVAL_MS, d.max_retry_interval_ms)?,
        max_total_timeout_ms: props.parse_or(MAX_TOTAL_TIMEOUT_MS, d.max_total_timeout_ms)?,
        base_delay_ms: props.parse_or(BASE_DELAY_MS, d.base_delay_ms)?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArgs {
    pub connection: ConnectionArgs,
    /// File, directory or glob pattern.
    pub input: String,
    pub operation: StoreOperation,
    pub expiry: u32,
    pub delimiter: u8,
    pub backoff: BackoffConfig,
}

impl ExportArgs {
    /// # Errors
    ///
    /// Returns [`BulkIoError::Config`] for missing or invalid properties.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        Ok(Self {
            connection: ConnectionArgs::from_properties(props)?,
            input: props.require(INPUT)?.to_string(),
            operation: props.parse_or(OPERATION, StoreOperation::Set)?,
            expiry: props.parse_or(EXPIRY, 0)?,
            delimiter: props
                .get(FIELDS_DELIMITER)
                .map_or(Ok(DEFAULT_DELIMITER), parse_delimiter)?,
            backoff: backoff_from(props)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateArgs {
    pub connection: ConnectionArgs,
    /// File, directory or glob pattern.
    pub input: String,
    pub delimiter: u8,
    pub backoff: BackoffConfig,
    pub pipeline: PipelineConfig,
    pub shutdown: ShutdownMode,
}

impl UpdateArgs {
    /// # Errors
    ///
    /// Returns [`BulkIoError::Config`] for missing or invalid properties.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        Ok(Self {
            connection: ConnectionArgs::from_properties(props)?,
            input: props.require(INPUT)?.to_string(),
            delimiter: props
                .get(FIELDS_DELIMITER)
                .map_or(Ok(DEFAULT_DELIMITER), parse_delimiter)?,
            backoff: backoff_from(props)?,
            pipeline: PipelineConfig {
                queue_capacity: props.positive(QUEUE_SIZE, DEFAULT_QUEUE_CAPACITY)?,
                bulk_size: props.positive(BULK_SIZE, DEFAULT_BULK_SIZE)?,
            },
            shutdown: props.parse_or(SHUTDOWN, ShutdownMode::default())?,
        })
    }
}
