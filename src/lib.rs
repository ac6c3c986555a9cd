//! # Couchbeam
//!
//! Reliable **bulk transfers** between a batch framework and a Couchbase-style document store.
//! Couchbeam moves data in both directions: it reads the rows of a store view page by page
//! into batch partitions, and it writes (or read-merge-writes) batch records into the store
//! while absorbing the store's transient overload signals.
//!
//! ## Key Features
//!
//! - **View key expansion** - `2014-07-((01-31))`, quoted keys and JSON-array keys in one
//!   `;`-separated spec
//! - **Key partitioning** - contiguous key runs, one reader per partition
//! - **Paginated view reading** - constant memory per reader, reconnect on cancelled queries
//! - **Exponential backoff writes** - per-record retry ceilings plus a fatal cumulative
//!   budget that marks the store unhealthy
//! - **Bulk read-merge-write** - bounded queue with backpressure, one bulk-get per batch
//! - **Counters** - every outcome tallied under stable names for the host to aggregate
//! - **Job drivers** - view import, serial import, export and update, sequential or parallel
//!
//! ## Quick Start
//!
//! ```
//! use couchbeam::store::{FakeStore, ViewTarget};
//! use couchbeam::{PaginatedViewReader, ReaderConfig, keys};
//! use std::sync::Arc;
//!
//! let store = FakeStore::new();
//! let target = ViewTarget::new("dd", "by_day");
//! store.add_view_rows(&target, "2014-07-01", ["a", "b"]);
//! store.add_view_rows(&target, "2014-07-02", ["c"]);
//!
//! let keys = keys::expand("2014-07-((01-02))")?;
//! let reader = PaginatedViewReader::new(Arc::new(store), ReaderConfig::new(target), keys);
//! let ids: Vec<String> = reader.map(|r| r.map(|(id, _)| id)).collect::<Result<_, _>>()?;
//! assert_eq!(ids, ["a", "b", "c"]);
//! # Ok::<(), couchbeam::BulkIoError>(())
//! ```
//!
//! ## Core Concepts
//!
//! ### Store seam
//!
//! Everything talks to the store through [`StoreConnector`](store::StoreConnector) and
//! [`DocumentStore`](store::DocumentStore). Connections are owned by a
//! [`StoreHandle`](store::StoreHandle), which closes them exactly once.
//! [`FakeStore`](store::FakeStore) implements both traits in memory for tests.
//!
//! ### Host seam
//!
//! [`RecordSource`](task::RecordSource) and [`RecordSink`](task::RecordSink) are the open,
//! next and close shapes a host batch framework drives. Counters go to a shared
//! [`CounterSet`](counters::CounterSet).
//!
//! ### Failure classes
//!
//! Transient store failures are retried. Everything that reaches the caller is a
//! [`BulkIoError`] naming its cause; see [`error`].

pub mod action;
pub mod config;
pub mod counters;
pub mod error;
pub mod io;
pub mod jobs;
pub mod keys;
pub mod mappers;
pub mod partition;
pub mod reader;
pub mod runner;
pub mod store;
pub mod task;
pub mod testing;
pub mod update;
pub mod writer;

pub use action::{StoreAction, StoreOperation};
pub use counters::CounterSet;
pub use error::{BulkIoError, Result};
pub use jobs::{JobError, JobReport, export, import_view, serial_import, update};
pub use mappers::{CaseFlipUpdate, DelimitedLineMapper};
pub use partition::{Partition, partition};
pub use reader::{PaginatedViewReader, ReaderConfig};
pub use runner::{ExecMode, Runner};
pub use update::{BulkInput, BulkUpdatePipeline, ShutdownMode, UpdateMapper};
pub use writer::{BackoffConfig, BackoffWriter, WriteOutcome};
