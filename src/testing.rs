//! Helpers for testing bulk transfers without a real store.
//!
//! - [`RecordingSleeper`]: stands in for the writer's sleeper and records every backoff delay
//! - [`CollectingSink`]: an in-memory [`RecordSink`](crate::task::RecordSink)
//! - [`TempDirPath`]: a scratch directory with helpers for delimited input files
//!
//! Pair these with [`FakeStore`](crate::store::FakeStore) for the store itself.
//!
//! ```
//! use couchbeam::action::StoreAction;
//! use couchbeam::store::{FakeStore, ScriptedReply, OpStatus};
//! use couchbeam::testing::RecordingSleeper;
//! use couchbeam::writer::{BackoffConfig, BackoffWriter, WriteOutcome};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let store = FakeStore::new();
//! store.push_reply(ScriptedReply::Status(OpStatus::temporary_failure()));
//! let sleeper = RecordingSleeper::new();
//! let mut writer = BackoffWriter::new(Arc::new(store.clone()), BackoffConfig::default())
//!     .with_sleeper(sleeper.clone());
//!
//! assert_eq!(writer.write("k", &StoreAction::set(json!(1)))?, WriteOutcome::Success);
//! assert_eq!(sleeper.sleeps().len(), 1);
//! assert_eq!(store.document("k"), Some(json!(1)));
//! # Ok::<(), couchbeam::BulkIoError>(())
//! ```

pub mod doubles;
pub mod mock_io;

pub use doubles::{CollectingSink, RecordingSleeper};
pub use mock_io::{TempDirPath, read_lines};
