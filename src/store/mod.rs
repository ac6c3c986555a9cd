//! The document store capability and its test double.
//!
//! - [`traits`] - what the transfer logic needs from a store client
//! - [`handle`] - owned, close-exactly-once connection wrapper
//! - [`fake`] - in-memory store with scripted failures

pub mod fake;
pub mod handle;
pub mod traits;

pub use fake::{FakeStore, ScriptedReply};
pub use handle::StoreHandle;
pub use traits::*;
