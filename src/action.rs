//! Store operations requested by the export and update paths.

use crate::error::BulkIoError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StoreOperation {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Delete,
    /// Re-stamp the expiry. Also serves as an existence check.
    Touch,
    /// Skip the record without contacting the store.
    None,
}

impl StoreOperation {
    /// Operations that take only a key, no value.
    #[must_use]
    pub const fn is_unary(self) -> bool {
        matches!(self, Self::Delete | Self::Touch)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Set => "SET",
            Self::Add => "ADD",
            Self::Replace => "REPLACE",
            Self::Append => "APPEND",
            Self::Prepend => "PREPEND",
            Self::Delete => "DELETE",
            Self::Touch => "TOUCH",
            Self::None => "NONE",
        }
    }
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StoreOperation {
    type Err = BulkIoError;

    /// Case-insensitive. `EXISTS` is accepted as an alias of `TOUCH`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SET" => Ok(Self::Set),
            "ADD" => Ok(Self::Add),
            "REPLACE" => Ok(Self::Replace),
            "APPEND" => Ok(Self::Append),
            "PREPEND" => Ok(Self::Prepend),
            "DELETE" => Ok(Self::Delete),
            "TOUCH" | "EXISTS" => Ok(Self::Touch),
            "NONE" => Ok(Self::None),
            other => Err(BulkIoError::config(format!("unknown store operation {other:?}"))),
        }
    }
}

/// One requested store mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreAction {
    pub operation: StoreOperation,
    pub value: Option<Value>,
    /// Seconds until expiry; 0 means never.
    pub expiry: u32,
}

impl StoreAction {
    #[must_use]
    pub const fn new(operation: StoreOperation, value: Option<Value>, expiry: u32) -> Self {
        Self {
            operation,
            value,
            expiry,
        }
    }

    #[must_use]
    pub const fn none() -> Self {
        Self::new(StoreOperation::None, None, 0)
    }

    #[must_use]
    pub const fn set(value: Value) -> Self {
        Self::new(StoreOperation::Set, Some(value), 0)
    }

    #[must_use]
    pub const fn add(value: Value) -> Self {
        Self::new(StoreOperation::Add, Some(value), 0)
    }

    #[must_use]
    pub const fn replace(value: Value) -> Self {
        Self::new(StoreOperation::Replace, Some(value), 0)
    }

    #[must_use]
    pub const fn append(value: Value) -> Self {
        Self::new(StoreOperation::Append, Some(value), 0)
    }

    #[must_use]
    pub const fn prepend(value: Value) -> Self {
        Self::new(StoreOperation::Prepend, Some(value), 0)
    }

    #[must_use]
    pub const fn delete() -> Self {
        Self::new(StoreOperation::Delete, None, 0)
    }

    #[must_use]
    pub const fn touch(expiry: u32) -> Self {
        Self::new(StoreOperation::Touch, None, expiry)
    }

    #[must_use]
    pub const fn with_expiry(mut self, expiry: u32) -> Self {
        self.expiry = expiry;
        self
    }

    #[must_use]
    pub const fn is_noop(&self) -> bool {
        matches!(self.operation, StoreOperation::None)
    }
}
