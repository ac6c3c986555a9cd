//! Splitting expanded view keys into reader partitions.

use crate::error::{BulkIoError, Result};

/// An ordered run of query keys owned by one reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub index: usize,
    pub keys: Vec<String>,
}

/// Split `keys` into at most `desired` partitions of `ceil(len / desired)` keys each.
///
/// Keys keep their input order and each partition is filled before the next one starts, so
/// only the last partition can be short. `desired` defaults to one partition per key and
/// is clamped to the number of keys.
///
/// # Errors
///
/// Returns [`BulkIoError::Config`] if `desired` is `Some(0)`.
pub fn partition(keys: Vec<String>, desired: Option<usize>) -> Result<Vec<Partition>> {
    let desired = desired.unwrap_or(keys.len());
    if desired == 0 && !keys.is_empty() {
        return Err(BulkIoError::config("partition count must be positive"));
    }
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let chunk = keys.len().div_ceil(desired);
    Ok(keys
        .chunks(chunk)
        .enumerate()
        .map(|(index, c)| Partition {
            index,
            keys: c.to_vec(),
        })
        .collect())
}
