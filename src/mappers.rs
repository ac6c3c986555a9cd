//! Record mappers for the export and update jobs.

use crate::action::{StoreAction, StoreOperation};
use crate::counters::{self, CounterSet};
use crate::update::{BulkInput, UpdateMapper};
use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Turns a delimited input line into one store action.
///
/// Field 0 is the store key and field 1 the value. DELETE and TOUCH need only the key; every
/// other operation needs both. Trailing empty fields do not count, so `k<TAB>` has one field.
/// Lines with too few fields are counted in `LINES_WITH_WRONG_COLUMNS_COUNT` and skipped.
///
/// A value that parses as JSON is stored as that JSON, anything else as a JSON string. Parsed
/// values are re-encoded on write, so the stored text is canonical JSON rather than the input
/// bytes: `1e5` is stored as `100000.0` and insignificant whitespace is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelimitedLineMapper {
    pub operation: StoreOperation,
    pub expiry: u32,
}

impl DelimitedLineMapper {
    #[must_use]
    pub const fn new(operation: StoreOperation, expiry: u32) -> Self {
        Self { operation, expiry }
    }

    /// Map one line's fields, or `None` if the line is skipped.
    #[must_use]
    pub fn map_fields(&self, fields: &[String], counters: &CounterSet) -> Option<(String, StoreAction)> {
        let needed = if self.operation.is_unary() { 1 } else { 2 };
        let len = fields.iter().rposition(|f| !f.is_empty()).map_or(0, |i| i + 1);
        let fields = &fields[..len];
        let key = fields.first().filter(|k| !k.is_empty());
        let (Some(key), true) = (key, fields.len() >= needed) else {
            counters.increment(counters::LINES_WITH_WRONG_COLUMNS_COUNT, 1);
            return None;
        };

        let value = if self.operation.is_unary() {
            None
        } else {
            fields.get(1).map(|raw| parse_value(raw))
        };
        Some((
            key.clone(),
            StoreAction::new(self.operation, value, self.expiry),
        ))
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Benchmark document shape used by [`CaseFlipUpdate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LettersDoc {
    pub letters: String,
    pub number: i64,
}

/// Benchmark update: flips the case of `letters` and the sign of `number`.
///
/// The input record's first field is the store key. A missing document counts in
/// `NULL_DOCS` and writes nothing. Lowercase letters become uppercase with a negative number;
/// anything else becomes lowercase with a positive number.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseFlipUpdate;

impl CaseFlipUpdate {
    /// # Errors
    ///
    /// Returns an error if `doc` is not a `{"letters", "number"}` object (possibly encoded as
    /// a JSON string) or `letters` is empty.
    pub fn flip(doc: &Value) -> anyhow::Result<LettersDoc> {
        let mut parsed: LettersDoc = match doc {
            Value::String(raw) => serde_json::from_str(raw),
            other => serde_json::from_value(other.clone()),
        }
        .context("invalid JSON format")?;

        let Some(first) = parsed.letters.chars().next() else {
            bail!("letters must not be empty");
        };
        if first.is_ascii_lowercase() {
            parsed.letters = parsed.letters.to_uppercase();
            parsed.number = -parsed.number.saturating_abs();
        } else {
            parsed.letters = parsed.letters.to_lowercase();
            parsed.number = parsed.number.saturating_abs();
        }
        Ok(parsed)
    }
}

impl UpdateMapper<Vec<String>> for CaseFlipUpdate {
    type Payload = ();

    fn transform(&self, record: &Vec<String>) -> Option<BulkInput<()>> {
        record
            .first()
            .filter(|k| !k.is_empty())
            .map(|key| BulkInput::new(key.clone(), ()))
    }

    fn merge(
        &self,
        _key: &str,
        _payload: (),
        fetched: Option<&Value>,
        counters: &CounterSet,
    ) -> anyhow::Result<StoreAction> {
        let Some(doc) = fetched else {
            counters.increment(counters::NULL_DOCS, 1);
            return Ok(StoreAction::none());
        };
        let flipped = Self::flip(doc)?;
        Ok(StoreAction::set(serde_json::to_value(flipped)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(parts: &[&str]) -> Vec<String> {
        parts.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_value_is_json_when_it_parses() {
        let mapper = DelimitedLineMapper::new(StoreOperation::Set, 0);
        let counters = CounterSet::new();
        let (_, action) = mapper
            .map_fields(&fields(&["k", r#"{"a":1}"#]), &counters)
            .expect("line maps");
        assert_eq!(action.value, Some(json!({"a": 1})));
        let (_, action) = mapper
            .map_fields(&fields(&["k", "plain text"]), &counters)
            .expect("line maps");
        assert_eq!(action.value, Some(json!("plain text")));
    }

    #[test]
    fn test_short_lines_are_counted() {
        let counters = CounterSet::new();
        let set = DelimitedLineMapper::new(StoreOperation::Set, 0);
        assert!(set.map_fields(&fields(&["k"]), &counters).is_none());
        let delete = DelimitedLineMapper::new(StoreOperation::Delete, 0);
        assert!(delete.map_fields(&fields(&["k"]), &counters).is_some());
        assert!(delete.map_fields(&fields(&[""]), &counters).is_none());
        assert_eq!(counters.get(counters::LINES_WITH_WRONG_COLUMNS_COUNT), 2);
    }

    #[test]
    fn test_trailing_empty_fields_do_not_count() {
        let counters = CounterSet::new();
        let set = DelimitedLineMapper::new(StoreOperation::Set, 0);
        assert!(set.map_fields(&fields(&["k", ""]), &counters).is_none());
        assert!(set.map_fields(&fields(&["", ""]), &counters).is_none());
        let (_, action) = set
            .map_fields(&fields(&["k", "", "x"]), &counters)
            .expect("line maps");
        assert_eq!(action.value, Some(json!("")));
        let touch = DelimitedLineMapper::new(StoreOperation::Touch, 0);
        assert!(touch.map_fields(&fields(&["k", "", ""]), &counters).is_some());
        assert_eq!(counters.get(counters::LINES_WITH_WRONG_COLUMNS_COUNT), 2);
    }

    #[test]
    fn test_json_values_are_reencoded() {
        let counters = CounterSet::new();
        let set = DelimitedLineMapper::new(StoreOperation::Set, 0);
        let (_, action) = set
            .map_fields(&fields(&["k", "1e5"]), &counters)
            .expect("line maps");
        assert_eq!(action.value.map(|v| v.to_string()), Some("100000.0".to_string()));
    }

    #[test]
    fn test_flip_both_directions() -> anyhow::Result<()> {
        let up = CaseFlipUpdate::flip(&json!({"letters": "abc", "number": 7}))?;
        assert_eq!(up, LettersDoc { letters: "ABC".into(), number: -7 });
        let down = CaseFlipUpdate::flip(&json!(r#"{"letters":"ABC","number":-7}"#))?;
        assert_eq!(down, LettersDoc { letters: "abc".into(), number: 7 });
        assert!(CaseFlipUpdate::flip(&json!("not json")).is_err());
        Ok(())
    }
}
