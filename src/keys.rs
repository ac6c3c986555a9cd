//! View key specifications.
//!
//! A key spec is a compact, user-written list of view query keys:
//!
//! ```text
//! ["20140720",0];["201407((01-31))",1];"2014-07-((08-12))"
//! ```
//!
//! ## Grammar
//!
//! - Keys are separated by `;`. A `;` between double quotes or inside square brackets is part
//!   of the key. A `"`, `[` or `]` directly preceded by `\` is escaped and does not change the
//!   quoting state. Brackets do not nest: `]` always closes.
//! - A key may contain one range escape `((start-end))` with decimal bounds. It expands into one
//!   key per integer in `start..=end`, with the number spliced between the surrounding text.
//!   Bounds of equal width are zero padded to that width (`((000-127))` yields `000`..`127`),
//!   otherwise numbers are printed unpadded. When a key holds several escapes, the last one is
//!   expanded and the rest stay literal.
//! - Text with `((` that does not form a range escape is kept literally. A well-formed escape
//!   whose bounds are not decimal (`((a-z))`), whose start exceeds its end, or whose bounds
//!   do not fit a `u32` is rejected. So is a range spanning more than [`MAX_RANGE_KEYS`] keys.
//! - Empty keys between two separators are kept; a trailing separator does not add a key.
//!   An empty spec expands to no keys.
//!
//! Expansion is pure and deterministic: keys come out in textual order.

use crate::error::{BulkIoError, Result};
use regex::Regex;
use std::sync::LazyLock;

/// Separator between keys.
pub const KEY_SEPARATOR: char = ';';

/// Most keys a single range escape may expand into.
pub const MAX_RANGE_KEYS: u64 = 1_000_000;

static RANGE_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?s)(.*)\(\(([0-9]+)-([0-9]+)\)\)(.*)$").expect("valid range escape regex")
});

/// Anything shaped like a range escape, whatever its bounds look like.
static RANGE_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\(([^()\-]+)-([^()\-]+)\)\)").expect("valid range regex"));

/// Expand a key spec into concrete query keys.
///
/// # Errors
///
/// Returns [`BulkIoError::MalformedKeySpec`] if a quote or bracket is left open, or if a range
/// escape has non-decimal, reversed or overflowing bounds or spans more than
/// [`MAX_RANGE_KEYS`] keys.
pub fn expand(spec: &str) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    for segment in split_keys(spec)? {
        expand_segment(spec, &segment, &mut keys)?;
    }
    Ok(keys)
}

/// Split a key spec on unquoted, unbracketed separators without expanding ranges.
///
/// # Errors
///
/// Returns [`BulkIoError::MalformedKeySpec`] if a quote or bracket is still open at the end.
pub fn split_keys(spec: &str) -> Result<Vec<String>> {
    let mut segments = Vec::new();
    let mut in_quotes = false;
    let mut in_brackets = false;
    let mut start = 0;
    let mut prev: Option<char> = None;

    for (i, c) in spec.char_indices() {
        if c == KEY_SEPARATOR && !in_quotes && !in_brackets {
            segments.push(spec[start..i].to_string());
            start = i + c.len_utf8();
        }
        let escaped = prev == Some('\\');
        match c {
            '"' if !escaped => in_quotes = !in_quotes,
            '[' if !escaped => in_brackets = true,
            ']' if !escaped => in_brackets = false,
            _ => {}
        }
        prev = Some(c);
    }

    if in_quotes {
        return Err(BulkIoError::malformed(spec, "unterminated double quote"));
    }
    if in_brackets {
        return Err(BulkIoError::malformed(spec, "unterminated square bracket"));
    }
    if start < spec.len() {
        segments.push(spec[start..].to_string());
    }
    Ok(segments)
}

fn expand_segment(spec: &str, segment: &str, out: &mut Vec<String>) -> Result<()> {
    let Some(caps) = RANGE_ESCAPE.captures(segment) else {
        if let Some(bad) = RANGE_LIKE.captures(segment) {
            return Err(BulkIoError::malformed(
                spec,
                format!("range bounds {:?} and {:?} are not integers", &bad[1], &bad[2]),
            ));
        }
        out.push(segment.to_string());
        return Ok(());
    };

    let (prefix, lo, hi, suffix) = (&caps[1], &caps[2], &caps[3], &caps[4]);
    let parse = |digits: &str| {
        digits
            .parse::<u32>()
            .map_err(|e| BulkIoError::malformed(spec, format!("range bound {digits}: {e}")))
    };
    let (start, end) = (parse(lo)?, parse(hi)?);
    if start > end {
        return Err(BulkIoError::malformed(
            spec,
            format!("range start {start} is greater than end {end}"),
        ));
    }
    let count = u64::from(end) - u64::from(start) + 1;
    if count > MAX_RANGE_KEYS {
        return Err(BulkIoError::malformed(
            spec,
            format!("range {start}-{end} spans {count} keys, more than {MAX_RANGE_KEYS}"),
        ));
    }

    let width = if lo.len() == hi.len() { hi.len() } else { 0 };
    out.extend((start..=end).map(|n| format!("{prefix}{n:0width$}{suffix}")));
    Ok(())
}
