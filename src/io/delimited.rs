//! Reading delimited text input line by line.
//!
//! Lines are split on a single-byte delimiter with no quoting and no header row, and lines
//! may have any number of fields. Blank lines are skipped.

use crate::task::RecordSource;
use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord};
use std::fs::File;
use std::path::{Path, PathBuf};

fn builder(delimiter: u8) -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .quoting(false);
    builder
}

/// Read a whole delimited file into rows of fields.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or a line is not valid UTF-8.
pub fn read_delimited(path: impl AsRef<Path>, delimiter: u8) -> Result<Vec<Vec<String>>> {
    let path = path.as_ref();
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut rdr = builder(delimiter).from_reader(f);
    let mut out = Vec::new();
    for (i, rec) in rdr.records().enumerate() {
        let rec = rec.with_context(|| format!("read line {} in {}", i + 1, path.display()))?;
        out.push(rec.iter().map(str::to_string).collect());
    }
    Ok(out)
}

/// Streaming reader over one delimited file, yielding `(line number, fields)`.
pub struct DelimitedReader {
    path: PathBuf,
    reader: csv::Reader<File>,
    record: StringRecord,
    total_bytes: u64,
    lines: u64,
    done: bool,
}

impl DelimitedReader {
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, delimiter: u8) -> Result<Self> {
        let path = path.as_ref();
        let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let total_bytes = f.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path: path.to_path_buf(),
            reader: builder(delimiter).from_reader(f),
            record: StringRecord::new(),
            total_bytes,
            lines: 0,
            done: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines returned so far.
    #[must_use]
    pub const fn lines(&self) -> u64 {
        self.lines
    }
}

impl RecordSource<u64, Vec<String>> for DelimitedReader {
    fn next_record(&mut self) -> crate::error::Result<Option<(u64, Vec<String>)>> {
        if self.done {
            return Ok(None);
        }
        let more = self
            .reader
            .read_record(&mut self.record)
            .with_context(|| format!("read line {} in {}", self.lines + 1, self.path.display()))?;
        if !more {
            self.done = true;
            return Ok(None);
        }
        self.lines += 1;
        Ok(Some((
            self.lines,
            self.record.iter().map(str::to_string).collect(),
        )))
    }

    #[allow(clippy::cast_precision_loss)]
    fn progress(&self) -> f32 {
        if self.done || self.total_bytes == 0 {
            return 1.0;
        }
        (self.reader.position().byte() as f32 / self.total_bytes as f32).min(1.0)
    }

    fn close(&mut self) {
        self.done = true;
    }
}
