//! Output files for imported view rows.
//!
//! - [`TextPartWriter`] writes `id<TAB>document-json` lines
//! - [`JsonlPartWriter`] writes `{"id": ..., "doc": ...}` lines (feature `io-jsonl`)
//! - [`PageFileWriter`] writes one file per view page with `id\0document` lines
//!
//! Partition outputs are named `part-m-NNNNN` and page files `part-NNNNN`.

use crate::error::Result;
use crate::store::ViewRow;
use crate::task::RecordSink;
use anyhow::Context;
#[cfg(feature = "io-jsonl")]
use serde::Serialize;
use serde_json::Value;
use std::fs::{File, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Output encoding of imported rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RowFormat {
    #[default]
    Text,
    #[cfg(feature = "io-jsonl")]
    Jsonl,
}

/// File name of partition `index`'s output.
#[must_use]
pub fn part_file_name(index: usize) -> String {
    format!("part-m-{index:05}")
}

/// File name of page `index` in a serial import.
#[must_use]
pub fn page_file_name(index: usize) -> String {
    format!("part-{index:05}")
}

fn create_in(dir: &Path, name: &str) -> anyhow::Result<(PathBuf, BufWriter<File>)> {
    create_dir_all(dir).with_context(|| format!("mkdir -p {}", dir.display()))?;
    let path = dir.join(name);
    let f = File::create(&path).with_context(|| format!("create {}", path.display()))?;
    Ok((path, BufWriter::new(f)))
}

/// Open the partition output for `format`.
///
/// # Errors
///
/// Returns an error if the output directory or file cannot be created.
pub fn open_part_writer(
    dir: &Path,
    index: usize,
    format: RowFormat,
) -> Result<Box<dyn RecordSink<String, Value> + Send>> {
    Ok(match format {
        RowFormat::Text => Box::new(TextPartWriter::create(dir, index)?),
        #[cfg(feature = "io-jsonl")]
        RowFormat::Jsonl => Box::new(JsonlPartWriter::create(dir, index)?),
    })
}

/// Tab-separated `id` and compact document JSON, one row per line.
pub struct TextPartWriter {
    path: PathBuf,
    out: BufWriter<File>,
    rows: u64,
}

impl TextPartWriter {
    /// # Errors
    ///
    /// Returns an error if the output directory or file cannot be created.
    pub fn create(dir: &Path, index: usize) -> Result<Self> {
        let (path, out) = create_in(dir, &part_file_name(index))?;
        Ok(Self { path, out, rows: 0 })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn rows(&self) -> u64 {
        self.rows
    }
}

impl RecordSink<String, Value> for TextPartWriter {
    fn emit(&mut self, id: String, doc: Value) -> Result<()> {
        writeln!(self.out, "{id}\t{doc}")?;
        self.rows += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(feature = "io-jsonl")]
#[derive(Serialize)]
struct JsonlRow<'a> {
    id: &'a str,
    doc: &'a Value,
}

/// One `{"id", "doc"}` JSON object per line.
#[cfg(feature = "io-jsonl")]
pub struct JsonlPartWriter {
    path: PathBuf,
    out: BufWriter<File>,
    rows: u64,
}

#[cfg(feature = "io-jsonl")]
impl JsonlPartWriter {
    /// # Errors
    ///
    /// Returns an error if the output directory or file cannot be created.
    pub fn create(dir: &Path, index: usize) -> Result<Self> {
        let (path, out) = create_in(dir, &part_file_name(index))?;
        Ok(Self { path, out, rows: 0 })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn rows(&self) -> u64 {
        self.rows
    }
}

#[cfg(feature = "io-jsonl")]
impl RecordSink<String, Value> for JsonlPartWriter {
    fn emit(&mut self, id: String, doc: Value) -> Result<()> {
        serde_json::to_writer(&mut self.out, &JsonlRow { id: &id, doc: &doc })
            .with_context(|| format!("serialize row {id} to {}", self.path.display()))?;
        self.out.write_all(b"\n")?;
        self.rows += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Writes every view page to its own numbered file.
pub struct PageFileWriter {
    dir: PathBuf,
    pages: usize,
}

impl PageFileWriter {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pages: 0,
        }
    }

    /// Write the rows of one page that carry a document. Returns the file written.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn write_page(&mut self, rows: &[ViewRow]) -> Result<PathBuf> {
        let (path, mut out) = create_in(&self.dir, &page_file_name(self.pages))?;
        for row in rows {
            if let Some(doc) = &row.document {
                writeln!(out, "{}\0{doc}", row.id)?;
            }
        }
        out.flush()?;
        self.pages += 1;
        Ok(path)
    }

    /// Pages written so far.
    #[must_use]
    pub const fn pages(&self) -> usize {
        self.pages
    }
}
