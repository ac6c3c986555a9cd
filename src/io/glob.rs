//! Resolving job input locations into concrete files.
//!
//! An input location is a single file, a directory (every regular file directly inside it,
//! skipping names that start with `.` or `_`), or a glob pattern such as `data/*.tsv`.
//! Results are sorted so partition numbering is deterministic.

use anyhow::{Context, Result, bail};
use glob::glob;
use std::fs;
use std::path::{Path, PathBuf};

/// Expand a glob pattern into a sorted vector of matching files. No match is not an error.
///
/// # Errors
///
/// Returns an error if the pattern is invalid or a matched entry cannot be read.
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;

    let mut result = Vec::new();
    for entry in paths {
        let path =
            entry.with_context(|| format!("error reading glob entry for pattern: {pattern}"))?;
        if path.is_file() {
            result.push(path);
        }
    }
    result.sort();
    Ok(result)
}

/// Resolve an input location into the files it names, failing if there are none.
///
/// # Errors
///
/// Returns an error if the location cannot be read, the pattern is invalid, or nothing
/// matches.
pub fn input_files(location: &str) -> Result<Vec<PathBuf>> {
    let path = Path::new(location);
    let files = if path.is_dir() {
        list_dir(path)?
    } else if is_pattern(location) {
        expand_glob(location)?
    } else if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        Vec::new()
    };

    if files.is_empty() {
        bail!("no input files found at {location}");
    }
    Ok(files)
}

fn is_pattern(location: &str) -> bool {
    location.contains(['*', '?', '['])
}

fn list_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let path = entry
            .with_context(|| format!("read entry in {}", dir.display()))?
            .path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.') || n.starts_with('_'));
        if path.is_file() && !hidden {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
