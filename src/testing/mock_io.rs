//! Scratch files for tests.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary directory that is deleted when dropped.
pub struct TempDirPath {
    #[allow(dead_code)]
    temp_dir: TempDir,
    path: PathBuf,
}

impl TempDirPath {
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created.
    pub fn new() -> std::io::Result<Self> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().to_path_buf();
        Ok(Self { temp_dir, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of `filename` inside the directory. The file is not created.
    #[must_use]
    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.path.join(filename)
    }

    /// Write `lines` to `filename`, each joined with `delimiter` and ended by a newline.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_delimited(
        &self,
        filename: &str,
        delimiter: char,
        lines: &[&[&str]],
    ) -> std::io::Result<PathBuf> {
        let mut text = String::new();
        for fields in lines {
            text.push_str(&fields.join(&delimiter.to_string()));
            text.push('\n');
        }
        let path = self.file_path(filename);
        fs::write(&path, text)?;
        Ok(path)
    }

    /// Sorted names of the files in the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn file_names(&self) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

impl Default for TempDirPath {
    fn default() -> Self {
        Self::new().expect("Failed to create temporary directory")
    }
}

/// Read a file into lines, without trailing newlines.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn read_lines(path: impl AsRef<Path>) -> std::io::Result<Vec<String>> {
    Ok(fs::read_to_string(path)?.lines().map(str::to_string).collect())
}
