//! Adapter seams towards a host batch framework.
//!
//! The transfer logic only depends on these two small traits, so it can be driven by any
//! framework that offers an open/next/close source and an emit/close sink, and tested
//! without one.

use crate::error::Result;
use crate::reader::PaginatedViewReader;
use crate::store::ViewRow;

/// Pull-based record input of one partition.
pub trait RecordSource<K, V> {
    /// The next record, or `None` at the end of the partition.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying input fails.
    fn next_record(&mut self) -> Result<Option<(K, V)>>;

    /// Coarse completion estimate in `[0, 1]`.
    fn progress(&self) -> f32;

    fn close(&mut self);
}

/// Push-based record output of one partition.
pub trait RecordSink<K, V> {
    /// Accept one record.
    ///
    /// # Errors
    ///
    /// Returns an error that must fail the enclosing unit of work.
    fn emit(&mut self, key: K, value: V) -> Result<()>;

    /// Flush and release resources. Called once when the partition ends.
    ///
    /// # Errors
    ///
    /// Returns an error if buffered output cannot be flushed.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl RecordSource<String, ViewRow> for PaginatedViewReader {
    fn next_record(&mut self) -> Result<Option<(String, ViewRow)>> {
        Ok(self.next_row()?.map(|row| (row.id.clone(), row)))
    }

    fn progress(&self) -> f32 {
        Self::progress(self)
    }

    fn close(&mut self) {
        Self::close(self);
    }
}

impl<K, V, S: RecordSink<K, V> + ?Sized> RecordSink<K, V> for Box<S> {
    fn emit(&mut self, key: K, value: V) -> Result<()> {
        (**self).emit(key, value)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
