//! File input and output for the transfer jobs.
//!
//! - [`glob`] - resolving input locations (file, directory, glob) into files
//! - [`delimited`] - delimited text input
//! - [`sink`] - part files for imported view rows

pub mod delimited;
pub mod glob;
pub mod sink;

pub use delimited::{DelimitedReader, read_delimited};
pub use glob::{expand_glob, input_files};
#[cfg(feature = "io-jsonl")]
pub use sink::JsonlPartWriter;
pub use sink::{PageFileWriter, RowFormat, TextPartWriter, open_part_writer, page_file_name, part_file_name};
