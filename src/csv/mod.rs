//! CSV file ingestion: reading/validating (C8), external sorting (C9),
//! the end-to-end file pipeline (C10), and the error file writer (C11).

pub mod error_writer;
pub mod pipeline;
pub mod reader;
pub mod sorter;

pub use error_writer::ErrorRecord;
pub use pipeline::{FilePipeline, FileProcessingStatus};
pub use reader::{read_csv, CsvReadResult, InvalidRow, ValidRow};
pub use sorter::{sort_file, SortConfig};
