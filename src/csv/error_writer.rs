//! Error File Writer (C11): writes failed rows back out as CSV with the
//! original columns plus `error_message`, splitting across
//! sequentially-numbered files once a per-file row cap is reached.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::reader::EXPECTED_HEADERS;
use crate::error::AccountingError;

/// One row that failed somewhere in the pipeline (CSV parsing or C7
/// submission), ready to be serialized back out.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub fields: Vec<String>,
    pub error_message: String,
    pub error_code: Option<String>,
    pub processing_stage: Option<&'static str>,
    pub line_number: Option<u64>,
}

/// Derives the output path(s) from `input_path` and writes every record in
/// `records`, splitting at `max_errors_per_file` rows per file. Returns the
/// list of file names actually written, in chunk order.
pub fn write_error_files(
    input_path: &Path,
    records: &[ErrorRecord],
    max_errors_per_file: usize,
    now: DateTime<Utc>,
) -> Result<Vec<PathBuf>, AccountingError> {
    if records.is_empty() {
        return Ok(Vec::new());
    }

    let chunks: Vec<&[ErrorRecord]> = records.chunks(max_errors_per_file.max(1)).collect();
    let multi_chunk = chunks.len() > 1;

    let mut written = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        let path = error_file_path(input_path, multi_chunk.then_some(i + 1));
        write_chunk(&path, chunk, now)?;
        written.push(path);
    }
    Ok(written)
}

fn error_file_path(input_path: &Path, chunk_index: Option<usize>) -> PathBuf {
    let stem = input_path.file_stem().and_then(|s| s.to_str()).unwrap_or("input");
    let parent = input_path.parent().unwrap_or_else(|| Path::new("."));
    match chunk_index {
        Some(n) => parent.join(format!("{stem}_errors_{n}.csv")),
        None => parent.join(format!("{stem}_errors.csv")),
    }
}

fn write_chunk(path: &Path, records: &[ErrorRecord], now: DateTime<Utc>) -> Result<(), AccountingError> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header: Vec<&str> = EXPECTED_HEADERS.to_vec();
    header.extend(["error_message", "error_code", "error_type", "processing_stage", "error_timestamp", "line_number"]);
    writer.write_record(&header)?;

    for record in records {
        let mut row = record.fields.clone();
        row.resize(EXPECTED_HEADERS.len(), String::new());
        row.push(record.error_message.clone());
        row.push(record.error_code.clone().unwrap_or_default());
        row.push(record.error_code.clone().unwrap_or_default());
        row.push(record.processing_stage.unwrap_or_default().to_string());
        row.push(now.to_rfc3339());
        row.push(record.line_number.map(|n| n.to_string()).unwrap_or_default());
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(i: usize) -> ErrorRecord {
        ErrorRecord {
            fields: vec!["P".to_string(); 7],
            error_message: format!("bad row {i}"),
            error_code: Some("invalid_field".to_string()),
            processing_stage: Some("csv_parse"),
            line_number: Some(i as u64),
        }
    }

    #[test]
    fn single_file_when_under_cap() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("batch.csv");
        let records = vec![record(1), record(2)];
        let written = write_error_files(&input, &records, 10_000, Utc::now()).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].file_name().unwrap().to_str().unwrap(), "batch_errors.csv");
    }

    #[test]
    fn splits_across_files_when_over_cap() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("batch.csv");
        let records: Vec<_> = (0..5).map(record).collect();
        let written = write_error_files(&input, &records, 2, Utc::now()).unwrap();
        assert_eq!(written.len(), 3);
        assert_eq!(written[0].file_name().unwrap().to_str().unwrap(), "batch_errors_1.csv");
        assert_eq!(written[2].file_name().unwrap().to_str().unwrap(), "batch_errors_3.csv");
    }

    #[test]
    fn empty_records_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("batch.csv");
        let written = write_error_files(&input, &[], 10_000, Utc::now()).unwrap();
        assert!(written.is_empty());
    }
}
