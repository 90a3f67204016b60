//! File Pipeline (C10): validate -> sort -> group-by-portfolio ->
//! batch-submit -> error file, wiring C8/C9/C7/C11 together for one input
//! file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::error_writer::{self, ErrorRecord};
use super::reader::{self, EXPECTED_HEADERS};
use super::sorter::{self, SortConfig};
use crate::batch::{BatchIngestService, BatchItemResult};
use crate::config::CsvConfig;
use crate::domain::Transaction;
use crate::error::AccountingError;

#[derive(Debug, Clone)]
pub struct FileProcessingStatus {
    pub file_name: String,
    pub total_rows: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error_files: Vec<PathBuf>,
}

pub struct FilePipeline {
    batch_service: Arc<BatchIngestService>,
    csv_config: CsvConfig,
    max_batch_size: usize,
}

impl FilePipeline {
    pub fn new(batch_service: Arc<BatchIngestService>, csv_config: CsvConfig, max_batch_size: usize) -> Self {
        Self { batch_service, csv_config, max_batch_size }
    }

    /// Runs the full pipeline against `input_path`. `now` is supplied by the
    /// caller so the error-file timestamp is deterministic under test.
    pub async fn process_file(
        &self,
        input_path: &Path,
        now: DateTime<Utc>,
        mut progress: impl FnMut(u64),
        is_cancelled: impl Fn() -> bool + Copy,
    ) -> Result<FileProcessingStatus, AccountingError> {
        let started_at = now;
        let file_name = input_path.file_name().and_then(|s| s.to_str()).unwrap_or("input").to_string();

        let metadata = std::fs::metadata(input_path)?;
        if metadata.len() > self.csv_config.max_file_size_bytes {
            return Err(AccountingError::InvalidField(vec![crate::domain::Violation::new(
                "file_size",
                format!("{} bytes exceeds the configured maximum of {}", metadata.len(), self.csv_config.max_file_size_bytes),
            )]));
        }

        let sorted_path = self.sorted_path(input_path);
        let sort_config = SortConfig {
            sort_threshold_bytes: self.csv_config.sort_threshold_bytes,
            chunk_size: self.csv_config.chunk_size,
            working_dir: PathBuf::from(&self.csv_config.working_dir),
        };
        sorter::sort_file(input_path, &sorted_path, &sort_config, is_cancelled)?;

        let sorted_file = std::fs::File::open(&sorted_path)?;
        let read_result = reader::read_csv(sorted_file, |n| progress(n), is_cancelled);
        std::fs::remove_file(&sorted_path).ok();
        let read_result = read_result?;

        let mut errors: Vec<ErrorRecord> = read_result
            .invalid
            .iter()
            .map(|row| ErrorRecord {
                fields: raw_fields(&row.raw),
                error_message: row.errors.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("; "),
                error_code: row.errors.first().map(|v| v.field.clone()),
                processing_stage: Some("csv_parse"),
                line_number: Some(row.line_number),
            })
            .collect();

        let mut succeeded = 0u64;
        for chunk in group_by_portfolio(&read_result.valid, self.max_batch_size) {
            if is_cancelled() {
                return Err(AccountingError::Cancelled);
            }
            let inputs: Vec<Transaction> = chunk.iter().map(|row| row.transaction.clone()).collect();
            let result = self.batch_service.create_batch(inputs).await?;

            for (row, item) in chunk.iter().zip(result.items.iter()) {
                match item {
                    BatchItemResult::Success(_) => succeeded += 1,
                    BatchItemResult::Failure(failure) => {
                        errors.push(ErrorRecord {
                            fields: transaction_fields(&row.transaction),
                            error_message: failure.errors.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("; "),
                            error_code: failure.errors.first().map(|v| v.field.clone()),
                            processing_stage: Some("processing"),
                            line_number: Some(row.line_number),
                        });
                    }
                }
            }
        }

        let error_files =
            error_writer::write_error_files(input_path, &errors, self.csv_config.max_errors_per_file, now)?;

        Ok(FileProcessingStatus {
            file_name,
            total_rows: read_result.rows_read,
            succeeded,
            failed: errors.len() as u64,
            started_at,
            finished_at: Utc::now(),
            error_files,
        })
    }

    fn sorted_path(&self, input_path: &Path) -> PathBuf {
        let stem = input_path.file_stem().and_then(|s| s.to_str()).unwrap_or("input");
        PathBuf::from(&self.csv_config.working_dir).join(format!("{stem}.sorted.csv"))
    }
}

fn raw_fields(raw: &std::collections::HashMap<String, String>) -> Vec<String> {
    EXPECTED_HEADERS.iter().map(|h| raw.get(*h).cloned().unwrap_or_default()).collect()
}

fn transaction_fields(t: &Transaction) -> Vec<String> {
    vec![
        t.portfolio_id.clone(),
        t.security_id.clone().unwrap_or_default(),
        t.source_id.clone(),
        t.transaction_type.as_str().to_string(),
        t.quantity.to_string(),
        t.price.to_string(),
        t.transaction_date.format("%Y%m%d").to_string(),
    ]
}

/// Groups sorted valid rows into submission chunks: a new chunk starts
/// whenever the portfolio_id changes or the running chunk reaches
/// `max_chunk_size`.
fn group_by_portfolio(rows: &[reader::ValidRow], max_chunk_size: usize) -> Vec<Vec<&reader::ValidRow>> {
    let mut groups: Vec<Vec<&reader::ValidRow>> = Vec::new();
    for row in rows {
        let starts_new = match groups.last() {
            None => true,
            Some(current) => {
                current.len() >= max_chunk_size.max(1)
                    || current.last().map(|r| r.transaction.portfolio_id.as_str())
                        != Some(row.transaction.portfolio_id.as_str())
            }
        };
        if starts_new {
            groups.push(Vec::new());
        }
        groups.last_mut().unwrap().push(row);
    }
    groups
}
