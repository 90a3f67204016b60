//! End-to-end CSV file processing against a live Postgres instance. Ignored
//! by default; run with `DATABASE_URL=... cargo test --test pipeline_integration -- --ignored`
//! against a database migrated with `migrations/0001_init.sql`.

use std::sync::Arc;

use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use tempfile::tempdir;

use portfolio_accounting::batch::BatchIngestService;
use portfolio_accounting::config::CsvConfig;
use portfolio_accounting::csv::FilePipeline;
use portfolio_accounting::processor::TransactionProcessor;
use portfolio_accounting::store::PgTransactionStore;

fn unique_portfolio_id(tag: &str) -> String {
    format!("{tag:0<24}").chars().take(24).collect()
}

fn csv_config(working_dir: &std::path::Path) -> CsvConfig {
    CsvConfig {
        max_file_size_bytes: 1024 * 1024,
        sort_threshold_bytes: 1024 * 1024 * 1024,
        chunk_size: 1000,
        max_errors_per_file: 1000,
        working_dir: working_dir.to_string_lossy().into_owned(),
    }
}

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn mixed_valid_and_invalid_rows_produce_an_error_file() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");
    let pool = PgPoolOptions::new().max_connections(5).connect(&url).await.expect("failed to connect to database");

    let tx_store = Arc::new(PgTransactionStore::new(pool.clone()));
    let processor = Arc::new(TransactionProcessor::new(pool.clone(), 3, 10));
    let batch_service = Arc::new(BatchIngestService::new(tx_store, processor, 1000));

    let dir = tempdir().expect("tempdir should create");
    let portfolio_id = unique_portfolio_id("pipeline");
    let security_id = unique_portfolio_id("secpipe");

    let csv_body = format!(
        "portfolio_id,security_id,source_id,transaction_type,quantity,price,transaction_date\n\
         {portfolio_id},{security_id},pipeline-src-1,BUY,10,100.00,2026-01-15\n\
         {portfolio_id},{security_id},pipeline-src-2,DEP,50,1.00,2026-01-15\n\
         tooshort,,pipeline-src-3,SELL,10,100.00,2026-01-15\n"
    );
    let input_path = dir.path().join("transactions.csv");
    std::fs::write(&input_path, csv_body).expect("write should succeed");

    let pipeline = FilePipeline::new(batch_service, csv_config(dir.path()), 1000);
    let status = pipeline
        .process_file(&input_path, Utc::now(), |_| {}, || false)
        .await
        .expect("pipeline should run to completion even with some invalid rows");

    assert_eq!(status.total_rows, 3);
    assert_eq!(status.succeeded, 2);
    assert_eq!(status.failed, 1);
    assert_eq!(status.error_files.len(), 1);

    let error_contents = std::fs::read_to_string(&status.error_files[0]).expect("error file should exist");
    assert!(error_contents.contains("pipeline-src-3"));
}

#[tokio::test]
#[ignore = "requires a running Postgres instance"]
async fn file_exceeding_max_size_is_rejected_before_any_row_is_read() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");
    let pool = PgPoolOptions::new().max_connections(5).connect(&url).await.expect("failed to connect to database");

    let tx_store = Arc::new(PgTransactionStore::new(pool.clone()));
    let processor = Arc::new(TransactionProcessor::new(pool.clone(), 3, 10));
    let batch_service = Arc::new(BatchIngestService::new(tx_store, processor, 1000));

    let dir = tempdir().expect("tempdir should create");
    let mut config = csv_config(dir.path());
    config.max_file_size_bytes = 10;

    let input_path = dir.path().join("too_big.csv");
    std::fs::write(&input_path, "portfolio_id,security_id,source_id,transaction_type,quantity,price,transaction_date\n")
        .expect("write should succeed");

    let pipeline = FilePipeline::new(batch_service, config, 1000);
    let err = pipeline
        .process_file(&input_path, Utc::now(), |_| {}, || false)
        .await
        .expect_err("oversized file should be rejected");

    assert!(matches!(err, portfolio_accounting::AccountingError::InvalidField(_)));
}
