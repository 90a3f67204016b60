//! Portfolio accounting CLI: `process-file`, `validate-file`, and `status`
//! subcommands over the same core used by the REST gateway. Grounded on the
//! teacher's own clap-derive `Cli`/`Subcommand` dispatch pattern.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use portfolio_accounting::batch::BatchIngestService;
use portfolio_accounting::config::AppConfig;
use portfolio_accounting::csv::{read_csv, FilePipeline};
use portfolio_accounting::gateway::{self, state::AppState};
use portfolio_accounting::processor::TransactionProcessor;
use portfolio_accounting::store::{BalanceStore, PgBalanceStore, PgTransactionStore, TransactionFilter, TransactionStore};
use portfolio_accounting::TransactionStatus;

#[derive(Parser)]
#[command(name = "portfolio_accounting")]
#[command(about = "Portfolio accounting: transaction-to-balance engine and CSV file pipeline", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Increase verbosity; repeat for more detail (-v, -vv, -vvv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Run without persisting any changes.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the full file pipeline (sort, validate, submit, error file) against a CSV file.
    ProcessFile {
        /// Path to the input CSV file.
        input: PathBuf,
    },
    /// Runs CSV reading and structural/business-rule validation only; does not persist anything.
    ValidateFile {
        /// Path to the input CSV file.
        input: PathBuf,
    },
    /// Reports transaction counts by status for a portfolio.
    Status {
        /// Portfolio id to report on.
        portfolio_id: String,
    },
    /// Serves the REST gateway (C16) over the bind address in the config file.
    Serve,
}

fn verbosity_filter(verbose: u8, configured: &str) -> String {
    match verbose {
        0 => configured.to_string(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Distinguishes the two non-zero exit codes the CLI contract requires:
/// a pipeline that ran but rejected its input, versus a usage/environment
/// problem that kept it from running at all.
enum CliError {
    Usage(String),
    PipelineFailure(String),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config)
        .map_err(|e| anyhow::anyhow!("failed to load configuration from {}: {e}", cli.config.display()))?;

    config.logging.log_level = verbosity_filter(cli.verbose, &config.logging.log_level);
    let _logging_guard = portfolio_accounting::logging::init_logging(&config);

    let exit_code = match run(&cli, &config).await {
        Ok(()) => 0,
        Err(CliError::PipelineFailure(msg)) => {
            eprintln!("pipeline failure: {msg}");
            1
        }
        Err(CliError::Usage(msg)) => {
            eprintln!("usage error: {msg}");
            2
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

async fn run(cli: &Cli, config: &AppConfig) -> Result<(), CliError> {
    match &cli.command {
        Commands::ProcessFile { input } => process_file(input, cli.dry_run, config).await,
        Commands::ValidateFile { input } => validate_file(input).await,
        Commands::Status { portfolio_id } => status(portfolio_id, config).await,
        Commands::Serve => serve(config).await,
    }
}

async fn serve(config: &AppConfig) -> Result<(), CliError> {
    let pool = connect(config).await?;
    let transaction_store: Arc<dyn TransactionStore> = Arc::new(PgTransactionStore::new(pool.clone()));
    let balance_store: Arc<dyn BalanceStore> = Arc::new(PgBalanceStore::new(pool.clone()));
    let processor = Arc::new(TransactionProcessor::new(
        pool.clone(),
        config.processor.optimistic_lock_retry_bound,
        config.processor.retry_backoff_ms,
    ));
    let batch_service =
        Arc::new(BatchIngestService::new(transaction_store.clone(), processor, config.batch.max_batch_size));

    let state = Arc::new(AppState {
        transaction_store,
        balance_store,
        batch_service,
        pool,
        default_page_size: config.batch.default_page_size as i64,
        max_page_size: config.batch.max_page_size as i64,
    });

    let app = gateway::router(state);
    let addr = format!("{}:{}", config.server.bind_addr, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CliError::Usage(format!("failed to bind {addr}: {e}")))?;

    info!(%addr, "gateway listening");
    axum::serve(listener, app).await.map_err(|e| CliError::Usage(format!("server error: {e}")))
}

async fn connect(config: &AppConfig) -> Result<sqlx::PgPool, CliError> {
    PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(config.database.acquire_timeout_secs))
        .connect(&config.database.url)
        .await
        .map_err(|e| CliError::Usage(format!("failed to connect to database: {e}")))
}

async fn process_file(input: &PathBuf, dry_run: bool, config: &AppConfig) -> Result<(), CliError> {
    if dry_run {
        info!(path = %input.display(), "dry-run: would process file, but not persisting");
        return validate_file(input).await;
    }

    let pool = connect(config).await?;
    let tx_store = Arc::new(PgTransactionStore::new(pool.clone()));
    let _balance_store = Arc::new(PgBalanceStore::new(pool.clone()));
    let processor = Arc::new(TransactionProcessor::new(
        pool.clone(),
        config.processor.optimistic_lock_retry_bound,
        config.processor.retry_backoff_ms,
    ));
    let batch_service = Arc::new(BatchIngestService::new(tx_store, processor, config.batch.max_batch_size));
    let pipeline = FilePipeline::new(batch_service, config.csv.clone(), config.batch.max_batch_size);

    let status = pipeline
        .process_file(input, Utc::now(), |n| info!(rows = n, "progress"), || false)
        .await
        .map_err(|e| {
            error!(error = %e, "file pipeline failed");
            CliError::PipelineFailure(format!("pipeline failed: {e}"))
        })?;

    info!(
        file = %status.file_name,
        total = status.total_rows,
        succeeded = status.succeeded,
        failed = status.failed,
        "file processing complete"
    );
    if status.failed > 0 {
        return Err(CliError::PipelineFailure(format!("{} row(s) failed; see error file(s)", status.failed)));
    }
    Ok(())
}

async fn validate_file(input: &PathBuf) -> Result<(), CliError> {
    // validate-file skips the external sort: ordering affects batch
    // grouping during process-file, not per-row structural validation.
    let file =
        std::fs::File::open(input).map_err(|e| CliError::Usage(format!("cannot open {}: {e}", input.display())))?;
    let result = read_csv(file, |_| {}, || false).map_err(|e| CliError::PipelineFailure(e.to_string()))?;

    info!(valid = result.valid.len(), invalid = result.invalid.len(), rows = result.rows_read, "validation complete");
    for row in &result.invalid {
        for violation in &row.errors {
            eprintln!("line {}: {}", row.line_number, violation);
        }
    }

    if !result.invalid.is_empty() {
        return Err(CliError::PipelineFailure(format!("{} row(s) failed validation", result.invalid.len())));
    }
    Ok(())
}

async fn status(portfolio_id: &str, config: &AppConfig) -> Result<(), CliError> {
    let pool = connect(config).await?;
    let store = PgTransactionStore::new(pool);

    for status in
        [TransactionStatus::New, TransactionStatus::Proc, TransactionStatus::Error, TransactionStatus::Fatal]
    {
        let filter = TransactionFilter {
            portfolio_ids: Some(vec![portfolio_id.to_string()]),
            statuses: Some(vec![status]),
            limit: 1,
            ..Default::default()
        };
        let count = store.count(&filter).await.map_err(|e| CliError::Usage(e.to_string()))?;
        println!("{:<6} {count}", status.as_str());
    }
    Ok(())
}
