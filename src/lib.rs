//! Portfolio accounting: a transaction-to-balance engine with batch ingest
//! and CSV file processing.
//!
//! # Modules
//!
//! - [`domain`] - Transaction and Balance value types (C1)
//! - [`store`] - Persistence for transactions and balances (C2/C3)
//! - [`calculator`] - Balance mutation from a transaction's impact (C4)
//! - [`validator`] - Structural and business-rule validation (C5)
//! - [`processor`] - Two-phase transaction lifecycle (C6)
//! - [`batch`] - Batch ingest service (C7)
//! - [`csv`] - CSV reading, external sort, file pipeline, error files (C8-C11)
//! - [`resilience`] - Retry and circuit-breaker wrappers (C12)
//! - [`config`] - Application configuration (C13)
//! - [`logging`] - Logging and tracing setup (C14)
//! - [`error`] - Crate-wide error taxonomy (C15)
//! - [`gateway`] - REST gateway (C16)

pub mod batch;
pub mod calculator;
pub mod config;
pub mod csv;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod processor;
pub mod resilience;
pub mod store;
pub mod validator;

pub use batch::{BatchIngestService, BatchItemResult, BatchResult};
pub use config::AppConfig;
pub use domain::{Balance, BalanceKey, Transaction, TransactionStatus, TransactionType, Violation};
pub use error::AccountingError;
pub use processor::TransactionProcessor;
pub use validator::TransactionValidator;
