//! Shared gateway state (`AppState`), grounded on the teacher's own
//! `Arc<AppState>` extractor pattern.

use std::sync::Arc;

use sqlx::PgPool;

use crate::batch::BatchIngestService;
use crate::store::{BalanceStore, TransactionStore};

#[derive(Clone)]
pub struct AppState {
    pub transaction_store: Arc<dyn TransactionStore>,
    pub balance_store: Arc<dyn BalanceStore>,
    pub batch_service: Arc<BatchIngestService>,
    pub pool: PgPool,
    pub default_page_size: i64,
    pub max_page_size: i64,
}
