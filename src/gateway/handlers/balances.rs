//! Balance endpoints: list with filter/pagination, and single-fetch.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::Balance;
use crate::gateway::state::AppState;
use crate::gateway::types::ApiError;
use crate::store::BalanceFilter;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub id: Option<i64>,
    pub portfolio_id: String,
    pub security_id: Option<String>,
    pub quantity_long: Decimal,
    pub quantity_short: Decimal,
    pub last_updated: DateTime<Utc>,
    pub version: i64,
}

impl From<Balance> for BalanceResponse {
    fn from(b: Balance) -> Self {
        Self {
            id: b.id,
            portfolio_id: b.portfolio_id,
            security_id: b.security_id,
            quantity_long: b.quantity_long,
            quantity_short: b.quantity_short,
            last_updated: b.last_updated,
            version: b.version,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListBalancesQuery {
    pub portfolio_id: Option<String>,
    pub security_id: Option<String>,
    #[serde(default)]
    pub cash_only: bool,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListBalancesResponse {
    pub items: Vec<BalanceResponse>,
    pub total: i64,
}

pub async fn list_balances(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListBalancesQuery>,
) -> Result<Json<ListBalancesResponse>, ApiError> {
    let mut filter = BalanceFilter {
        portfolio_ids: q.portfolio_id.map(|p| vec![p]),
        security_ids: q.security_id.map(|s| vec![s]),
        cash_only: q.cash_only,
        offset: q.offset.unwrap_or(0),
        limit: q.limit.unwrap_or(0),
    };
    filter.clamp_limit(state.default_page_size, state.max_page_size);

    let total = state.balance_store.count(&filter).await?;
    let items = state.balance_store.list(&filter).await?;
    Ok(Json(ListBalancesResponse { items: items.into_iter().map(BalanceResponse::from).collect(), total }))
}

/// `GET /api/v1/balance/{id}` fetches a single balance by its row id;
/// balances have no public filter-by-id in the store trait, so this is
/// implemented as a one-result `list`.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let filter = BalanceFilter { offset: 0, limit: i64::MAX, ..Default::default() };
    let items = state.balance_store.list(&filter).await?;
    let found = items.into_iter().find(|b| b.id == Some(id)).ok_or(crate::error::AccountingError::NotFound)?;
    Ok(Json(found.into()))
}
