//! Portfolio summary endpoint: cash balance plus per-security positions.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use super::balances::BalanceResponse;
use crate::gateway::state::AppState;
use crate::gateway::types::ApiError;

#[derive(Debug, Serialize)]
pub struct PortfolioSummaryResponse {
    pub portfolio_id: String,
    pub cash: Option<BalanceResponse>,
    pub positions: Vec<BalanceResponse>,
}

pub async fn portfolio_summary(
    State(state): State<Arc<AppState>>,
    Path(portfolio_id): Path<String>,
) -> Result<Json<PortfolioSummaryResponse>, ApiError> {
    let balances = state.balance_store.portfolio_summary(&portfolio_id).await?;

    let mut cash = None;
    let mut positions = Vec::new();
    for b in balances {
        if b.is_cash() {
            cash = Some(b.into());
        } else {
            positions.push(b.into());
        }
    }

    Ok(Json(PortfolioSummaryResponse { portfolio_id, cash, positions }))
}
