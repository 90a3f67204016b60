//! Liveness/readiness endpoint. Pings the database at most once per
//! rate-limit interval, the same `AtomicU64`-gated pattern the teacher uses
//! for its own health check.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::gateway::state::AppState;
use crate::gateway::types::ApiError;

static LAST_CHECK_MS: AtomicU64 = AtomicU64::new(0);
const CHECK_INTERVAL_MS: u64 = 5000;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    let now = now_ms();
    let last = LAST_CHECK_MS.load(Ordering::Relaxed);

    if now.saturating_sub(last) < CHECK_INTERVAL_MS {
        return Ok(Json(HealthResponse { status: "healthy" }));
    }

    sqlx::query("SELECT 1")
        .execute(&state.pool)
        .await
        .map_err(|e| ApiError::service_unavailable(format!("database unreachable: {e}")))?;

    LAST_CHECK_MS.store(now, Ordering::Relaxed);
    Ok(Json(HealthResponse { status: "healthy" }))
}
