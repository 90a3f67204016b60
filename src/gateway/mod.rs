//! REST Gateway (C16): a thin axum surface over C7 (batch ingest), C2
//! (transaction store), and C3 (balance store). No business logic lives
//! here; handlers call into the core and serialize the result.

pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/transactions", post(handlers::transactions::create_transactions))
        .route("/transactions", get(handlers::transactions::list_transactions))
        .route("/transaction/{id}", get(handlers::transactions::get_transaction))
        .route("/balances", get(handlers::balances::list_balances))
        .route("/balance/{id}", get(handlers::balances::get_balance))
        .route("/portfolios/{portfolio_id}/summary", get(handlers::portfolios::portfolio_summary))
        .route("/health", get(handlers::health::health_check));

    Router::new()
        .nest("/api/v1", api_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}
