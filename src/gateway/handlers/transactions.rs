//! Transaction endpoints: batch submission, list, and single-fetch.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::batch::BatchItemResult;
use crate::domain::{NewTransaction, Transaction, TransactionStatus, TransactionType, Violation};
use crate::gateway::state::AppState;
use crate::gateway::types::{ApiError, ErrorDetail};
use crate::store::{SortDirection, SortField, SortKey, TransactionFilter};

#[derive(Debug, Deserialize)]
pub struct NewTransactionRequest {
    pub portfolio_id: String,
    pub security_id: Option<String>,
    pub source_id: String,
    pub transaction_type: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub transaction_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct CreateTransactionsRequest {
    pub transactions: Vec<NewTransactionRequest>,
}

#[derive(Debug, Serialize)]
pub struct TransactionItemResponse {
    pub success: bool,
    pub transaction: Option<TransactionResponse>,
    pub errors: Option<Vec<ErrorDetail>>,
}

#[derive(Debug, Serialize)]
pub struct CreateTransactionsResponse {
    pub items: Vec<TransactionItemResponse>,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: Option<i64>,
    pub portfolio_id: String,
    pub security_id: Option<String>,
    pub source_id: String,
    pub transaction_type: &'static str,
    pub status: &'static str,
    pub quantity: Decimal,
    pub price: Decimal,
    pub transaction_date: NaiveDate,
    pub reprocessing_attempts: i32,
    pub version: i64,
    pub error_message: Option<String>,
}

impl From<Transaction> for TransactionResponse {
    fn from(t: Transaction) -> Self {
        Self {
            id: t.id,
            portfolio_id: t.portfolio_id,
            security_id: t.security_id,
            source_id: t.source_id,
            transaction_type: t.transaction_type.as_str(),
            status: t.status.as_str(),
            quantity: t.quantity,
            price: t.price,
            transaction_date: t.transaction_date,
            reprocessing_attempts: t.reprocessing_attempts,
            version: t.version,
            error_message: t.error_message,
        }
    }
}

fn parse_new_transaction(req: NewTransactionRequest) -> Result<Transaction, Vec<Violation>> {
    let transaction_type = TransactionType::from_str_opt(&req.transaction_type).ok_or_else(|| {
        vec![Violation::new("transaction_type", "must be one of BUY, SELL, SHORT, COVER, DEP, WD, IN, OUT")
            .with_value(req.transaction_type.clone())]
    })?;

    Transaction::build(NewTransaction {
        portfolio_id: req.portfolio_id,
        security_id: req.security_id,
        source_id: req.source_id,
        transaction_type,
        quantity: req.quantity,
        price: req.price,
        transaction_date: req.transaction_date,
    })
}

/// `POST /api/v1/transactions`: 201 on all-success, 207 whenever the body
/// parsed and at least one item failed (whether every item failed or just
/// some did), 400 reserved for a malformed body (empty list).
pub async fn create_transactions(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTransactionsRequest>,
) -> Result<(StatusCode, Json<CreateTransactionsResponse>), ApiError> {
    if body.transactions.is_empty() {
        return Err(ApiError::bad_request("transactions must be a non-empty list"));
    }

    let mut candidates = Vec::with_capacity(body.transactions.len());
    let mut parse_failures = Vec::new();
    for req in body.transactions {
        match parse_new_transaction(req) {
            Ok(t) => candidates.push(t),
            Err(errors) => parse_failures.push(TransactionItemResponse {
                success: false,
                transaction: None,
                errors: Some(errors.into_iter().map(ErrorDetail::from).collect()),
            }),
        }
    }

    let mut items = parse_failures;
    let mut succeeded = 0usize;

    if !candidates.is_empty() {
        let result = state.batch_service.create_batch(candidates).await?;
        for item in result.items {
            match item {
                BatchItemResult::Success(t) => {
                    succeeded += 1;
                    items.push(TransactionItemResponse { success: true, transaction: Some(t.into()), errors: None });
                }
                BatchItemResult::Failure(f) => {
                    items.push(TransactionItemResponse {
                        success: false,
                        transaction: Some(f.input.into()),
                        errors: Some(f.errors.into_iter().map(ErrorDetail::from).collect()),
                    });
                }
            }
        }
    }

    let failed = items.len() - succeeded;
    let status = if failed == 0 { StatusCode::CREATED } else { StatusCode::MULTI_STATUS };

    Ok((status, Json(CreateTransactionsResponse { items, succeeded, failed })))
}

#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    pub portfolio_id: Option<String>,
    pub security_id: Option<String>,
    pub status: Option<String>,
    pub transaction_type: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListTransactionsResponse {
    pub items: Vec<TransactionResponse>,
    pub total: i64,
}

pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListTransactionsQuery>,
) -> Result<Json<ListTransactionsResponse>, ApiError> {
    let mut filter = TransactionFilter {
        portfolio_ids: q.portfolio_id.map(|p| vec![p]),
        security_ids: q.security_id.map(|s| vec![s]),
        statuses: q
            .status
            .as_deref()
            .map(status_from_query)
            .transpose()?
            .map(|s| vec![s]),
        transaction_types: q
            .transaction_type
            .as_deref()
            .map(|s| {
                TransactionType::from_str_opt(s)
                    .ok_or_else(|| ApiError::bad_request(format!("unknown transaction_type: {s}")))
            })
            .transpose()?
            .map(|t| vec![t]),
        date_from: q.date_from,
        date_to: q.date_to,
        sort: vec![SortKey { field: SortField::Id, direction: SortDirection::Asc }],
        offset: q.offset.unwrap_or(0),
        limit: q.limit.unwrap_or(0),
        ..Default::default()
    };
    filter.clamp_limit(state.default_page_size, state.max_page_size);

    let total = state.transaction_store.count(&filter).await?;
    let items = state.transaction_store.list(&filter).await?;
    Ok(Json(ListTransactionsResponse { items: items.into_iter().map(TransactionResponse::from).collect(), total }))
}

fn status_from_query(s: &str) -> Result<TransactionStatus, ApiError> {
    match s.to_ascii_uppercase().as_str() {
        "NEW" => Ok(TransactionStatus::New),
        "PROC" => Ok(TransactionStatus::Proc),
        "ERROR" => Ok(TransactionStatus::Error),
        "FATAL" => Ok(TransactionStatus::Fatal),
        other => Err(ApiError::bad_request(format!("unknown status: {other}"))),
    }
}

pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let t = state.transaction_store.get_by_id(id).await?;
    Ok(Json(t.into()))
}
