//! Response shapes for the gateway (§7): every error response carries
//! `error_message`, an optional `errors` list of `{field, message, value}`,
//! and an opaque `trace_id`. Adapted from the teacher's `ApiError`/
//! `IntoResponse` pattern, but with this crate's own wire shape rather than
//! the teacher's `{code, msg, data}` envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use ulid::Ulid;

use crate::domain::Violation;
use crate::error::AccountingError;

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub field: String,
    pub message: String,
    pub value: Option<String>,
}

impl From<Violation> for ErrorDetail {
    fn from(v: Violation) -> Self {
        Self { field: v.field, message: v.message, value: v.value }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorDetail>>,
    pub trace_id: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, error_message: message.into(), errors: None, trace_id: new_trace_id() }
    }

    pub fn with_violations(status: StatusCode, message: impl Into<String>, violations: Vec<Violation>) -> Self {
        let errors = if violations.is_empty() { None } else { Some(violations.into_iter().map(ErrorDetail::from).collect()) };
        Self { status, error_message: message.into(), errors, trace_id: new_trace_id() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

fn new_trace_id() -> String {
    Ulid::new().to_string()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

impl From<AccountingError> for ApiError {
    fn from(e: AccountingError) -> Self {
        let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::with_violations(status, e.to_string(), e.violations())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err: ApiError = AccountingError::NotFound.into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_field_carries_violations() {
        let err: ApiError =
            AccountingError::InvalidField(vec![Violation::new("quantity", "must be non-zero")]).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.errors.unwrap().len(), 1);
    }

    #[test]
    fn trace_ids_are_unique() {
        let a = ApiError::bad_request("x");
        let b = ApiError::bad_request("x");
        assert_ne!(a.trace_id, b.trace_id);
    }
}
