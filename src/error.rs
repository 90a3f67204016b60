//! Crate-wide error taxonomy.
//!
//! Error *kinds* are fixed by the domain (§7); this enum is the single place
//! that maps each kind to a stable snake_case `code()` and an HTTP status the
//! gateway can use, the same shape as the teacher's own domain error enum.

use thiserror::Error;

use crate::domain::Violation;

#[derive(Error, Debug, Clone)]
pub enum AccountingError {
    #[error("invalid field(s)")]
    InvalidField(Vec<Violation>),

    #[error("business rule violation")]
    RuleViolation(Vec<Violation>),

    #[error("duplicate source_id: {0}")]
    DuplicateSourceId(String),

    #[error("not found")]
    NotFound,

    #[error("optimistic lock failed for id {0}")]
    OptimisticLock(i64),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("invalid state transition: transaction {0} is not NEW or ERROR")]
    InvalidState(i64),

    #[error("operation cancelled")]
    Cancelled,

    #[error("circuit open")]
    CircuitOpen,

    #[error("retry attempts exhausted: {0}")]
    RetryExhausted(String),
}

impl AccountingError {
    /// Stable snake_case error code, per §7.
    pub fn code(&self) -> &'static str {
        match self {
            AccountingError::InvalidField(_) => "invalid_field",
            AccountingError::RuleViolation(_) => "rule_violation",
            AccountingError::DuplicateSourceId(_) => "duplicate_source_id",
            AccountingError::NotFound => "not_found",
            AccountingError::OptimisticLock(_) => "optimistic_lock",
            AccountingError::StorageError(_) => "storage_error",
            AccountingError::InvalidState(_) => "invalid_state",
            AccountingError::Cancelled => "cancelled",
            AccountingError::CircuitOpen => "circuit_open",
            AccountingError::RetryExhausted(_) => "retry_exhausted",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            AccountingError::InvalidField(_) | AccountingError::RuleViolation(_) => 400,
            AccountingError::DuplicateSourceId(_) => 409,
            AccountingError::NotFound => 404,
            AccountingError::OptimisticLock(_) => 409,
            AccountingError::StorageError(_) => 500,
            AccountingError::InvalidState(_) => 409,
            AccountingError::Cancelled => 499,
            AccountingError::CircuitOpen => 503,
            AccountingError::RetryExhausted(_) => 503,
        }
    }

    /// Violations carried by this error, if any (for `InvalidField`/`RuleViolation`).
    pub fn violations(&self) -> Vec<Violation> {
        match self {
            AccountingError::InvalidField(v) | AccountingError::RuleViolation(v) => v.clone(),
            _ => Vec::new(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AccountingError::NotFound)
    }
}

impl From<sqlx::Error> for AccountingError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => AccountingError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                AccountingError::DuplicateSourceId(db_err.message().to_string())
            }
            _ => AccountingError::StorageError(e.to_string()),
        }
    }
}

impl From<csv::Error> for AccountingError {
    fn from(e: csv::Error) -> Self {
        AccountingError::StorageError(format!("csv error: {e}"))
    }
}

impl From<std::io::Error> for AccountingError {
    fn from(e: std::io::Error) -> Self {
        AccountingError::StorageError(format!("io error: {e}"))
    }
}

impl From<anyhow::Error> for AccountingError {
    fn from(e: anyhow::Error) -> Self {
        AccountingError::StorageError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(AccountingError::NotFound.code(), "not_found");
        assert_eq!(AccountingError::DuplicateSourceId("x".into()).code(), "duplicate_source_id");
        assert_eq!(AccountingError::CircuitOpen.code(), "circuit_open");
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(AccountingError::NotFound.http_status(), 404);
        assert_eq!(AccountingError::OptimisticLock(1).http_status(), 409);
        assert_eq!(AccountingError::StorageError("x".into()).http_status(), 500);
    }
}
