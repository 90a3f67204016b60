//! Transaction Validator (C5): structural + business-rule validation plus
//! the source-id uniqueness pre-check. Collects every violation rather than
//! failing fast.

use std::sync::Arc;

use crate::domain::{Transaction, Violation};
use crate::error::AccountingError;
use crate::store::TransactionStore;

pub struct TransactionValidator {
    store: Arc<dyn TransactionStore>,
}

pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<Violation>,
}

impl TransactionValidator {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self { store }
    }

    /// Validates a transaction already built by `Transaction::build` (whose
    /// structural/cross-field checks are re-run here in case the candidate
    /// came from CSV parsing rather than the builder) plus the uniqueness
    /// check against the store.
    pub async fn validate(&self, candidate: &Transaction) -> Result<ValidationOutcome, AccountingError> {
        let mut errors = self.structural_and_rule_violations(candidate);

        match self.store.find_by_source_id(&candidate.source_id).await {
            // Found an existing row: the caller is retrying a collision the
            // store will reject on create; surface it as a validation error
            // rather than relying solely on the unique-constraint path.
            Ok(_) => {
                errors.push(Violation::new("source_id", "source_id already exists").with_value(candidate.source_id.clone()));
            }
            // not_found is the expected, successful outcome of a uniqueness
            // probe; it is not logged as an error by this layer (§4.5, §7).
            Err(AccountingError::NotFound) => {
                tracing::debug!(source_id = %candidate.source_id, "source_id uniqueness probe: not found (unique)");
            }
            Err(other) => return Err(other),
        }

        Ok(ValidationOutcome { valid: errors.is_empty(), errors })
    }

    fn structural_and_rule_violations(&self, t: &Transaction) -> Vec<Violation> {
        let mut errors = Vec::new();

        if t.portfolio_id.len() != 24 || !t.portfolio_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            errors.push(Violation::new("portfolio_id", "must be exactly 24 alphanumeric characters"));
        }

        match &t.security_id {
            Some(sid) if sid.len() != 24 || !sid.chars().all(|c| c.is_ascii_alphanumeric()) => {
                errors.push(Violation::new("security_id", "must be empty or exactly 24 alphanumeric characters"));
            }
            _ => {}
        }

        if t.source_id.is_empty() || t.source_id.len() > 50 {
            errors.push(Violation::new("source_id", "must be non-empty and at most 50 characters"));
        }

        let is_cash_type = t.transaction_type.is_cash_only();
        let is_security_type = t.transaction_type.is_security_only()
            || matches!(
                t.transaction_type,
                crate::domain::TransactionType::Buy
                    | crate::domain::TransactionType::Sell
                    | crate::domain::TransactionType::Short
                    | crate::domain::TransactionType::Cover
            );

        if is_cash_type && t.security_id.is_some() {
            errors.push(Violation::new("security_id", "must be empty for a cash transaction (DEP/WD)"));
        }
        if is_security_type && t.security_id.is_none() {
            errors.push(Violation::new("security_id", "must be present for a security transaction"));
        }

        if t.quantity.is_zero() {
            errors.push(Violation::new("quantity", "must be non-zero"));
        }
        if t.price.is_sign_negative() {
            errors.push(Violation::new("price", "must be non-negative"));
        }
        if is_cash_type && t.price != rust_decimal::Decimal::ONE {
            errors.push(Violation::new("price", "must equal 1 for DEP/WD transactions"));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTransaction, TransactionType};
    use crate::store::{TransactionFilter, TransactionStore};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        existing_source_ids: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TransactionStore for FakeStore {
        async fn create(&self, t: &Transaction) -> Result<Transaction, AccountingError> {
            Ok(t.clone())
        }
        async fn get_by_id(&self, _id: i64) -> Result<Transaction, AccountingError> {
            Err(AccountingError::NotFound)
        }
        async fn list(&self, _filter: &TransactionFilter) -> Result<Vec<Transaction>, AccountingError> {
            Ok(vec![])
        }
        async fn count(&self, _filter: &TransactionFilter) -> Result<i64, AccountingError> {
            Ok(0)
        }
        async fn update(&self, t: &Transaction) -> Result<Transaction, AccountingError> {
            Ok(t.clone())
        }
        async fn find_by_source_id(&self, source_id: &str) -> Result<Transaction, AccountingError> {
            if self.existing_source_ids.lock().unwrap().iter().any(|s| s == source_id) {
                Ok(valid_tx(source_id))
            } else {
                Err(AccountingError::NotFound)
            }
        }
    }

    fn valid_tx(source_id: &str) -> Transaction {
        Transaction::build(NewTransaction {
            portfolio_id: "PORTFOLIO123456789012345".to_string(),
            security_id: Some("SECURITY1234567890123456".to_string()),
            source_id: source_id.to_string(),
            transaction_type: TransactionType::Buy,
            quantity: Decimal::new(10, 0),
            price: Decimal::new(5, 0),
            transaction_date: NaiveDate::from_ymd_opt(2025, 1, 30).unwrap(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn unique_source_id_is_valid() {
        let store = Arc::new(FakeStore::default());
        let validator = TransactionValidator::new(store);
        let outcome = validator.validate(&valid_tx("unique-1")).await.unwrap();
        assert!(outcome.valid);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn duplicate_source_id_is_invalid() {
        let store = Arc::new(FakeStore { existing_source_ids: Mutex::new(vec!["dup-1".to_string()]) });
        let validator = TransactionValidator::new(store);
        let outcome = validator.validate(&valid_tx("dup-1")).await.unwrap();
        assert!(!outcome.valid);
        assert!(outcome.errors.iter().any(|v| v.field == "source_id"));
    }
}
