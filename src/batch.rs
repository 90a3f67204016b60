//! Batch Ingest Service (C7): validates and processes N transactions
//! sequentially, returning per-item success/failure. Not transactional
//! across items.

use std::sync::Arc;

use crate::domain::{Transaction, Violation};
use crate::error::AccountingError;
use crate::processor::TransactionProcessor;
use crate::store::TransactionStore;
use crate::validator::TransactionValidator;

pub struct BatchItemFailure {
    pub input: Transaction,
    pub errors: Vec<Violation>,
}

pub enum BatchItemResult {
    Success(Transaction),
    Failure(BatchItemFailure),
}

pub struct BatchResult {
    pub items: Vec<BatchItemResult>,
}

impl BatchResult {
    pub fn success_count(&self) -> usize {
        self.items.iter().filter(|i| matches!(i, BatchItemResult::Success(_))).count()
    }

    pub fn failure_count(&self) -> usize {
        self.items.iter().filter(|i| matches!(i, BatchItemResult::Failure(_))).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failure_count() == 0
    }
}

pub struct BatchIngestService {
    store: Arc<dyn TransactionStore>,
    validator: TransactionValidator,
    processor: Arc<TransactionProcessor>,
    max_batch_size: usize,
}

impl BatchIngestService {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        processor: Arc<TransactionProcessor>,
        max_batch_size: usize,
    ) -> Self {
        Self { validator: TransactionValidator::new(store.clone()), store, processor, max_batch_size }
    }

    /// Runs C5 then C6 for each input transaction in submission order.
    /// Returns `retry_exhausted`-equivalent per-item failures rather than
    /// aborting the whole batch; a failure of item K never rolls back
    /// items `1..K-1`.
    pub async fn create_batch(&self, inputs: Vec<Transaction>) -> Result<BatchResult, AccountingError> {
        if inputs.len() > self.max_batch_size {
            return Err(AccountingError::InvalidField(vec![Violation::new(
                "batch",
                format!("batch size {} exceeds the maximum of {}", inputs.len(), self.max_batch_size),
            )]));
        }

        let mut items = Vec::with_capacity(inputs.len());
        for input in inputs {
            items.push(self.process_one(input).await);
        }
        Ok(BatchResult { items })
    }

    async fn process_one(&self, input: Transaction) -> BatchItemResult {
        let outcome = match self.validator.validate(&input).await {
            Ok(outcome) => outcome,
            Err(e) => {
                return BatchItemResult::Failure(BatchItemFailure {
                    input,
                    errors: vec![Violation::new("source_id", e.to_string())],
                });
            }
        };

        if !outcome.valid {
            return BatchItemResult::Failure(BatchItemFailure { input, errors: outcome.errors });
        }

        let persisted = match self.store.create(&input).await {
            Ok(t) => t,
            Err(AccountingError::DuplicateSourceId(source_id)) => {
                return BatchItemResult::Failure(BatchItemFailure {
                    input,
                    errors: vec![Violation::new("source_id", "duplicate source_id").with_value(source_id)],
                });
            }
            Err(e) => {
                return BatchItemResult::Failure(BatchItemFailure {
                    input,
                    errors: vec![Violation::new("transaction", e.to_string())],
                });
            }
        };

        let id = match persisted.id {
            Some(id) => id,
            None => {
                return BatchItemResult::Failure(BatchItemFailure {
                    input: persisted,
                    errors: vec![Violation::new("id", "store did not assign an id on create")],
                });
            }
        };

        match self.processor.process(id).await {
            Ok(processed) => BatchItemResult::Success(processed),
            Err(e) => BatchItemResult::Failure(BatchItemFailure {
                input: persisted,
                errors: vec![Violation::new("transaction", e.to_string())],
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_failure_counts() {
        let result = BatchResult {
            items: vec![
                BatchItemResult::Success(dummy_transaction()),
                BatchItemResult::Failure(BatchItemFailure { input: dummy_transaction(), errors: vec![] }),
            ],
        };
        assert_eq!(result.success_count(), 1);
        assert_eq!(result.failure_count(), 1);
        assert!(!result.all_succeeded());
    }

    fn dummy_transaction() -> Transaction {
        use crate::domain::{TransactionStatus, TransactionType};
        use chrono::NaiveDate;
        use rust_decimal::Decimal;

        Transaction {
            id: None,
            portfolio_id: "PORTFOLIO123456789012345".to_string(),
            security_id: None,
            source_id: "s".to_string(),
            transaction_type: TransactionType::Dep,
            status: TransactionStatus::New,
            quantity: Decimal::new(1, 0),
            price: Decimal::ONE,
            transaction_date: NaiveDate::from_ymd_opt(2025, 1, 30).unwrap(),
            reprocessing_attempts: 0,
            version: 1,
            error_message: None,
        }
    }
}
