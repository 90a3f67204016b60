//! Transaction Processor (C6): the two-phase NEW/ERROR -> PROC/ERROR/FATAL
//! lifecycle with atomic balance mutation under optimistic concurrency.
//!
//! Grounded on the teacher's persist-before-call coordinator
//! (`internal_transfer/coordinator.rs`) and its CAS update primitive
//! (`TransferDb::update_state_if`), generalized from a 2-service transfer
//! FSM to an N-balance-leg transaction.

use std::time::Duration;

use chrono::Utc;
use sqlx::{PgPool, Postgres, Row, Transaction as PgTransaction};

use crate::calculator;
use crate::domain::{Balance, BalanceKey, Transaction, TransactionStatus};
use crate::error::AccountingError;

pub struct TransactionProcessor {
    pool: PgPool,
    retry_bound: u32,
    retry_backoff: Duration,
}

impl TransactionProcessor {
    pub fn new(pool: PgPool, retry_bound: u32, retry_backoff_ms: u64) -> Self {
        Self { pool, retry_bound, retry_backoff: Duration::from_millis(retry_backoff_ms) }
    }

    /// Runs the full lifecycle for the transaction identified by `id`.
    /// Rejects immediately if the transaction is not in a processable
    /// status; otherwise attempts the atomic balance-mutation-plus-status-
    /// update up to `retry_bound + 1` times, retrying only on
    /// `optimistic_lock`.
    pub async fn process(&self, id: i64) -> Result<Transaction, AccountingError> {
        let mut attempt = 0u32;
        loop {
            match self.try_process_once(id).await {
                Ok(t) => return Ok(t),
                Err(AccountingError::OptimisticLock(_)) if attempt < self.retry_bound => {
                    attempt += 1;
                    tokio::time::sleep(self.retry_backoff).await;
                    continue;
                }
                Err(AccountingError::OptimisticLock(_)) => {
                    return self.finalize_as_error(id, "optimistic lock retry bound exhausted").await;
                }
                // `invalid_state` is an immediate rejection (step 1): the
                // transaction was never touched, so there is nothing to
                // finalize.
                Err(e @ AccountingError::InvalidState(_)) => return Err(e),
                // Any other storage error reaching here happened mid-transaction
                // (step 5): roll back already happened in `try_process_once`,
                // so classify and persist the terminal state rather than
                // leaving the transaction stuck at NEW with no error_message.
                Err(other) => {
                    return self.finalize_as_error(id, &format!("storage error during processing: {other}")).await;
                }
            }
        }
    }

    async fn try_process_once(&self, id: i64) -> Result<Transaction, AccountingError> {
        let mut tx = self.pool.begin().await?;

        let current = fetch_transaction_for_update(&mut tx, id).await?;
        if !current.status.is_processable() {
            tx.rollback().await.ok();
            return Err(AccountingError::InvalidState(id));
        }

        let now = Utc::now();
        let cash_key = BalanceKey::cash(current.portfolio_id.clone());
        let security_key = (!current.transaction_type.is_cash_only())
            .then(|| BalanceKey::security(current.portfolio_id.clone(), current.security_id.clone().unwrap_or_default()));

        let cash_balance = fetch_or_create_balance(&mut tx, &cash_key).await?;
        let security_balance = match &security_key {
            Some(key) => Some(fetch_or_create_balance(&mut tx, key).await?),
            None => None,
        };

        let calculated = match calculator::apply_transaction(&current, security_balance.as_ref(), &cash_balance, now) {
            Ok(c) => c,
            Err(violation) => {
                // A calculator-level violation here means a defect in the
                // data model reachable only at commit time (the validator
                // already rejected structural problems pre-persistence).
                tx.rollback().await.ok();
                return self
                    .finalize_as_fatal(id, &format!("balance calculation invariant violated: {violation}"))
                    .await;
            }
        };

        if !current.transaction_type.is_security_only() {
            update_balance(&mut tx, &calculated.cash).await?;
        }
        if let Some(new_security) = &calculated.security {
            update_balance(&mut tx, new_security).await?;
        }

        let updated = current.with_status(TransactionStatus::Proc, None);
        let persisted = update_transaction(&mut tx, &updated).await?;

        tx.commit().await?;
        Ok(persisted)
    }

    async fn finalize_as_error(&self, id: i64, reason: &str) -> Result<Transaction, AccountingError> {
        self.finalize_as(id, TransactionStatus::Error, reason).await
    }

    async fn finalize_as_fatal(&self, id: i64, reason: &str) -> Result<Transaction, AccountingError> {
        self.finalize_as(id, TransactionStatus::Fatal, reason).await
    }

    async fn finalize_as(&self, id: i64, status: TransactionStatus, reason: &str) -> Result<Transaction, AccountingError> {
        let mut tx = self.pool.begin().await?;
        let current = fetch_transaction_for_update(&mut tx, id).await?;
        let next = current
            .with_incremented_reprocessing_attempts()
            .with_status(status, Some(reason.to_string()));
        let persisted = update_transaction(&mut tx, &next).await?;
        tx.commit().await?;
        tracing::warn!(transaction_id = id, status = %status, reason, "transaction processing ended in a terminal failure state");
        Ok(persisted)
    }
}

async fn fetch_transaction_for_update(
    tx: &mut PgTransaction<'_, Postgres>,
    id: i64,
) -> Result<Transaction, AccountingError> {
    let row = sqlx::query(
        r#"SELECT id, portfolio_id, security_id, source_id, transaction_type, status,
                  quantity, price, transaction_date, reprocessing_attempts, version, error_message
           FROM transactions WHERE id = $1 FOR UPDATE"#,
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AccountingError::NotFound)?;

    Ok(Transaction {
        id: Some(row.try_get("id")?),
        portfolio_id: row.try_get("portfolio_id")?,
        security_id: row.try_get("security_id")?,
        source_id: row.try_get("source_id")?,
        transaction_type: crate::domain::TransactionType::from_str_opt(row.try_get::<String, _>("transaction_type")?.as_str())
            .ok_or_else(|| AccountingError::StorageError("unknown transaction_type".to_string()))?,
        status: TransactionStatus::from_id(row.try_get("status")?)
            .ok_or_else(|| AccountingError::StorageError("unknown status".to_string()))?,
        quantity: row.try_get("quantity")?,
        price: row.try_get("price")?,
        transaction_date: row.try_get("transaction_date")?,
        reprocessing_attempts: row.try_get("reprocessing_attempts")?,
        version: row.try_get("version")?,
        error_message: row.try_get("error_message")?,
    })
}

fn row_to_balance(row: &sqlx::postgres::PgRow) -> Result<Balance, AccountingError> {
    Ok(Balance {
        id: Some(row.try_get("id")?),
        portfolio_id: row.try_get("portfolio_id")?,
        security_id: row.try_get("security_id")?,
        quantity_long: row.try_get("quantity_long")?,
        quantity_short: row.try_get("quantity_short")?,
        last_updated: row.try_get("last_updated")?,
        version: row.try_get("version")?,
    })
}

/// Fetch-or-create under the caller's open storage transaction, locked for
/// the remainder of that transaction. Creation is idempotent under a
/// concurrent-insert race via the unique `(portfolio_id, security_id)`
/// constraint: `ON CONFLICT DO NOTHING` absorbs a losing insert instead of
/// surfacing a raw unique-violation, and the loser re-reads (now locking)
/// the row the winner created.
async fn fetch_or_create_balance(
    tx: &mut PgTransaction<'_, Postgres>,
    key: &BalanceKey,
) -> Result<Balance, AccountingError> {
    let existing = sqlx::query(
        r#"SELECT id, portfolio_id, security_id, quantity_long, quantity_short, last_updated, version
           FROM balances WHERE portfolio_id = $1 AND security_id IS NOT DISTINCT FROM $2
           FOR UPDATE"#,
    )
    .bind(&key.portfolio_id)
    .bind(&key.security_id)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(row) = existing {
        return row_to_balance(&row);
    }

    let zero = Balance::zero(key, Utc::now());
    let inserted = sqlx::query(
        r#"
        INSERT INTO balances (portfolio_id, security_id, quantity_long, quantity_short, last_updated, version)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (portfolio_id, security_id) DO NOTHING
        RETURNING id, portfolio_id, security_id, quantity_long, quantity_short, last_updated, version
        "#,
    )
    .bind(&zero.portfolio_id)
    .bind(&zero.security_id)
    .bind(zero.quantity_long)
    .bind(zero.quantity_short)
    .bind(zero.last_updated)
    .bind(zero.version)
    .fetch_optional(&mut **tx)
    .await?;

    match inserted {
        Some(row) => row_to_balance(&row),
        // Lost the insert race to a concurrent fetch-or-create: the winner's
        // row now exists (and the winner's transaction has released it, since
        // our own INSERT had to wait on their row lock to resolve the
        // conflict), so re-read and lock it here.
        None => {
            let row = sqlx::query(
                r#"SELECT id, portfolio_id, security_id, quantity_long, quantity_short, last_updated, version
                   FROM balances WHERE portfolio_id = $1 AND security_id IS NOT DISTINCT FROM $2
                   FOR UPDATE"#,
            )
            .bind(&key.portfolio_id)
            .bind(&key.security_id)
            .fetch_one(&mut **tx)
            .await?;
            row_to_balance(&row)
        }
    }
}

async fn update_balance(tx: &mut PgTransaction<'_, Postgres>, balance: &Balance) -> Result<(), AccountingError> {
    let id = balance
        .id
        .ok_or_else(|| AccountingError::StorageError("cannot update a balance with no id".to_string()))?;

    let updated = sqlx::query(
        r#"
        UPDATE balances
        SET quantity_long = $1, quantity_short = $2, last_updated = $3, version = version + 1
        WHERE id = $4 AND version = $5
        "#,
    )
    .bind(balance.quantity_long)
    .bind(balance.quantity_short)
    .bind(Utc::now())
    .bind(id)
    .bind(balance.version)
    .execute(&mut **tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(AccountingError::OptimisticLock(id));
    }
    Ok(())
}

async fn update_transaction(
    tx: &mut PgTransaction<'_, Postgres>,
    transaction: &Transaction,
) -> Result<Transaction, AccountingError> {
    let id = transaction
        .id
        .ok_or_else(|| AccountingError::StorageError("cannot update a transaction with no id".to_string()))?;

    let row = sqlx::query(
        r#"
        UPDATE transactions
        SET status = $1, reprocessing_attempts = $2, error_message = $3, version = version + 1
        WHERE id = $4 AND version = $5
        RETURNING id, portfolio_id, security_id, source_id, transaction_type, status,
                  quantity, price, transaction_date, reprocessing_attempts, version, error_message
        "#,
    )
    .bind(transaction.status.id())
    .bind(transaction.reprocessing_attempts)
    .bind(&transaction.error_message)
    .bind(id)
    .bind(transaction.version)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AccountingError::OptimisticLock(id))?;

    Ok(Transaction {
        id: Some(row.try_get("id")?),
        portfolio_id: row.try_get("portfolio_id")?,
        security_id: row.try_get("security_id")?,
        source_id: row.try_get("source_id")?,
        transaction_type: crate::domain::TransactionType::from_str_opt(row.try_get::<String, _>("transaction_type")?.as_str())
            .ok_or_else(|| AccountingError::StorageError("unknown transaction_type".to_string()))?,
        status: TransactionStatus::from_id(row.try_get("status")?)
            .ok_or_else(|| AccountingError::StorageError("unknown status".to_string()))?,
        quantity: row.try_get("quantity")?,
        price: row.try_get("price")?,
        transaction_date: row.try_get("transaction_date")?,
        reprocessing_attempts: row.try_get("reprocessing_attempts")?,
        version: row.try_get("version")?,
        error_message: row.try_get("error_message")?,
    })
}
