use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};

use crate::domain::{Balance, BalanceKey};
use crate::error::AccountingError;

#[derive(Debug, Clone, Default)]
pub struct BalanceFilter {
    pub portfolio_ids: Option<Vec<String>>,
    pub security_ids: Option<Vec<String>>,
    pub cash_only: bool,
    pub offset: i64,
    pub limit: i64,
}

impl BalanceFilter {
    pub fn clamp_limit(&mut self, default_page_size: i64, max_page_size: i64) {
        if self.limit <= 0 {
            self.limit = default_page_size;
        }
        self.limit = self.limit.min(max_page_size).max(1);
    }
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

#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Materializes the balance for `key` within the caller's ongoing
    /// storage transaction, creating a zero-quantity row if absent.
    /// Creation is idempotent under a concurrent-insert race via the
    /// unique (portfolio_id, security_id) constraint: a losing insert falls
    /// back to re-reading the row the winner created.
    async fn get_or_lock_for_update(&self, key: &BalanceKey) -> Result<Balance, AccountingError>;

    /// Optimistic-locked update. `balance.version` must be the version
    /// observed at read time; the server increments the persisted version.
    async fn update(&self, balance: &Balance) -> Result<Balance, AccountingError>;

    async fn list(&self, filter: &BalanceFilter) -> Result<Vec<Balance>, AccountingError>;
    async fn count(&self, filter: &BalanceFilter) -> Result<i64, AccountingError>;

    /// All balances for a portfolio, cash balance first, then per-security
    /// balances in id order.
    async fn portfolio_summary(&self, portfolio_id: &str) -> Result<Vec<Balance>, AccountingError>;
}

pub struct PgBalanceStore {
    pool: PgPool,
}

impl PgBalanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BalanceStore for PgBalanceStore {
    async fn get_or_lock_for_update(&self, key: &BalanceKey) -> Result<Balance, AccountingError> {
        let existing = sqlx::query(
            r#"SELECT id, portfolio_id, security_id, quantity_long, quantity_short, last_updated, version
               FROM balances WHERE portfolio_id = $1 AND security_id IS NOT DISTINCT FROM $2
               FOR UPDATE"#,
        )
        .bind(&key.portfolio_id)
        .bind(&key.security_id)
        .fetch_optional(&self.pool)
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
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(row) => row_to_balance(&row),
            // Lost the insert race to a concurrent fetch-or-create: the
            // winner's row now exists, so re-read it.
            None => {
                let row = sqlx::query(
                    r#"SELECT id, portfolio_id, security_id, quantity_long, quantity_short, last_updated, version
                       FROM balances WHERE portfolio_id = $1 AND security_id IS NOT DISTINCT FROM $2"#,
                )
                .bind(&key.portfolio_id)
                .bind(&key.security_id)
                .fetch_one(&self.pool)
                .await?;
                row_to_balance(&row)
            }
        }
    }

    async fn update(&self, balance: &Balance) -> Result<Balance, AccountingError> {
        let id = balance
            .id
            .ok_or_else(|| AccountingError::StorageError("cannot update a balance with no id".to_string()))?;

        let row = sqlx::query(
            r#"
            UPDATE balances
            SET quantity_long = $1, quantity_short = $2, last_updated = $3, version = version + 1
            WHERE id = $4 AND version = $5
            RETURNING id, portfolio_id, security_id, quantity_long, quantity_short, last_updated, version
            "#,
        )
        .bind(balance.quantity_long)
        .bind(balance.quantity_short)
        .bind(Utc::now())
        .bind(id)
        .bind(balance.version)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AccountingError::OptimisticLock(id))?;

        row_to_balance(&row)
    }

    async fn list(&self, filter: &BalanceFilter) -> Result<Vec<Balance>, AccountingError> {
        let mut qb = sqlx::QueryBuilder::new(
            r#"SELECT id, portfolio_id, security_id, quantity_long, quantity_short, last_updated, version
               FROM balances WHERE 1 = 1"#,
        );
        if let Some(ids) = &filter.portfolio_ids {
            qb.push(" AND portfolio_id = ANY(").push_bind(ids.clone()).push(")");
        }
        if let Some(ids) = &filter.security_ids {
            qb.push(" AND security_id = ANY(").push_bind(ids.clone()).push(")");
        }
        if filter.cash_only {
            qb.push(" AND security_id IS NULL");
        }
        qb.push(" ORDER BY portfolio_id ASC, security_id ASC NULLS FIRST, id ASC");
        qb.push(" OFFSET ").push_bind(filter.offset);
        qb.push(" LIMIT ").push_bind(filter.limit);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_balance).collect()
    }

    async fn count(&self, filter: &BalanceFilter) -> Result<i64, AccountingError> {
        let mut qb = sqlx::QueryBuilder::new("SELECT COUNT(*) AS n FROM balances WHERE 1 = 1");
        if let Some(ids) = &filter.portfolio_ids {
            qb.push(" AND portfolio_id = ANY(").push_bind(ids.clone()).push(")");
        }
        if let Some(ids) = &filter.security_ids {
            qb.push(" AND security_id = ANY(").push_bind(ids.clone()).push(")");
        }
        if filter.cash_only {
            qb.push(" AND security_id IS NULL");
        }
        let row = qb.build().fetch_one(&self.pool).await?;
        Ok(row.try_get("n")?)
    }

    async fn portfolio_summary(&self, portfolio_id: &str) -> Result<Vec<Balance>, AccountingError> {
        let rows = sqlx::query(
            r#"SELECT id, portfolio_id, security_id, quantity_long, quantity_short, last_updated, version
               FROM balances WHERE portfolio_id = $1
               ORDER BY security_id ASC NULLS FIRST, id ASC"#,
        )
        .bind(portfolio_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_balance).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_limit_defaults_and_caps() {
        let mut filter = BalanceFilter { limit: 0, ..Default::default() };
        filter.clamp_limit(50, 1000);
        assert_eq!(filter.limit, 50);

        let mut filter = BalanceFilter { limit: 99999, ..Default::default() };
        filter.clamp_limit(50, 1000);
        assert_eq!(filter.limit, 1000);
    }
}
