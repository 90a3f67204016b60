use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};

use crate::domain::{Transaction, TransactionStatus, TransactionType};
use crate::error::AccountingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Id,
    PortfolioId,
    TransactionDate,
    TransactionType,
    Status,
}

#[derive(Debug, Clone, Copy)]
pub struct SortKey {
    pub field: SortField,
    pub direction: SortDirection,
}

/// Query filter for `list`/`count`. Every field is optional; an absent
/// field imposes no constraint.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub ids: Option<Vec<i64>>,
    pub portfolio_ids: Option<Vec<String>>,
    pub security_ids: Option<Vec<String>>,
    pub statuses: Option<Vec<TransactionStatus>>,
    pub transaction_types: Option<Vec<TransactionType>>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub quantity_min: Option<Decimal>,
    pub quantity_max: Option<Decimal>,
    pub price_min: Option<Decimal>,
    pub price_max: Option<Decimal>,
    pub sort: Vec<SortKey>,
    pub offset: i64,
    pub limit: i64,
}

impl TransactionFilter {
    /// Clamp the page size to `[1, max_page_size]`, defaulting to
    /// `default_page_size` when the caller did not set one (limit <= 0).
    pub fn clamp_limit(&mut self, default_page_size: i64, max_page_size: i64) {
        if self.limit <= 0 {
            self.limit = default_page_size;
        }
        self.limit = self.limit.min(max_page_size).max(1);
    }
}

fn sort_field_sql(field: SortField) -> &'static str {
    match field {
        SortField::Id => "id",
        SortField::PortfolioId => "portfolio_id",
        SortField::TransactionDate => "transaction_date",
        SortField::TransactionType => "transaction_type",
        SortField::Status => "status",
    }
}

fn build_query<'a>(filter: &'a TransactionFilter, select: &str) -> sqlx::QueryBuilder<'a, sqlx::Postgres> {
    let mut qb = sqlx::QueryBuilder::new(select);
    qb.push(" WHERE 1 = 1");

    if let Some(ids) = &filter.ids {
        qb.push(" AND id = ANY(").push_bind(ids.clone()).push(")");
    }
    if let Some(portfolio_ids) = &filter.portfolio_ids {
        qb.push(" AND portfolio_id = ANY(").push_bind(portfolio_ids.clone()).push(")");
    }
    if let Some(security_ids) = &filter.security_ids {
        qb.push(" AND security_id = ANY(").push_bind(security_ids.clone()).push(")");
    }
    if let Some(statuses) = &filter.statuses {
        let ids: Vec<i16> = statuses.iter().map(|s| s.id()).collect();
        qb.push(" AND status = ANY(").push_bind(ids).push(")");
    }
    if let Some(types) = &filter.transaction_types {
        let names: Vec<String> = types.iter().map(|t| t.as_str().to_string()).collect();
        qb.push(" AND transaction_type = ANY(").push_bind(names).push(")");
    }
    if let Some(from) = filter.date_from {
        qb.push(" AND transaction_date >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        qb.push(" AND transaction_date <= ").push_bind(to);
    }
    if let Some(min) = filter.quantity_min {
        qb.push(" AND quantity >= ").push_bind(min);
    }
    if let Some(max) = filter.quantity_max {
        qb.push(" AND quantity <= ").push_bind(max);
    }
    if let Some(min) = filter.price_min {
        qb.push(" AND price >= ").push_bind(min);
    }
    if let Some(max) = filter.price_max {
        qb.push(" AND price <= ").push_bind(max);
    }

    qb
}

fn transaction_type_from_row(s: &str) -> Result<TransactionType, AccountingError> {
    TransactionType::from_str_opt(s)
        .ok_or_else(|| AccountingError::StorageError(format!("unknown transaction_type in storage: {s}")))
}

fn status_from_row(id: i16) -> Result<TransactionStatus, AccountingError> {
    TransactionStatus::from_id(id)
        .ok_or_else(|| AccountingError::StorageError(format!("unknown status id in storage: {id}")))
}

fn row_to_transaction(row: &sqlx::postgres::PgRow) -> Result<Transaction, AccountingError> {
    Ok(Transaction {
        id: Some(row.try_get("id")?),
        portfolio_id: row.try_get("portfolio_id")?,
        security_id: row.try_get("security_id")?,
        source_id: row.try_get("source_id")?,
        transaction_type: transaction_type_from_row(row.try_get::<String, _>("transaction_type")?.as_str())?,
        status: status_from_row(row.try_get("status")?)?,
        quantity: row.try_get("quantity")?,
        price: row.try_get("price")?,
        transaction_date: row.try_get("transaction_date")?,
        reprocessing_attempts: row.try_get("reprocessing_attempts")?,
        version: row.try_get("version")?,
        error_message: row.try_get("error_message")?,
    })
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn create(&self, transaction: &Transaction) -> Result<Transaction, AccountingError>;
    async fn get_by_id(&self, id: i64) -> Result<Transaction, AccountingError>;
    async fn list(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, AccountingError>;
    async fn count(&self, filter: &TransactionFilter) -> Result<i64, AccountingError>;
    async fn update(&self, transaction: &Transaction) -> Result<Transaction, AccountingError>;
    async fn find_by_source_id(&self, source_id: &str) -> Result<Transaction, AccountingError>;
}

pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    /// Inserts a NEW transaction. Idempotent under a unique-constraint race
    /// on `source_id`: a concurrent create that trips the constraint is
    /// surfaced as `duplicate_source_id`, never silently swallowed — unlike
    /// balance fetch-or-create, a transaction is never "the same row" just
    /// because the source_id matches.
    async fn create(&self, transaction: &Transaction) -> Result<Transaction, AccountingError> {
        let row = sqlx::query(
            r#"
            INSERT INTO transactions
                (portfolio_id, security_id, source_id, transaction_type, status,
                 quantity, price, transaction_date, reprocessing_attempts, version, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id, portfolio_id, security_id, source_id, transaction_type, status,
                      quantity, price, transaction_date, reprocessing_attempts, version, error_message
            "#,
        )
        .bind(&transaction.portfolio_id)
        .bind(&transaction.security_id)
        .bind(&transaction.source_id)
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.status.id())
        .bind(transaction.quantity)
        .bind(transaction.price)
        .bind(transaction.transaction_date)
        .bind(transaction.reprocessing_attempts)
        .bind(transaction.version)
        .bind(&transaction.error_message)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                AccountingError::DuplicateSourceId(transaction.source_id.clone())
            }
            other => AccountingError::from(other),
        })?;

        row_to_transaction(&row)
    }

    async fn get_by_id(&self, id: i64) -> Result<Transaction, AccountingError> {
        let row = sqlx::query(
            r#"SELECT id, portfolio_id, security_id, source_id, transaction_type, status,
                      quantity, price, transaction_date, reprocessing_attempts, version, error_message
               FROM transactions WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AccountingError::NotFound)?;

        row_to_transaction(&row)
    }

    async fn list(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, AccountingError> {
        let mut qb = build_query(
            filter,
            r#"SELECT id, portfolio_id, security_id, source_id, transaction_type, status,
                      quantity, price, transaction_date, reprocessing_attempts, version, error_message
               FROM transactions"#,
        );

        if !filter.sort.is_empty() {
            qb.push(" ORDER BY ");
            for (i, key) in filter.sort.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                qb.push(sort_field_sql(key.field));
                qb.push(match key.direction {
                    SortDirection::Asc => " ASC",
                    SortDirection::Desc => " DESC",
                });
            }
            qb.push(", id ASC");
        } else {
            qb.push(" ORDER BY id ASC");
        }

        qb.push(" OFFSET ").push_bind(filter.offset);
        qb.push(" LIMIT ").push_bind(filter.limit);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_transaction).collect()
    }

    async fn count(&self, filter: &TransactionFilter) -> Result<i64, AccountingError> {
        let mut qb = build_query(filter, "SELECT COUNT(*) AS n FROM transactions");
        let row = qb.build().fetch_one(&self.pool).await?;
        Ok(row.try_get("n")?)
    }

    /// Optimistic-locked update: the `WHERE version = $n` predicate uses the
    /// version already present on `transaction` (the version observed at
    /// read time), never a pre-incremented value. The server bumps the
    /// stored version by one on the matching row.
    async fn update(&self, transaction: &Transaction) -> Result<Transaction, AccountingError> {
        let id = transaction.id.ok_or_else(|| {
            AccountingError::StorageError("cannot update a transaction with no id".to_string())
        })?;

        let row = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $1, quantity = $2, price = $3, reprocessing_attempts = $4,
                error_message = $5, version = version + 1
            WHERE id = $6 AND version = $7
            RETURNING id, portfolio_id, security_id, source_id, transaction_type, status,
                      quantity, price, transaction_date, reprocessing_attempts, version, error_message
            "#,
        )
        .bind(transaction.status.id())
        .bind(transaction.quantity)
        .bind(transaction.price)
        .bind(transaction.reprocessing_attempts)
        .bind(&transaction.error_message)
        .bind(id)
        .bind(transaction.version)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AccountingError::OptimisticLock(id))?;

        row_to_transaction(&row)
    }

    /// `not_found` is the expected outcome for a unique source_id and must
    /// not be logged as an error by callers (§4.5, §4.15).
    async fn find_by_source_id(&self, source_id: &str) -> Result<Transaction, AccountingError> {
        let row = sqlx::query(
            r#"SELECT id, portfolio_id, security_id, source_id, transaction_type, status,
                      quantity, price, transaction_date, reprocessing_attempts, version, error_message
               FROM transactions WHERE source_id = $1"#,
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AccountingError::NotFound)?;

        row_to_transaction(&row)
    }
}
