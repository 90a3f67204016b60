use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::transaction::Transaction;
use super::violation::Violation;

/// Identifies a balance row: a portfolio's cash position, or one of its
/// per-security positions. The cash variant and a security variant are
/// always distinct keys, even for the same portfolio.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BalanceKey {
    pub portfolio_id: String,
    pub security_id: Option<String>,
}

impl BalanceKey {
    pub fn cash(portfolio_id: impl Into<String>) -> Self {
        Self { portfolio_id: portfolio_id.into(), security_id: None }
    }

    pub fn security(portfolio_id: impl Into<String>, security_id: impl Into<String>) -> Self {
        Self { portfolio_id: portfolio_id.into(), security_id: Some(security_id.into()) }
    }

    pub fn is_cash(&self) -> bool {
        self.security_id.is_none()
    }
}

/// A portfolio's position in cash or a single security.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub id: Option<i64>,
    pub portfolio_id: String,
    pub security_id: Option<String>,
    pub quantity_long: Decimal,
    pub quantity_short: Decimal,
    pub last_updated: DateTime<Utc>,
    pub version: i64,
}

impl Balance {
    /// A freshly materialized zero balance for `key`, as created by
    /// `get_or_lock_for_update` when no row exists yet.
    pub fn zero(key: &BalanceKey, now: DateTime<Utc>) -> Self {
        Self {
            id: None,
            portfolio_id: key.portfolio_id.clone(),
            security_id: key.security_id.clone(),
            quantity_long: Decimal::ZERO,
            quantity_short: Decimal::ZERO,
            last_updated: now,
            version: 1,
        }
    }

    pub fn key(&self) -> BalanceKey {
        BalanceKey { portfolio_id: self.portfolio_id.clone(), security_id: self.security_id.clone() }
    }

    pub fn is_cash(&self) -> bool {
        self.security_id.is_none()
    }

    pub fn net_position(&self) -> Decimal {
        self.quantity_long - self.quantity_short
    }

    /// Informational only: whether this balance's long quantity can cover a
    /// purchase of `amount`. Not enforced at commit time by the processor.
    pub fn can_cover_purchase(&self, amount: Decimal) -> bool {
        self.quantity_long >= amount
    }

    /// Applies one leg of a transaction's impact to this balance, returning
    /// a new value. Fails if `transaction` does not touch this balance's key,
    /// or if the result would violate the cash-balance-has-no-short invariant.
    pub fn apply(&self, transaction: &Transaction, now: DateTime<Utc>) -> Result<Balance, Violation> {
        if transaction.portfolio_id != self.portfolio_id {
            return Err(Violation::new("portfolio_id", "transaction does not match this balance's portfolio"));
        }

        let impact = transaction.impact();
        let mut next = self.clone();

        if self.is_cash() {
            if impact.cash == 0 {
                return Err(Violation::new("transaction_type", "this transaction type does not touch the cash balance"));
            }
            let delta = transaction.quantity.abs() * Decimal::from(impact.cash.signum() as i32);
            // DEP/WD apply the raw quantity (price is pinned to 1); other
            // cash-touching types apply the notional.
            let applied = if transaction.transaction_type.is_cash_only() {
                delta
            } else {
                transaction.notional().abs() * Decimal::from(impact.cash.signum() as i32)
            };
            next.quantity_long += applied;
        } else {
            if transaction.security_id.as_deref() != self.security_id.as_deref() {
                return Err(Violation::new("security_id", "transaction does not match this balance's security"));
            }
            if impact.long != 0 {
                next.quantity_long += transaction.quantity.abs() * Decimal::from(impact.long.signum() as i32);
            }
            if impact.short != 0 {
                next.quantity_short += transaction.quantity.abs() * Decimal::from(impact.short.signum() as i32);
            }
            if !next.quantity_short.is_zero() && next.security_id.is_none() {
                return Err(Violation::new("quantity_short", "cash balances must have zero short quantity"));
            }
        }

        next.last_updated = now;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::transaction::{NewTransaction, TransactionType};
    use chrono::NaiveDate;

    fn tx(ty: TransactionType, qty: i64, price: i64, security: Option<&str>) -> Transaction {
        Transaction::build(NewTransaction {
            portfolio_id: "PORTFOLIO123456789012345".to_string(),
            security_id: security.map(|s| s.to_string()),
            source_id: "s".to_string(),
            transaction_type: ty,
            quantity: Decimal::new(qty, 0),
            price: Decimal::new(price, 0),
            transaction_date: NaiveDate::from_ymd_opt(2025, 1, 30).unwrap(),
        })
        .unwrap()
    }

    #[test]
    fn deposit_increments_cash_long() {
        let key = BalanceKey::cash("PORTFOLIO123456789012345");
        let now = Utc::now();
        let cash = Balance::zero(&key, now);
        let t = tx(TransactionType::Dep, 5000, 1, None);
        let next = cash.apply(&t, now).unwrap();
        assert_eq!(next.quantity_long, Decimal::new(5000, 0));
        assert_eq!(next.quantity_short, Decimal::ZERO);
    }

    #[test]
    fn buy_increases_security_long_and_decreases_cash() {
        let now = Utc::now();
        let sec_key = BalanceKey::security("PORTFOLIO123456789012345", "SECURITY1234567890123456");
        let sec = Balance::zero(&sec_key, now);
        let cash_key = BalanceKey::cash("PORTFOLIO123456789012345");
        let cash = Balance::zero(&cash_key, now);

        let t = tx(TransactionType::Buy, 100, 50, Some("SECURITY1234567890123456"));
        let sec_next = sec.apply(&t, now).unwrap();
        let cash_next = cash.apply(&t, now).unwrap();

        assert_eq!(sec_next.quantity_long, Decimal::new(100, 0));
        assert_eq!(cash_next.quantity_long, Decimal::new(-5000, 0));
    }

    #[test]
    fn short_increases_short_and_increases_cash() {
        let now = Utc::now();
        let sec_key = BalanceKey::security("PORTFOLIO123456789012345", "SECURITY1234567890123456");
        let sec = Balance::zero(&sec_key, now);
        let t = tx(TransactionType::Short, 75, 60, Some("SECURITY1234567890123456"));
        let next = sec.apply(&t, now).unwrap();
        assert_eq!(next.quantity_short, Decimal::new(75, 0));
        assert_eq!(next.quantity_long, Decimal::ZERO);
    }

    #[test]
    fn negative_cash_is_allowed() {
        let now = Utc::now();
        let key = BalanceKey::cash("PORTFOLIO123456789012345");
        let cash = Balance::zero(&key, now);
        let t = tx(TransactionType::Wd, 100, 1, None);
        let next = cash.apply(&t, now).unwrap();
        assert_eq!(next.quantity_long, Decimal::new(-100, 0));
    }

    #[test]
    fn mismatched_portfolio_is_rejected() {
        let now = Utc::now();
        let key = BalanceKey::cash("OTHERFOLIO123456789012345".chars().take(24).collect::<String>());
        let cash = Balance::zero(&key, now);
        let t = tx(TransactionType::Dep, 1, 1, None);
        assert!(cash.apply(&t, now).is_err());
    }
}
