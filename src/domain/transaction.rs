use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::violation::Violation;

const PORTFOLIO_ID_LEN: usize = 24;
const SECURITY_ID_LEN: usize = 24;
const SOURCE_ID_MAX_LEN: usize = 50;

/// One of the eight transaction types the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    Buy,
    Sell,
    Short,
    Cover,
    Dep,
    Wd,
    In,
    Out,
}

/// Signed per-unit direction of a transaction's effect on (long, short, cash).
///
/// A value of `1` means "add quantity/notional", `-1` means "subtract",
/// `0` means "this type does not touch this leg".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Impact {
    pub long: i8,
    pub short: i8,
    pub cash: i8,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Buy => "BUY",
            TransactionType::Sell => "SELL",
            TransactionType::Short => "SHORT",
            TransactionType::Cover => "COVER",
            TransactionType::Dep => "DEP",
            TransactionType::Wd => "WD",
            TransactionType::In => "IN",
            TransactionType::Out => "OUT",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(TransactionType::Buy),
            "SELL" => Some(TransactionType::Sell),
            "SHORT" => Some(TransactionType::Short),
            "COVER" => Some(TransactionType::Cover),
            "DEP" => Some(TransactionType::Dep),
            "WD" => Some(TransactionType::Wd),
            "IN" => Some(TransactionType::In),
            "OUT" => Some(TransactionType::Out),
            _ => None,
        }
    }

    /// Whether this type touches only the cash balance (no security leg).
    pub fn is_cash_only(&self) -> bool {
        matches!(self, TransactionType::Dep | TransactionType::Wd)
    }

    /// Whether this type touches only a security balance (no cash leg).
    pub fn is_security_only(&self) -> bool {
        matches!(self, TransactionType::In | TransactionType::Out)
    }

    /// Direction triple per the impact table (§4.4).
    pub fn impact(&self) -> Impact {
        match self {
            TransactionType::Buy => Impact { long: 1, short: 0, cash: -1 },
            TransactionType::Sell => Impact { long: -1, short: 0, cash: 1 },
            TransactionType::Short => Impact { long: 0, short: 1, cash: 1 },
            TransactionType::Cover => Impact { long: 0, short: -1, cash: -1 },
            TransactionType::Dep => Impact { long: 0, short: 0, cash: 1 },
            TransactionType::Wd => Impact { long: 0, short: 0, cash: -1 },
            TransactionType::In => Impact { long: 1, short: 0, cash: 0 },
            TransactionType::Out => Impact { long: -1, short: 0, cash: 0 },
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction lifecycle status.
///
/// Numeric ids are chosen for persistence as a `SMALLINT`, following the
/// same convention as a two-state-machine design: terminal states are far
/// from zero, in-flight/initial states are small.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum TransactionStatus {
    New = 0,
    Proc = 10,
    Error = -10,
    Fatal = -20,
}

impl TransactionStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Proc | TransactionStatus::Fatal)
    }

    /// Whether `process` may legally be called on a transaction in this status.
    #[inline]
    pub fn is_processable(&self) -> bool {
        matches!(self, TransactionStatus::New | TransactionStatus::Error)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransactionStatus::New),
            10 => Some(TransactionStatus::Proc),
            -10 => Some(TransactionStatus::Error),
            -20 => Some(TransactionStatus::Fatal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::New => "NEW",
            TransactionStatus::Proc => "PROC",
            TransactionStatus::Error => "ERROR",
            TransactionStatus::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransactionStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransactionStatus::from_id(value).ok_or(())
    }
}

/// A single financial transaction. Immutable after construction; state
/// transitions are modeled as new values produced by `with_status` and
/// `with_incremented_version`, never as in-place mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Option<i64>,
    pub portfolio_id: String,
    pub security_id: Option<String>,
    pub source_id: String,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub quantity: Decimal,
    pub price: Decimal,
    pub transaction_date: NaiveDate,
    pub reprocessing_attempts: i32,
    pub version: i64,
    pub error_message: Option<String>,
}

/// Fields required to build a new `Transaction`. Carries no `id`/`status`/
/// `version` — those are assigned by construction and by the store.
pub struct NewTransaction {
    pub portfolio_id: String,
    pub security_id: Option<String>,
    pub source_id: String,
    pub transaction_type: TransactionType,
    pub quantity: Decimal,
    pub price: Decimal,
    pub transaction_date: NaiveDate,
}

impl Transaction {
    /// Builds a new transaction in status `NEW`, collecting every structural
    /// and cross-field violation rather than stopping at the first one.
    pub fn build(input: NewTransaction) -> Result<Transaction, Vec<Violation>> {
        let mut violations = Vec::new();

        if input.portfolio_id.len() != PORTFOLIO_ID_LEN
            || !input.portfolio_id.chars().all(|c| c.is_ascii_alphanumeric())
        {
            violations.push(
                Violation::new(
                    "portfolio_id",
                    format!("must be exactly {PORTFOLIO_ID_LEN} alphanumeric characters"),
                )
                .with_value(input.portfolio_id.clone()),
            );
        }

        match &input.security_id {
            Some(sid) if sid.len() != SECURITY_ID_LEN || !sid.chars().all(|c| c.is_ascii_alphanumeric()) => {
                violations.push(
                    Violation::new(
                        "security_id",
                        format!("must be empty or exactly {SECURITY_ID_LEN} alphanumeric characters"),
                    )
                    .with_value(sid.clone()),
                );
            }
            _ => {}
        }

        if input.source_id.is_empty() || input.source_id.len() > SOURCE_ID_MAX_LEN {
            violations.push(
                Violation::new(
                    "source_id",
                    format!("must be non-empty and at most {SOURCE_ID_MAX_LEN} characters"),
                )
                .with_value(input.source_id.clone()),
            );
        }

        let is_cash_type = input.transaction_type.is_cash_only();
        let is_security_type = input.transaction_type.is_security_only()
            || matches!(
                input.transaction_type,
                TransactionType::Buy | TransactionType::Sell | TransactionType::Short | TransactionType::Cover
            );

        if is_cash_type && input.security_id.is_some() {
            violations.push(Violation::new(
                "security_id",
                "must be empty for a cash transaction (DEP/WD)",
            ));
        }
        if is_security_type && input.security_id.is_none() {
            violations.push(Violation::new(
                "security_id",
                "must be present for a security transaction",
            ));
        }

        if input.quantity.is_zero() {
            violations.push(Violation::new("quantity", "must be non-zero"));
        }

        if input.price.is_sign_negative() {
            violations.push(Violation::new("price", "must be non-negative"));
        }

        if is_cash_type && input.price != Decimal::ONE {
            violations.push(Violation::new(
                "price",
                "must equal 1 for DEP/WD transactions",
            ));
        }

        if !violations.is_empty() {
            return Err(violations);
        }

        Ok(Transaction {
            id: None,
            portfolio_id: input.portfolio_id,
            security_id: input.security_id,
            source_id: input.source_id,
            transaction_type: input.transaction_type,
            status: TransactionStatus::New,
            quantity: input.quantity,
            price: input.price,
            transaction_date: input.transaction_date,
            reprocessing_attempts: 0,
            version: 1,
            error_message: None,
        })
    }

    /// Direction triple for this transaction's type (§4.4).
    pub fn impact(&self) -> Impact {
        self.transaction_type.impact()
    }

    /// Notional = quantity * price.
    pub fn notional(&self) -> Decimal {
        self.quantity * self.price
    }

    /// Returns a new value with the given status (and error message, for
    /// ERROR/FATAL). Does not touch `version` — callers increment that via
    /// the store's optimistic-locked update.
    pub fn with_status(&self, status: TransactionStatus, error_message: Option<String>) -> Transaction {
        let mut next = self.clone();
        next.status = status;
        next.error_message = error_message;
        next
    }

    pub fn with_incremented_reprocessing_attempts(&self) -> Transaction {
        let mut next = self.clone();
        next.reprocessing_attempts += 1;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_input() -> NewTransaction {
        NewTransaction {
            portfolio_id: "PORTFOLIO123456789012345".to_string(),
            security_id: Some("SECURITY1234567890123456".to_string()),
            source_id: "src-1".to_string(),
            transaction_type: TransactionType::Buy,
            quantity: Decimal::new(100, 0),
            price: Decimal::new(5025, 2),
            transaction_date: NaiveDate::from_ymd_opt(2025, 1, 30).unwrap(),
        }
    }

    #[test]
    fn builds_valid_buy() {
        let t = Transaction::build(valid_input()).unwrap();
        assert_eq!(t.status, TransactionStatus::New);
        assert_eq!(t.version, 1);
        assert_eq!(t.reprocessing_attempts, 0);
    }

    #[test]
    fn rejects_zero_quantity() {
        let mut input = valid_input();
        input.quantity = Decimal::ZERO;
        let errs = Transaction::build(input).unwrap_err();
        assert!(errs.iter().any(|v| v.field == "quantity"));
    }

    #[test]
    fn rejects_dep_with_security_id() {
        let input = NewTransaction {
            transaction_type: TransactionType::Dep,
            quantity: Decimal::new(5000, 0),
            price: Decimal::ONE,
            ..valid_input()
        };
        let errs = Transaction::build(input).unwrap_err();
        assert!(errs.iter().any(|v| v.field == "security_id"));
    }

    #[test]
    fn rejects_dep_with_wrong_price() {
        let input = NewTransaction {
            transaction_type: TransactionType::Dep,
            security_id: None,
            quantity: Decimal::new(5000, 0),
            price: Decimal::new(2, 0),
            ..valid_input()
        };
        let errs = Transaction::build(input).unwrap_err();
        assert!(errs.iter().any(|v| v.field == "price"));
    }

    #[test]
    fn rejects_wrong_length_portfolio_id() {
        let input = NewTransaction {
            portfolio_id: "TOO_SHORT".to_string(),
            ..valid_input()
        };
        let errs = Transaction::build(input).unwrap_err();
        assert!(errs.iter().any(|v| v.field == "portfolio_id"));
    }

    #[test]
    fn collects_multiple_violations() {
        let input = NewTransaction {
            portfolio_id: "short".to_string(),
            quantity: Decimal::ZERO,
            ..valid_input()
        };
        let errs = Transaction::build(input).unwrap_err();
        assert!(errs.len() >= 2);
    }

    #[test]
    fn status_roundtrip() {
        for s in [
            TransactionStatus::New,
            TransactionStatus::Proc,
            TransactionStatus::Error,
            TransactionStatus::Fatal,
        ] {
            assert_eq!(TransactionStatus::from_id(s.id()), Some(s));
        }
    }

    #[test]
    fn terminal_states() {
        assert!(TransactionStatus::Proc.is_terminal());
        assert!(TransactionStatus::Fatal.is_terminal());
        assert!(!TransactionStatus::New.is_terminal());
        assert!(!TransactionStatus::Error.is_terminal());
    }

    #[test]
    fn processable_states() {
        assert!(TransactionStatus::New.is_processable());
        assert!(TransactionStatus::Error.is_processable());
        assert!(!TransactionStatus::Proc.is_processable());
        assert!(!TransactionStatus::Fatal.is_processable());
    }

    #[test]
    fn impact_table_matches_spec() {
        assert_eq!(TransactionType::Buy.impact(), Impact { long: 1, short: 0, cash: -1 });
        assert_eq!(TransactionType::Sell.impact(), Impact { long: -1, short: 0, cash: 1 });
        assert_eq!(TransactionType::Short.impact(), Impact { long: 0, short: 1, cash: 1 });
        assert_eq!(TransactionType::Cover.impact(), Impact { long: 0, short: -1, cash: -1 });
        assert_eq!(TransactionType::Dep.impact(), Impact { long: 0, short: 0, cash: 1 });
        assert_eq!(TransactionType::Wd.impact(), Impact { long: 0, short: 0, cash: -1 });
        assert_eq!(TransactionType::In.impact(), Impact { long: 1, short: 0, cash: 0 });
        assert_eq!(TransactionType::Out.impact(), Impact { long: -1, short: 0, cash: 0 });
    }
}
