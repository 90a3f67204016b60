//! Domain model: Transaction and Balance value types.
//!
//! Entities are immutable after construction. "Mutator" methods (`with_status`,
//! `with_incremented_version`, ...) return a new value rather than mutating
//! in place; identity for persistence purposes is carried by the `id` field
//! alone, never by reference equality.

mod balance;
mod transaction;
mod violation;

pub use balance::{Balance, BalanceKey};
pub use transaction::{NewTransaction, Transaction, TransactionStatus, TransactionType};
pub use violation::Violation;
