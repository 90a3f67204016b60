//! Persistence for transactions and balances (C2/C3).

mod balance_store;
mod transaction_store;

pub use balance_store::{BalanceFilter, BalanceStore, PgBalanceStore};
pub use transaction_store::{
    PgTransactionStore, SortDirection, SortField, SortKey, TransactionFilter, TransactionStore,
};
