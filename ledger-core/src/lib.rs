//! DelTran Ledger Core
//!
//! Double-entry ledger data model and the store protocol used to drive a
//! MySQL-compatible transactional store through online transfers,
//! incremental backups and full restores.
//!
//! # Architecture
//!
//! - **Schema**: `accounts`, `transaction`, `transaction_leg` tables
//! - **Store protocol**: [`LedgerStore`] / [`LedgerTxn`] traits
//! - **Backends**: [`MySqlStore`] (sqlx) and [`MemoryStore`] (in-process reference)
//!
//! # Invariants
//!
//! - Money conservation: Σ(balances) == accounts × initial balance
//! - Double entry: the two legs of every transaction sum to zero
//! - Replay fidelity: restoring every backup in index order rebuilds the
//!   state captured by the last backup

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod schema;
pub mod error;
pub mod store;
pub mod mysql;
pub mod memory;

// Re-exports
pub use error::{Error, Result};
pub use types::{
    Account, AccountBalance, AccountId, Balance, LedgerTransaction, ReplicaRead, StoreFeatures,
    TransactionLeg, TxnId, TxnMode,
};
pub use store::{LedgerStore, LedgerTxn};
pub use mysql::MySqlStore;
pub use memory::MemoryStore;
