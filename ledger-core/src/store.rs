//! Store protocol consumed by the workload
//!
//! [`LedgerStore`] is the dataset as a whole: DDL, seeding, the two
//! store-specific BACKUP/RESTORE commands and full-table reads.
//! [`LedgerTxn`] is one open transaction used by a single transfer.

use crate::{
    types::{
        Account, AccountBalance, AccountId, Balance, LedgerTransaction, StoreFeatures,
        TransactionLeg,
    },
    Result,
};
use async_trait::async_trait;

/// Shared dataset reached over pooled connections
#[async_trait]
pub trait LedgerStore: Send + Sync + std::fmt::Debug {
    /// Apply transaction protocol switches
    async fn apply_features(&self, features: &StoreFeatures) -> Result<()>;

    /// Create the ledger tables if absent and empty them
    async fn create_schema(&self) -> Result<()>;

    /// Insert one account; an existing row is reported as a duplicate key
    async fn insert_account(&self, account: &Account) -> Result<()>;

    /// Open a transaction
    async fn begin(&self) -> Result<Box<dyn LedgerTxn>>;

    /// Incremental backup of everything committed after `last_backup_ts`,
    /// written to `destination`. Returns the new watermark.
    async fn backup(&self, destination: &str, last_backup_ts: u64) -> Result<u64>;

    /// Restore everything stored at `source`
    async fn restore(&self, source: &str) -> Result<()>;

    /// Drop every ledger table
    async fn drop_tables(&self) -> Result<()>;

    /// Every account's balance, ordered by id
    async fn account_balances(&self) -> Result<Vec<AccountBalance>>;

    /// Every account row, ordered by id
    async fn accounts(&self) -> Result<Vec<Account>>;

    /// Every transaction leg, ordered by leg id
    async fn transaction_legs(&self) -> Result<Vec<TransactionLeg>>;
}

/// One open transaction
///
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait LedgerTxn: Send {
    /// Read and exclusively lock the given accounts (`SELECT ... FOR UPDATE`).
    /// Returns whatever rows the store produced; callers validate them.
    async fn lock_accounts(&mut self, ids: &[AccountId]) -> Result<Vec<AccountBalance>>;

    /// Insert a transaction header
    async fn insert_transaction(&mut self, txn: &LedgerTransaction) -> Result<()>;

    /// Insert a transaction leg
    async fn insert_leg(&mut self, leg: &TransactionLeg) -> Result<()>;

    /// Overwrite an account balance
    async fn update_balance(&mut self, id: AccountId, balance: Balance) -> Result<()>;

    /// Commit
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Roll back
    async fn rollback(self: Box<Self>) -> Result<()>;
}
