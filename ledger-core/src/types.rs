//! Core types for the ledger
//!
//! Balances and amounts are plain integers: the workload moves whole units
//! between accounts, so conservation can be checked with exact equality.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Account identifier, dense in `[0, N)`
pub type AccountId = i64;

/// Account balance / leg amount
pub type Balance = i64;

/// Ledger transaction identifier
pub type TxnId = i64;

/// Row of the `accounts` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Primary key
    pub id: AccountId,
    /// Current balance
    pub balance: Balance,
    /// Unique display name (`account <id>`)
    pub name: String,
    /// Opaque padding
    pub remark: String,
}

impl Account {
    /// Create a freshly seeded account
    pub fn seeded(id: AccountId, balance: Balance, remark: impl Into<String>) -> Self {
        Self {
            id,
            balance,
            name: format!("account {}", id),
            remark: remark.into(),
        }
    }
}

/// `(id, balance)` projection of an account, as read by locking and state capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Account id
    pub id: AccountId,
    /// Balance at read time
    pub balance: Balance,
}

impl AccountBalance {
    /// Create new projection
    pub fn new(id: AccountId, balance: Balance) -> Self {
        Self { id, balance }
    }
}

/// Row of the `transaction` table (ledger header)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Primary key, allocated by the workload's counter
    pub id: TxnId,
    /// Unique label (`txn <id>`)
    pub txn_ref: String,
    /// Booking timestamp
    pub booking_date: DateTime<Utc>,
    /// Transaction timestamp
    pub txn_date: DateTime<Utc>,
    /// Opaque padding
    pub remark: String,
}

impl LedgerTransaction {
    /// Create a header stamped with the current time
    pub fn new(id: TxnId, remark: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            txn_ref: format!("txn {}", id),
            booking_date: now,
            txn_date: now,
            remark: remark.into(),
        }
    }
}

/// Row of the `transaction_leg` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLeg {
    /// Store-assigned id (`None` until inserted)
    pub id: Option<i64>,
    /// Account this leg applies to
    pub account_id: AccountId,
    /// Signed amount: negative debit, positive credit
    pub amount: Balance,
    /// Account balance after applying this leg
    pub running_balance: Balance,
    /// Owning transaction
    pub txn_id: TxnId,
    /// Opaque padding
    pub remark: String,
}

impl TransactionLeg {
    /// Debit leg taking `amount` out of an account whose balance was `before`
    pub fn debit(
        txn_id: TxnId,
        account_id: AccountId,
        amount: Balance,
        before: Balance,
        remark: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            account_id,
            amount: -amount,
            running_balance: before - amount,
            txn_id,
            remark: remark.into(),
        }
    }

    /// Credit leg adding `amount` to an account whose balance was `before`
    pub fn credit(
        txn_id: TxnId,
        account_id: AccountId,
        amount: Balance,
        before: Balance,
        remark: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            account_id,
            amount,
            running_balance: before + amount,
            txn_id,
            remark: remark.into(),
        }
    }
}

/// Transaction mode of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxnMode {
    /// Locks taken at statement time
    Pessimistic,
    /// Conflicts detected at commit time
    Optimistic,
}

impl TxnMode {
    /// Value accepted by `tidb_txn_mode`
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnMode::Pessimistic => "pessimistic",
            TxnMode::Optimistic => "optimistic",
        }
    }
}

/// Replica read mode of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplicaRead {
    /// Read from the leader only
    #[default]
    Leader,
    /// Read from followers
    Follower,
    /// Read from leader and followers
    LeaderAndFollower,
}

impl ReplicaRead {
    /// Value accepted by `tidb_replica_read`
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicaRead::Leader => "leader",
            ReplicaRead::Follower => "follower",
            ReplicaRead::LeaderAndFollower => "leader-and-follower",
        }
    }
}

impl fmt::Display for ReplicaRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplicaRead {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "leader" => Ok(ReplicaRead::Leader),
            "follower" => Ok(ReplicaRead::Follower),
            "leader-and-follower" => Ok(ReplicaRead::LeaderAndFollower),
            other => Err(crate::Error::Other(format!(
                "unknown replica read mode '{}'",
                other
            ))),
        }
    }
}

/// Store feature switches applied once before seeding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreFeatures {
    /// Use pessimistic transactions
    pub pessimistic: bool,
    /// Replica read mode
    pub replica_read: ReplicaRead,
    /// Enable async commit
    pub async_commit: bool,
    /// Enable one-phase commit
    pub one_pc: bool,
}

impl Default for StoreFeatures {
    fn default() -> Self {
        Self {
            pessimistic: true,
            replica_read: ReplicaRead::Leader,
            async_commit: true,
            one_pc: true,
        }
    }
}

impl StoreFeatures {
    /// Transaction mode implied by `pessimistic`
    pub fn txn_mode(&self) -> TxnMode {
        if self.pessimistic {
            TxnMode::Pessimistic
        } else {
            TxnMode::Optimistic
        }
    }
}
