//! Backup/Restore Ledger Verifier
//!
//! Drives a transactional store with a concurrent double-entry transfer
//! workload while periodically taking incremental backups, and repeatedly
//! proves that wiping the data and replaying the backup chain reproduces
//! the exact pre-wipe state.
//!
//! # Architecture
//!
//! 1. **Setup**: apply store features, create the schema, seed N accounts
//! 2. **Transfers**: `concurrency` workers move money between random accounts
//! 3. **Backups**: every `backup_interval`, one incremental backup
//! 4. **Restore cycle**: every `restore_interval`, under the exclusive gate:
//!    final backup, snapshot, wipe, replay the chain, verify
//!
//! Transfers and scheduled backups hold the [`RestoreGate`] in shared mode;
//! the restore cycle holds it exclusively, so nobody observes a wiped but
//! not yet replayed dataset.
//!
//! # Example
//!
//! ```no_run
//! use backup_workload::{BackupClient, Config, SelfScheduledClient};
//! use ledger_core::MySqlStore;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> backup_workload::Result<()> {
//!     let config = Config::default();
//!     let store = MySqlStore::connect(&config.store_config()).await?;
//!     let client = BackupClient::new(Arc::new(store), config)?;
//!
//!     client.set_up().await?;
//!     client.start(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod error;
pub mod config;
pub mod gate;
pub mod seeder;
pub mod transfer;
pub mod backup;
pub mod oracle;
pub mod restore;
pub mod metrics;
pub mod client;

// Re-exports
pub use error::{Error, Result};
pub use config::{Config, Contention, DatabaseConfig, WorkloadConfig};
pub use gate::RestoreGate;
pub use seeder::{create_schema, retry_fixed, seed_accounts, RetryPolicy};
pub use transfer::{TransferOutcome, TransferPlan, TransferPlanner, TransferWorkload};
pub use backup::{BackupChain, BackupIssuer, BackupScheduler};
pub use oracle::{audit_ledger, ConsistencyOracle};
pub use restore::{RestoreCoordinator, RestorePhase};
pub use metrics::WorkloadMetrics;
pub use client::{BackupClient, SelfScheduledClient};

/// Id of the system account used by high contention transfers
pub const SYSTEM_ACCOUNT_ID: ledger_core::AccountId = 0;
