//! Error types for the backup workload

use ledger_core::{AccountId, Balance};
use thiserror::Error;

/// Result type for workload operations
pub type Result<T> = std::result::Result<T, Error>;

/// Workload errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger store error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Seeding an account kept failing
    #[error("Seeding account {account_id} failed after {attempts} attempts: {source}")]
    SeedExhausted {
        /// Account that could not be inserted
        account_id: AccountId,
        /// Attempts made
        attempts: u32,
        /// Last error
        #[source]
        source: ledger_core::Error,
    },

    /// Internal invariant violated during a transfer (corrupted state)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Rolling back a failed transfer failed
    #[error("Rollback failed: {0}")]
    RollbackFailed(#[source] ledger_core::Error),

    /// Backup watermark moved backwards
    #[error("Backup {index} returned watermark {returned}, behind previous watermark {previous}")]
    WatermarkRegressed {
        /// Index of the offending backup
        index: u64,
        /// Previous watermark
        previous: u64,
        /// Returned watermark
        returned: u64,
    },

    /// Restored balance differs from the captured one
    #[error(
        "Balance mismatch after restore for account {account_id}: \
         expected {expected}, observed {observed}"
    )]
    BalanceMismatch {
        /// Account id
        account_id: AccountId,
        /// Balance captured before the wipe
        expected: Balance,
        /// Balance read after the restore
        observed: Balance,
    },

    /// Restored dataset has a different number of accounts
    #[error("Account count mismatch after restore: expected {expected}, observed {observed}")]
    AccountCountMismatch {
        /// Accounts captured before the wipe
        expected: usize,
        /// Accounts read after the restore
        observed: usize,
    },

    /// Restored ledger failed conservation or double-entry checks
    #[error("Ledger audit failed: {0}")]
    AuditFailed(String),

    /// A background task panicked or was aborted
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a transfer error must stop the run.
    ///
    /// Ordinary contention and connection errors are logged and the worker
    /// keeps going; corrupted state is not recoverable.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::InvariantViolation(_) | Error::RollbackFailed(_) => true,
            Error::Ledger(ledger_core::Error::InvariantViolation(_)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::InvariantViolation("count 3".into()).is_fatal());
        assert!(Error::RollbackFailed(ledger_core::Error::Other("gone".into())).is_fatal());
        assert!(!Error::Ledger(ledger_core::Error::Other("lock wait timeout".into())).is_fatal());
        assert!(!Error::Ledger(ledger_core::Error::TableMissing("accounts")).is_fatal());
    }

    #[test]
    fn test_mismatch_message_names_values() {
        let err = Error::BalanceMismatch {
            account_id: 4,
            expected: 1000,
            observed: 990,
        };
        let msg = err.to_string();
        assert!(msg.contains("account 4"));
        assert!(msg.contains("expected 1000"));
        assert!(msg.contains("observed 990"));
    }
}
