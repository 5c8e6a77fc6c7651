//! Workload counters
//!
//! Kept in a private registry; nothing is exported over the network. The
//! restore coordinator logs [`WorkloadMetrics::summary`] after every
//! verified cycle.

use prometheus::{IntCounter, Registry};
use std::sync::Arc;

/// Counters for one workload run
#[derive(Clone, Debug)]
pub struct WorkloadMetrics {
    /// Committed transfers
    pub transfers_committed: IntCounter,

    /// Transfers skipped (self transfer or insufficient funds)
    pub transfers_skipped: IntCounter,

    /// Transfers rolled back on error
    pub transfers_failed: IntCounter,

    /// Successful backups
    pub backups_total: IntCounter,

    /// Verified restore cycles
    pub restores_verified: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl WorkloadMetrics {
    /// Create counters in a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transfers_committed = IntCounter::new(
            "backup_workload_transfers_committed_total",
            "Committed transfers",
        )?;
        registry.register(Box::new(transfers_committed.clone()))?;

        let transfers_skipped = IntCounter::new(
            "backup_workload_transfers_skipped_total",
            "Transfers skipped for self transfer or insufficient funds",
        )?;
        registry.register(Box::new(transfers_skipped.clone()))?;

        let transfers_failed = IntCounter::new(
            "backup_workload_transfers_failed_total",
            "Transfers rolled back on error",
        )?;
        registry.register(Box::new(transfers_failed.clone()))?;

        let backups_total =
            IntCounter::new("backup_workload_backups_total", "Successful incremental backups")?;
        registry.register(Box::new(backups_total.clone()))?;

        let restores_verified = IntCounter::new(
            "backup_workload_restores_verified_total",
            "Restore cycles that passed verification",
        )?;
        registry.register(Box::new(restores_verified.clone()))?;

        Ok(Self {
            transfers_committed,
            transfers_skipped,
            transfers_failed,
            backups_total,
            restores_verified,
            registry,
        })
    }

    /// One-line counter summary for logs
    pub fn summary(&self) -> String {
        format!(
            "committed={} skipped={} failed={} backups={} restores={}",
            self.transfers_committed.get(),
            self.transfers_skipped.get(),
            self.transfers_failed.get(),
            self.backups_total.get(),
            self.restores_verified.get()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = WorkloadMetrics::new().unwrap();
        metrics.transfers_committed.inc();
        metrics.backups_total.inc_by(2);

        assert_eq!(metrics.registry.gather().len(), 5);
        assert_eq!(
            metrics.summary(),
            "committed=1 skipped=0 failed=0 backups=2 restores=0"
        );
    }

    #[test]
    fn test_registries_are_independent() {
        let a = WorkloadMetrics::new().unwrap();
        let b = WorkloadMetrics::new().unwrap();
        a.restores_verified.inc();
        assert_eq!(b.restores_verified.get(), 0);
    }
}
