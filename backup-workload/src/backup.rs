//! Incremental backup chain
//!
//! Backup `i` goes to `<uri>/full-<i>` and covers changes since the
//! watermark returned by backup `i - 1` (backup 0 covers everything).
//! Restoring `0..next_backup_index` in order rebuilds the dataset as of the
//! last watermark.

use crate::{gate::RestoreGate, metrics::WorkloadMetrics, Error, Result};
use ledger_core::{schema, LedgerStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Position in the backup chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupChain {
    /// Watermark returned by the latest backup (0 before the first)
    pub last_backup_ts: u64,
    /// Index the next backup will be written to
    pub next_backup_index: u64,
}

impl BackupChain {
    /// Sources to restore, in replay order
    pub fn sources(&self, backup_uri: &str) -> Vec<String> {
        (0..self.next_backup_index)
            .map(|index| schema::backup_destination(backup_uri, index))
            .collect()
    }
}

/// Issues backups and owns the chain counters
#[derive(Debug)]
pub struct BackupIssuer {
    store: Arc<dyn LedgerStore>,
    backup_uri: String,
    chain: Mutex<BackupChain>,
    metrics: Arc<WorkloadMetrics>,
}

impl BackupIssuer {
    /// Create issuer for an empty chain
    pub fn new(
        store: Arc<dyn LedgerStore>,
        backup_uri: impl Into<String>,
        metrics: Arc<WorkloadMetrics>,
    ) -> Self {
        Self {
            store,
            backup_uri: backup_uri.into(),
            chain: Mutex::new(BackupChain::default()),
            metrics,
        }
    }

    /// Base URI of the chain
    pub fn backup_uri(&self) -> &str {
        &self.backup_uri
    }

    /// Current chain position
    pub async fn chain(&self) -> BackupChain {
        *self.chain.lock().await
    }

    /// Take the next incremental backup and return its index.
    ///
    /// The chain only advances when the store accepted the backup and the
    /// returned watermark did not move backwards.
    pub async fn backup(&self) -> Result<u64> {
        let mut chain = self.chain.lock().await;
        let index = chain.next_backup_index;
        let destination = schema::backup_destination(&self.backup_uri, index);

        debug!(
            "Backing up to {} since {}",
            destination, chain.last_backup_ts
        );
        let watermark = self.store.backup(&destination, chain.last_backup_ts).await?;

        if watermark < chain.last_backup_ts {
            return Err(Error::WatermarkRegressed {
                index,
                previous: chain.last_backup_ts,
                returned: watermark,
            });
        }

        chain.last_backup_ts = watermark;
        chain.next_backup_index += 1;
        self.metrics.backups_total.inc();

        info!("backup {} succeeded", index);
        Ok(index)
    }
}

/// Periodic backups under the shared gate
#[derive(Debug, Clone)]
pub struct BackupScheduler {
    issuer: Arc<BackupIssuer>,
    interval: Duration,
}

impl BackupScheduler {
    /// Create new scheduler
    pub fn new(issuer: Arc<BackupIssuer>, interval: Duration) -> Self {
        Self { issuer, interval }
    }

    /// Back up every interval until cancelled; the first failure cancels the
    /// token while the permit is still held and is returned
    pub async fn run(&self, gate: RestoreGate, cancel: CancellationToken) -> Result<()> {
        info!("Starting backup scheduler (interval {:?})", self.interval);

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let _permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = gate.shared() => permit,
            };
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.issuer.backup().await {
                error!("Backup scheduler stopped: {}", e);
                cancel.cancel();
                return Err(e);
            }
        }

        info!("Backup scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ledger_core::{
        Account, AccountBalance, LedgerTxn, MemoryStore, StoreFeatures, TransactionLeg,
    };

    fn issuer(store: Arc<dyn LedgerStore>) -> BackupIssuer {
        BackupIssuer::new(
            store,
            "local:///tmp/backup",
            Arc::new(WorkloadMetrics::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_chain_advances() {
        let store = MemoryStore::new();
        store.create_schema().await.unwrap();
        store.insert_account(&Account::seeded(0, 1000, "a")).await.unwrap();

        let issuer = issuer(Arc::new(store.clone()));
        assert_eq!(issuer.backup().await.unwrap(), 0);
        store.insert_account(&Account::seeded(1, 1000, "b")).await.unwrap();
        assert_eq!(issuer.backup().await.unwrap(), 1);

        let chain = issuer.chain().await;
        assert_eq!(chain.next_backup_index, 2);
        assert_eq!(chain.last_backup_ts, store.clock().await);
        assert_eq!(
            store.backup_destinations(),
            vec!["local:///tmp/backup/full-0", "local:///tmp/backup/full-1"]
        );
        assert_eq!(chain.sources(issuer.backup_uri()), store.backup_destinations());
    }

    #[tokio::test]
    async fn test_failed_backup_keeps_chain() {
        let store = MemoryStore::new();
        let issuer = issuer(Arc::new(store));

        // no tables yet
        assert!(issuer.backup().await.is_err());
        assert_eq!(issuer.chain().await, BackupChain::default());
    }

    /// Store whose backups report a fixed watermark
    #[derive(Debug)]
    struct StaleWatermark {
        watermark: u64,
    }

    #[async_trait]
    impl LedgerStore for StaleWatermark {
        async fn apply_features(&self, _: &StoreFeatures) -> ledger_core::Result<()> {
            Ok(())
        }
        async fn create_schema(&self) -> ledger_core::Result<()> {
            Ok(())
        }
        async fn insert_account(&self, _: &Account) -> ledger_core::Result<()> {
            Ok(())
        }
        async fn begin(&self) -> ledger_core::Result<Box<dyn LedgerTxn>> {
            Err(ledger_core::Error::Other("no transactions".into()))
        }
        async fn backup(&self, _: &str, _: u64) -> ledger_core::Result<u64> {
            Ok(self.watermark)
        }
        async fn restore(&self, _: &str) -> ledger_core::Result<()> {
            Ok(())
        }
        async fn drop_tables(&self) -> ledger_core::Result<()> {
            Ok(())
        }
        async fn account_balances(&self) -> ledger_core::Result<Vec<AccountBalance>> {
            Ok(Vec::new())
        }
        async fn accounts(&self) -> ledger_core::Result<Vec<Account>> {
            Ok(Vec::new())
        }
        async fn transaction_legs(&self) -> ledger_core::Result<Vec<TransactionLeg>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_watermark_regression_is_rejected() {
        let issuer = issuer(Arc::new(StaleWatermark { watermark: 0 }));
        {
            let mut chain = issuer.chain.lock().await;
            chain.last_backup_ts = 10;
            chain.next_backup_index = 3;
        }

        let err = issuer.backup().await.unwrap_err();
        assert!(matches!(
            err,
            Error::WatermarkRegressed { index: 3, previous: 10, returned: 0 }
        ));
        assert_eq!(issuer.chain().await.next_backup_index, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_backs_up_each_interval() {
        let store = MemoryStore::new();
        store.create_schema().await.unwrap();
        let issuer = Arc::new(issuer(Arc::new(store.clone())));
        let scheduler = BackupScheduler::new(issuer.clone(), Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(RestoreGate::new(), cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(150)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(issuer.chain().await.next_backup_index, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_failure_cancels_the_run() {
        // no tables, so the first backup fails
        let issuer = Arc::new(issuer(Arc::new(MemoryStore::new())));
        let scheduler = BackupScheduler::new(issuer, Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let result = scheduler.run(RestoreGate::new(), cancel.clone()).await;

        assert!(matches!(result, Err(Error::Ledger(_))));
        assert!(cancel.is_cancelled());
    }
}
