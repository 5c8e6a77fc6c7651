//! Restore cycle
//!
//! ```text
//! Idle -> AcquireExclusive -> FinalBackup -> SnapshotState -> Wipe
//!      -> Replay -> Verify -> ReleaseExclusive -> Idle
//! ```
//!
//! Everything between acquiring and releasing the gate runs strictly in
//! order, and once the gate is held the cycle is not cancelled.

use crate::{
    backup::BackupIssuer,
    gate::{ExclusivePermit, RestoreGate},
    metrics::WorkloadMetrics,
    oracle::ConsistencyOracle,
    Result,
};
use ledger_core::LedgerStore;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Step of the restore cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestorePhase {
    /// Waiting for the next interval
    #[default]
    Idle,
    /// Waiting for in-flight transfers and backups to drain
    AcquireExclusive,
    /// Backing up the last changes
    FinalBackup,
    /// Reading every balance
    SnapshotState,
    /// Dropping the ledger tables
    Wipe,
    /// Restoring the chain in order
    Replay,
    /// Comparing the restored state
    Verify,
    /// Letting the workload back in
    ReleaseExclusive,
}

impl fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestorePhase::Idle => "idle",
            RestorePhase::AcquireExclusive => "acquire-exclusive",
            RestorePhase::FinalBackup => "final-backup",
            RestorePhase::SnapshotState => "snapshot-state",
            RestorePhase::Wipe => "wipe",
            RestorePhase::Replay => "replay",
            RestorePhase::Verify => "verify",
            RestorePhase::ReleaseExclusive => "release-exclusive",
        };
        f.write_str(name)
    }
}

/// Periodically wipes the dataset and proves the backup chain rebuilds it
#[derive(Debug)]
pub struct RestoreCoordinator {
    store: Arc<dyn LedgerStore>,
    issuer: Arc<BackupIssuer>,
    oracle: ConsistencyOracle,
    interval: Duration,
    phase: Mutex<RestorePhase>,
    metrics: Arc<WorkloadMetrics>,
}

impl RestoreCoordinator {
    /// Create new coordinator
    pub fn new(
        store: Arc<dyn LedgerStore>,
        issuer: Arc<BackupIssuer>,
        oracle: ConsistencyOracle,
        interval: Duration,
        metrics: Arc<WorkloadMetrics>,
    ) -> Self {
        Self {
            store,
            issuer,
            oracle,
            interval,
            phase: Mutex::new(RestorePhase::Idle),
            metrics,
        }
    }

    /// Current phase
    pub fn phase(&self) -> RestorePhase {
        *self.phase.lock()
    }

    fn enter(&self, phase: RestorePhase) {
        let mut current = self.phase.lock();
        debug!("Restore phase {} -> {}", *current, phase);
        *current = phase;
    }

    /// Run one full cycle, waiting for the exclusive gate first
    ///
    /// A failed cycle cancels `halt` before the gate is released, so shared
    /// holders queued behind it see the stop before touching the dataset.
    pub async fn run_cycle(&self, gate: &RestoreGate, halt: &CancellationToken) -> Result<()> {
        self.enter(RestorePhase::AcquireExclusive);
        let permit = gate.exclusive().await;
        self.cycle(permit, halt).await
    }

    async fn cycle(&self, permit: ExclusivePermit, halt: &CancellationToken) -> Result<()> {
        let result = self.wipe_and_verify().await;
        if let Err(e) = &result {
            error!("Restore cycle failed in phase {}: {}", self.phase(), e);
            halt.cancel();
        }

        self.enter(RestorePhase::ReleaseExclusive);
        drop(permit);
        self.enter(RestorePhase::Idle);

        result?;
        self.metrics.restores_verified.inc();
        info!("Workload counters: {}", self.metrics.summary());
        Ok(())
    }

    async fn wipe_and_verify(&self) -> Result<()> {
        self.enter(RestorePhase::FinalBackup);
        self.issuer.backup().await?;

        self.enter(RestorePhase::SnapshotState);
        let expected = self.store.account_balances().await?;

        self.enter(RestorePhase::Wipe);
        self.store.drop_tables().await?;

        self.enter(RestorePhase::Replay);
        let chain = self.issuer.chain().await;
        for source in chain.sources(self.issuer.backup_uri()) {
            self.store.restore(&source).await?;
            debug!("Restored {}", source);
        }

        self.enter(RestorePhase::Verify);
        self.oracle.verify(&expected, &chain).await
    }

    /// Run a cycle every interval until cancelled; the first failure is returned
    pub async fn run(&self, gate: RestoreGate, cancel: CancellationToken) -> Result<()> {
        info!("Starting restore coordinator (interval {:?})", self.interval);

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.enter(RestorePhase::AcquireExclusive);
            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    self.enter(RestorePhase::Idle);
                    break;
                }
                permit = gate.exclusive() => permit,
            };
            self.cycle(permit, &cancel).await?;
        }

        info!("Restore coordinator stopped");
        Ok(())
    }
}
