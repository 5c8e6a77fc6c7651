//! Self-scheduled workload client

use crate::{
    backup::{BackupIssuer, BackupScheduler},
    config::Config,
    gate::RestoreGate,
    metrics::WorkloadMetrics,
    oracle::ConsistencyOracle,
    restore::RestoreCoordinator,
    seeder::{self, RetryPolicy},
    transfer::{TransferPlanner, TransferWorkload},
    Error, Result,
};
use async_trait::async_trait;
use ledger_core::LedgerStore;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Client that drives its own load once started
#[async_trait]
pub trait SelfScheduledClient: Send + Sync {
    /// Prepare the dataset
    async fn set_up(&self) -> Result<()>;

    /// Run until `cancel` fires or a fatal error occurs
    async fn start(&self, cancel: CancellationToken) -> Result<()>;

    /// Release resources
    async fn tear_down(&self) -> Result<()>;
}

/// Transfers, periodic backups and restore cycles against one store
#[derive(Debug)]
pub struct BackupClient {
    store: Arc<dyn LedgerStore>,
    config: Config,
    gate: RestoreGate,
    metrics: Arc<WorkloadMetrics>,
    workload: Arc<TransferWorkload>,
    issuer: Arc<BackupIssuer>,
    coordinator: Arc<RestoreCoordinator>,
}

impl BackupClient {
    /// Wire the workload components over `store`
    pub fn new(store: Arc<dyn LedgerStore>, config: Config) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(WorkloadMetrics::new()?);
        let workload_config = &config.workload;

        let workload = Arc::new(TransferWorkload::new(
            store.clone(),
            TransferPlanner::from_config(workload_config),
            metrics.clone(),
        ));
        let issuer = Arc::new(BackupIssuer::new(
            store.clone(),
            workload_config.backup_uri.clone(),
            metrics.clone(),
        ));
        let oracle = ConsistencyOracle::new(
            store.clone(),
            workload_config.initial_balance,
            workload_config.verify_ledger,
        );
        let coordinator = Arc::new(RestoreCoordinator::new(
            store.clone(),
            issuer.clone(),
            oracle,
            workload_config.restore_interval(),
            metrics.clone(),
        ));

        Ok(Self {
            store,
            config,
            gate: RestoreGate::new(),
            metrics,
            workload,
            issuer,
            coordinator,
        })
    }

    /// Gate shared by every task of this client
    pub fn gate(&self) -> &RestoreGate {
        &self.gate
    }

    /// Workload counters
    pub fn metrics(&self) -> &WorkloadMetrics {
        &self.metrics
    }

    /// Transfer workload
    pub fn workload(&self) -> &Arc<TransferWorkload> {
        &self.workload
    }

    /// Backup issuer
    pub fn issuer(&self) -> &Arc<BackupIssuer> {
        &self.issuer
    }

    /// Restore coordinator
    pub fn coordinator(&self) -> &Arc<RestoreCoordinator> {
        &self.coordinator
    }
}

#[async_trait]
impl SelfScheduledClient for BackupClient {
    async fn set_up(&self) -> Result<()> {
        let workload = &self.config.workload;
        info!("Setting up {} accounts", workload.num_accounts);

        self.store.apply_features(&self.config.features).await?;
        tokio::time::sleep(workload.settle_delay()).await;

        seeder::create_schema(self.store.as_ref()).await?;
        seeder::seed_accounts(
            self.store.clone(),
            workload.num_accounts,
            workload.initial_balance,
            RetryPolicy::new(workload.retry_limit, workload.retry_delay()),
        )
        .await?;

        info!(
            "Set up done: {} accounts, total balance {}",
            workload.num_accounts,
            workload.total_balance()
        );
        Ok(())
    }

    async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let concurrency = self.config.workload.concurrency;
        info!(
            "Starting {} workers ({} contention)",
            concurrency, self.config.workload.contention
        );

        // Cancelled by the caller or by the first task to hit a fatal error
        let run = cancel.child_token();
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        for id in 0..concurrency {
            let workload = self.workload.clone();
            let gate = self.gate.clone();
            let token = run.clone();
            tasks.spawn(async move { workload.run_worker(id, gate, token).await });
        }

        let scheduler =
            BackupScheduler::new(self.issuer.clone(), self.config.workload.backup_interval());
        let gate = self.gate.clone();
        let token = run.clone();
        tasks.spawn(async move { scheduler.run(gate, token).await });

        let coordinator = self.coordinator.clone();
        let gate = self.gate.clone();
        let token = run.clone();
        tasks.spawn(async move { coordinator.run(gate, token).await });

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => Error::TaskFailed(e.to_string()),
            };

            if first_error.is_none() {
                error!("Fatal error, stopping workload: {}", failure);
                run.cancel();
                tasks.abort_all();
                first_error = Some(failure);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Workload stopped: {}", self.metrics.summary());
                Ok(())
            }
        }
    }

    async fn tear_down(&self) -> Result<()> {
        Ok(())
    }
}
