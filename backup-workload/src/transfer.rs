//! Transfer workload
//!
//! Each transfer moves a random amount between two accounts in a single
//! store transaction:
//!
//! 1. Lock both account rows (ascending id order)
//! 2. Skip if the source cannot cover the amount
//! 3. Insert the ledger header and the debit/credit legs
//! 4. Update both balances and commit

use crate::{
    config::{Contention, WorkloadConfig},
    gate::RestoreGate,
    metrics::WorkloadMetrics,
    seeder::random_remark,
    Error, Result, SYSTEM_ACCOUNT_ID,
};
use ledger_core::{
    AccountBalance, AccountId, Balance, LedgerStore, LedgerTransaction, LedgerTxn,
    TransactionLeg, TxnId,
};
use rand::Rng;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Planned transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    /// Source account
    pub from: AccountId,
    /// Destination account
    pub to: AccountId,
    /// Amount to move
    pub amount: Balance,
}

impl TransferPlan {
    /// Whether source and destination coincide
    pub fn is_self_transfer(&self) -> bool {
        self.from == self.to
    }
}

/// Result of one transfer attempt that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Transaction committed
    Committed {
        /// Allocated ledger transaction id
        txn_id: TxnId,
        /// Source account
        from: AccountId,
        /// Destination account
        to: AccountId,
        /// Amount moved
        amount: Balance,
        /// Source balance after the transfer
        from_balance: Balance,
        /// Destination balance after the transfer
        to_balance: Balance,
    },
    /// Source equals destination; nothing was done
    SelfTransfer,
    /// Source balance below the amount; rolled back
    InsufficientFunds,
}

/// Picks accounts and amounts
#[derive(Debug, Clone, Copy)]
pub struct TransferPlanner {
    num_accounts: AccountId,
    contention: Contention,
    max_transfer: Balance,
}

impl TransferPlanner {
    /// Create planner over accounts `0..num_accounts`
    pub fn new(num_accounts: u32, contention: Contention, max_transfer: Balance) -> Self {
        Self {
            num_accounts: AccountId::from(num_accounts),
            contention,
            max_transfer,
        }
    }

    /// Planner for a workload configuration
    pub fn from_config(config: &WorkloadConfig) -> Self {
        Self::new(config.num_accounts, config.contention, config.max_transfer)
    }

    /// Draw the next transfer.
    ///
    /// Under high contention one side is always the system account: the
    /// source when the first draw lands in the upper half, otherwise the
    /// destination. The amount is drawn from `[1, max_transfer)`.
    pub fn plan<R: Rng + ?Sized>(&self, rng: &mut R) -> TransferPlan {
        let mut from = rng.gen_range(0..self.num_accounts);
        let mut to = rng.gen_range(0..self.num_accounts);

        if self.contention == Contention::High {
            if from > self.num_accounts / 2 {
                from = SYSTEM_ACCOUNT_ID;
            } else {
                to = SYSTEM_ACCOUNT_ID;
            }
        }

        let amount = rng.gen_range(1..self.max_transfer.max(2));
        TransferPlan { from, to, amount }
    }
}

/// Executes transfers against a store
#[derive(Debug)]
pub struct TransferWorkload {
    store: Arc<dyn LedgerStore>,
    planner: TransferPlanner,
    next_txn_id: AtomicI64,
    metrics: Arc<WorkloadMetrics>,
}

impl TransferWorkload {
    /// Create new workload; the first committed transfer gets id 1
    pub fn new(
        store: Arc<dyn LedgerStore>,
        planner: TransferPlanner,
        metrics: Arc<WorkloadMetrics>,
    ) -> Self {
        Self {
            store,
            planner,
            next_txn_id: AtomicI64::new(0),
            metrics,
        }
    }

    /// Plan and execute one transfer
    pub async fn transfer_once(&self) -> Result<TransferOutcome> {
        let plan = self.planner.plan(&mut rand::thread_rng());
        self.execute(plan).await
    }

    /// Execute a planned transfer in one store transaction
    pub async fn execute(&self, plan: TransferPlan) -> Result<TransferOutcome> {
        if plan.is_self_transfer() {
            return Ok(TransferOutcome::SelfTransfer);
        }

        let mut tx = self.store.begin().await?;
        match self.apply(tx.as_mut(), plan).await {
            Ok(TransferOutcome::InsufficientFunds) => {
                tx.rollback().await.map_err(Error::RollbackFailed)?;
                Ok(TransferOutcome::InsufficientFunds)
            }
            Ok(outcome) => {
                // a failed commit leaves nothing behind; the caller logs it
                tx.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                tx.rollback().await.map_err(Error::RollbackFailed)?;
                Err(e)
            }
        }
    }

    async fn apply(&self, tx: &mut dyn LedgerTxn, plan: TransferPlan) -> Result<TransferOutcome> {
        let (from, to) = lock_pair(tx, plan.from, plan.to).await?;

        if from.balance < plan.amount {
            debug!(
                "Account {} balance {} below amount {}",
                from.id, from.balance, plan.amount
            );
            return Ok(TransferOutcome::InsufficientFunds);
        }

        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst) + 1;
        tx.insert_transaction(&LedgerTransaction::new(txn_id, random_remark()))
            .await?;

        let debit =
            TransactionLeg::debit(txn_id, from.id, plan.amount, from.balance, random_remark());
        let credit =
            TransactionLeg::credit(txn_id, to.id, plan.amount, to.balance, random_remark());
        tx.insert_leg(&debit).await?;
        tx.insert_leg(&credit).await?;

        tx.update_balance(from.id, debit.running_balance).await?;
        tx.update_balance(to.id, credit.running_balance).await?;

        Ok(TransferOutcome::Committed {
            txn_id,
            from: from.id,
            to: to.id,
            amount: plan.amount,
            from_balance: debit.running_balance,
            to_balance: credit.running_balance,
        })
    }

    /// Transfer in a loop until cancelled or a fatal error occurs.
    ///
    /// Every transfer holds the gate in shared mode. The cancellation token
    /// is checked while waiting for the gate, again once the permit is held,
    /// and between transfers, never inside an open transaction. A fatal
    /// error cancels the token before the permit is released.
    pub async fn run_worker(
        &self,
        id: usize,
        gate: RestoreGate,
        cancel: CancellationToken,
    ) -> Result<()> {
        debug!("Worker {} started", id);

        while !cancel.is_cancelled() {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = gate.shared() => permit,
            };
            if cancel.is_cancelled() {
                break;
            }
            let result = self.transfer_once().await;
            if matches!(&result, Err(e) if e.is_fatal()) {
                cancel.cancel();
            }
            drop(permit);

            match result {
                Ok(TransferOutcome::Committed { .. }) => self.metrics.transfers_committed.inc(),
                Ok(_) => self.metrics.transfers_skipped.inc(),
                Err(e) if e.is_fatal() => {
                    error!("Worker {} stopped: {}", id, e);
                    return Err(e);
                }
                Err(e) => {
                    self.metrics.transfers_failed.inc();
                    warn!("Worker {} transfer failed: {}", id, e);
                }
            }
        }

        info!("Worker {} stopped", id);
        Ok(())
    }
}

/// Lock both accounts in ascending id order and return `(from, to)`
async fn lock_pair(
    tx: &mut dyn LedgerTxn,
    from: AccountId,
    to: AccountId,
) -> Result<(AccountBalance, AccountBalance)> {
    let ids = [from.min(to), from.max(to)];
    let rows = tx.lock_accounts(&ids).await?;

    if rows.len() != 2 {
        return Err(Error::InvariantViolation(format!(
            "locking accounts {} and {} returned {} rows",
            from,
            to,
            rows.len()
        )));
    }

    let find = |id: AccountId| rows.iter().find(|row| row.id == id).copied();
    match (find(from), find(to)) {
        (Some(f), Some(t)) => Ok((f, t)),
        _ => Err(Error::InvariantViolation(format!(
            "locking accounts {} and {} returned ids {:?}",
            from,
            to,
            rows.iter().map(|row| row.id).collect::<Vec<_>>()
        ))),
    }
}
