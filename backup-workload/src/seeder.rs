//! Schema setup and account seeding

use crate::{Error, Result};
use backon::{ConstantBuilder, Retryable};
use ledger_core::{Account, AccountId, Balance, LedgerStore};
use rand::{distributions::Alphanumeric, Rng};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Length of the random padding stored in `remark` columns
pub const REMARK_LEN: usize = 36;

/// Fixed-delay retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    /// Create new policy
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(200, Duration::from_secs(5))
    }
}

/// Run `op` until it succeeds or the policy's attempts are used up.
///
/// Returns the last error when every attempt failed.
pub async fn retry_fixed<T, F, Fut>(policy: &RetryPolicy, op: F) -> ledger_core::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ledger_core::Result<T>>,
{
    // backon counts retries, not attempts
    let backoff = ConstantBuilder::default()
        .with_delay(policy.delay)
        .with_max_times(policy.max_attempts.saturating_sub(1) as usize);
    let failed = AtomicU32::new(0);

    op.retry(backoff)
        .sleep(tokio::time::sleep)
        .notify(|e: &ledger_core::Error, delay: Duration| {
            let attempt = failed.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(
                "Attempt {}/{} failed, retrying in {:?}: {}",
                attempt, policy.max_attempts, delay, e
            );
        })
        .await
}

/// Random alphanumeric padding
pub fn random_remark() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REMARK_LEN)
        .map(char::from)
        .collect()
}

/// Create the ledger tables if absent and empty them
pub async fn create_schema(store: &dyn LedgerStore) -> Result<()> {
    info!("Creating ledger schema");
    store.create_schema().await?;
    Ok(())
}

/// Insert accounts `0..num_accounts`, one task per account.
///
/// An account that already exists counts as seeded.
pub async fn seed_accounts(
    store: Arc<dyn LedgerStore>,
    num_accounts: u32,
    initial_balance: Balance,
    policy: RetryPolicy,
) -> Result<()> {
    info!("Seeding {} accounts with balance {}", num_accounts, initial_balance);

    let mut tasks = JoinSet::new();
    for id in 0..AccountId::from(num_accounts) {
        let store = store.clone();
        tasks.spawn(async move {
            seed_account(store.as_ref(), id, initial_balance, &policy).await
        });
    }

    while let Some(joined) = tasks.join_next().await {
        // dropping the set aborts the remaining inserts
        joined.map_err(|e| Error::TaskFailed(e.to_string()))??;
    }

    info!("Seeded {} accounts", num_accounts);
    Ok(())
}

async fn seed_account(
    store: &dyn LedgerStore,
    id: AccountId,
    initial_balance: Balance,
    policy: &RetryPolicy,
) -> Result<()> {
    let account = &Account::seeded(id, initial_balance, random_remark());

    retry_fixed(policy, || async move {
        match store.insert_account(account).await {
            Err(e) if e.is_duplicate_key() => Ok(()),
            Err(e) => {
                warn!("Insert account {} failed: {}", id, e);
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    })
    .await
    .map_err(|source| Error::SeedExhausted {
        account_id: id,
        attempts: policy.max_attempts,
        source,
    })
}
