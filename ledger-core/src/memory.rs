//! In-process reference store
//!
//! Models the parts of the store protocol the workload depends on:
//!
//! - every commit is stamped by a logical clock (the store's timestamp oracle)
//! - `backup(dest, since)` archives rows whose commit stamp is newer than
//!   `since` and answers with the current clock as the new watermark
//! - `restore(src)` upserts an archive into the dataset, recreating dropped
//!   tables
//! - an open transaction holds the dataset lock until commit or rollback, so
//!   histories are serializable
//!
//! Archives are bincode-encoded and kept in a shared map keyed by
//! destination, standing in for external backup storage.

use crate::{
    schema::{TABLE_ACCOUNTS, TABLE_TRANSACTION},
    store::{LedgerStore, LedgerTxn},
    types::{
        Account, AccountBalance, AccountId, Balance, LedgerTransaction, StoreFeatures,
        TransactionLeg, TxnId,
    },
    Error, Result,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Row plus the clock value of the commit that last wrote it
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Versioned<T> {
    commit_ts: u64,
    row: T,
}

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Versioned<Account>>,
    transactions: BTreeMap<TxnId, Versioned<LedgerTransaction>>,
    legs: BTreeMap<i64, Versioned<TransactionLeg>>,
    next_leg_id: i64,
}

impl Tables {
    fn allocate_leg_id(&mut self) -> i64 {
        self.next_leg_id += 1;
        self.next_leg_id
    }
}

#[derive(Debug, Default)]
struct Dataset {
    /// `None` until created, and again after the tables are dropped
    tables: Option<Tables>,
    clock: u64,
}

impl Dataset {
    fn tables(&self) -> Result<&Tables> {
        self.tables.as_ref().ok_or(Error::TableMissing(TABLE_ACCOUNTS))
    }

    fn tables_mut(&mut self) -> Result<&mut Tables> {
        self.tables.as_mut().ok_or(Error::TableMissing(TABLE_ACCOUNTS))
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Contents of one incremental backup
#[derive(Debug, Serialize, Deserialize)]
struct BackupArchive {
    since: u64,
    watermark: u64,
    accounts: Vec<Versioned<Account>>,
    transactions: Vec<Versioned<LedgerTransaction>>,
    legs: Vec<(i64, Versioned<TransactionLeg>)>,
}

/// In-memory ledger store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    dataset: Arc<Mutex<Dataset>>,
    archives: Arc<parking_lot::Mutex<HashMap<String, Vec<u8>>>>,
    features: Arc<parking_lot::Mutex<Option<StoreFeatures>>>,
}

impl MemoryStore {
    /// Create an empty store (no tables)
    pub fn new() -> Self {
        Self::default()
    }

    /// Features passed to the last `apply_features` call
    pub fn applied_features(&self) -> Option<StoreFeatures> {
        self.features.lock().clone()
    }

    /// Destinations holding a backup, sorted
    pub fn backup_destinations(&self) -> Vec<String> {
        let mut destinations: Vec<String> = self.archives.lock().keys().cloned().collect();
        destinations.sort();
        destinations
    }

    /// Current value of the commit clock
    pub async fn clock(&self) -> u64 {
        self.dataset.lock().await.clock
    }

    /// Whether the ledger tables currently exist
    pub async fn has_tables(&self) -> bool {
        self.dataset.lock().await.tables.is_some()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn apply_features(&self, features: &StoreFeatures) -> Result<()> {
        *self.features.lock() = Some(features.clone());
        Ok(())
    }

    async fn create_schema(&self) -> Result<()> {
        let mut dataset = self.dataset.lock().await;
        // create-if-absent followed by truncate
        dataset.tables = Some(Tables::default());
        Ok(())
    }

    async fn insert_account(&self, account: &Account) -> Result<()> {
        let mut dataset = self.dataset.lock().await;
        let tables = dataset.tables()?;

        if tables.accounts.contains_key(&account.id) {
            return Err(Error::DuplicateKey {
                table: TABLE_ACCOUNTS,
                key: account.id.to_string(),
            });
        }
        if tables.accounts.values().any(|v| v.row.name == account.name) {
            return Err(Error::DuplicateKey {
                table: TABLE_ACCOUNTS,
                key: account.name.clone(),
            });
        }

        let commit_ts = dataset.tick();
        dataset.tables_mut()?.accounts.insert(
            account.id,
            Versioned {
                commit_ts,
                row: account.clone(),
            },
        );
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTxn>> {
        let dataset = self.dataset.clone().lock_owned().await;
        Ok(Box::new(MemoryTxn {
            dataset,
            writes: Vec::new(),
        }))
    }

    async fn backup(&self, destination: &str, last_backup_ts: u64) -> Result<u64> {
        let dataset = self.dataset.lock().await;
        let tables = dataset
            .tables
            .as_ref()
            .ok_or_else(|| Error::Backup(format!("nothing to back up to {}", destination)))?;

        let watermark = dataset.clock;
        if watermark < last_backup_ts {
            return Err(Error::Backup(format!(
                "last backup ts {} is ahead of the store clock {}",
                last_backup_ts, watermark
            )));
        }

        let archive = BackupArchive {
            since: last_backup_ts,
            watermark,
            accounts: tables
                .accounts
                .values()
                .filter(|v| v.commit_ts > last_backup_ts)
                .cloned()
                .collect(),
            transactions: tables
                .transactions
                .values()
                .filter(|v| v.commit_ts > last_backup_ts)
                .cloned()
                .collect(),
            legs: tables
                .legs
                .iter()
                .filter(|(_, v)| v.commit_ts > last_backup_ts)
                .map(|(id, v)| (*id, v.clone()))
                .collect(),
        };
        let bytes = bincode::serialize(&archive)?;

        let mut archives = self.archives.lock();
        if archives.contains_key(destination) {
            return Err(Error::Backup(format!(
                "{} already contains a backup",
                destination
            )));
        }
        archives.insert(destination.to_string(), bytes);

        debug!(
            "Archived {} accounts, {} transactions, {} legs to {} ({}..{}]",
            archive.accounts.len(),
            archive.transactions.len(),
            archive.legs.len(),
            destination,
            archive.since,
            archive.watermark
        );
        Ok(watermark)
    }

    async fn restore(&self, source: &str) -> Result<()> {
        let bytes = self
            .archives
            .lock()
            .get(source)
            .cloned()
            .ok_or_else(|| Error::Restore(format!("no backup found at {}", source)))?;
        let archive: BackupArchive = bincode::deserialize(&bytes)?;

        let mut dataset = self.dataset.lock().await;
        let tables = dataset.tables.get_or_insert_with(Tables::default);

        for account in archive.accounts {
            tables.accounts.insert(account.row.id, account);
        }
        for txn in archive.transactions {
            tables.transactions.insert(txn.row.id, txn);
        }
        for (id, leg) in archive.legs {
            tables.next_leg_id = tables.next_leg_id.max(id);
            tables.legs.insert(id, leg);
        }
        dataset.clock = dataset.clock.max(archive.watermark);
        Ok(())
    }

    async fn drop_tables(&self) -> Result<()> {
        let mut dataset = self.dataset.lock().await;
        if dataset.tables.take().is_none() {
            return Err(Error::TableMissing(TABLE_ACCOUNTS));
        }
        Ok(())
    }

    async fn account_balances(&self) -> Result<Vec<AccountBalance>> {
        let dataset = self.dataset.lock().await;
        Ok(dataset
            .tables()?
            .accounts
            .values()
            .map(|v| AccountBalance::new(v.row.id, v.row.balance))
            .collect())
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        let dataset = self.dataset.lock().await;
        Ok(dataset
            .tables()?
            .accounts
            .values()
            .map(|v| v.row.clone())
            .collect())
    }

    async fn transaction_legs(&self) -> Result<Vec<TransactionLeg>> {
        let dataset = self.dataset.lock().await;
        Ok(dataset
            .tables()?
            .legs
            .iter()
            .map(|(id, v)| TransactionLeg {
                id: Some(*id),
                ..v.row.clone()
            })
            .collect())
    }
}

/// Buffered write, applied at commit
#[derive(Debug)]
enum Write {
    Transaction(LedgerTransaction),
    Leg(TransactionLeg),
    Balance(AccountId, Balance),
}

/// Transaction holding the dataset lock
#[derive(Debug)]
struct MemoryTxn {
    dataset: OwnedMutexGuard<Dataset>,
    writes: Vec<Write>,
}

impl MemoryTxn {
    fn pending_balance(&self, id: AccountId) -> Option<Balance> {
        self.writes.iter().rev().find_map(|w| match w {
            Write::Balance(account, balance) if *account == id => Some(*balance),
            _ => None,
        })
    }
}

#[async_trait]
impl LedgerTxn for MemoryTxn {
    async fn lock_accounts(&mut self, ids: &[AccountId]) -> Result<Vec<AccountBalance>> {
        let mut wanted = ids.to_vec();
        wanted.sort_unstable();
        wanted.dedup();

        let tables = self.dataset.tables()?;
        let rows: Vec<AccountBalance> = wanted
            .into_iter()
            .filter_map(|id| tables.accounts.get(&id))
            .map(|v| AccountBalance::new(v.row.id, v.row.balance))
            .collect();

        Ok(rows
            .into_iter()
            .map(|row| AccountBalance {
                balance: self.pending_balance(row.id).unwrap_or(row.balance),
                ..row
            })
            .collect())
    }

    async fn insert_transaction(&mut self, txn: &LedgerTransaction) -> Result<()> {
        let duplicate = self
            .dataset
            .tables()?
            .transactions
            .values()
            .any(|v| v.row.id == txn.id || v.row.txn_ref == txn.txn_ref)
            || self.writes.iter().any(|w| {
                matches!(w, Write::Transaction(t) if t.id == txn.id || t.txn_ref == txn.txn_ref)
            });
        if duplicate {
            return Err(Error::DuplicateKey {
                table: TABLE_TRANSACTION,
                key: txn.id.to_string(),
            });
        }

        self.writes.push(Write::Transaction(txn.clone()));
        Ok(())
    }

    async fn insert_leg(&mut self, leg: &TransactionLeg) -> Result<()> {
        self.dataset.tables()?;
        self.writes.push(Write::Leg(leg.clone()));
        Ok(())
    }

    async fn update_balance(&mut self, id: AccountId, balance: Balance) -> Result<()> {
        self.dataset.tables()?;
        self.writes.push(Write::Balance(id, balance));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTxn {
            mut dataset,
            writes,
        } = *self;
        if writes.is_empty() {
            return Ok(());
        }

        let commit_ts = dataset.tick();
        let tables = dataset.tables_mut()?;
        for write in writes {
            match write {
                Write::Transaction(row) => {
                    tables.transactions.insert(row.id, Versioned { commit_ts, row });
                }
                Write::Leg(row) => {
                    let id = tables.allocate_leg_id();
                    tables.legs.insert(id, Versioned { commit_ts, row });
                }
                Write::Balance(id, balance) => {
                    if let Some(account) = tables.accounts.get_mut(&id) {
                        account.row.balance = balance;
                        account.commit_ts = commit_ts;
                    }
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_store(n: i64) -> MemoryStore {
        let store = MemoryStore::new();
        store.create_schema().await.unwrap();
        for id in 0..n {
            store
                .insert_account(&Account::seeded(id, 1000, "pad"))
                .await
                .unwrap();
        }
        store
    }

    async fn transfer(
        store: &MemoryStore,
        txn_id: TxnId,
        from: AccountId,
        to: AccountId,
        amount: Balance,
    ) {
        let mut tx = store.begin().await.unwrap();
        let locked = tx.lock_accounts(&[from, to]).await.unwrap();
        let before = |id| locked.iter().find(|r| r.id == id).unwrap().balance;
        let (from_before, to_before) = (before(from), before(to));

        tx.insert_transaction(&LedgerTransaction::new(txn_id, "r")).await.unwrap();
        tx.insert_leg(&TransactionLeg::debit(txn_id, from, amount, from_before, "d"))
            .await
            .unwrap();
        tx.insert_leg(&TransactionLeg::credit(txn_id, to, amount, to_before, "c"))
            .await
            .unwrap();
        tx.update_balance(from, from_before - amount).await.unwrap();
        tx.update_balance(to, to_before + amount).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_tables() {
        let store = MemoryStore::new();
        let err = store.account_balances().await.unwrap_err();
        assert!(matches!(err, Error::TableMissing(_)));
        assert!(store.insert_account(&Account::seeded(0, 1, "x")).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_account_rejected() {
        let store = seeded_store(2).await;
        let err = store
            .insert_account(&Account::seeded(1, 1000, "pad"))
            .await
            .unwrap_err();
        assert!(err.is_duplicate_key());
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = seeded_store(2).await;

        let mut tx = store.begin().await.unwrap();
        tx.lock_accounts(&[0, 1]).await.unwrap();
        tx.update_balance(0, 1).await.unwrap();
        assert_eq!(tx.lock_accounts(&[0]).await.unwrap()[0].balance, 1);
        tx.rollback().await.unwrap();

        let balances = store.account_balances().await.unwrap();
        assert_eq!(balances[0].balance, 1000);
    }

    #[tokio::test]
    async fn test_lock_returns_only_existing_rows() {
        let store = seeded_store(2).await;
        let mut tx = store.begin().await.unwrap();
        let rows = tx.lock_accounts(&[1, 7]).await.unwrap();
        assert_eq!(rows, vec![AccountBalance::new(1, 1000)]);
    }

    #[tokio::test]
    async fn test_incremental_chain_replay() {
        let store = seeded_store(3).await;

        let w0 = store.backup("mem://b/full-0", 0).await.unwrap();
        transfer(&store, 1, 0, 1, 100).await;
        transfer(&store, 2, 1, 2, 50).await;
        let w1 = store.backup("mem://b/full-1", w0).await.unwrap();
        assert!(w1 > w0);

        let expected = store.account_balances().await.unwrap();
        store.drop_tables().await.unwrap();
        assert!(!store.has_tables().await);

        store.restore("mem://b/full-0").await.unwrap();
        store.restore("mem://b/full-1").await.unwrap();

        assert_eq!(store.account_balances().await.unwrap(), expected);
        assert_eq!(store.transaction_legs().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_prefix_replay_reproduces_older_state() {
        let store = seeded_store(2).await;
        let w0 = store.backup("mem://b/full-0", 0).await.unwrap();
        let at_backup_0 = store.account_balances().await.unwrap();

        transfer(&store, 1, 0, 1, 10).await;
        store.backup("mem://b/full-1", w0).await.unwrap();

        store.drop_tables().await.unwrap();
        store.restore("mem://b/full-0").await.unwrap();
        assert_eq!(store.account_balances().await.unwrap(), at_backup_0);
    }

    #[tokio::test]
    async fn test_backup_destination_reuse_rejected() {
        let store = seeded_store(1).await;
        let w0 = store.backup("mem://b/full-0", 0).await.unwrap();
        assert!(store.backup("mem://b/full-0", w0).await.is_err());
        assert!(store.restore("mem://b/full-9").await.is_err());
        assert_eq!(store.backup_destinations(), vec!["mem://b/full-0".to_string()]);
    }

    #[tokio::test]
    async fn test_restored_leg_ids_continue() {
        let store = seeded_store(2).await;
        transfer(&store, 1, 0, 1, 10).await;
        let w0 = store.backup("mem://b/full-0", 0).await.unwrap();
        store.drop_tables().await.unwrap();
        store.restore("mem://b/full-0").await.unwrap();
        assert!(store.clock().await >= w0);

        transfer(&store, 2, 1, 0, 5).await;
        let ids: Vec<i64> = store
            .transaction_legs()
            .await
            .unwrap()
            .iter()
            .filter_map(|l| l.id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }
}
