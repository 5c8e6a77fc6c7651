//! MySQL-protocol backend (sqlx)
//!
//! Store-specific statements (DDL, `SET`, `BACKUP`, `RESTORE`) are sent over
//! the text protocol; DML binds its parameters.

use crate::{
    schema::{self, TABLES},
    store::{LedgerStore, LedgerTxn},
    types::{
        Account, AccountBalance, AccountId, Balance, LedgerTransaction, StoreFeatures,
        TransactionLeg,
    },
    Error, Result,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::mysql::{MySql, MySqlConnectOptions, MySqlConnection, MySqlPoolOptions};
use sqlx::{ConnectOptions, Connection, Executor, Pool, Row, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Connection pool type
pub type DbPool = Pool<MySql>;

/// Connection settings for [`MySqlStore`]
#[derive(Debug, Clone)]
pub struct MySqlStoreConfig {
    /// Server URL without database, e.g. `mysql://root@127.0.0.1:4000`
    pub url: String,
    /// Database holding the ledger tables
    pub database: String,
    /// Pool upper bound
    pub max_connections: u32,
    /// Pool lower bound
    pub min_connections: u32,
}

/// Ledger store backed by a MySQL-compatible server
#[derive(Debug, Clone)]
pub struct MySqlStore {
    pool: DbPool,
    options: MySqlConnectOptions,
    /// Session statement run on every new pooled connection
    session_init: Arc<RwLock<Option<String>>>,
}

impl MySqlStore {
    /// Create the store and verify the server is reachable.
    ///
    /// Pooled connections are opened lazily so that sessions created after
    /// [`LedgerStore::apply_features`] observe the new global settings.
    pub async fn connect(config: &MySqlStoreConfig) -> Result<Self> {
        info!("Connecting to database {}...", config.database);

        let options = MySqlConnectOptions::from_str(&config.url)?.database(&config.database);

        let mut conn = options.connect().await?;
        conn.execute("SELECT 1").await?;
        conn.close().await?;
        info!("Database connection verified");

        let session_init: Arc<RwLock<Option<String>>> = Arc::new(RwLock::new(None));
        let init = session_init.clone();

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .after_connect(move |conn, _meta| {
                let stmt = init.read().clone();
                Box::pin(async move {
                    if let Some(stmt) = stmt {
                        if let Err(e) = conn.execute(stmt.as_str()).await {
                            error!("Session setup '{}' failed: {}", stmt, e);
                        }
                    }
                    Ok(())
                })
            })
            .connect_lazy_with(options.clone());

        Ok(Self {
            pool,
            options,
            session_init,
        })
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn admin_connection(&self) -> Result<MySqlConnection> {
        Ok(self.options.connect().await?)
    }
}

#[async_trait]
impl LedgerStore for MySqlStore {
    async fn apply_features(&self, features: &StoreFeatures) -> Result<()> {
        let replica_read = schema::replica_read_statement(features);
        let mut conn = self.admin_connection().await?;

        if let Err(e) = conn.execute(replica_read.as_str()).await {
            error!("tidb_replica_read set failed: {}", e);
        }
        *self.session_init.write() = Some(replica_read);

        for stmt in schema::global_feature_statements(features) {
            debug!("Applying {}", stmt);
            conn.execute(stmt.as_str()).await?;
        }
        conn.close().await?;

        info!(
            "Store features applied: mode={}, replica_read={}, async_commit={}, 1pc={}",
            features.txn_mode().as_str(),
            features.replica_read,
            features.async_commit,
            features.one_pc
        );
        Ok(())
    }

    async fn create_schema(&self) -> Result<()> {
        for ddl in schema::CREATE_TABLES {
            self.pool.execute(ddl).await?;
        }
        for table in TABLES {
            self.pool.execute(schema::truncate_table(table).as_str()).await?;
        }
        Ok(())
    }

    async fn insert_account(&self, account: &Account) -> Result<()> {
        sqlx::query("INSERT INTO accounts (id, balance, name, remark) VALUES (?, ?, ?, ?)")
            .bind(account.id)
            .bind(account.balance)
            .bind(&account.name)
            .bind(&account.remark)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTxn>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(MySqlTxn { tx }))
    }

    async fn backup(&self, destination: &str, last_backup_ts: u64) -> Result<u64> {
        let stmt = schema::backup_statement(destination, last_backup_ts);
        let row = self.pool.fetch_one(stmt.as_str()).await?;

        // Destination, Size, BackupTS, Queue Time, Execution Time
        row.try_get::<u64, _>(2)
            .map_err(|e| Error::Backup(format!("unreadable BackupTS for {}: {}", destination, e)))
    }

    async fn restore(&self, source: &str) -> Result<()> {
        let stmt = schema::restore_statement(source);
        self.pool.execute(stmt.as_str()).await?;
        Ok(())
    }

    async fn drop_tables(&self) -> Result<()> {
        for table in TABLES {
            self.pool.execute(schema::drop_table(table).as_str()).await?;
        }
        Ok(())
    }

    async fn account_balances(&self) -> Result<Vec<AccountBalance>> {
        let rows = sqlx::query("SELECT id, balance FROM accounts ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| Ok(AccountBalance::new(row.try_get("id")?, row.try_get("balance")?)))
            .collect()
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query("SELECT id, balance, name, remark FROM accounts ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Account {
                    id: row.try_get("id")?,
                    balance: row.try_get("balance")?,
                    name: row.try_get::<Option<String>, _>("name")?.unwrap_or_default(),
                    remark: row.try_get::<Option<String>, _>("remark")?.unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn transaction_legs(&self) -> Result<Vec<TransactionLeg>> {
        let rows = sqlx::query(
            "SELECT id, account_id, amount, running_balance, txn_id, remark \
             FROM transaction_leg ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(TransactionLeg {
                    id: Some(row.try_get("id")?),
                    account_id: row.try_get("account_id")?,
                    amount: row.try_get("amount")?,
                    running_balance: row.try_get("running_balance")?,
                    txn_id: row.try_get("txn_id")?,
                    remark: row.try_get::<Option<String>, _>("remark")?.unwrap_or_default(),
                })
            })
            .collect()
    }
}

/// Open transaction on a pooled connection
struct MySqlTxn {
    tx: Transaction<'static, MySql>,
}

impl std::fmt::Debug for MySqlTxn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlTxn").finish_non_exhaustive()
    }
}

#[async_trait]
impl LedgerTxn for MySqlTxn {
    async fn lock_accounts(&mut self, ids: &[AccountId]) -> Result<Vec<AccountBalance>> {
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, balance FROM accounts WHERE id IN ({}) FOR UPDATE",
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(*id);
        }
        let rows = query.fetch_all(&mut *self.tx).await?;

        rows.iter()
            .map(|row| Ok(AccountBalance::new(row.try_get("id")?, row.try_get("balance")?)))
            .collect()
    }

    async fn insert_transaction(&mut self, txn: &LedgerTransaction) -> Result<()> {
        sqlx::query(
            "INSERT INTO transaction (id, booking_date, txn_date, txn_ref, remark) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(txn.id)
        .bind(txn.booking_date)
        .bind(txn.txn_date)
        .bind(&txn.txn_ref)
        .bind(&txn.remark)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_leg(&mut self, leg: &TransactionLeg) -> Result<()> {
        sqlx::query(
            "INSERT INTO transaction_leg (account_id, amount, running_balance, txn_id, remark) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(leg.account_id)
        .bind(leg.amount)
        .bind(leg.running_balance)
        .bind(leg.txn_id)
        .bind(&leg.remark)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_balance(&mut self, id: AccountId, balance: Balance) -> Result<()> {
        sqlx::query("UPDATE accounts SET balance = ? WHERE id = ?")
            .bind(balance)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MySqlTxn { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let MySqlTxn { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}
