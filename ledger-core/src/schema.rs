//! Ledger schema and store-specific statements
//!
//! # Tables
//!
//! - `accounts` - One row per account (key: id)
//! - `transaction` - One header row per transfer (key: id)
//! - `transaction_leg` - Two legs per transfer (key: auto-increment id)

use crate::types::StoreFeatures;

/// Accounts table
pub const TABLE_ACCOUNTS: &str = "accounts";
/// Transaction header table
pub const TABLE_TRANSACTION: &str = "transaction";
/// Transaction leg table
pub const TABLE_TRANSACTION_LEG: &str = "transaction_leg";

/// Every ledger table, in creation order
pub const TABLES: [&str; 3] = [TABLE_ACCOUNTS, TABLE_TRANSACTION, TABLE_TRANSACTION_LEG];

/// Create-if-absent DDL for every ledger table
pub const CREATE_TABLES: [&str; 3] = [
    r#"CREATE TABLE IF NOT EXISTS accounts (
        id BIGINT,
        balance BIGINT NOT NULL,
        name VARCHAR(32),
        remark VARCHAR(2048),
        PRIMARY KEY (id),
        UNIQUE INDEX byName (name)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS transaction (
        id BIGINT,
        booking_date TIMESTAMP DEFAULT NOW(),
        txn_date TIMESTAMP DEFAULT NOW(),
        txn_ref VARCHAR(32),
        remark VARCHAR(2048),
        PRIMARY KEY (id),
        UNIQUE INDEX byTxnRef (txn_ref)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS transaction_leg (
        id BIGINT AUTO_INCREMENT,
        account_id BIGINT,
        amount BIGINT NOT NULL,
        running_balance BIGINT NOT NULL,
        txn_id BIGINT,
        remark VARCHAR(2048),
        PRIMARY KEY (id)
    )"#,
];

/// `TRUNCATE TABLE` statement for a ledger table
pub fn truncate_table(table: &str) -> String {
    format!("TRUNCATE TABLE {}", table)
}

/// `DROP TABLE` statement for a ledger table
pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE {}", table)
}

/// Address of the backup with the given index under `uri`
pub fn backup_destination(uri: &str, index: u64) -> String {
    format!("{}/full-{}", uri.trim_end_matches('/'), index)
}

/// Incremental backup of everything committed after `last_backup_ts`
pub fn backup_statement(destination: &str, last_backup_ts: u64) -> String {
    format!(
        "BACKUP DATABASE * TO '{}' LAST_BACKUP = {}",
        destination, last_backup_ts
    )
}

/// Restore of a single backup
pub fn restore_statement(source: &str) -> String {
    format!("RESTORE DATABASE * FROM '{}'", source)
}

/// Session statement selecting the replica read mode
pub fn replica_read_statement(features: &StoreFeatures) -> String {
    format!("SET @@tidb_replica_read = '{}'", features.replica_read.as_str())
}

/// Global statements applying the commit protocol switches
pub fn global_feature_statements(features: &StoreFeatures) -> Vec<String> {
    vec![
        format!(
            "SET @@global.tidb_enable_async_commit = {}",
            u8::from(features.async_commit)
        ),
        format!("SET @@global.tidb_enable_1pc = {}", u8::from(features.one_pc)),
        format!(
            "SET @@global.tidb_txn_mode = '{}'",
            features.txn_mode().as_str()
        ),
    ]
}
