//! Configuration for the backup workload

use ledger_core::{mysql::MySqlStoreConfig, Balance, ReplicaRead, StoreFeatures};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Backup workload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Database connection
    pub database: DatabaseConfig,

    /// Workload shape and timing
    pub workload: WorkloadConfig,

    /// Store features applied before seeding
    pub features: StoreFeatures,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "backup-verify".to_string(),
            database: DatabaseConfig::default(),
            workload: WorkloadConfig::default(),
            features: StoreFeatures::default(),
        }
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Server URL without database name
    pub url: String,

    /// Pool upper bound
    pub max_connections: u32,

    /// Pool lower bound
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "mysql://root@127.0.0.1:4000".to_string(),
            max_connections: 100,
            min_connections: 1,
        }
    }
}

/// How transfers pick their accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Contention {
    /// Both accounts uniformly random
    #[default]
    Low,
    /// One side is always the system account
    High,
}

impl fmt::Display for Contention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Contention::Low => write!(f, "low"),
            Contention::High => write!(f, "high"),
        }
    }
}

impl FromStr for Contention {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "low" => Ok(Contention::Low),
            "high" => Ok(Contention::High),
            other => Err(crate::Error::Config(format!(
                "unknown contention level '{}' (expected low or high)",
                other
            ))),
        }
    }
}

/// Workload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Number of accounts
    pub num_accounts: u32,

    /// Concurrent transfer workers
    pub concurrency: usize,

    /// Contention level
    pub contention: Contention,

    /// Starting balance of every account
    pub initial_balance: Balance,

    /// Exclusive upper bound of a transfer amount
    pub max_transfer: Balance,

    /// Seconds between scheduled backups
    pub backup_interval_secs: u64,

    /// Seconds between restore cycles
    pub restore_interval_secs: u64,

    /// Database holding the ledger
    pub db_name: String,

    /// Attempts per seeded account
    pub retry_limit: u32,

    /// Fixed delay between seed attempts (milliseconds)
    pub retry_delay_ms: u64,

    /// Backups go to `<backup_uri>/full-<index>`
    pub backup_uri: String,

    /// Pause after applying store features (milliseconds)
    pub settle_delay_ms: u64,

    /// Audit the restored ledger tables in addition to balances
    pub verify_ledger: bool,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            num_accounts: 100_000,
            concurrency: 200,
            contention: Contention::Low,
            initial_balance: 1000,
            max_transfer: 100,
            backup_interval_secs: 60,
            restore_interval_secs: 180,
            db_name: "test".to_string(),
            retry_limit: 200,
            retry_delay_ms: 5000,
            backup_uri: "local:///tmp/backup".to_string(),
            settle_delay_ms: 5000,
            verify_ledger: true,
        }
    }
}

impl WorkloadConfig {
    /// Interval between scheduled backups
    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.backup_interval_secs)
    }

    /// Interval between restore cycles
    pub fn restore_interval(&self) -> Duration {
        Duration::from_secs(self.restore_interval_secs)
    }

    /// Delay between seed attempts
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Pause after applying store features
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Sum of all balances while no transfer is in flight
    pub fn total_balance(&self) -> Balance {
        Balance::from(self.num_accounts) * self.initial_balance
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables (and `.env`, if present)
    pub fn from_env() -> crate::Result<Self> {
        dotenv::dotenv().ok();
        let mut config = Config::default();

        if let Ok(url) = std::env::var("BACKUP_DATABASE_URL") {
            config.database.url = url;
        }
        if let Some(max) = env_parse("BACKUP_MAX_CONNECTIONS")? {
            config.database.max_connections = max;
        }
        if let Some(accounts) = env_parse("BACKUP_ACCOUNTS")? {
            config.workload.num_accounts = accounts;
        }
        if let Some(concurrency) = env_parse("BACKUP_CONCURRENCY")? {
            config.workload.concurrency = concurrency;
        }
        if let Ok(contention) = std::env::var("BACKUP_CONTENTION") {
            config.workload.contention = contention.parse()?;
        }
        if let Some(secs) = env_parse("BACKUP_INTERVAL_SECS")? {
            config.workload.backup_interval_secs = secs;
        }
        if let Some(secs) = env_parse("BACKUP_RESTORE_INTERVAL_SECS")? {
            config.workload.restore_interval_secs = secs;
        }
        if let Ok(db_name) = std::env::var("BACKUP_DB_NAME") {
            config.workload.db_name = db_name;
        }
        if let Some(limit) = env_parse("BACKUP_RETRY_LIMIT")? {
            config.workload.retry_limit = limit;
        }
        if let Ok(uri) = std::env::var("BACKUP_URI") {
            config.workload.backup_uri = uri;
        }
        if let Some(pessimistic) = env_parse("BACKUP_PESSIMISTIC")? {
            config.features.pessimistic = pessimistic;
        }
        if let Ok(mode) = std::env::var("BACKUP_REPLICA_READ") {
            config.features.replica_read = mode
                .parse::<ReplicaRead>()
                .map_err(|e| crate::Error::Config(e.to_string()))?;
        }
        if let Some(async_commit) = env_parse("BACKUP_ASYNC_COMMIT")? {
            config.features.async_commit = async_commit;
        }
        if let Some(one_pc) = env_parse("BACKUP_ONE_PC")? {
            config.features.one_pc = one_pc;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the workload cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        let w = &self.workload;
        if w.num_accounts < 2 {
            return Err(crate::Error::Config(
                "num_accounts must be at least 2".to_string(),
            ));
        }
        if w.concurrency == 0 {
            return Err(crate::Error::Config("concurrency must be positive".to_string()));
        }
        if w.max_transfer < 2 {
            return Err(crate::Error::Config(
                "max_transfer must be at least 2".to_string(),
            ));
        }
        if w.initial_balance < 0 {
            return Err(crate::Error::Config(
                "initial_balance must not be negative".to_string(),
            ));
        }
        if w.retry_limit == 0 {
            return Err(crate::Error::Config("retry_limit must be positive".to_string()));
        }
        if w.backup_interval_secs == 0 || w.restore_interval_secs == 0 {
            return Err(crate::Error::Config(
                "backup and restore intervals must be positive".to_string(),
            ));
        }
        if w.backup_uri.is_empty() || w.db_name.is_empty() {
            return Err(crate::Error::Config(
                "backup_uri and db_name must be set".to_string(),
            ));
        }
        Ok(())
    }

    /// Connection settings for the MySQL backend
    pub fn store_config(&self) -> MySqlStoreConfig {
        MySqlStoreConfig {
            url: self.database.url.clone(),
            database: self.workload.db_name.clone(),
            max_connections: self.database.max_connections,
            min_connections: self.database.min_connections,
        }
    }
}

fn env_parse<T>(key: &str) -> crate::Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| crate::Error::Config(format!("{}={}: {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.workload.num_accounts, 100_000);
        assert_eq!(config.workload.concurrency, 200);
        assert_eq!(config.workload.contention, Contention::Low);
        assert_eq!(config.workload.backup_uri, "local:///tmp/backup");
        assert!(config.features.pessimistic);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_total_balance() {
        let mut config = Config::default();
        config.workload.num_accounts = 10;
        assert_eq!(config.workload.total_balance(), 10_000);
    }

    #[test]
    fn test_contention_parse() {
        assert_eq!("high".parse::<Contention>().unwrap(), Contention::High);
        assert!("medium".parse::<Contention>().is_err());
    }

    #[test]
    fn test_validate_rejects_single_account() {
        let mut config = Config::default();
        config.workload.num_accounts = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.workload.max_transfer = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[workload]
num_accounts = 10
contention = "high"
backup_uri = "s3://bucket/prefix"

[features]
pessimistic = false
replica_read = "leader-and-follower"
async_commit = false
one_pc = false
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.workload.num_accounts, 10);
        assert_eq!(config.workload.contention, Contention::High);
        assert_eq!(config.workload.concurrency, 200);
        assert_eq!(config.features.replica_read, ReplicaRead::LeaderAndFollower);
        assert!(!config.features.pessimistic);
        assert_eq!(config.store_config().database, "test");
    }
}
