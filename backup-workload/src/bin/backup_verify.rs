//! Backup/restore verifier binary

use backup_workload::{BackupClient, Config, SelfScheduledClient};
use ledger_core::MySqlStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("backup-verify failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> backup_workload::Result<()> {
    let config = match std::env::var("BACKUP_CONFIG") {
        Ok(path) => Config::from_file(path)?,
        Err(_) => Config::from_env()?,
    };
    tracing::info!(
        "Starting {} against {}/{}",
        config.service_name,
        config.database.url,
        config.workload.db_name
    );

    let store = Arc::new(MySqlStore::connect(&config.store_config()).await?);
    let client = BackupClient::new(store.clone(), config)?;

    client.set_up().await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            on_signal.cancel();
        }
    });

    let result = client.start(cancel).await;
    client.tear_down().await?;
    store.close().await;
    result
}
