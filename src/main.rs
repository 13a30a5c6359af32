//! Simple Bank - HTTP ledger service
//!
//! ```text
//! cargo run -- --env dev            # config/dev.yaml
//! cargo run -- --env prod --port 9090
//! ```

use anyhow::Context;

use simple_bank::config::{AppConfig, StorageKind};
use simple_bank::db::Database;
use simple_bank::store::Store;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Store> {
    match config.storage {
        StorageKind::Postgres => {
            let url = config
                .postgres_url
                .as_deref()
                .context("postgres_url is required when storage is postgres")?;
            let db = Database::connect(url, &config.database)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.init_schema().await.context("Failed to create schema")?;
            Ok(Store::postgres(db.pool().clone()))
        }
        #[cfg(feature = "memory-backend")]
        StorageKind::Memory => {
            tracing::warn!("Using in-memory storage: data is lost on exit");
            Ok(Store::memory(
                simple_bank::store::MemoryStore::with_lock_timeout(config.memory.lock_timeout()),
            ))
        }
        #[cfg(not(feature = "memory-backend"))]
        StorageKind::Memory => {
            anyhow::bail!("storage: memory requires the `memory-backend` feature")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut app_config = AppConfig::load(&env)?;
    if let Some(port) = get_port_override() {
        app_config.gateway.port = port;
    }
    let _log_guard = simple_bank::logging::init_logging(&app_config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        storage = ?app_config.storage,
        "Starting Simple Bank in {} mode",
        env
    );

    let store = open_store(&app_config).await?;
    store
        .health_check()
        .await
        .context("Storage health check failed")?;

    simple_bank::gateway::run_server(&app_config.gateway, store).await
}
