//! Device Query API Server
//!
//! Run with: cargo run --bin device-query-api
//!
//! # Configuration
//!
//! Read from `DEVICE_QUERY_CONFIG` when set, otherwise from the default
//! locations (see `Config::load_default`). `DEVICE_QUERY_*` variables
//! override file settings and `RUST_LOG` overrides `logging.level`.

use anyhow::Context;
use device_query::api::{serve, AppState};
use device_query::clients::{identity_from_config, permissions_from_config};
use device_query::config::{Config, LoggingConfig};
use device_query::storage::{DeviceDataStore, SqliteStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::var("DEVICE_QUERY_CONFIG") {
        Ok(path) => Config::load_with_env(&PathBuf::from(path))?,
        Err(_) => Config::load_default(),
    };
    config.validate()?;

    init_tracing(&config.logging);

    tracing::info!("Starting device query API v{}", env!("CARGO_PKG_VERSION"));

    let store = SqliteStore::open(&config.store.connection_string)
        .with_context(|| format!("opening store {}", config.store.connection_string))?;
    let store: Arc<dyn DeviceDataStore> = Arc::new(store);
    if let Err(e) = store.ping().await {
        tracing::warn!("Store not answering yet: {}", e);
    }

    let identity = identity_from_config(&config.identity).context("building identity client")?;
    let permissions =
        permissions_from_config(&config.permissions, config.identity.server_token.clone())
            .context("building permission client")?;

    tracing::info!(
        identity = ?config.identity.kind,
        permissions = ?config.permissions.kind,
        scope = %config.permissions.scope,
        "Collaborators configured"
    );

    let state = AppState::new(store, identity, permissions, &config);
    serve(state).await?;

    tracing::info!("Device query API stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
