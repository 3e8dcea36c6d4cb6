//! post-relay binary entry point.
//!
//! Usage:
//! ```bash
//! post-relay --config relay.toml
//! BLINDPOST_SESSION_SECRET=... post-relay
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use post_relay::config::Config;
use post_relay::crypto::{MlDsa87, ServerKeys, SignatureScheme};
use post_relay::http;
use post_relay::limits::spawn_shrink_task;
use post_relay::server::RelayServer;
use post_relay::storage::SqliteStore;
use zeroize::Zeroizing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = get_config_path();
    let config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        tracing::warn!("Config file {:?} not found, using defaults", config_path);
        Config::default()
    };

    let store = SqliteStore::open(&config.storage.database)
        .await
        .with_context(|| format!("opening database {:?}", config.storage.database))?;
    let keys = load_or_generate_keys(&store).await?;
    let session_secret = config
        .server
        .resolve_session_secret()
        .context("resolving session secret")?;

    let relay = Arc::new(RelayServer::new(
        config.clone(),
        store,
        keys,
        session_secret,
    )?);
    spawn_shrink_task(relay.limits().clone());
    http::health::init_start_time();

    let router = http::build_router(relay);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("binding {}", config.server.bind_address))?;
    tracing::info!(
        "post-relay v{} listening on {} (domain: {}, federation: {})",
        env!("CARGO_PKG_VERSION"),
        config.server.bind_address,
        config.server.domain,
        if config.federation.enabled { "enabled" } else { "disabled" },
    );
    axum::serve(listener, router).await?;
    Ok(())
}

/// Load the signing keypair, generating and persisting one at first
/// startup.
async fn load_or_generate_keys(store: &SqliteStore) -> anyhow::Result<ServerKeys> {
    if let Some((public_key, private_key)) = store.server_keys().await? {
        tracing::info!("Loaded signing keypair from storage");
        return Ok(ServerKeys {
            public_key,
            private_key: Zeroizing::new(private_key),
        });
    }

    tracing::info!("No signing keypair found, generating one");
    let (public_key, private_key) = MlDsa87.generate_keypair()?;
    store.store_server_keys(&public_key, &private_key).await?;
    Ok(ServerKeys {
        public_key,
        private_key,
    })
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("relay.toml"))
}
