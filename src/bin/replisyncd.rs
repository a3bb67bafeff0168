//! Demo binary: wires the Remote Adapters, State Store, Sync Engine,
//! Ingress HTTP server, and Queue Worker together from environment
//! configuration.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use replisync::{
    HttpRemoteAdapter, IngressState, SqliteStore, SyncEngine, Worker,
};
use replisync::config::ReplicationConfig;
use replisync::ingress;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "replisync=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ReplicationConfig::from_env()?;

    info!(database_url = %config.database_url, "opening state store");
    let store = Arc::new(SqliteStore::open(&config.database_url)?);

    let cloud = Arc::new(HttpRemoteAdapter::new(
        &config.cloud.base_url,
        &config.cloud.api_key,
        &config.cloud.api_secret,
        &config.cloud.name,
    ));
    let local = Arc::new(HttpRemoteAdapter::new(
        &config.local.base_url,
        &config.local.api_key,
        &config.local.api_secret,
        &config.local.name,
    ));

    let engine = SyncEngine::new(
        cloud.clone(),
        local.clone(),
        store.clone(),
        config.sync_rules.conflict_resolution,
        config.sync_rules.exclude_fields.clone(),
    );

    let worker = Worker::new(engine, store.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_handle = tokio::spawn(async move {
        worker.run(shutdown_rx).await;
    });

    let ingress_state = IngressState::new(store.clone(), config.webhook.secret.clone(), "replisyncd");
    let app = ingress::router(ingress_state);

    let addr: SocketAddr = format!("{}:{}", config.webhook.host, config.webhook.port).parse()?;
    info!(%addr, "listening for webhooks");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    worker_handle.await?;
    Ok(())
}
