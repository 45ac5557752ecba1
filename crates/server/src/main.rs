//! Resource portal server
//!
//! Serves the request lifecycle, capacity ledger and fleet inventory over
//! HTTP, collecting node data through the system ssh client.

use anyhow::{Context, Result};
use portal_lib::{
    health::{components, HealthRegistry},
    CollectorConfig, FleetAggregator, LifecycleManager, LiveCapacity, MemoryStore, NodeCollector,
    SshSession, StaticNodeRegistry, Store, StructuredLogger,
};
use portal_server::{api, config::PortalConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const PORTAL_VERSION: &str = env!("CARGO_PKG_VERSION");
const INSTANCE: &str = "portal-server";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting portal-server");

    let config = PortalConfig::load()?;
    info!(
        port = config.listen_port,
        nodes = config.nodes.len(),
        cluster_target = %config.cluster_target,
        "Portal configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::STORE).await;
    health_registry.register(components::REGISTRY).await;
    health_registry.register(components::COLLECTOR).await;

    let store: Arc<dyn Store> = match &config.store_path {
        Some(path) => Arc::new(
            MemoryStore::with_persistence(path)
                .with_context(|| format!("Failed to open store at {}", path.display()))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };

    let registry = Arc::new(StaticNodeRegistry::new(config.node_profiles()));
    if registry.is_empty() {
        health_registry
            .set_degraded(components::REGISTRY, "no nodes configured")
            .await;
    }

    let session = SshSession::new(config.ssh_binary.clone(), config.ssh_connect_timeout());
    let collector = NodeCollector::new(
        Arc::new(session),
        CollectorConfig {
            timeout: config.collection_timeout(),
            instance: INSTANCE.to_string(),
        },
    );
    let fleet = Arc::new(
        FleetAggregator::new(registry.clone(), Arc::new(collector))
            .with_health(health_registry.clone()),
    );

    let logger = StructuredLogger::new(INSTANCE);
    let capacity = Arc::new(LiveCapacity::new(config.nominal_capacity(), fleet.clone()));
    let lifecycle = Arc::new(
        LifecycleManager::new(store, capacity, config.cluster_target.clone())
            .with_logger(logger.clone())
            .with_health(health_registry.clone()),
    );

    let app_state = Arc::new(api::AppState::new(
        lifecycle,
        fleet,
        health_registry.clone(),
    ));

    logger.log_startup(PORTAL_VERSION, registry.len());
    health_registry.set_ready(true).await;

    let shutdown = async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            logger.log_shutdown("SIGINT received");
        }
    };
    api::serve(config.listen_port, app_state, shutdown).await?;

    info!("Shut down");
    Ok(())
}
