use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use field_server::config::ServerConfig;
use field_server::metrics::{self, Metrics};
use field_server::net::{SessionDirectory, SessionNotifierFactory};
use field_server::worker::{FieldRegistry, TickScheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging (RUST_LOG overrides the default level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Field Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config.validate()?;
    info!(
        sector_size = config.sector_size,
        view_radius = config.view_radius,
        tick_threads = config.tick_threads,
        fields = ?config.field_ids,
        "Configuration loaded"
    );

    let metrics = Arc::new(Metrics::new());

    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Shared state
    let directory = Arc::new(SessionDirectory::new());
    let factory = Arc::new(SessionNotifierFactory::new(directory.clone(), metrics.clone()));
    let registry = Arc::new(FieldRegistry::new(
        config.field_config(),
        config.npc_field_id,
        factory,
        metrics.clone(),
    ));

    for &id in &config.field_ids {
        registry.get_or_create(id);
    }

    let scheduler = TickScheduler::new(
        registry.clone(),
        config.tick_threads,
        Duration::from_millis(config.tick_period_ms),
    );
    scheduler.start();

    // Queue depth monitor
    if config.monitor_interval_secs > 0 {
        let registry = registry.clone();
        let period = Duration::from_secs(config.monitor_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                registry.for_each(|worker| {
                    info!(field_id = worker.field_id(), pending = worker.pending(), "Field queue depth");
                });
            }
        });
    }

    info!(fields = registry.len(), "Server ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Joins block, keep them off the runtime workers
    let stopping = registry.clone();
    tokio::task::spawn_blocking(move || {
        scheduler.stop();
        stopping.stop_all();
    })
    .await?;

    info!(sessions = directory.len(), "Server stopped");
    Ok(())
}
