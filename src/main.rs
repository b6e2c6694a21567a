//! sitewatch - website uptime monitor.

use sitewatch::config::ServerConfig;
use sitewatch::coordinator::CheckCoordinator;
use sitewatch::monitor::Monitor;
use sitewatch::notify::{LogNotifier, Notifier, PreferenceSet, WebhookNotifier};
use sitewatch::probe::HttpProber;
use sitewatch::registry::Registry;
use sitewatch::scheduler::Scheduler;
use sitewatch::store::open_store;
use sitewatch::web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sitewatch=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    // Load configuration
    let cfg = ServerConfig::load()?;
    tracing::info!("Starting sitewatch on port {}...", cfg.http_port);
    tracing::info!("Using storage at {}", cfg.db_path.display());

    // Load targets
    let store = open_store(&cfg.db_path)?;
    let registry = Arc::new(Registry::load(store));

    let prober = Arc::new(HttpProber::new(cfg.probe_timeout)?);
    let notifier: Arc<dyn Notifier> = match &cfg.webhook_url {
        Some(url) => {
            tracing::info!("Downtime alerts go to the configured webhook");
            Arc::new(WebhookNotifier::new(url.clone(), cfg.webhook_mention.clone())?)
        }
        None => {
            tracing::info!("No webhook configured, downtime alerts are only logged");
            Arc::new(LogNotifier)
        }
    };
    let preferences = Arc::new(PreferenceSet::new(cfg.notify_by_default));

    let coordinator =
        CheckCoordinator::new(registry.clone(), prober, notifier, preferences.clone());
    let scheduler = Scheduler::new(coordinator, cfg.scheduler());
    scheduler.start();

    let monitor = Arc::new(Monitor::new(scheduler.clone(), preferences));

    // Start web server
    let server = Server::new(cfg, monitor);
    server.start(shutdown_signal()).await?;

    scheduler.shutdown().await;
    registry.flush().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
