//! Uptimer - uptime monitoring with a public status page.
//!
//! Probes user-registered HTTP(S) and TCP targets on a schedule, tracks
//! up/down state under anti-flapping thresholds, records outages, dispatches
//! webhook notifications and serves the aggregated status API.

mod config;
mod db;
mod notify;
mod probe;
mod scheduler;
mod state;
mod status;
mod web;

use std::sync::Arc;

use config::Config;
use db::Store;
use notify::Notifier;
use scheduler::Scheduler;
use web::Server;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("uptimer=info".parse()?),
        )
        .init();

    // Load configuration
    let cfg = Config::load();
    tracing::info!("Starting Uptimer on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Store::new(&cfg.db_path)?;
    tracing::info!("Database initialized successfully");

    // Wire up the notifier and the probe scheduler
    let notifier = Arc::new(Notifier::new(store.clone(), cfg.notify_concurrency));
    let scheduler = Arc::new(Scheduler::new(store.clone(), notifier.clone(), cfg.clone()));
    scheduler.spawn();
    tracing::info!("Scheduler started, tick every {}s", cfg.tick_interval_sec);

    // Start web server
    let server = Server::new(cfg, store, notifier);
    server.start().await?;

    Ok(())
}
