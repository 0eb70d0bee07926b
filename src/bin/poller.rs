//! Siren Poller - watches the alert feed and dispatches new alerts.
//!
//! ## Configuration
//!
//! - `SIREN_CONFIG`: path to the TOML config (default: `config/siren.toml`)
//! - `RUST_LOG`: log filter (default: `info`)
//!
//! `poller.feed_url` is required. Sinks are enabled per section.

use siren::config::SirenConfig;
use siren::cycle::PollCycle;
use siren::shutdown::ShutdownSignal;
use std::error::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = SirenConfig::load()?;

    let feed = config.poller.build_feed()?;
    let filter = config.filter.build_filter();
    let router = config.build_router();
    let store = config.poller.ledger_store();

    if router.effect_count() == 0 {
        warn!("No sinks enabled; accepted alerts will only be recorded");
    }

    info!(
        feed = %feed.url(),
        location = ?filter.location(),
        window_seconds = filter.max_age_seconds(),
        ledger = %store.path().display(),
        effects = ?router.effect_names(),
        "Poller configured"
    );

    let mut cycle = PollCycle::new(feed, filter, router, store);
    info!(known = cycle.ledger().len(), "Ledger loaded");

    let shutdown = ShutdownSignal::new();
    let listener = shutdown.clone();
    tokio::spawn(async move { listener.listen().await });

    cycle.run(config.poller.interval(), &shutdown).await?;

    info!("Siren Poller stopped");
    Ok(())
}
