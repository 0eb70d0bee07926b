//! Siren Relay - HTTP front end to the relay queue.
//!
//! ## Configuration
//!
//! - `SIREN_CONFIG`: path to the TOML config (default: `config/siren.toml`)
//! - `RUST_LOG`: log filter (default: `info`)
//!
//! The `[relay]` section sets the port, secret and read mode; `[relay.queue]`
//! selects the backend.

use siren::config::SirenConfig;
use siren::relay::http;
use siren::shutdown::ShutdownSignal;
use std::error::Error;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = SirenConfig::load()?;
    let relay = &config.relay;
    let handler = relay.build_handler()?;

    info!(
        backend = ?relay.queue.backend,
        queue = %relay.queue.name,
        count_only = relay.return_only_message_count,
        batch_limit = relay.batch_limit,
        "Relay configured"
    );

    let app = http::app(handler);

    let addr = SocketAddr::from(([0, 0, 0, 0], relay.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Siren Relay listening on {}", addr);

    let shutdown = ShutdownSignal::new();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.listen().await })
        .await?;

    info!("Siren Relay stopped");
    Ok(())
}
