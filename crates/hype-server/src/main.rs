//! # Hype Server
//!
//! Realtime relay for direct messages, presence, friendships and WebRTC
//! call signaling.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! hype
//!
//! # Configuration is read from ./hype.toml, /etc/hype/hype.toml or
//! # ~/.config/hype/hype.toml
//!
//! # Run with environment variables
//! HYPE_PORT=8080 HYPE_HOST=0.0.0.0 hype
//! ```

use anyhow::Result;
use hype_server::{config::Config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hype=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;

    tracing::info!(
        backend = ?config.storage.backend,
        "Starting Hype server on {}:{}",
        config.host,
        config.port
    );

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
