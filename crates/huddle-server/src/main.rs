//! # Huddle Server
//!
//! Anonymous short-ID chat rooms over WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Defaults, or the first of huddle.toml, /etc/huddle/huddle.toml, ~/.config/huddle/huddle.toml
//! huddle
//!
//! # An explicit config file
//! huddle ./huddle.example.toml
//!
//! # Environment overrides apply on top of either
//! HUDDLE__PORT=8080 HUDDLE__HOST=0.0.0.0 HUDDLE__CORS_ORIGINS=https://a.example,https://b.example huddle
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // A path argument wins over the search path
    let source = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(config::Config::locate);
    let config = config::Config::load_from(source.as_deref())?;
    match &source {
        Some(path) => info!(path = %path.display(), "Loaded configuration"),
        None => info!("No config file found, using defaults"),
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %format!("{}:{}", config.host, config.port),
        ws = %config.transport.websocket_path,
        metrics = config.metrics.enabled,
        "Starting Huddle"
    );

    if config.metrics.enabled {
        metrics::init_metrics();
    }

    handlers::run_server(config).await
}
