//! Request Guard server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ security headers ─▶ request id ─▶ trace ─▶ timeout ─▶ body limit
//!                                                                              │
//!                                                                              ▼
//!                                                                         session layer
//!                                                                              │
//!                  ┌──────────────┬──────────────┬──────────────┬──────────────┤
//!                  ▼              ▼              ▼              ▼              ▼
//!              /upload         /login        /command        /page         /health
//!           Upload Guard    Query Guard   Command Guard  Include Guard
//!                  │         + Argon2          │              │
//!                  └──────────────┴────────────┴──────────────┘
//!                                        │
//!                                        ▼
//!                            audit log (file + tracing + metrics)
//! ```
//!
//! The config path is taken from the first argument or `GUARD_CONFIG`.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;

use request_guard::lifecycle::{signals, startup, Shutdown};
use request_guard::net::load_tls_config;
use request_guard::observability::{logging, metrics};
use request_guard::GuardServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("GUARD_CONFIG").map(PathBuf::from));

    let config = startup::load(config_path.as_deref())?;
    logging::init(&config.observability);

    tracing::info!("request-guard v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        tls = config.listener.tls.is_some(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let state = startup::bootstrap(&config)?;

    let mut server = GuardServer::new(&config, state)?;
    if let Some(tls) = &config.listener.tls {
        server = server.with_tls(load_tls_config(tls).await?);
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Arc::new(Shutdown::new());
    let server_shutdown = shutdown.subscribe();
    signals::spawn_signal_handler(shutdown.clone());

    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
