//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with all handlers
//! - Wire up middleware (request ID, tracing, timeout, body limit, sessions,
//!   security headers)
//! - Serve over plain TCP or TLS until shutdown is signalled

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::GuardConfig;
use crate::database::Database;
use crate::guard::RequestGuard;
use crate::http::handlers;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer, track_metrics};
use crate::security::headers::security_header_layers;
use crate::security::{session_middleware, Authenticator, SessionStore};

/// Slack on top of the upload limit for multipart framing and other fields.
const BODY_OVERHEAD: usize = 64 * 1024;

/// How long in-flight TLS connections get to finish after shutdown.
const TLS_DRAIN: Duration = Duration::from_secs(10);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub guards: RequestGuard,
    pub sessions: Arc<SessionStore>,
    pub auth: Arc<Authenticator>,
    pub db: Database,
    pub staging_dir: PathBuf,
}

/// HTTP front for the guards.
pub struct GuardServer {
    router: Router,
    tls: Option<RustlsConfig>,
}

impl GuardServer {
    /// Build the server. Fails only if a configured header value is invalid,
    /// which config validation already rules out.
    pub fn new(config: &GuardConfig, state: AppState) -> Result<Self, std::io::Error> {
        let router = Self::build_router(config, state)?;
        Ok(Self { router, tls: None })
    }

    /// Serve over TLS with the given certificate configuration.
    pub fn with_tls(mut self, tls: RustlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GuardConfig, state: AppState) -> Result<Router, std::io::Error> {
        let body_limit = (config.upload.max_file_size as usize).saturating_add(BODY_OVERHEAD);
        let headers = security_header_layers(&config.headers)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let mut router = Router::new()
            .route("/upload", post(handlers::upload))
            .route("/login", post(handlers::login))
            .route("/command", post(handlers::command))
            .route("/page", get(handlers::page))
            .layer(middleware::from_fn_with_state(
                state.sessions.clone(),
                session_middleware,
            ))
            .route("/health", get(handlers::health))
            .with_state(state)
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(body_limit))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(track_metrics))
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer());

        for layer in headers {
            router = router.layer(layer);
        }
        Ok(router)
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;

        match self.tls {
            None => {
                tracing::info!(address = %addr, "HTTP server starting");
                axum::serve(listener, self.router)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.recv().await;
                        tracing::info!("Shutdown signal received");
                    })
                    .await?;
            }
            Some(tls) => {
                tracing::info!(address = %addr, "HTTPS server starting");
                let handle = axum_server::Handle::new();
                let signal = handle.clone();
                tokio::spawn(async move {
                    let _ = shutdown.recv().await;
                    tracing::info!("Shutdown signal received");
                    signal.graceful_shutdown(Some(TLS_DRAIN));
                });

                axum_server::from_tcp_rustls(listener.into_std()?, tls)
                    .handle(handle)
                    .serve(self.router.into_make_service())
                    .await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
