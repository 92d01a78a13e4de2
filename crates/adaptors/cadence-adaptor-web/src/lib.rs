//! HTTP streaming bridge for Cadence
//!
//! Drives an inference backend per request and re-emits its audio frames as
//! a chunked `application/octet-stream` body of little-endian float32 PCM.
//! Consumers must re-frame on 4-byte boundaries; chunk boundaries carry no
//! meaning.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod error;
pub mod routes;
pub mod state;

pub use bridge::{frame_body, ClientGuard};
pub use error::ApiError;
pub use routes::{HealthResponse, SpeechForm};
pub use state::AppState;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use cadence_core::{CadenceError, Result};

/// Largest accepted request body (reference and source clips)
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Server bind configuration
#[derive(Debug, Clone)]
pub struct WebServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to; 0 picks a free port
    pub port: u16,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Build the router with all routes and layers
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/text-to-speech", post(routes::text_to_speech))
        .route("/api/voice-convert", post(routes::voice_convert))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bridge server with graceful shutdown
pub struct WebServer {
    config: WebServerConfig,
    state: AppState,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    local_addr: Option<SocketAddr>,
}

impl WebServer {
    /// Create a stopped server
    pub fn new(config: WebServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            shutdown_tx: None,
            local_addr: None,
        }
    }

    /// Bind and serve in the background; returns the bound address
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.shutdown_tx.is_some() {
            return Err(CadenceError::config("Server already running"));
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| CadenceError::config(format!("Failed to bind to {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;

        let router = build_router(self.state.clone());
        let (tx, rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async {
                let _ = rx.await;
            });
            if let Err(e) = server.await {
                error!("Server error: {}", e);
            }
        });

        info!(addr = %local_addr, backend = self.state.mode().as_str(), "Speech bridge listening");
        self.shutdown_tx = Some(tx);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Stop accepting connections
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            info!("Speech bridge stopped");
        }
        self.local_addr = None;
    }

    /// Address the server is bound to, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}
