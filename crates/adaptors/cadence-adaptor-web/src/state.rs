//! Shared route state

use std::sync::Arc;
use tracing::warn;

use cadence_core::{BackendMode, CadenceError};
use cadence_provider_triton::BackendFactory;

use crate::bridge::ClientGuard;
use crate::error::ApiError;

/// State shared by all handlers
#[derive(Clone)]
pub struct AppState {
    factory: Arc<dyn BackendFactory>,
}

impl AppState {
    /// Create state around a backend factory
    pub fn new(factory: Arc<dyn BackendFactory>) -> Self {
        Self { factory }
    }

    /// Whether synthesis routes can serve requests
    pub fn is_configured(&self) -> bool {
        self.factory.is_configured()
    }

    /// Backend mode
    pub fn mode(&self) -> BackendMode {
        self.factory.mode()
    }

    /// Fail with 501 when no inference service is configured
    pub fn require_configured(&self) -> Result<(), ApiError> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(ApiError::NotImplemented(
                "TTS service not configured".to_string(),
            ))
        }
    }

    /// Create and initialize a fresh backend for one request
    pub async fn open_backend(&self, label: &str) -> Result<ClientGuard, ApiError> {
        self.require_configured()?;

        let mut backend = self.factory.create().map_err(|e| match e {
            CadenceError::Config(msg) => ApiError::NotImplemented(msg),
            other => ApiError::from(other),
        })?;

        if let Err(e) = backend.initialize().await {
            warn!(request = label, error = %e, "Inference client failed to initialize");
            backend.close();
            return Err(e.into());
        }

        Ok(ClientGuard::new(backend, label))
    }
}
