//! Configuration management and environment variable loading

use crate::types::{DEFAULT_OUTPUT_SAMPLE_RATE, REFERENCE_SAMPLE_RATE};
use crate::{CadenceError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Maximum gRPC message size in each direction (100 MiB)
pub const MAX_MESSAGE_BYTES: usize = 100 * 1024 * 1024;

/// HTTP/2 keepalive ping interval
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// HTTP/2 keepalive ping timeout
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Load environment variables from a .env file in the current directory or
/// a parent directory. A missing file is not an error.
pub fn load_env() -> Result<()> {
    match dotenvy::dotenv() {
        Ok(path) => {
            tracing::info!("Loaded environment from: {}", path.display());
            Ok(())
        }
        Err(dotenvy::Error::LineParse(line, pos)) => Err(CadenceError::config(format!(
            "Failed to parse .env file at line {}, position {}",
            line, pos
        ))),
        Err(dotenvy::Error::Io(_)) => {
            tracing::debug!("No .env file found - using system environment variables only");
            Ok(())
        }
        Err(e) => Err(CadenceError::config(format!(
            "Failed to load .env file: {}",
            e
        ))),
    }
}

/// Get optional environment variable with default
pub fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get environment variable as integer
pub fn get_env_int<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Which inference backend serves requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendMode {
    /// Remote Triton inference server over gRPC
    Triton,
    /// Locally generated tones; must be selected explicitly
    Demo,
}

impl BackendMode {
    /// Get mode as string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Triton => "triton",
            Self::Demo => "demo",
        }
    }
}

impl Default for BackendMode {
    fn default() -> Self {
        Self::Triton
    }
}

impl std::str::FromStr for BackendMode {
    type Err = CadenceError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "triton" | "grpc" => Ok(Self::Triton),
            "demo" | "mock" => Ok(Self::Demo),
            other => Err(CadenceError::config(format!(
                "Unknown TTS_BACKEND '{}' (expected 'triton' or 'demo')",
                other
            ))),
        }
    }
}

/// Inference service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Backend mode
    pub mode: BackendMode,
    /// Inference server host; `None` means no service is configured
    pub server_address: Option<String>,
    /// Inference server gRPC port
    pub server_port: u16,
    /// Model name submitted with every request
    pub model_name: String,
    /// Output sample rate the model produces
    pub target_sample_rate: u32,
    /// Rate reference/source audio is normalized to before submission
    pub reference_sample_rate: u32,
    /// Liveness probe timeout
    pub probe_timeout: Duration,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            mode: BackendMode::Triton,
            server_address: None,
            server_port: 8001,
            model_name: "cosyvoice2".to_string(),
            target_sample_rate: DEFAULT_OUTPUT_SAMPLE_RATE,
            reference_sample_rate: REFERENCE_SAMPLE_RATE,
            probe_timeout: Duration::from_secs(10),
        }
    }
}

impl InferenceConfig {
    /// Read configuration from `TTS_*` environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let mode = match env::var("TTS_BACKEND") {
            Ok(v) => v.parse()?,
            Err(_) => BackendMode::Triton,
        };

        let server_address = env::var("TTS_SERVER_ADDRESS")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Ok(Self {
            mode,
            server_address,
            server_port: get_env_int("TTS_SERVER_PORT", defaults.server_port),
            model_name: get_env_or("TTS_MODEL_NAME", &defaults.model_name),
            target_sample_rate: get_env_int("TTS_SAMPLE_RATE", defaults.target_sample_rate),
            reference_sample_rate: REFERENCE_SAMPLE_RATE,
            probe_timeout: Duration::from_secs(get_env_int("TTS_PROBE_TIMEOUT_SECS", 10u64)),
        })
    }

    /// Set the server endpoint
    pub fn with_server(mut self, address: impl Into<String>, port: u16) -> Self {
        self.server_address = Some(address.into());
        self.server_port = port;
        self
    }

    /// Use the demo backend
    pub fn demo() -> Self {
        Self {
            mode: BackendMode::Demo,
            ..Default::default()
        }
    }

    /// Whether a backing inference service is available
    pub fn is_configured(&self) -> bool {
        match self.mode {
            BackendMode::Demo => true,
            BackendMode::Triton => self.server_address.is_some(),
        }
    }

    /// gRPC endpoint URI, if configured
    pub fn endpoint(&self) -> Option<String> {
        self.server_address.as_ref().map(|addr| {
            if addr.starts_with("http://") || addr.starts_with("https://") {
                format!("{}:{}", addr, self.server_port)
            } else {
                format!("http://{}:{}", addr, self.server_port)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_int() {
        env::set_var("CADENCE_TEST_INT", "8001");
        env::set_var("CADENCE_TEST_INT_BAD", "eight");

        assert_eq!(get_env_int("CADENCE_TEST_INT", 0u16), 8001);
        assert_eq!(get_env_int("CADENCE_TEST_INT_BAD", 42u16), 42);
    }

    #[test]
    fn test_backend_mode_parse() {
        assert_eq!("demo".parse::<BackendMode>().unwrap(), BackendMode::Demo);
        assert_eq!("Triton".parse::<BackendMode>().unwrap(), BackendMode::Triton);
        assert!("elevenlabs".parse::<BackendMode>().is_err());
    }

    #[test]
    fn test_unconfigured_triton() {
        let config = InferenceConfig::default();
        assert!(!config.is_configured());
        assert_eq!(config.endpoint(), None);

        let config = config.with_server("triton.local", 8001);
        assert!(config.is_configured());
        assert_eq!(config.endpoint().as_deref(), Some("http://triton.local:8001"));
    }

    #[test]
    fn test_demo_is_configured() {
        assert!(InferenceConfig::demo().is_configured());
    }
}
