//! Error types for the Cadence streaming pipeline

use thiserror::Error;

/// Main error type for Cadence operations
#[derive(Debug, Error)]
pub enum CadenceError {
    /// The inference server could not be reached, or its liveness probe failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed WAV container (missing RIFF/WAVE magic, truncated header)
    #[error("Format error: {0}")]
    Format(String),

    /// WAV container is valid but uses an encoding we cannot decode
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The remote model call failed after a successful connection
    #[error("Inference error ({code}): {message}")]
    Inference {
        /// Remote status code name
        code: String,
        /// Remote status message
        message: String,
    },

    /// The HTTP body read failed mid-stream on the consumer side
    #[error("Stream error: {0}")]
    Stream(String),

    /// Non-success HTTP response from the streaming bridge
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Error message from the JSON body (or the status reason)
        message: String,
    },

    /// Audio graph or playback failure
    #[error("Playback error: {0}")]
    Playback(String),

    /// The audio output is already owned by another player
    #[error("Audio output '{0}' is already in use")]
    OutputBusy(String),

    /// The session was cancelled by the caller
    #[error("Session cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error (bad request fields, bad tensor shapes)
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Convenient Result type using CadenceError
pub type Result<T> = std::result::Result<T, CadenceError>;

impl CadenceError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        CadenceError::Connection(msg.into())
    }

    /// Create a format error
    pub fn format(msg: impl Into<String>) -> Self {
        CadenceError::Format(msg.into())
    }

    /// Create an unsupported format error
    pub fn unsupported_format(msg: impl Into<String>) -> Self {
        CadenceError::UnsupportedFormat(msg.into())
    }

    /// Create an inference error from a remote status
    pub fn inference(code: impl Into<String>, message: impl Into<String>) -> Self {
        CadenceError::Inference {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        CadenceError::Stream(msg.into())
    }

    /// Create an HTTP error
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        CadenceError::Http {
            status,
            message: message.into(),
        }
    }

    /// Create a playback error
    pub fn playback(msg: impl Into<String>) -> Self {
        CadenceError::Playback(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        CadenceError::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        CadenceError::Validation(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        CadenceError::Other(msg.into())
    }

    /// Whether the error was caused by the caller's input rather than the
    /// service. The HTTP layer answers these with `400`.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CadenceError::Format(_)
                | CadenceError::UnsupportedFormat(_)
                | CadenceError::Validation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = CadenceError::format("missing RIFF header");
        assert_eq!(err.to_string(), "Format error: missing RIFF header");

        let err = CadenceError::inference("Unavailable", "model not loaded");
        assert_eq!(err.to_string(), "Inference error (Unavailable): model not loaded");
    }

    #[test]
    fn test_client_error_classification() {
        assert!(CadenceError::format("x").is_client_error());
        assert!(CadenceError::unsupported_format("24-bit").is_client_error());
        assert!(CadenceError::validation("missing text").is_client_error());
        assert!(!CadenceError::connection("refused").is_client_error());
        assert!(!CadenceError::inference("Internal", "boom").is_client_error());
        assert!(!CadenceError::Cancelled.is_client_error());
    }

    #[test]
    fn test_result_type() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }

        assert_eq!(returns_result().unwrap(), 42);
    }
}
