//! Frame stream to chunked HTTP body
//!
//! Each frame becomes one body chunk of little-endian float32 bytes. The
//! stream is followed by one zero-length chunk. A transport error aborts the
//! body, so the consumer sees a failed read instead of a clean end.

use axum::body::Body;
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{debug, error};

use cadence_core::{CadenceError, Result};
use cadence_provider_triton::{FrameStream, InferenceBackend};

/// Owns a backend for the duration of one request and closes it once.
///
/// `release` runs when the body finishes or fails; `Drop` covers the
/// client hanging up mid-stream and early returns in handlers.
pub struct ClientGuard {
    backend: Option<Box<dyn InferenceBackend>>,
    label: String,
}

impl ClientGuard {
    /// Take ownership of an initialized backend
    pub fn new(backend: Box<dyn InferenceBackend>, label: impl Into<String>) -> Self {
        Self {
            backend: Some(backend),
            label: label.into(),
        }
    }

    /// The guarded backend, until released
    pub fn backend(&self) -> Result<&dyn InferenceBackend> {
        self.backend
            .as_deref()
            .ok_or_else(|| CadenceError::other("inference client already released"))
    }

    /// Close the backend; later calls do nothing
    pub fn release(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.close();
            debug!(request = %self.label, backend = backend.name(), "Inference client released");
        }
    }

    /// Whether the backend has been released
    pub fn is_released(&self) -> bool {
        self.backend.is_none()
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Build a streaming response body from `frames`, releasing `guard` when done
pub fn frame_body(frames: FrameStream, guard: ClientGuard) -> Body {
    let stream = async_stream::stream! {
        let mut guard = guard;
        let mut frames = frames;
        let mut chunks = 0usize;
        let mut bytes_sent = 0usize;

        while let Some(item) = frames.next().await {
            match item {
                Ok(frame) => {
                    let bytes = frame.to_le_bytes();
                    chunks += 1;
                    bytes_sent += bytes.len();
                    yield Ok::<Bytes, CadenceError>(bytes);
                }
                Err(e) => {
                    error!(request = %guard.label, error = %e, chunks, "Aborting audio stream");
                    guard.release();
                    yield Err(e);
                    return;
                }
            }
        }

        debug!(request = %guard.label, chunks, bytes = bytes_sent, "Audio stream complete");
        yield Ok(Bytes::new());
        guard.release();
    };

    Body::from_stream(stream)
}
