//! Triton inference transport for Cadence
//!
//! Streams synthesized audio from a Triton-served speech model (CosyVoice2
//! by default) over the bidirectional `ModelStreamInfer` gRPC call.
//!
//! ## Backends
//! - [`TritonClient`] - remote Triton server, one streaming call per request
//! - [`DemoBackend`] - local tones, selected only with `TTS_BACKEND=demo`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod demo;
pub mod proto;
pub mod tensor;

pub use client::{decode_stream_response, request_id, TritonClient};
pub use demo::DemoBackend;
pub use tensor::{build_inputs, DataType, InputTensor, TensorData, DEFAULT_PRESET_VOICE};

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Instant;

use cadence_core::{
    concat_frames, AudioFrame, BackendMode, CadenceError, InferenceConfig, InferenceRequest,
    Result, SynthesisResult, REFERENCE_SAMPLE_RATE,
};

/// Ordered audio frames of one inference call.
///
/// Ends without a sentinel; dropping it cancels the underlying call.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<AudioFrame>> + Send>>;

/// A speech inference backend
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// Rate of the produced audio
    fn sample_rate(&self) -> u32;

    /// Check if `initialize` has succeeded and `close` has not been called
    fn is_ready(&self) -> bool;

    /// Connect and verify the server is live
    async fn initialize(&mut self) -> Result<()>;

    /// Stream frames for a request as they are produced
    async fn synthesize_stream(&self, request: &InferenceRequest) -> Result<FrameStream>;

    /// Drain a request into one buffer and measure latency
    async fn synthesize(&self, request: &InferenceRequest) -> Result<SynthesisResult> {
        let started = Instant::now();
        let mut stream = self.synthesize_stream(request).await?;

        let mut frames = Vec::new();
        while let Some(frame) = stream.next().await {
            frames.push(frame?);
        }

        Ok(SynthesisResult {
            audio: concat_frames(&frames),
            sample_rate: self.sample_rate(),
            latency: started.elapsed(),
        })
    }

    /// Convert `source_audio` (at the model reference rate) to the target
    /// voice, or to `preset_voice` when no target clip is given
    async fn convert(
        &self,
        source_audio: &[f32],
        target_audio: Option<&[f32]>,
        preset_voice: &str,
    ) -> Result<SynthesisResult> {
        let request =
            InferenceRequest::voice_conversion(source_audio.to_vec(), REFERENCE_SAMPLE_RATE);
        let request = match target_audio {
            Some(target) => request.with_reference(target.to_vec(), REFERENCE_SAMPLE_RATE, None),
            None => request.with_preset(preset_voice),
        };
        self.synthesize(&request).await
    }

    /// Release the connection; safe to call more than once
    fn close(&mut self);
}

/// Creates one backend per request
pub trait BackendFactory: Send + Sync {
    /// Whether a backend can be created at all
    fn is_configured(&self) -> bool;

    /// Backend mode
    fn mode(&self) -> BackendMode;

    /// Create an uninitialized backend
    fn create(&self) -> Result<Box<dyn InferenceBackend>>;
}

/// Factory driven by [`InferenceConfig`]
#[derive(Debug, Clone)]
pub struct ConfiguredBackendFactory {
    config: InferenceConfig,
}

impl ConfiguredBackendFactory {
    /// Create a factory
    pub fn new(config: InferenceConfig) -> Self {
        log_settings(&config);
        Self { config }
    }

    /// Factory configuration
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }
}

impl BackendFactory for ConfiguredBackendFactory {
    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    fn mode(&self) -> BackendMode {
        self.config.mode
    }

    fn create(&self) -> Result<Box<dyn InferenceBackend>> {
        match self.config.mode {
            BackendMode::Demo => Ok(Box::new(DemoBackend::new(self.config.target_sample_rate))),
            BackendMode::Triton if self.config.is_configured() => {
                Ok(Box::new(TritonClient::new(self.config.clone())))
            }
            BackendMode::Triton => Err(CadenceError::config(
                "TTS service not configured: set TTS_SERVER_ADDRESS",
            )),
        }
    }
}

fn log_settings(config: &InferenceConfig) {
    let rows = [
        ("TTS_BACKEND", config.mode.as_str().to_string()),
        (
            "TTS_SERVER_ADDRESS",
            config.server_address.clone().unwrap_or_else(|| "(unset)".to_string()),
        ),
        ("TTS_SERVER_PORT", config.server_port.to_string()),
        ("TTS_MODEL_NAME", config.model_name.clone()),
        ("TTS_SAMPLE_RATE", config.target_sample_rate.to_string()),
        (
            "TTS_PROBE_TIMEOUT_SECS",
            config.probe_timeout.as_secs().to_string(),
        ),
    ];

    tracing::info!("+{}+", "-".repeat(56));
    tracing::info!("| {:<54} |", "Inference provider settings");
    tracing::info!("+{}+", "=".repeat(56));
    for (name, value) in rows {
        tracing::info!("| {:<24}| {:<29}|", name, value);
    }
    tracing::info!("+{}+", "-".repeat(56));

    if !config.is_configured() {
        tracing::warn!("No inference server configured; synthesis routes will answer 501");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_unconfigured() {
        let factory = ConfiguredBackendFactory::new(InferenceConfig::default());
        assert!(!factory.is_configured());
        assert!(matches!(factory.create(), Err(CadenceError::Config(_))));
    }

    #[test]
    fn test_factory_demo() {
        let factory = ConfiguredBackendFactory::new(InferenceConfig::demo());
        assert_eq!(factory.mode(), BackendMode::Demo);
        let backend = factory.create().unwrap();
        assert_eq!(backend.name(), "demo");
        assert!(!backend.is_ready());
    }

    #[test]
    fn test_factory_triton() {
        let factory = ConfiguredBackendFactory::new(
            InferenceConfig::default().with_server("triton.internal", 8001),
        );
        let backend = factory.create().unwrap();
        assert_eq!(backend.name(), "triton");
        assert_eq!(backend.sample_rate(), 24000);
    }

    #[test]
    fn test_default_synthesize_drains_stream() {
        let factory = ConfiguredBackendFactory::new(InferenceConfig::demo());
        let mut backend = factory.create().unwrap();

        let result = tokio_test::block_on(async {
            backend.initialize().await.unwrap();
            backend.synthesize(&InferenceRequest::tts("abc")).await
        })
        .unwrap();

        // Three characters fall under the half-second minimum
        assert_eq!(result.audio.len(), 12000);
        // Frames are joined in arrival order
        assert_eq!(result.audio, DemoBackend::new(24000).render_text("abc"));
        assert_eq!(result.sample_rate, 24000);
        assert!((result.audio_secs() - 0.5).abs() < 1e-9);
        backend.close();
        assert!(!backend.is_ready());
    }
}
