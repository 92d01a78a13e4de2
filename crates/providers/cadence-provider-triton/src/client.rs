//! Triton gRPC streaming client
//!
//! One `ModelStreamInfer` call per request. The request stream carries a
//! single `ModelInferRequest` and is then half-closed; the server answers
//! with any number of waveform responses followed by an empty response
//! flagged `triton_final_response`.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use cadence_core::config::{KEEPALIVE_INTERVAL, KEEPALIVE_TIMEOUT, MAX_MESSAGE_BYTES};
use cadence_core::{AudioFrame, CadenceError, InferenceConfig, InferenceRequest, RequestKind, Result};

use crate::proto::{
    GrpcInferenceServiceClient, InferParameter, InferRequestedOutputTensor, ModelInferRequest,
    ModelStreamInferResponse, ServerLiveRequest, ENABLE_EMPTY_FINAL_RESPONSE,
};
use crate::tensor::build_inputs;
use crate::{FrameStream, InferenceBackend};

/// Name of the audio output tensor
pub const WAVEFORM_OUTPUT: &str = "waveform";

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Correlation id: `<kind>-<unix ms>-<9 random base36 chars>`
pub fn request_id(kind: RequestKind) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}-{}", kind.as_str(), Utc::now().timestamp_millis(), suffix)
}

fn status_error(status: tonic::Status) -> CadenceError {
    CadenceError::inference(format!("{:?}", status.code()), status.message())
}

/// Decode one stream message into an audio frame.
///
/// Returns `Ok(None)` for the final-response marker and for responses
/// without waveform samples.
pub fn decode_stream_response(
    message: ModelStreamInferResponse,
    sample_rate: u32,
) -> Result<Option<AudioFrame>> {
    if !message.error_message.is_empty() {
        return Err(CadenceError::inference("StreamError", message.error_message));
    }

    let Some(response) = message.infer_response else {
        return Ok(None);
    };

    if response.is_final() {
        if !response.outputs.is_empty() {
            warn!(id = %response.id, "Final response carried outputs; ignoring them");
        }
        return Ok(None);
    }

    let Some(index) = response
        .outputs
        .iter()
        .position(|o| o.name == WAVEFORM_OUTPUT)
    else {
        debug!(id = %response.id, "Response without waveform output");
        return Ok(None);
    };

    let frame = match response.raw_output_contents.get(index) {
        Some(raw) => AudioFrame::from_le_bytes(raw, sample_rate).map_err(|e| {
            CadenceError::inference("DataLoss", format!("malformed waveform payload: {}", e))
        })?,
        None => {
            let samples = response.outputs[index]
                .contents
                .as_ref()
                .map(|c| c.fp32_contents.clone())
                .unwrap_or_default();
            AudioFrame::new(samples, sample_rate)
        }
    };

    if frame.is_empty() {
        return Ok(None);
    }
    Ok(Some(frame))
}

/// Streaming client for a Triton-served speech model
pub struct TritonClient {
    config: InferenceConfig,
    client: Option<GrpcInferenceServiceClient<Channel>>,
}

impl TritonClient {
    /// Create an unconnected client; call [`InferenceBackend::initialize`] next
    pub fn new(config: InferenceConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    /// Client configuration
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    fn connected(&self) -> Result<GrpcInferenceServiceClient<Channel>> {
        self.client
            .clone()
            .ok_or_else(|| CadenceError::connection("Triton client is not initialized"))
    }

    /// Build the wire request for `request`, normalizing its audio first
    pub fn build_request(&self, request: &InferenceRequest) -> Result<ModelInferRequest> {
        let mut request = request.clone();
        request.normalize_audio(self.config.reference_sample_rate);

        let inputs = build_inputs(&request)?
            .into_iter()
            .map(|t| t.into_proto())
            .collect::<Result<Vec<_>>>()?;

        let mut message = ModelInferRequest {
            model_name: self.config.model_name.clone(),
            id: request_id(request.kind),
            inputs,
            outputs: vec![InferRequestedOutputTensor {
                name: WAVEFORM_OUTPUT.to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        message
            .parameters
            .insert(ENABLE_EMPTY_FINAL_RESPONSE.to_string(), InferParameter::bool(true));

        Ok(message)
    }

    async fn connect(&self) -> Result<GrpcInferenceServiceClient<Channel>> {
        let uri = self
            .config
            .endpoint()
            .ok_or_else(|| CadenceError::config("TTS_SERVER_ADDRESS is not set"))?;

        let endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| CadenceError::connection(format!("Invalid endpoint {}: {}", uri, e)))?
            .connect_timeout(self.config.probe_timeout)
            .http2_keep_alive_interval(KEEPALIVE_INTERVAL)
            .keep_alive_timeout(KEEPALIVE_TIMEOUT)
            .keep_alive_while_idle(true);

        let channel = endpoint.connect().await.map_err(|e| {
            CadenceError::connection(format!("Failed to connect to {}: {}", uri, e))
        })?;

        Ok(GrpcInferenceServiceClient::new(channel)
            .max_decoding_message_size(MAX_MESSAGE_BYTES)
            .max_encoding_message_size(MAX_MESSAGE_BYTES))
    }

    async fn probe(&self, client: &mut GrpcInferenceServiceClient<Channel>) -> Result<()> {
        let timeout: Duration = self.config.probe_timeout;
        let response = tokio::time::timeout(timeout, client.server_live(ServerLiveRequest {}))
            .await
            .map_err(|_| {
                CadenceError::connection(format!("Liveness probe timed out after {:?}", timeout))
            })?
            .map_err(|status| {
                CadenceError::connection(format!("Liveness probe failed: {}", status.message()))
            })?;

        if !response.into_inner().live {
            return Err(CadenceError::connection("Inference server reports not live"));
        }
        Ok(())
    }
}

#[async_trait]
impl InferenceBackend for TritonClient {
    fn name(&self) -> &str {
        "triton"
    }

    fn sample_rate(&self) -> u32 {
        self.config.target_sample_rate
    }

    fn is_ready(&self) -> bool {
        self.client.is_some()
    }

    async fn initialize(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }

        let mut client = self.connect().await?;
        self.probe(&mut client).await?;

        info!(
            endpoint = ?self.config.endpoint(),
            model = %self.config.model_name,
            "Connected to Triton inference server"
        );
        self.client = Some(client);
        Ok(())
    }

    async fn synthesize_stream(&self, request: &InferenceRequest) -> Result<FrameStream> {
        let mut client = self.connected()?;
        let message = self.build_request(request)?;
        let request_id = message.id.clone();
        let sample_rate = self.config.target_sample_rate;

        debug!(
            request_id = %request_id,
            kind = request.kind.as_str(),
            inputs = message.inputs.len(),
            "Submitting streaming inference request"
        );

        let response = client
            .model_stream_infer(tokio_stream::once(message))
            .await
            .map_err(status_error)?;
        let mut inbound = response.into_inner();

        let stream = async_stream::stream! {
            let mut frames = 0usize;
            loop {
                match inbound.message().await {
                    Ok(Some(message)) => match decode_stream_response(message, sample_rate) {
                        Ok(Some(frame)) => {
                            frames += 1;
                            yield Ok(frame);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(request_id = %request_id, error = %e, "Inference stream failed");
                            yield Err(e);
                            break;
                        }
                    },
                    Ok(None) => {
                        debug!(request_id = %request_id, frames, "Inference stream complete");
                        break;
                    }
                    Err(status) => {
                        warn!(request_id = %request_id, code = ?status.code(), "Inference stream failed");
                        yield Err(status_error(status));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn close(&mut self) {
        if self.client.take().is_some() {
            debug!("Triton client closed");
        }
    }
}
