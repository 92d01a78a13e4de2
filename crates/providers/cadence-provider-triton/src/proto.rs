//! Wire messages and client for Triton's `GRPCInferenceService`
//!
//! Generated from the `grpc_service.proto` subset under `proto/`: the
//! `ServerLive` probe and the bidirectional `ModelStreamInfer` call. Field
//! numbers match upstream so any Triton (or KServe v2) server understands
//! these messages.

#![allow(clippy::all)]

tonic::include_proto!("inference");

pub use grpc_inference_service_client::GrpcInferenceServiceClient;
pub use grpc_inference_service_server::{GrpcInferenceService, GrpcInferenceServiceServer};

/// Request parameter asking the server to emit an empty final response
pub const ENABLE_EMPTY_FINAL_RESPONSE: &str = "triton_enable_empty_final_response";

/// Response parameter marking the last response of a request
pub const FINAL_RESPONSE: &str = "triton_final_response";

impl InferParameter {
    /// Boolean parameter
    pub fn bool(value: bool) -> Self {
        Self {
            parameter_choice: Some(infer_parameter::ParameterChoice::BoolParam(value)),
        }
    }

    /// Value if this is a boolean parameter
    pub fn as_bool(&self) -> Option<bool> {
        match self.parameter_choice {
            Some(infer_parameter::ParameterChoice::BoolParam(v)) => Some(v),
            _ => None,
        }
    }
}

impl ModelInferResponse {
    /// Whether this response carries the final-response marker
    pub fn is_final(&self) -> bool {
        self.parameters
            .get(FINAL_RESPONSE)
            .and_then(InferParameter::as_bool)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_final_marker() {
        let mut response = ModelInferResponse::default();
        assert!(!response.is_final());

        response
            .parameters
            .insert(FINAL_RESPONSE.to_string(), InferParameter::bool(true));
        assert!(response.is_final());

        response
            .parameters
            .insert(FINAL_RESPONSE.to_string(), InferParameter::bool(false));
        assert!(!response.is_final());
    }

    #[test]
    fn test_stream_response_wire_decode() {
        let mut infer = ModelInferResponse {
            model_name: "cosyvoice2".to_string(),
            id: "tts-1".to_string(),
            ..Default::default()
        };
        infer.outputs.push(InferOutputTensor {
            name: "waveform".to_string(),
            datatype: "FP32".to_string(),
            shape: vec![1, 2],
            ..Default::default()
        });
        let mut raw = Vec::new();
        raw.extend_from_slice(&0.5f32.to_le_bytes());
        raw.extend_from_slice(&(-0.5f32).to_le_bytes());
        infer.raw_output_contents.push(raw);

        let message = ModelStreamInferResponse {
            error_message: String::new(),
            infer_response: Some(infer.clone()),
        };
        let encoded = message.encode_to_vec();
        let decoded = ModelStreamInferResponse::decode(encoded.as_slice()).unwrap();

        assert_eq!(decoded.infer_response, Some(infer));
        assert!(decoded.error_message.is_empty());
    }
}
