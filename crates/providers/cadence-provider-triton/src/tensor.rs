//! Typed input tensors and request assembly

use cadence_core::{CadenceError, InferenceRequest, RequestKind, Result, VoiceSelection};

use crate::proto::{InferInputTensor, InferTensorContents};

/// Preset voice used for voice conversion when no reference is given
pub const DEFAULT_PRESET_VOICE: &str = "default";

/// Tensor element type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// Variable-length byte strings
    Bytes,
    /// 32-bit float
    Fp32,
    /// 32-bit signed integer
    Int32,
}

impl DataType {
    /// Triton datatype name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bytes => "BYTES",
            Self::Fp32 => "FP32",
            Self::Int32 => "INT32",
        }
    }
}

/// Tensor payload
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    /// BYTES elements
    Bytes(Vec<Vec<u8>>),
    /// FP32 elements
    Fp32(Vec<f32>),
    /// INT32 elements
    Int32(Vec<i32>),
}

impl TensorData {
    /// Element type of the payload
    pub fn datatype(&self) -> DataType {
        match self {
            Self::Bytes(_) => DataType::Bytes,
            Self::Fp32(_) => DataType::Fp32,
            Self::Int32(_) => DataType::Int32,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            Self::Bytes(v) => v.len(),
            Self::Fp32(v) => v.len(),
            Self::Int32(v) => v.len(),
        }
    }

    /// Check if the payload has no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named input tensor with its shape
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    /// Input name the model declares
    pub name: String,
    /// Shape; the element product must equal the payload length
    pub shape: Vec<i64>,
    /// Payload
    pub data: TensorData,
}

impl InputTensor {
    /// UTF-8 text as a BYTES tensor of shape [1, 1]
    pub fn text(name: impl Into<String>, text: &str) -> Self {
        Self {
            name: name.into(),
            shape: vec![1, 1],
            data: TensorData::Bytes(vec![text.as_bytes().to_vec()]),
        }
    }

    /// Samples as an FP32 tensor of shape [1, n]
    pub fn samples(name: impl Into<String>, samples: &[f32]) -> Self {
        Self {
            name: name.into(),
            shape: vec![1, samples.len() as i64],
            data: TensorData::Fp32(samples.to_vec()),
        }
    }

    /// A sample count as an INT32 tensor of shape [1, 1]
    pub fn length(name: impl Into<String>, len: usize) -> Result<Self> {
        let name = name.into();
        let value = i32::try_from(len).map_err(|_| {
            CadenceError::validation(format!("{} of {} samples exceeds INT32", name, len))
        })?;
        Ok(Self {
            name,
            shape: vec![1, 1],
            data: TensorData::Int32(vec![value]),
        })
    }

    /// Check that the shape describes the payload
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CadenceError::validation("tensor name is empty"));
        }
        if self.shape.is_empty() || self.shape.iter().any(|d| *d < 0) {
            return Err(CadenceError::validation(format!(
                "tensor '{}' has invalid shape {:?}",
                self.name, self.shape
            )));
        }
        let elements: i64 = self.shape.iter().product();
        if elements as usize != self.data.len() {
            return Err(CadenceError::validation(format!(
                "tensor '{}' shape {:?} does not match {} elements",
                self.name,
                self.shape,
                self.data.len()
            )));
        }
        Ok(())
    }

    /// Convert to the wire message
    pub fn into_proto(self) -> Result<InferInputTensor> {
        self.validate()?;
        let datatype = self.data.datatype().as_str().to_string();
        let mut contents = InferTensorContents::default();
        match self.data {
            TensorData::Bytes(v) => contents.bytes_contents = v,
            TensorData::Fp32(v) => contents.fp32_contents = v,
            TensorData::Int32(v) => contents.int_contents = v,
        }
        Ok(InferInputTensor {
            name: self.name,
            datatype,
            shape: self.shape,
            contents: Some(contents),
            ..Default::default()
        })
    }
}

/// Assemble the model inputs for a request.
///
/// The request must already be normalized to the model's reference rate.
pub fn build_inputs(request: &InferenceRequest) -> Result<Vec<InputTensor>> {
    request.validate()?;

    let mut inputs = Vec::new();
    match request.kind {
        RequestKind::TextToSpeech => {
            let text = request.target_text.as_deref().unwrap_or_default();
            inputs.push(InputTensor::text("target_text", text));

            match &request.voice {
                VoiceSelection::Reference { samples, text, .. } => {
                    inputs.push(InputTensor::samples("reference_wav", samples));
                    inputs.push(InputTensor::length("reference_wav_len", samples.len())?);
                    inputs.push(InputTensor::text(
                        "reference_text",
                        text.as_deref().unwrap_or_default(),
                    ));
                }
                VoiceSelection::Preset(name) => {
                    inputs.push(InputTensor::text("preset_voice", name));
                }
                VoiceSelection::Default => {}
            }
        }
        RequestKind::VoiceConversion => {
            let source = request.source_audio.as_deref().unwrap_or_default();
            inputs.push(InputTensor::samples("source_wav", source));
            inputs.push(InputTensor::length("source_wav_len", source.len())?);

            match &request.voice {
                VoiceSelection::Reference { samples, .. } => {
                    inputs.push(InputTensor::samples("reference_wav", samples));
                    inputs.push(InputTensor::length("reference_wav_len", samples.len())?);
                }
                VoiceSelection::Preset(name) => {
                    inputs.push(InputTensor::text("preset_voice", name));
                }
                VoiceSelection::Default => {
                    inputs.push(InputTensor::text("preset_voice", DEFAULT_PRESET_VOICE));
                }
            }
        }
    }

    Ok(inputs)
}
