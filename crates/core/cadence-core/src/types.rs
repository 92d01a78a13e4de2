//! Core types shared by the transport, bridge and player

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::codec;
use crate::{CadenceError, Result};

/// Default synthesis output sample rate (Hz)
pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Sample rate the model expects for reference and source audio (Hz)
pub const REFERENCE_SAMPLE_RATE: u32 = 16000;

/// Bytes per little-endian float32 sample on the wire
pub const BYTES_PER_SAMPLE: usize = 4;

/// An immutable, ordered chunk of mono float32 PCM samples.
///
/// A zero-length frame is the end-of-stream sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioFrame {
    /// Create a frame from samples produced at `sample_rate`
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// The end-of-stream sentinel
    pub fn sentinel(sample_rate: u32) -> Self {
        Self::new(Vec::new(), sample_rate)
    }

    /// Reinterpret a byte slice as little-endian float32 samples.
    ///
    /// The slice length must be a multiple of four.
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32) -> Result<Self> {
        if bytes.len() % BYTES_PER_SAMPLE != 0 {
            return Err(CadenceError::validation(format!(
                "float32 payload of {} bytes is not 4-byte aligned",
                bytes.len()
            )));
        }
        let samples: Vec<f32> = bytes
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Self::new(samples, sample_rate))
    }

    /// Raw little-endian float32 bytes of this frame
    pub fn to_le_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.samples.len() * BYTES_PER_SAMPLE);
        for sample in self.samples.iter() {
            buf.put_f32_le(*sample);
        }
        buf.freeze()
    }

    /// Samples of this frame
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Shared handle to the samples (cheap clone)
    pub fn shared_samples(&self) -> Arc<[f32]> {
        Arc::clone(&self.samples)
    }

    /// Sample rate the frame was produced at
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the frame has no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Zero-length frames, and only those, terminate a stream
    pub fn is_sentinel(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Playback duration
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs())
    }
}

/// Concatenate frames in order into one sample buffer
pub fn concat_frames<'a>(frames: impl IntoIterator<Item = &'a AudioFrame>) -> Vec<f32> {
    let mut out = Vec::new();
    for frame in frames {
        out.extend_from_slice(frame.samples());
    }
    out
}

/// What kind of inference a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    /// Text-to-speech, optionally cloning a reference voice
    TextToSpeech,
    /// Voice conversion of a source recording
    VoiceConversion,
}

impl RequestKind {
    /// Short tag used in correlation ids and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextToSpeech => "tts",
            Self::VoiceConversion => "vc",
        }
    }
}

/// Voice the output should sound like
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceSelection {
    /// Server default voice
    Default,
    /// Clone from a reference clip (TTS: clip + transcript; VC: clip only)
    Reference {
        /// Reference samples
        samples: Vec<f32>,
        /// Rate the reference samples are currently at
        sample_rate: u32,
        /// Transcript of the reference clip (required for TTS)
        text: Option<String>,
    },
    /// Named server-side preset voice
    Preset(String),
}

/// A request to the inference transport client
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    /// Request kind
    pub kind: RequestKind,
    /// Text to speak (TTS)
    pub target_text: Option<String>,
    /// Audio to convert (VC)
    pub source_audio: Option<Vec<f32>>,
    /// Rate of the source audio
    pub source_sample_rate: u32,
    /// Reference clip or preset voice, mutually exclusive
    pub voice: VoiceSelection,
}

impl InferenceRequest {
    /// Text-to-speech request using the server's default voice
    pub fn tts(target_text: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::TextToSpeech,
            target_text: Some(target_text.into()),
            source_audio: None,
            source_sample_rate: REFERENCE_SAMPLE_RATE,
            voice: VoiceSelection::Default,
        }
    }

    /// Voice conversion request for a source recording
    pub fn voice_conversion(source_audio: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            kind: RequestKind::VoiceConversion,
            target_text: None,
            source_audio: Some(source_audio),
            source_sample_rate: sample_rate,
            voice: VoiceSelection::Default,
        }
    }

    /// Clone the voice of a reference clip
    pub fn with_reference(
        mut self,
        samples: Vec<f32>,
        sample_rate: u32,
        text: Option<String>,
    ) -> Self {
        self.voice = VoiceSelection::Reference {
            samples,
            sample_rate,
            text,
        };
        self
    }

    /// Use a named preset voice
    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.voice = VoiceSelection::Preset(preset.into());
        self
    }

    /// Resample reference and source audio to `target_rate`
    pub fn normalize_audio(&mut self, target_rate: u32) {
        if let VoiceSelection::Reference {
            samples,
            sample_rate,
            ..
        } = &mut self.voice
        {
            if *sample_rate != target_rate {
                tracing::debug!(
                    from = *sample_rate,
                    to = target_rate,
                    samples = samples.len(),
                    "Resampling reference audio"
                );
                *samples = codec::resample(samples, *sample_rate, target_rate);
                *sample_rate = target_rate;
            }
        }

        if let Some(source) = &mut self.source_audio {
            if self.source_sample_rate != target_rate {
                *source = codec::resample(source, self.source_sample_rate, target_rate);
                self.source_sample_rate = target_rate;
            }
        }
    }

    /// Check the per-kind invariants
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            RequestKind::TextToSpeech => {
                let text = self.target_text.as_deref().unwrap_or_default();
                if text.trim().is_empty() {
                    return Err(CadenceError::validation("target text is required"));
                }
                if let VoiceSelection::Reference { samples, text, .. } = &self.voice {
                    if samples.is_empty() {
                        return Err(CadenceError::validation("reference audio is empty"));
                    }
                    if text.as_deref().map_or(true, |t| t.trim().is_empty()) {
                        return Err(CadenceError::validation(
                            "reference text is required when reference audio is given",
                        ));
                    }
                }
            }
            RequestKind::VoiceConversion => {
                if self.source_audio.as_ref().map_or(true, |s| s.is_empty()) {
                    return Err(CadenceError::validation("source audio is required"));
                }
            }
        }
        Ok(())
    }
}

/// Result of a fully drained synthesis or conversion
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    /// Concatenated output samples
    pub audio: Vec<f32>,
    /// Output sample rate
    pub sample_rate: u32,
    /// Wall-clock latency from call start to stream end
    pub latency: Duration,
}

impl SynthesisResult {
    /// Duration of the produced audio in seconds
    pub fn audio_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.audio.len() as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_is_only_zero_length() {
        assert!(AudioFrame::sentinel(24000).is_sentinel());
        assert!(!AudioFrame::new(vec![0.0], 24000).is_sentinel());
        assert!(!AudioFrame::new(vec![0.0, 0.0], 24000).is_sentinel());
    }

    #[test]
    fn test_frame_bytes() {
        let frame = AudioFrame::new(vec![0.5, -0.25, 1.0], 24000);
        let bytes = frame.to_le_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..4], &0.5f32.to_le_bytes());

        let decoded = AudioFrame::from_le_bytes(&bytes, 24000).unwrap();
        assert_eq!(decoded, frame);

        assert!(AudioFrame::from_le_bytes(&bytes[..5], 24000).is_err());
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(vec![0.0; 12000], 24000);
        assert!((frame.duration_secs() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_tts_validation() {
        assert!(InferenceRequest::tts("你好").validate().is_ok());
        assert!(InferenceRequest::tts("   ").validate().is_err());

        let missing_text =
            InferenceRequest::tts("hello").with_reference(vec![0.1; 16], 16000, None);
        assert!(missing_text.validate().is_err());

        let ok = InferenceRequest::tts("hello").with_reference(
            vec![0.1; 16],
            16000,
            Some("reference".to_string()),
        );
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_vc_validation() {
        assert!(InferenceRequest::voice_conversion(vec![], 16000).validate().is_err());
        let request = InferenceRequest::voice_conversion(vec![0.0; 10], 16000).with_preset("alba");
        assert!(request.validate().is_ok());
        assert_eq!(request.voice, VoiceSelection::Preset("alba".to_string()));
    }

    #[test]
    fn test_reference_normalized_to_model_rate() {
        let mut request = InferenceRequest::tts("hello").with_reference(
            vec![0.0; 44100],
            44100,
            Some("ref".to_string()),
        );
        request.normalize_audio(REFERENCE_SAMPLE_RATE);

        match &request.voice {
            VoiceSelection::Reference {
                samples,
                sample_rate,
                ..
            } => {
                assert_eq!(*sample_rate, 16000);
                assert_eq!(samples.len(), (44100f64 * 16000.0 / 44100.0).floor() as usize);
            }
            other => panic!("unexpected voice: {:?}", other),
        }
    }
}
