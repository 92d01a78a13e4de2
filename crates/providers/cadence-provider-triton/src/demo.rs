//! Demo backend
//!
//! Produces synthetic audio locally so the bridge and player can be
//! exercised without an inference server. Only used when `TTS_BACKEND=demo`
//! is set explicitly; an unreachable Triton server never falls back to it.

use async_trait::async_trait;
use std::f32::consts::PI;
use std::time::Duration;
use tracing::debug;

use cadence_core::{codec, AudioFrame, CadenceError, InferenceRequest, RequestKind, Result};

use crate::{FrameStream, InferenceBackend};

const SECS_PER_CHAR: f32 = 0.08;
const MIN_SECS: f32 = 0.5;
const MAX_SECS: f32 = 10.0;
const AMPLITUDE: f32 = 0.3;
const FADE_SECS: f32 = 0.01;

/// Pentatonic scale the tone walks through, one note per character
const NOTES_HZ: [f32; 5] = [220.0, 247.5, 277.2, 330.0, 370.0];

/// Backend that synthesizes tones (TTS) or echoes the source (VC)
#[derive(Debug, Clone)]
pub struct DemoBackend {
    sample_rate: u32,
    frame_samples: usize,
    frame_interval: Duration,
    ready: bool,
}

impl DemoBackend {
    /// Create a demo backend emitting 200 ms frames every 20 ms
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frame_samples: (sample_rate as usize / 5).max(1),
            frame_interval: Duration::from_millis(20),
            ready: false,
        }
    }

    /// Tone for `text`: one note per character, faded at both ends
    pub fn render_text(&self, text: &str) -> Vec<f32> {
        let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
        let secs = (chars.len() as f32 * SECS_PER_CHAR).clamp(MIN_SECS, MAX_SECS);
        let total = (secs * self.sample_rate as f32) as usize;
        if total == 0 || chars.is_empty() {
            return Vec::new();
        }

        let per_note = (total / chars.len()).max(1);
        let fade = ((FADE_SECS * self.sample_rate as f32) as usize).max(1);
        let rate = self.sample_rate as f32;

        (0..total)
            .map(|i| {
                let note = chars[(i / per_note).min(chars.len() - 1)] as usize % NOTES_HZ.len();
                let t = i as f32 / rate;
                let envelope = (i.min(total - 1 - i) as f32 / fade as f32).min(1.0);
                AMPLITUDE * envelope * (2.0 * PI * NOTES_HZ[note] * t).sin()
            })
            .collect()
    }

    fn render(&self, request: &InferenceRequest) -> Vec<f32> {
        match request.kind {
            RequestKind::TextToSpeech => {
                self.render_text(request.target_text.as_deref().unwrap_or_default())
            }
            RequestKind::VoiceConversion => codec::resample(
                request.source_audio.as_deref().unwrap_or_default(),
                request.source_sample_rate,
                self.sample_rate,
            ),
        }
    }
}

#[async_trait]
impl InferenceBackend for DemoBackend {
    fn name(&self) -> &str {
        "demo"
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn initialize(&mut self) -> Result<()> {
        self.ready = true;
        Ok(())
    }

    async fn synthesize_stream(&self, request: &InferenceRequest) -> Result<FrameStream> {
        if !self.ready {
            return Err(CadenceError::connection("Demo backend is not initialized"));
        }
        request.validate()?;

        let audio = self.render(request);
        let frames: Vec<AudioFrame> = audio
            .chunks(self.frame_samples)
            .map(|chunk| AudioFrame::new(chunk.to_vec(), self.sample_rate))
            .collect();
        let interval = self.frame_interval;

        debug!(frames = frames.len(), samples = audio.len(), "Demo synthesis");

        let stream = async_stream::stream! {
            for frame in frames {
                tokio::time::sleep(interval).await;
                yield Ok(frame);
            }
        };
        Ok(Box::pin(stream))
    }

    fn close(&mut self) {
        self.ready = false;
    }
}
