//! Playback orchestration against a running speech bridge
//!
//! Posts the multipart request, plays the streamed response and hands back
//! the final WAV artifact. One session runs per orchestrator: starting a new
//! one cancels the previous session and waits for it to wind down first.

use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use cadence_core::{encode_wav, CadenceError, Result};

use crate::graph::{AudioOutput, RenderDriver};
use crate::player::{PlayerCallbacks, PlayerOptions, StreamingAudioPlayer};

/// Text-to-speech request, optionally cloning a reference voice
#[derive(Debug, Clone, Default)]
pub struct SpeechRequest {
    pub text: String,
    /// WAV bytes of the voice to imitate
    pub reference_wav: Option<Vec<u8>>,
    /// Transcript of `reference_wav`
    pub reference_text: Option<String>,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_reference(mut self, wav: Vec<u8>, transcript: impl Into<String>) -> Self {
        self.reference_wav = Some(wav);
        self.reference_text = Some(transcript.into());
        self
    }

    fn into_form(self) -> Result<Form> {
        let mut form = Form::new().text("text", self.text);
        if let Some(wav) = self.reference_wav {
            let part = Part::bytes(wav)
                .file_name("reference.wav")
                .mime_str("audio/wav")
                .map_err(|e| CadenceError::other(format!("Invalid reference part: {}", e)))?;
            form = form.part("referenceAudio", part);
        }
        if let Some(transcript) = self.reference_text {
            form = form.text("referenceText", transcript);
        }
        Ok(form)
    }
}

/// Result of a completed session
#[derive(Debug, Clone)]
pub struct PlaybackOutcome {
    /// Every received sample, in order
    pub samples: Vec<f32>,
    /// `samples` as a 16-bit mono WAV file
    pub wav: Bytes,
    pub sample_rate: u32,
    pub bytes_received: u64,
    /// Request to end of playback
    pub duration: Duration,
}

impl PlaybackOutcome {
    pub fn audio_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

struct ActiveSession {
    id: u64,
    cancel: watch::Sender<bool>,
    // Resolves (sender dropped) when the session has fully wound down
    done: watch::Receiver<()>,
}

pub struct PlaybackOrchestrator {
    http: reqwest::Client,
    base_url: String,
    output: AudioOutput,
    options: PlayerOptions,
    driver: RenderDriver,
    active: Mutex<Option<ActiveSession>>,
    next_session: AtomicU64,
}

impl PlaybackOrchestrator {
    pub fn new(base_url: impl Into<String>, output: AudioOutput, options: PlayerOptions) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            output,
            options,
            driver: RenderDriver::Headless,
            active: Mutex::new(None),
            next_session: AtomicU64::new(1),
        }
    }

    pub fn with_driver(mut self, driver: RenderDriver) -> Self {
        self.driver = driver;
        self
    }

    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Synthesize and play `request`, superseding any session in flight
    pub async fn play(
        &self,
        request: SpeechRequest,
        callbacks: PlayerCallbacks,
    ) -> Result<PlaybackOutcome> {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let (_done, done_rx) = watch::channel(());

        let previous = self.active.lock().replace(ActiveSession {
            id,
            cancel: cancel_tx,
            done: done_rx,
        });

        if let Some(previous) = previous {
            info!(session = id, superseded = previous.id, "Cancelling previous session");
            previous.cancel.send_replace(true);
            let mut done = previous.done;
            tokio::select! {
                _ = done.changed() => {}
                _ = cancel_rx.wait_for(|c| *c) => {
                    self.clear(id);
                    return Err(CadenceError::Cancelled);
                }
            }
        }

        let result = tokio::select! {
            biased;
            _ = cancel_rx.wait_for(|c| *c) => Err(CadenceError::Cancelled),
            outcome = self.run(request, &callbacks) => outcome,
        };

        match &result {
            Ok(outcome) => info!(
                session = id,
                samples = outcome.samples.len(),
                bytes = outcome.bytes_received,
                latency_ms = outcome.duration.as_millis() as u64,
                "Session finished"
            ),
            Err(CadenceError::Cancelled) => info!(session = id, "Session cancelled"),
            Err(e) => warn!(session = id, "Session failed: {}", e),
        }

        self.clear(id);
        result
    }

    /// Abort the session in flight, if any
    pub fn cancel(&self) {
        if let Some(active) = self.active.lock().as_ref() {
            debug!(session = active.id, "Cancel requested");
            active.cancel.send_replace(true);
        }
    }

    fn clear(&self, id: u64) {
        let mut active = self.active.lock();
        if active.as_ref().map(|a| a.id) == Some(id) {
            *active = None;
        }
    }

    async fn run(&self, request: SpeechRequest, callbacks: &PlayerCallbacks) -> Result<PlaybackOutcome> {
        request_is_valid(&request)?;

        // Take the output before asking the server for work
        let player = StreamingAudioPlayer::new(&self.output, self.options.clone(), self.driver)?;
        let started = Instant::now();

        let url = format!("{}/api/text-to-speech", self.base_url);
        let response = self
            .http
            .post(&url)
            .multipart(request.into_form()?)
            .send()
            .await
            .map_err(|e| CadenceError::connection(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.canonical_reason().unwrap_or("Request failed").to_string(),
            };
            return Err(CadenceError::http(status.as_u16(), message));
        }

        let result = player.consume(response.bytes_stream(), callbacks).await;
        let bytes_received = player.bytes_received();
        player.dispose();
        let samples = result?;

        let sample_rate = self.options.sample_rate;
        Ok(PlaybackOutcome {
            wav: encode_wav(&samples, sample_rate, 1),
            samples,
            sample_rate,
            bytes_received,
            duration: started.elapsed(),
        })
    }
}

fn request_is_valid(request: &SpeechRequest) -> Result<()> {
    if request.text.trim().is_empty() {
        return Err(CadenceError::validation("Text is required"));
    }
    if request.reference_wav.is_some() && request.reference_text.is_none() {
        return Err(CadenceError::validation(
            "referenceText is required with referenceAudio",
        ));
    }
    Ok(())
}
