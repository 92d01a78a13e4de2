//! Speech routes
//!
//! - `POST /api/text-to-speech` streams float32 PCM (or a WAV with `?format=wav`)
//! - `POST /api/voice-convert` converts `sourceAudio` to WAV, or streams TTS
//!   when no source audio is sent
//! - `GET /health`

use axum::body::Bytes;
use axum::extract::{Multipart, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use cadence_core::{decode_wav, encode_wav, InferenceRequest, REFERENCE_SAMPLE_RATE};
use cadence_provider_triton::{request_id, DEFAULT_PRESET_VOICE};

use crate::bridge::frame_body;
use crate::error::ApiError;
use crate::state::AppState;

/// Multipart fields accepted by the speech routes
#[derive(Debug, Default)]
pub struct SpeechForm {
    /// Text to speak
    pub text: Option<String>,
    /// WAV clip of the voice to clone
    pub reference_audio: Option<Bytes>,
    /// Transcript of the reference clip
    pub reference_text: Option<String>,
    /// WAV recording to convert
    pub source_audio: Option<Bytes>,
    /// WAV clip of the voice to convert into
    pub target_audio: Option<Bytes>,
    /// Preset voice used when no target clip is sent
    pub preset_voice: Option<String>,
}

impl SpeechForm {
    /// Read all fields of a multipart body; empty fields count as absent
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Failed to read field '{}': {}", name, e)))?;
            if data.is_empty() {
                continue;
            }

            match name.as_str() {
                "text" => form.text = Some(utf8(&name, data)?),
                "referenceAudio" => form.reference_audio = Some(data),
                "referenceText" => form.reference_text = Some(utf8(&name, data)?),
                "sourceAudio" => form.source_audio = Some(data),
                "targetAudio" => form.target_audio = Some(data),
                "presetVoice" => form.preset_voice = Some(utf8(&name, data)?),
                other => debug!(field = other, "Ignoring unknown form field"),
            }
        }

        Ok(form)
    }

    /// Build a text-to-speech request
    pub fn tts_request(&self) -> Result<InferenceRequest, ApiError> {
        let text = self
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::BadRequest("Text is required".to_string()))?;

        let mut request = InferenceRequest::tts(text);

        if let Some(audio) = &self.reference_audio {
            let reference_text = self
                .reference_text
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    ApiError::BadRequest(
                        "referenceText is required when referenceAudio is provided".to_string(),
                    )
                })?;

            let wav = decode_wav(audio).map_err(|e| {
                ApiError::BadRequest(format!("Could not decode referenceAudio: {}", e))
            })?;
            debug!(
                samples = wav.samples.len(),
                sample_rate = wav.sample_rate,
                channels = wav.channel_count,
                "Decoded reference audio"
            );
            request = request.with_reference(
                wav.samples,
                wav.sample_rate,
                Some(reference_text.to_string()),
            );
            request.normalize_audio(REFERENCE_SAMPLE_RATE);
        }

        request.validate()?;
        Ok(request)
    }

    /// Build a voice-conversion request, if `sourceAudio` was sent
    pub fn conversion_request(&self) -> Result<Option<InferenceRequest>, ApiError> {
        let Some(source) = &self.source_audio else {
            return Ok(None);
        };

        let source = decode_wav(source)
            .map_err(|e| ApiError::BadRequest(format!("Could not decode sourceAudio: {}", e)))?;
        let mut request = InferenceRequest::voice_conversion(source.samples, source.sample_rate);

        request = match &self.target_audio {
            Some(target) => {
                let target = decode_wav(target).map_err(|e| {
                    ApiError::BadRequest(format!("Could not decode targetAudio: {}", e))
                })?;
                request.with_reference(target.samples, target.sample_rate, None)
            }
            None => request.with_preset(
                self.preset_voice
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PRESET_VOICE.to_string()),
            ),
        };
        request.normalize_audio(REFERENCE_SAMPLE_RATE);
        request.validate()?;
        Ok(Some(request))
    }
}

fn utf8(name: &str, data: Bytes) -> Result<String, ApiError> {
    String::from_utf8(data.to_vec())
        .map_err(|_| ApiError::BadRequest(format!("Field '{}' is not valid UTF-8", name)))
}

/// Output format selector
#[derive(Debug, Default, Deserialize)]
pub struct FormatQuery {
    /// `wav` for a complete WAV body; anything else streams
    pub format: Option<String>,
}

impl FormatQuery {
    fn wants_wav(&self) -> bool {
        self.format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("wav"))
    }
}

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "ok"
    pub status: String,
    /// Backend mode
    pub backend: String,
    /// Whether synthesis routes are available
    pub configured: bool,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        backend: state.mode().as_str().to_string(),
        configured: state.is_configured(),
    })
}

/// `POST /api/text-to-speech`
pub async fn text_to_speech(
    State(state): State<AppState>,
    Query(query): Query<FormatQuery>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    state.require_configured()?;
    let form = SpeechForm::read(multipart).await?;
    let request = form.tts_request()?;

    if query.wants_wav() {
        synthesize_wav(&state, &request).await
    } else {
        stream_speech(&state, &request).await
    }
}

/// `POST /api/voice-convert`
pub async fn voice_convert(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    state.require_configured()?;
    let form = SpeechForm::read(multipart).await?;

    match form.conversion_request()? {
        Some(request) => synthesize_wav(&state, &request).await,
        None => stream_speech(&state, &form.tts_request()?).await,
    }
}

async fn stream_speech(state: &AppState, request: &InferenceRequest) -> Result<Response, ApiError> {
    let label = request_id(request.kind);
    let guard = state.open_backend(&label).await?;
    let frames = guard.backend()?.synthesize_stream(request).await?;

    info!(request = %label, "Streaming synthesized audio");

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        frame_body(frames, guard),
    )
        .into_response())
}

async fn synthesize_wav(state: &AppState, request: &InferenceRequest) -> Result<Response, ApiError> {
    let label = request_id(request.kind);
    let mut guard = state.open_backend(&label).await?;
    let result = guard.backend()?.synthesize(request).await;
    guard.release();
    let result = result?;

    info!(
        request = %label,
        samples = result.audio.len(),
        latency_ms = result.latency.as_millis() as u64,
        "Synthesis complete"
    );

    let wav = encode_wav(&result.audio, result.sample_rate, 1);
    Ok((
        [
            (header::CONTENT_TYPE, "audio/wav"),
            (header::CONTENT_DISPOSITION, "inline; filename=\"speech.wav\""),
        ],
        wav,
    )
        .into_response())
}
