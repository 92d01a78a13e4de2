//! Streaming playback for Cadence
//!
//! Consumes the bridge's chunked float32 body and plays it back gaplessly:
//!
//! - [`FrameReassembler`] re-frames arbitrary network reads on 4-byte
//!   sample boundaries
//! - [`JitterBuffer`] holds the first second (by default) before playback
//! - [`PlaybackScheduler`] places frames back-to-back on the graph clock
//! - [`AudioContext`] mixes scheduled sources into one output and feeds the
//!   spectral [`Analyser`] behind the telemetry snapshots
//! - [`PlaybackOrchestrator`] runs whole request/playback sessions against a
//!   bridge server, one at a time
//!
//! The `device` feature plays through the default cpal output device; the
//! headless driver advances the same clock in real time without one.

#![warn(clippy::all)]

pub mod analyser;
pub mod graph;
pub mod jitter;
pub mod player;
pub mod reframe;
pub mod scheduler;
pub mod session;

pub use analyser::{validate_fft_size, Analyser};
pub use graph::{AudioContext, AudioOutput, EndedCallback, OutputLease, RenderDriver};
pub use jitter::{JitterBuffer, JitterPhase, Released};
pub use player::{PlayerCallbacks, PlayerOptions, StreamingAudioPlayer, Telemetry};
pub use reframe::{FrameReassembler, Reframed};
pub use scheduler::{PlaybackScheduler, ScheduledFrame};
pub use session::{PlaybackOrchestrator, PlaybackOutcome, SpeechRequest};
