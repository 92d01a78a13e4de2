//! Cadence Core
//!
//! Shared building blocks for the Cadence streaming speech pipeline:
//!
//! - [`AudioFrame`] and [`InferenceRequest`], the data that flows from the
//!   inference transport through the HTTP bridge to the player
//! - the PCM codec (WAV encode/decode, resampling)
//! - the [`CadenceError`] taxonomy
//! - environment-driven configuration and logging bootstrap

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use codec::{decode_wav, encode_wav, normalize, resample, DecodedWav, StreamResampler};
pub use config::{load_env, BackendMode, InferenceConfig};
pub use error::{CadenceError, Result};
pub use types::*;
