//! Re-framing of a network byte stream into float32 frames
//!
//! Network reads split the body at arbitrary offsets. Bytes are accumulated
//! and the largest 4-byte-aligned prefix is released as a frame; the 1-3
//! byte remainder waits for the next read.

use bytes::{Buf, BytesMut};
use tracing::warn;

use cadence_core::{AudioFrame, Result, BYTES_PER_SAMPLE};

/// Outcome of feeding one network read
#[derive(Debug, Clone, PartialEq)]
pub enum Reframed {
    /// A complete frame
    Frame(AudioFrame),
    /// Not enough bytes for a whole sample yet
    Pending,
    /// Zero-length read: the producer finished
    EndOfStream,
}

/// Byte accumulator that emits aligned frames
#[derive(Debug)]
pub struct FrameReassembler {
    pending: BytesMut,
    sample_rate: u32,
}

impl FrameReassembler {
    /// Create an empty accumulator for frames at `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        Self {
            pending: BytesMut::new(),
            sample_rate,
        }
    }

    /// Feed one network read
    pub fn push(&mut self, chunk: &[u8]) -> Result<Reframed> {
        if chunk.is_empty() {
            return Ok(Reframed::EndOfStream);
        }

        self.pending.extend_from_slice(chunk);
        let aligned = self.pending.len() - self.pending.len() % BYTES_PER_SAMPLE;
        if aligned == 0 {
            return Ok(Reframed::Pending);
        }

        let ready = self.pending.split_to(aligned);
        Ok(Reframed::Frame(AudioFrame::from_le_bytes(
            ready.chunk(),
            self.sample_rate,
        )?))
    }

    /// Bytes waiting for the rest of their sample
    pub fn remainder_len(&self) -> usize {
        self.pending.len()
    }

    /// End of body; a trailing partial sample is dropped
    pub fn finish(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                bytes = self.pending.len(),
                "Stream ended inside a sample; dropping partial bytes"
            );
            self.pending.clear();
        }
    }
}
