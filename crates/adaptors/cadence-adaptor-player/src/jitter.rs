//! Jitter buffer
//!
//! Holds frames until the buffered duration reaches the threshold, then
//! releases them in order and forwards every later frame immediately.

use cadence_core::AudioFrame;

/// Buffer phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterPhase {
    /// Accumulating frames
    Buffering,
    /// Forwarding frames as they arrive
    Draining,
}

/// What a push released
#[derive(Debug, Default)]
pub struct Released {
    /// Frames to schedule, in order
    pub frames: Vec<AudioFrame>,
    /// Set on the single push that crossed the threshold
    pub buffering_complete: bool,
}

/// Per-session jitter buffer; never reused across sessions
#[derive(Debug)]
pub struct JitterBuffer {
    threshold_secs: f64,
    phase: JitterPhase,
    buffered: Vec<AudioFrame>,
    buffered_secs: f64,
}

impl JitterBuffer {
    /// Create a buffer that drains after `threshold_secs` of audio
    pub fn new(threshold_secs: f64) -> Self {
        Self {
            threshold_secs,
            phase: JitterPhase::Buffering,
            buffered: Vec::new(),
            buffered_secs: 0.0,
        }
    }

    /// Current phase
    pub fn phase(&self) -> JitterPhase {
        self.phase
    }

    /// Seconds of audio currently held
    pub fn buffered_secs(&self) -> f64 {
        self.buffered_secs
    }

    /// Add a frame
    pub fn push(&mut self, frame: AudioFrame) -> Released {
        match self.phase {
            JitterPhase::Draining => Released {
                frames: vec![frame],
                buffering_complete: false,
            },
            JitterPhase::Buffering => {
                self.buffered_secs += frame.duration_secs();
                self.buffered.push(frame);

                if self.buffered_secs < self.threshold_secs {
                    return Released::default();
                }

                self.phase = JitterPhase::Draining;
                self.buffered_secs = 0.0;
                Released {
                    frames: std::mem::take(&mut self.buffered),
                    buffering_complete: true,
                }
            }
        }
    }

    /// Stream ended: release whatever is still held.
    ///
    /// A stream shorter than the threshold starts draining here without
    /// ever reporting buffering complete.
    pub fn finish(&mut self) -> Vec<AudioFrame> {
        self.phase = JitterPhase::Draining;
        self.buffered_secs = 0.0;
        std::mem::take(&mut self.buffered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(secs: f64) -> AudioFrame {
        AudioFrame::new(vec![0.0; (secs * 1000.0) as usize], 1000)
    }

    #[test]
    fn test_fires_once_at_threshold() {
        let mut buffer = JitterBuffer::new(1.0);
        let mut fired = 0;
        let mut released = 0;

        for _ in 0..10 {
            let out = buffer.push(frame(0.3));
            if out.buffering_complete {
                fired += 1;
                // 4 * 0.3 s is the first total >= 1.0 s
                assert_eq!(out.frames.len(), 4);
            }
            released += out.frames.len();
        }

        assert_eq!(fired, 1);
        assert_eq!(released, 10);
        assert_eq!(buffer.phase(), JitterPhase::Draining);
        assert!(buffer.finish().is_empty());
    }

    #[test]
    fn test_short_stream_never_fires() {
        let mut buffer = JitterBuffer::new(1.0);
        for _ in 0..3 {
            let out = buffer.push(frame(0.2));
            assert!(!out.buffering_complete);
            assert!(out.frames.is_empty());
        }
        assert!((buffer.buffered_secs() - 0.6).abs() < 1e-9);
        assert_eq!(buffer.finish().len(), 3);
    }

    #[test]
    fn test_order_preserved() {
        let mut buffer = JitterBuffer::new(0.25);
        let frames: Vec<AudioFrame> = (1..=5)
            .map(|n| AudioFrame::new(vec![n as f32; 100], 1000))
            .collect();

        let mut out = Vec::new();
        for f in frames.clone() {
            out.extend(buffer.push(f).frames);
        }
        out.extend(buffer.finish());
        assert_eq!(out, frames);
    }
}
