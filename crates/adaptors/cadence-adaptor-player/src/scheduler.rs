//! Gapless frame scheduling on the graph clock
//!
//! Each frame starts where the previous one ends. If the clock has already
//! passed that point the producer under-ran: the frame starts now, leaving
//! an audible gap that is logged and counted but never treated as an error.
//! Completion is tracked per source through the graph's ended callbacks.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use cadence_core::{AudioFrame, CadenceError, Result, StreamResampler};

use crate::graph::AudioContext;

/// Where a frame landed on the graph clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledFrame {
    pub id: u64,
    pub start_frame: u64,
    pub start_time: f64,
    pub duration_secs: f64,
}

#[derive(Debug, Default)]
struct SchedState {
    next_start_frame: Option<u64>,
    active: HashSet<u64>,
    next_id: u64,
    underruns: u64,
    scheduled: u64,
    resampler: Option<StreamResampler>,
}

#[derive(Clone)]
pub struct PlaybackScheduler {
    context: AudioContext,
    state: Arc<Mutex<SchedState>>,
    playing: Arc<watch::Sender<bool>>,
}

impl PlaybackScheduler {
    pub fn new(context: AudioContext) -> Self {
        let (playing, _) = watch::channel(false);
        Self {
            context,
            state: Arc::new(Mutex::new(SchedState::default())),
            playing: Arc::new(playing),
        }
    }

    /// Place `frame` immediately after the previously scheduled one.
    ///
    /// Frames at another rate are resampled to the graph rate with phase
    /// carried over from the previous frame of the session.
    pub fn schedule(&self, frame: &AudioFrame) -> Result<ScheduledFrame> {
        if frame.is_empty() {
            return Err(CadenceError::validation("Cannot schedule an empty frame"));
        }

        let graph_rate = self.context.sample_rate();
        let mut state = self.state.lock();

        let samples: Arc<[f32]> = if frame.sample_rate() == graph_rate {
            frame.shared_samples()
        } else {
            let rates = (frame.sample_rate(), graph_rate);
            if state.resampler.as_ref().map(StreamResampler::rates) != Some(rates) {
                state.resampler = Some(StreamResampler::new(rates.0, rates.1));
            }
            state
                .resampler
                .get_or_insert_with(|| StreamResampler::new(rates.0, rates.1))
                .process(frame.samples())
                .into()
        };
        let length = samples.len() as u64;

        let now = self.context.current_frame();
        let start_frame = match state.next_start_frame {
            None => now,
            Some(next) if next < now => {
                state.underruns += 1;
                warn!(
                    gap_ms = (now - next) as f64 * 1000.0 / graph_rate as f64,
                    underruns = state.underruns,
                    "Playback under-run; resuming after gap"
                );
                now
            }
            Some(next) => next,
        };

        let id = state.next_id;
        state.next_id += 1;
        state.scheduled += 1;

        // Short frames can vanish when downsampling; their time is already
        // carried by the resampler.
        if length == 0 {
            state.next_start_frame = Some(start_frame);
            return Ok(ScheduledFrame {
                id,
                start_frame,
                start_time: start_frame as f64 / graph_rate as f64,
                duration_secs: 0.0,
            });
        }

        state.active.insert(id);
        self.playing.send_replace(true);

        let ended_state = Arc::clone(&self.state);
        let playing = Arc::clone(&self.playing);
        let on_ended = Box::new(move || {
            let mut state = ended_state.lock();
            if state.active.remove(&id) && state.active.is_empty() {
                playing.send_replace(false);
            }
        });

        if let Err(e) = self
            .context
            .start_source(samples, graph_rate, start_frame, on_ended)
        {
            state.active.remove(&id);
            state.scheduled -= 1;
            if state.active.is_empty() {
                self.playing.send_replace(false);
            }
            return Err(e);
        }

        state.next_start_frame = Some(start_frame + length);

        Ok(ScheduledFrame {
            id,
            start_frame,
            start_time: start_frame as f64 / graph_rate as f64,
            duration_secs: length as f64 / graph_rate as f64,
        })
    }

    /// Start a new session: its first frame plays at the current clock.
    ///
    /// Under-run and scheduled counts restart from zero.
    pub fn begin_session(&self) {
        let mut state = self.state.lock();
        state.next_start_frame = None;
        state.underruns = 0;
        state.scheduled = 0;
        state.resampler = None;
    }

    /// True while any scheduled frame has not finished playing
    pub fn is_playing(&self) -> bool {
        *self.playing.borrow()
    }

    /// Resolve once every scheduled frame has ended (immediately if none)
    pub async fn wait_drained(&self) -> Result<()> {
        let mut rx = self.playing.subscribe();
        rx.wait_for(|playing| !*playing)
            .await
            .map(|_| ())
            .map_err(|_| CadenceError::Cancelled)
    }

    /// Halt every pending frame and forget the schedule
    pub fn stop(&self) {
        let stopped = self.context.stop_all();
        let mut state = self.state.lock();
        state.active.clear();
        state.next_start_frame = None;
        state.resampler = None;
        self.playing.send_replace(false);
        if stopped > 0 {
            debug!(stopped, "Scheduled frames stopped");
        }
    }

    pub fn underruns(&self) -> u64 {
        self.state.lock().underruns
    }

    pub fn scheduled(&self) -> u64 {
        self.state.lock().scheduled
    }

    pub fn active(&self) -> usize {
        self.state.lock().active.len()
    }
}
