//! Audio graph: a clocked mixer of scheduled sources feeding one output
//!
//! The graph clock counts rendered frames. Sources are placed on that clock
//! at an absolute start frame and mixed into every render block they
//! overlap; once a source's last sample has been rendered its ended
//! callback fires. Rendering is driven either manually (tests), by a
//! headless real-time ticker, or by a cpal output stream.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use cadence_core::{resample, CadenceError, Result};

use crate::analyser::Analyser;

/// Called once when a source has finished playing
pub type EndedCallback = Box<dyn FnOnce() + Send>;

/// Headless render quantum
const HEADLESS_TICK: Duration = Duration::from_millis(10);

/// A named output destination that only one graph may hold at a time
#[derive(Debug, Clone)]
pub struct AudioOutput {
    name: String,
    in_use: Arc<AtomicBool>,
}

impl AudioOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            in_use: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Process-wide default output
    pub fn default_output() -> &'static AudioOutput {
        static DEFAULT: OnceLock<AudioOutput> = OnceLock::new();
        DEFAULT.get_or_init(|| AudioOutput::new("default"))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// Take exclusive ownership of the output
    pub fn acquire(&self) -> Result<OutputLease> {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CadenceError::OutputBusy(self.name.clone()));
        }
        debug!(output = %self.name, "Audio output acquired");
        Ok(OutputLease {
            name: self.name.clone(),
            in_use: Arc::clone(&self.in_use),
        })
    }
}

/// Exclusive hold on an [`AudioOutput`], released on drop
#[derive(Debug)]
pub struct OutputLease {
    name: String,
    in_use: Arc<AtomicBool>,
}

impl OutputLease {
    pub fn output_name(&self) -> &str {
        &self.name
    }
}

impl Drop for OutputLease {
    fn drop(&mut self) {
        self.in_use.store(false, Ordering::Release);
        debug!(output = %self.name, "Audio output released");
    }
}

/// What advances the graph clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderDriver {
    /// Only explicit [`AudioContext::render`] calls
    Manual,
    /// A tokio interval rendering 10 ms blocks into nowhere
    Headless,
    /// The default cpal output device
    #[cfg(feature = "device")]
    Device,
}

enum DriverHandle {
    Task(JoinHandle<()>),
    #[cfg(feature = "device")]
    Device(std::sync::mpsc::Sender<Weak<GraphInner>>),
}

impl DriverHandle {
    fn stop(self) {
        match self {
            DriverHandle::Task(handle) => handle.abort(),
            // Dropping the sender ends the device thread, which drops the stream
            #[cfg(feature = "device")]
            DriverHandle::Device(_tx) => {}
        }
    }
}

struct Source {
    id: u64,
    samples: Arc<[f32]>,
    start_frame: u64,
    on_ended: Option<EndedCallback>,
}

impl Source {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

struct GraphState {
    frames_rendered: u64,
    sources: Vec<Source>,
    next_source_id: u64,
    analyser: Analyser,
}

struct GraphInner {
    sample_rate: u32,
    state: Mutex<GraphState>,
    closed: AtomicBool,
    driver: Mutex<Option<DriverHandle>>,
    lease: Mutex<Option<OutputLease>>,
}

/// Shared handle to one audio graph
#[derive(Clone)]
pub struct AudioContext {
    inner: Arc<GraphInner>,
}

impl std::fmt::Debug for AudioContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioContext")
            .field("sample_rate", &self.inner.sample_rate)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl AudioContext {
    /// Open a graph on a leased output.
    ///
    /// `sample_rate` is the graph clock rate for manual and headless drivers;
    /// the device driver runs at the device's own rate.
    pub fn open(
        lease: OutputLease,
        driver: RenderDriver,
        sample_rate: u32,
        analyser: Analyser,
    ) -> Result<Self> {
        if sample_rate == 0 {
            return Err(CadenceError::validation("Sample rate must be positive"));
        }

        match driver {
            RenderDriver::Manual => Ok(Self::build(lease, sample_rate, analyser)),
            RenderDriver::Headless => {
                let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
                    CadenceError::playback(format!("Headless driver needs a tokio runtime: {}", e))
                })?;
                let context = Self::build(lease, sample_rate, analyser);
                let weak = Arc::downgrade(&context.inner);
                let handle = runtime.spawn(run_headless(weak, sample_rate));
                *context.inner.driver.lock() = Some(DriverHandle::Task(handle));
                Ok(context)
            }
            #[cfg(feature = "device")]
            RenderDriver::Device => device::open(lease, analyser),
        }
    }

    fn build(lease: OutputLease, sample_rate: u32, analyser: Analyser) -> Self {
        info!(
            output = lease.output_name(),
            sample_rate,
            fft_size = analyser.fft_size(),
            "Audio graph opened"
        );
        Self {
            inner: Arc::new(GraphInner {
                sample_rate,
                state: Mutex::new(GraphState {
                    frames_rendered: 0,
                    sources: Vec::new(),
                    next_source_id: 0,
                    analyser,
                }),
                closed: AtomicBool::new(false),
                driver: Mutex::new(None),
                lease: Mutex::new(Some(lease)),
            }),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Graph clock in frames
    pub fn current_frame(&self) -> u64 {
        self.inner.state.lock().frames_rendered
    }

    /// Graph clock in seconds
    pub fn current_time(&self) -> f64 {
        self.current_frame() as f64 / self.inner.sample_rate as f64
    }

    /// Sources scheduled and not yet ended
    pub fn active_sources(&self) -> usize {
        self.inner.state.lock().sources.len()
    }

    /// Schedule `samples` to start at `start_frame` on the graph clock.
    ///
    /// Samples at another rate are resampled to the graph rate first. A start
    /// frame already in the past begins at the next rendered block.
    pub fn start_source(
        &self,
        samples: Arc<[f32]>,
        source_rate: u32,
        start_frame: u64,
        on_ended: EndedCallback,
    ) -> Result<u64> {
        if self.is_closed() {
            return Err(CadenceError::playback("Audio graph is closed"));
        }

        let samples: Arc<[f32]> = if source_rate == self.inner.sample_rate {
            samples
        } else {
            resample(&samples, source_rate, self.inner.sample_rate).into()
        };

        let mut state = self.inner.state.lock();
        let id = state.next_source_id;
        state.next_source_id += 1;
        let start_frame = start_frame.max(state.frames_rendered);
        state.sources.push(Source {
            id,
            samples,
            start_frame,
            on_ended: Some(on_ended),
        });
        Ok(id)
    }

    /// Render the next block of mono output and advance the clock.
    ///
    /// Ended callbacks run after the graph lock is released.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        if self.is_closed() {
            return;
        }

        let mut ended = Vec::new();
        {
            let mut state = self.inner.state.lock();
            let block_start = state.frames_rendered;
            let block_end = block_start + out.len() as u64;

            for source in &state.sources {
                let from = source.start_frame.max(block_start);
                let to = source.end_frame().min(block_end);
                for frame in from..to {
                    out[(frame - block_start) as usize] +=
                        source.samples[(frame - source.start_frame) as usize];
                }
            }

            let mut i = 0;
            while i < state.sources.len() {
                if state.sources[i].end_frame() <= block_end {
                    let mut source = state.sources.swap_remove(i);
                    if let Some(callback) = source.on_ended.take() {
                        ended.push((source.start_frame, source.id, callback));
                    }
                } else {
                    i += 1;
                }
            }

            state.frames_rendered = block_end;
            state.analyser.write(out);
        }

        // swap_remove scrambles order; end callbacks follow schedule order
        ended.sort_by_key(|(start, id, _)| (*start, *id));
        for (_, _, callback) in ended {
            callback();
        }
    }

    /// Drop every scheduled source without firing its ended callback
    pub fn stop_all(&self) -> usize {
        let mut state = self.inner.state.lock();
        let stopped = state.sources.len();
        state.sources.clear();
        stopped
    }

    /// Byte-scaled frequency snapshot of the rendered signal
    pub fn frequency_data(&self) -> Vec<u8> {
        self.inner.state.lock().analyser.frequency_data()
    }

    /// Byte-scaled waveform snapshot of the rendered signal
    pub fn time_domain_data(&self) -> Vec<u8> {
        self.inner.state.lock().analyser.time_domain_data()
    }

    /// Stop the driver, drop all sources and release the output lease
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let stopped = self.stop_all();
        if let Some(driver) = self.inner.driver.lock().take() {
            driver.stop();
        }
        let lease = self.inner.lease.lock().take();
        info!(
            output = lease.as_ref().map(|l| l.output_name()).unwrap_or("?"),
            stopped, "Audio graph closed"
        );
    }
}

async fn run_headless(graph: Weak<GraphInner>, sample_rate: u32) {
    let block = (sample_rate as usize / 100).max(1);
    let mut buf = vec![0.0f32; block];
    let mut ticker = tokio::time::interval(HEADLESS_TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(inner) = graph.upgrade() else {
            break;
        };
        let context = AudioContext { inner };
        if context.is_closed() {
            break;
        }
        context.render(&mut buf);
    }
    debug!("Headless render driver stopped");
}

#[cfg(feature = "device")]
mod device {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::sync::mpsc;
    use std::thread;
    use tracing::warn;

    use super::*;

    /// Open the default output device.
    ///
    /// The stream is not `Send`, so it lives on its own thread. That thread
    /// reports the device rate, waits for the graph, plays, then blocks
    /// until the graph drops its end of the channel.
    pub(super) fn open(lease: OutputLease, analyser: Analyser) -> Result<AudioContext> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32>>();
        let (graph_tx, graph_rx) = mpsc::channel::<Weak<GraphInner>>();

        thread::spawn(move || {
            let host = cpal::default_host();
            let Some(device) = host.default_output_device() else {
                let _ = ready_tx.send(Err(CadenceError::playback("No output device available")));
                return;
            };
            let supported = match device.default_output_config() {
                Ok(config) => config,
                Err(e) => {
                    let _ = ready_tx.send(Err(CadenceError::playback(format!(
                        "Failed to query output config: {}",
                        e
                    ))));
                    return;
                }
            };
            if supported.sample_format() != cpal::SampleFormat::F32 {
                let _ = ready_tx.send(Err(CadenceError::playback(format!(
                    "Unsupported output sample format {:?}",
                    supported.sample_format()
                ))));
                return;
            }

            let config: cpal::StreamConfig = supported.into();
            let channels = config.channels as usize;
            let _ = ready_tx.send(Ok(config.sample_rate.0));

            let Ok(graph) = graph_rx.recv() else {
                return;
            };

            let mut mono = Vec::new();
            let stream = device.build_output_stream(
                &config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels.max(1);
                    mono.resize(frames, 0.0);
                    match graph.upgrade() {
                        Some(inner) => AudioContext { inner }.render(&mut mono),
                        None => mono.fill(0.0),
                    }
                    for (frame, sample) in data.chunks_mut(channels.max(1)).zip(&mono) {
                        frame.fill(*sample);
                    }
                },
                |err| warn!("Output stream error: {}", err),
                Some(Duration::from_millis(100)),
            );

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to build output stream: {}", e);
                    return;
                }
            };
            if let Err(e) = stream.play() {
                warn!("Failed to start output stream: {}", e);
                return;
            }

            // Blocks until the graph side hangs up
            while graph_rx.recv().is_ok() {}
            drop(stream);
            debug!("Device render driver stopped");
        });

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| CadenceError::playback("Output device thread exited"))??;

        let context = AudioContext::build(lease, sample_rate, analyser);
        graph_tx
            .send(Arc::downgrade(&context.inner))
            .map_err(|_| CadenceError::playback("Output device thread exited"))?;
        *context.inner.driver.lock() = Some(DriverHandle::Device(graph_tx));
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn manual_context(rate: u32) -> (AudioOutput, AudioContext) {
        let output = AudioOutput::new("test");
        let lease = output.acquire().unwrap();
        let context = AudioContext::open(
            lease,
            RenderDriver::Manual,
            rate,
            Analyser::new(512, 0.8).unwrap(),
        )
        .unwrap();
        (output, context)
    }

    fn counter() -> (Arc<AtomicUsize>, EndedCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let callback: EndedCallback = Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    #[test]
    fn test_output_is_exclusive() {
        let output = AudioOutput::new("speakers");
        let lease = output.acquire().unwrap();
        assert!(matches!(output.acquire(), Err(CadenceError::OutputBusy(_))));
        drop(lease);
        assert!(output.acquire().is_ok());
    }

    #[test]
    fn test_close_releases_output() {
        let (output, context) = manual_context(1000);
        assert!(output.is_in_use());
        context.close();
        context.close();
        assert!(!output.is_in_use());
        assert!(context.is_closed());
    }

    #[test]
    fn test_sources_mix_at_their_start_frames() {
        let (_output, context) = manual_context(1000);
        let (first_done, first_cb) = counter();
        let (second_done, second_cb) = counter();
        context
            .start_source(vec![1.0; 4].into(), 1000, 0, first_cb)
            .unwrap();
        context
            .start_source(vec![0.5; 4].into(), 1000, 4, second_cb)
            .unwrap();

        let mut block = vec![0.0; 6];
        context.render(&mut block);
        assert_eq!(block, vec![1.0, 1.0, 1.0, 1.0, 0.5, 0.5]);
        assert_eq!(first_done.load(Ordering::SeqCst), 1);
        assert_eq!(second_done.load(Ordering::SeqCst), 0);

        context.render(&mut block);
        assert_eq!(&block[..2], &[0.5, 0.5]);
        assert_eq!(&block[2..], &[0.0; 4]);
        assert_eq!(second_done.load(Ordering::SeqCst), 1);
        assert_eq!(context.current_frame(), 12);
        assert_eq!(context.active_sources(), 0);
    }

    #[test]
    fn test_stop_all_suppresses_ended_callbacks() {
        let (_output, context) = manual_context(1000);
        let (done, cb) = counter();
        context.start_source(vec![1.0; 100].into(), 1000, 0, cb).unwrap();

        assert_eq!(context.stop_all(), 1);
        let mut block = vec![0.0; 200];
        context.render(&mut block);
        assert!(block.iter().all(|&s| s == 0.0));
        assert_eq!(done.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_source_resampled_to_graph_rate() {
        let (_output, context) = manual_context(2000);
        let (done, cb) = counter();
        context.start_source(vec![0.25; 100].into(), 1000, 0, cb).unwrap();

        let mut block = vec![0.0; 199];
        context.render(&mut block);
        assert_eq!(done.load(Ordering::SeqCst), 0);
        let mut block = vec![0.0; 1];
        context.render(&mut block);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closed_graph_rejects_sources() {
        let (_output, context) = manual_context(1000);
        context.close();
        let (_done, cb) = counter();
        assert!(context.start_source(vec![1.0].into(), 1000, 0, cb).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_headless_clock_follows_time() {
        let output = AudioOutput::new("headless");
        let context = AudioContext::open(
            output.acquire().unwrap(),
            RenderDriver::Headless,
            24000,
            Analyser::new(512, 0.8).unwrap(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(1005)).await;
        let frame = context.current_frame();
        // One 240-frame block per 10 ms tick, first tick immediate
        assert!((24000..=24240).contains(&frame), "frame {}", frame);

        context.close();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(context.current_frame(), frame);
    }
}
