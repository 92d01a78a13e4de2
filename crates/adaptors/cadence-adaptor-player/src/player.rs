//! Streaming audio player
//!
//! Drives one session: network reads are re-framed, held in the jitter
//! buffer until the threshold is reached, then scheduled gaplessly on the
//! audio graph. [`StreamingAudioPlayer::consume`] resolves with every
//! received sample once the last scheduled frame has finished playing.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cadence_core::{AudioFrame, CadenceError, Result, DEFAULT_OUTPUT_SAMPLE_RATE};

use crate::analyser::{validate_fft_size, Analyser};
use crate::graph::{AudioContext, AudioOutput, RenderDriver};
use crate::jitter::JitterBuffer;
use crate::reframe::{FrameReassembler, Reframed};
use crate::scheduler::PlaybackScheduler;

/// Player configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerOptions {
    /// Rate of the incoming float32 stream
    pub sample_rate: u32,
    /// Audio held before playback starts
    pub buffer_threshold_secs: f64,
    /// Analysis window, a power of two >= 512
    pub fft_size: usize,
    /// Spectral smoothing constant in [0, 1)
    pub smoothing: f32,
    /// Telemetry callback rate
    pub telemetry_hz: u32,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_OUTPUT_SAMPLE_RATE,
            buffer_threshold_secs: 1.0,
            fft_size: 2048,
            smoothing: 0.8,
            telemetry_hz: 30,
        }
    }
}

impl PlayerOptions {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(CadenceError::validation("Sample rate must be positive"));
        }
        if !self.buffer_threshold_secs.is_finite() || self.buffer_threshold_secs < 0.0 {
            return Err(CadenceError::validation(format!(
                "Buffer threshold must be a non-negative number of seconds, got {}",
                self.buffer_threshold_secs
            )));
        }
        validate_fft_size(self.fft_size)?;
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(CadenceError::validation(format!(
                "Smoothing must be in [0, 1), got {}",
                self.smoothing
            )));
        }
        if self.telemetry_hz == 0 {
            return Err(CadenceError::validation("Telemetry rate must be positive"));
        }
        Ok(())
    }
}

/// One visualisation snapshot of the audible signal
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    /// Smoothed magnitude per bin, 0..=255
    pub frequency: Vec<u8>,
    /// Waveform, 0..=255 centred on 128
    pub time_domain: Vec<u8>,
    /// Graph clock in seconds
    pub current_time: f64,
}

pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;
pub type ChunkCallback = Arc<dyn Fn(&AudioFrame) + Send + Sync>;
pub type TelemetryCallback = Arc<dyn Fn(&Telemetry) + Send + Sync>;
pub type BufferingCallback = Arc<dyn Fn() + Send + Sync>;

/// Session observers; all optional
#[derive(Clone, Default)]
pub struct PlayerCallbacks {
    on_progress: Option<ProgressCallback>,
    on_chunk: Option<ChunkCallback>,
    on_telemetry: Option<TelemetryCallback>,
    on_buffering_complete: Option<BufferingCallback>,
}

impl PlayerCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received so far this session, after every network read
    pub fn on_progress(mut self, f: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    /// Every re-framed chunk, as soon as it is reconstructed
    pub fn on_chunk(mut self, f: impl Fn(&AudioFrame) + Send + Sync + 'static) -> Self {
        self.on_chunk = Some(Arc::new(f));
        self
    }

    /// Periodic snapshots while audio is playing
    pub fn on_telemetry(mut self, f: impl Fn(&Telemetry) + Send + Sync + 'static) -> Self {
        self.on_telemetry = Some(Arc::new(f));
        self
    }

    /// Once per session, when buffering hands over to playback
    pub fn on_buffering_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_buffering_complete = Some(Arc::new(f));
        self
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct StreamingAudioPlayer {
    options: PlayerOptions,
    context: AudioContext,
    scheduler: PlaybackScheduler,
    bytes_received: AtomicU64,
    disposed: watch::Sender<bool>,
}

impl StreamingAudioPlayer {
    /// Acquire `output` and open an audio graph on it
    pub fn new(output: &AudioOutput, options: PlayerOptions, driver: RenderDriver) -> Result<Self> {
        options.validate()?;
        let lease = output.acquire()?;
        let analyser = Analyser::new(options.fft_size, options.smoothing)?;
        let context = AudioContext::open(lease, driver, options.sample_rate, analyser)?;
        let scheduler = PlaybackScheduler::new(context.clone());
        let (disposed, _) = watch::channel(false);

        Ok(Self {
            options,
            context,
            scheduler,
            bytes_received: AtomicU64::new(0),
            disposed,
        })
    }

    pub fn options(&self) -> &PlayerOptions {
        &self.options
    }

    pub fn context(&self) -> &AudioContext {
        &self.context
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        *self.disposed.borrow()
    }

    /// Snapshot of the audible signal, while anything is playing
    pub fn telemetry(&self) -> Option<Telemetry> {
        if !self.scheduler.is_playing() {
            return None;
        }
        Some(snapshot(&self.context))
    }

    /// Play a float32 byte stream to the end.
    ///
    /// Resolves with all received samples in order after the final frame
    /// has played. A failed body read fails with a stream error; disposing
    /// the player meanwhile fails with `Cancelled`.
    pub async fn consume<S, E>(&self, body: S, callbacks: &PlayerCallbacks) -> Result<Vec<f32>>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Display,
    {
        if self.is_disposed() {
            return Err(CadenceError::Cancelled);
        }

        let result = self.run(body, callbacks).await;
        if result.is_err() {
            self.scheduler.stop();
        }
        result
    }

    async fn run<S, E>(&self, body: S, callbacks: &PlayerCallbacks) -> Result<Vec<f32>>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Display,
    {
        self.bytes_received.store(0, Ordering::Release);
        self.scheduler.begin_session();

        let mut reassembler = FrameReassembler::new(self.options.sample_rate);
        let mut jitter = JitterBuffer::new(self.options.buffer_threshold_secs);
        let mut disposed = self.disposed.subscribe();
        let mut received = Vec::new();

        let _telemetry = callbacks
            .on_telemetry
            .clone()
            .map(|callback| self.spawn_telemetry(callback));

        futures_util::pin_mut!(body);
        loop {
            let next = tokio::select! {
                biased;
                _ = disposed.wait_for(|d| *d) => return Err(CadenceError::Cancelled),
                next = body.next() => next,
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    warn!(bytes = self.bytes_received(), "Body read failed: {}", e);
                    return Err(CadenceError::stream(format!("Body read failed: {}", e)));
                }
                None => break,
            };

            let total = self.bytes_received.fetch_add(chunk.len() as u64, Ordering::AcqRel)
                + chunk.len() as u64;
            if let Some(on_progress) = &callbacks.on_progress {
                on_progress(total);
            }

            let frame = match reassembler.push(&chunk)? {
                Reframed::Frame(frame) => frame,
                Reframed::Pending => continue,
                Reframed::EndOfStream => break,
            };

            if let Some(on_chunk) = &callbacks.on_chunk {
                on_chunk(&frame);
            }
            received.extend_from_slice(frame.samples());

            let released = jitter.push(frame);
            for frame in &released.frames {
                self.scheduler.schedule(frame)?;
            }
            if released.buffering_complete {
                info!(
                    threshold_secs = self.options.buffer_threshold_secs,
                    frames = released.frames.len(),
                    "Buffering complete; playback started"
                );
                if let Some(on_buffering_complete) = &callbacks.on_buffering_complete {
                    on_buffering_complete();
                }
            }
        }

        reassembler.finish();
        for frame in jitter.finish() {
            self.scheduler.schedule(&frame)?;
        }

        debug!(
            samples = received.len(),
            bytes = self.bytes_received(),
            "Stream complete; waiting for playback to drain"
        );

        tokio::select! {
            biased;
            _ = disposed.wait_for(|d| *d) => return Err(CadenceError::Cancelled),
            drained = self.scheduler.wait_drained() => drained?,
        }

        info!(
            samples = received.len(),
            underruns = self.scheduler.underruns(),
            "Playback drained"
        );
        Ok(received)
    }

    fn spawn_telemetry(&self, callback: TelemetryCallback) -> AbortOnDrop {
        let context = self.context.clone();
        let scheduler = self.scheduler.clone();
        let disposed = self.disposed.subscribe();
        let period = Duration::from_secs_f64(1.0 / self.options.telemetry_hz as f64);

        AbortOnDrop(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if *disposed.borrow() {
                    break;
                }
                if scheduler.is_playing() {
                    callback(&snapshot(&context));
                }
            }
        }))
    }

    /// Halt scheduled playback; the player stays usable
    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// Stop and release the audio graph. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.send_replace(true) {
            return;
        }
        self.stop();
        self.context.close();
        debug!(bytes = self.bytes_received(), "Player disposed");
    }
}

impl Drop for StreamingAudioPlayer {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn snapshot(context: &AudioContext) -> Telemetry {
    Telemetry {
        frequency: context.frequency_data(),
        time_domain: context.time_domain_data(),
        current_time: context.current_time(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::sync::atomic::AtomicUsize;

    fn encode(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn chunked(bytes: &[u8], size: usize) -> Vec<std::result::Result<Bytes, String>> {
        bytes
            .chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect()
    }

    fn options(threshold: f64) -> PlayerOptions {
        PlayerOptions {
            sample_rate: 1000,
            buffer_threshold_secs: threshold,
            fft_size: 512,
            ..PlayerOptions::default()
        }
    }

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn test_options_validation() {
        assert!(PlayerOptions::default().validate().is_ok());
        let bad_fft = PlayerOptions {
            fft_size: 1000,
            ..PlayerOptions::default()
        };
        assert!(bad_fft.validate().is_err());
        let bad_threshold = PlayerOptions {
            buffer_threshold_secs: -1.0,
            ..PlayerOptions::default()
        };
        assert!(bad_threshold.validate().is_err());
    }

    #[test]
    fn test_one_player_per_output() {
        let output = AudioOutput::new("single");
        let player = StreamingAudioPlayer::new(&output, options(1.0), RenderDriver::Manual).unwrap();
        assert!(matches!(
            StreamingAudioPlayer::new(&output, options(1.0), RenderDriver::Manual),
            Err(CadenceError::OutputBusy(_))
        ));
        drop(player);
        assert!(!output.is_in_use());
    }

    #[tokio::test(start_paused = true)]
    async fn test_byte_at_a_time_plays_everything() {
        let output = AudioOutput::new("bytewise");
        let player =
            StreamingAudioPlayer::new(&output, options(0.1), RenderDriver::Headless).unwrap();
        let samples: Vec<f32> = (0..300).map(|i| (i as f32 / 300.0) - 0.5).collect();
        let bytes = encode(&samples);

        let progress = Arc::new(AtomicU64::new(0));
        let reads = counter();
        let callbacks = PlayerCallbacks::new().on_progress({
            let progress = Arc::clone(&progress);
            let reads = Arc::clone(&reads);
            move |total| {
                progress.store(total, Ordering::SeqCst);
                reads.fetch_add(1, Ordering::SeqCst);
            }
        });

        let out = player
            .consume(stream::iter(chunked(&bytes, 1)), &callbacks)
            .await
            .unwrap();

        assert_eq!(out, samples);
        assert_eq!(reads.load(Ordering::SeqCst), 1200);
        assert_eq!(progress.load(Ordering::SeqCst), 1200);
        assert_eq!(player.bytes_received(), 1200);
        // Played to the end before resolving
        assert!(player.context().current_time() >= 0.3);
        assert!(!player.scheduler().is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffering_complete_fires_once() {
        let output = AudioOutput::new("threshold");
        let player =
            StreamingAudioPlayer::new(&output, options(0.5), RenderDriver::Headless).unwrap();
        let bytes = encode(&vec![0.2; 2000]);

        let fired = counter();
        let chunks = counter();
        let callbacks = PlayerCallbacks::new()
            .on_buffering_complete({
                let fired = Arc::clone(&fired);
                move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_chunk({
                let chunks = Arc::clone(&chunks);
                move |_| {
                    chunks.fetch_add(1, Ordering::SeqCst);
                }
            });

        // 100-sample frames, 0.1 s each
        let out = player
            .consume(stream::iter(chunked(&bytes, 400)), &callbacks)
            .await
            .unwrap();

        assert_eq!(out.len(), 2000);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(chunks.load(Ordering::SeqCst), 20);
        assert_eq!(player.scheduler().scheduled(), 20);
        assert_eq!(player.scheduler().underruns(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_stream_never_completes_buffering() {
        let output = AudioOutput::new("short");
        let player =
            StreamingAudioPlayer::new(&output, options(1.0), RenderDriver::Headless).unwrap();
        let fired = counter();
        let callbacks = PlayerCallbacks::new().on_buffering_complete({
            let fired = Arc::clone(&fired);
            move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        });

        let bytes = encode(&vec![0.1; 400]);
        let out = player
            .consume(stream::iter(chunked(&bytes, 64)), &callbacks)
            .await
            .unwrap();

        assert_eq!(out.len(), 400);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(player.context().current_time() >= 0.4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_chunk_ends_stream() {
        let output = AudioOutput::new("sentinel");
        let player =
            StreamingAudioPlayer::new(&output, options(0.0), RenderDriver::Headless).unwrap();
        let mut chunks = chunked(&encode(&[0.5; 10]), 40);
        chunks.push(Ok(Bytes::new()));
        chunks.push(Ok(Bytes::from(encode(&[0.9; 10]))));

        let out = player
            .consume(stream::iter(chunks), &PlayerCallbacks::new())
            .await
            .unwrap();
        assert_eq!(out, vec![0.5; 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_is_stream_error() {
        let output = AudioOutput::new("broken");
        let player =
            StreamingAudioPlayer::new(&output, options(0.0), RenderDriver::Headless).unwrap();
        let chunks: Vec<std::result::Result<Bytes, String>> = vec![
            Ok(Bytes::from(encode(&[0.5; 100]))),
            Err("connection reset".to_string()),
        ];

        let err = player
            .consume(stream::iter(chunks), &PlayerCallbacks::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::Stream(_)));
        assert!(!player.scheduler().is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_session_starts_fresh() {
        let output = AudioOutput::new("sessions");
        let player =
            StreamingAudioPlayer::new(&output, options(0.0), RenderDriver::Headless).unwrap();
        let bytes = encode(&vec![0.2; 155]);

        player
            .consume(stream::iter(chunked(&bytes, 620)), &PlayerCallbacks::new())
            .await
            .unwrap();
        assert_eq!(player.bytes_received(), 620);
        assert_eq!(player.scheduler().underruns(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;

        let first_progress = Arc::new(AtomicU64::new(0));
        let callbacks = PlayerCallbacks::new().on_progress({
            let first_progress = Arc::clone(&first_progress);
            move |total| {
                let _ = first_progress.compare_exchange(0, total, Ordering::SeqCst, Ordering::SeqCst);
            }
        });
        let out = player
            .consume(stream::iter(chunked(&bytes, 620)), &callbacks)
            .await
            .unwrap();

        assert_eq!(out.len(), 155);
        assert_eq!(first_progress.load(Ordering::SeqCst), 620);
        assert_eq!(player.bytes_received(), 620);
        assert_eq!(player.scheduler().underruns(), 0);
        assert_eq!(player.scheduler().scheduled(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_stops_telemetry() {
        let output = AudioOutput::new("telemetry");
        let player = Arc::new(
            StreamingAudioPlayer::new(&output, options(0.0), RenderDriver::Headless).unwrap(),
        );
        let snapshots = counter();
        let callbacks = PlayerCallbacks::new().on_telemetry({
            let snapshots = Arc::clone(&snapshots);
            move |telemetry| {
                assert_eq!(telemetry.frequency.len(), 256);
                assert_eq!(telemetry.time_domain.len(), 256);
                snapshots.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Ten seconds of audio, then a body that never ends
        let head = stream::iter(vec![Ok::<_, String>(Bytes::from(encode(&vec![0.3; 10_000])))]);
        let body = head.chain(stream::pending());

        let task = {
            let player = Arc::clone(&player);
            tokio::spawn(async move { player.consume(body, &callbacks).await })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(player.telemetry().is_some());
        player.dispose();
        let seen = snapshots.load(Ordering::SeqCst);
        assert!(seen > 0);

        let result = task.await.unwrap();
        assert!(matches!(result, Err(CadenceError::Cancelled)));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(snapshots.load(Ordering::SeqCst), seen);
        assert!(player.telemetry().is_none());
        assert!(!output.is_in_use());
    }
}
