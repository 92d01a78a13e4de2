//! Spectral analyser for playback telemetry
//!
//! Keeps the most recent `fft_size` rendered samples and derives byte-scaled
//! frequency and time-domain snapshots from them on demand.

use rustfft::{num_complex::Complex32, Fft, FftPlanner};
use std::sync::Arc;

use cadence_core::{CadenceError, Result};

/// Smallest accepted analysis window
pub const MIN_FFT_SIZE: usize = 512;

/// Decibel range mapped onto 0..=255
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Check that `fft_size` is a power of two no smaller than 512
pub fn validate_fft_size(fft_size: usize) -> Result<()> {
    if fft_size < MIN_FFT_SIZE || !fft_size.is_power_of_two() {
        return Err(CadenceError::validation(format!(
            "FFT size must be a power of two >= {}, got {}",
            MIN_FFT_SIZE, fft_size
        )));
    }
    Ok(())
}

fn blackman_window(n: usize) -> Vec<f32> {
    let n_f = n as f32;
    (0..n)
        .map(|i| {
            let x = 2.0 * std::f32::consts::PI * i as f32 / n_f;
            0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
        })
        .collect()
}

pub struct Analyser {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    history: Vec<f32>,
    smoothed: Vec<f32>,
    smoothing: f32,
    fft_buf: Vec<Complex32>,
}

impl std::fmt::Debug for Analyser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyser")
            .field("fft_size", &self.fft_size())
            .field("smoothing", &self.smoothing)
            .finish()
    }
}

impl Analyser {
    pub fn new(fft_size: usize, smoothing: f32) -> Result<Self> {
        validate_fft_size(fft_size)?;
        if !(0.0..1.0).contains(&smoothing) {
            return Err(CadenceError::validation(format!(
                "Smoothing must be in [0, 1), got {}",
                smoothing
            )));
        }

        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
        Ok(Self {
            fft,
            window: blackman_window(fft_size),
            history: vec![0.0; fft_size],
            smoothed: vec![0.0; fft_size / 2],
            smoothing,
            fft_buf: vec![Complex32::new(0.0, 0.0); fft_size],
        })
    }

    pub fn fft_size(&self) -> usize {
        self.history.len()
    }

    /// Number of frequency bins, half the window
    pub fn bin_count(&self) -> usize {
        self.smoothed.len()
    }

    /// Append rendered samples, keeping only the newest window
    pub fn write(&mut self, block: &[f32]) {
        let size = self.history.len();
        if block.len() >= size {
            self.history.copy_from_slice(&block[block.len() - size..]);
            return;
        }
        self.history.copy_within(block.len().., 0);
        self.history[size - block.len()..].copy_from_slice(block);
    }

    /// Smoothed magnitude per bin, mapped from [-100 dB, -30 dB] to 0..=255.
    ///
    /// Each call advances the smoothing state, so polling rate affects how
    /// quickly bars decay.
    pub fn frequency_data(&mut self) -> Vec<u8> {
        for ((dst, &x), &w) in self.fft_buf.iter_mut().zip(&self.history).zip(&self.window) {
            dst.re = x * w;
            dst.im = 0.0;
        }
        self.fft.process(&mut self.fft_buf);

        let scale = 1.0 / self.history.len() as f32;
        let tau = self.smoothing;
        let range = MAX_DECIBELS - MIN_DECIBELS;

        self.smoothed
            .iter_mut()
            .zip(&self.fft_buf)
            .map(|(s, bin)| {
                let magnitude = bin.norm() * scale;
                *s = tau * *s + (1.0 - tau) * magnitude;
                if *s <= 0.0 {
                    return 0;
                }
                let db = 20.0 * s.log10();
                (255.0 * (db - MIN_DECIBELS) / range).clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    /// Most recent `bin_count` samples as bytes centred on 128
    pub fn time_domain_data(&self) -> Vec<u8> {
        let start = self.history.len() - self.bin_count();
        self.history[start..]
            .iter()
            .map(|&x| (128.0 * (1.0 + x)).clamp(0.0, 255.0) as u8)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fft_size_validation() {
        assert!(validate_fft_size(512).is_ok());
        assert!(validate_fft_size(2048).is_ok());
        assert!(validate_fft_size(256).is_err());
        assert!(validate_fft_size(1000).is_err());
        assert!(Analyser::new(2048, 1.0).is_err());
    }

    #[test]
    fn test_silence_is_flat() {
        let mut analyser = Analyser::new(512, 0.8).unwrap();
        assert!(analyser.frequency_data().iter().all(|&b| b == 0));
        assert!(analyser.time_domain_data().iter().all(|&b| b == 128));
        assert_eq!(analyser.time_domain_data().len(), 256);
    }

    #[test]
    fn test_tone_peaks_at_its_bin() {
        let mut analyser = Analyser::new(1024, 0.0).unwrap();
        // Quiet enough to stay inside the decibel range; bin 32 of 1024
        let tone: Vec<f32> = (0..1024)
            .map(|i| 0.001 * (2.0 * std::f32::consts::PI * 32.0 * i as f32 / 1024.0).sin())
            .collect();
        analyser.write(&tone);

        let bins = analyser.frequency_data();
        let peak = bins
            .iter()
            .enumerate()
            .max_by_key(|(_, &b)| b)
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 32);
        assert!(bins[32] > bins[31]);
        assert!(bins[32] > bins[33]);
        assert_eq!(bins[200], 0);
    }

    #[test]
    fn test_smoothing_decays_gradually() {
        let mut analyser = Analyser::new(512, 0.8).unwrap();
        let tone: Vec<f32> = (0..512)
            .map(|i| 0.01 * (2.0 * std::f32::consts::PI * 8.0 * i as f32 / 512.0).sin())
            .collect();
        analyser.write(&tone);
        let loud = analyser.frequency_data()[8];

        analyser.write(&vec![0.0; 512]);
        let decaying = analyser.frequency_data()[8];
        assert!(decaying > 0);
        assert!(decaying < loud);
    }

    #[test]
    fn test_write_keeps_newest_window() {
        let mut analyser = Analyser::new(512, 0.8).unwrap();
        analyser.write(&vec![1.0; 400]);
        analyser.write(&vec![-1.0; 200]);

        let time = analyser.time_domain_data();
        // Newest 256 samples: 56 of the first block then 200 of the second
        assert!(time[..56].iter().all(|&b| b == 255));
        assert!(time[56..].iter().all(|&b| b == 0));
    }
}
