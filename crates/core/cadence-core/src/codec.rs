//! PCM codec utilities
//!
//! WAV container encode/decode and linear-interpolation resampling. All
//! functions work on in-memory buffers; decoding goes through `hound`.

use bytes::{BufMut, Bytes, BytesMut};
use std::io::Cursor;

use crate::{CadenceError, Result};

/// Canonical header size written by [`encode_wav`]
pub const WAV_HEADER_LEN: usize = 44;

const FORMAT_PCM: u16 = 1;

/// Decoded WAV contents
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedWav {
    /// Samples of the first channel, in [-1, 1]
    pub samples: Vec<f32>,
    /// Sample rate (Hz)
    pub sample_rate: u32,
    /// Channel count declared by the container
    pub channel_count: u16,
}

fn wav_error(e: hound::Error) -> CadenceError {
    match e {
        hound::Error::Unsupported | hound::Error::TooWide | hound::Error::InvalidSampleFormat => {
            CadenceError::unsupported_format(e.to_string())
        }
        other => CadenceError::format(format!("Failed to read WAV: {}", other)),
    }
}

/// Decode a RIFF/WAVE container into float samples.
///
/// Multi-channel input keeps the first channel only. Supports 8-bit and
/// 16-bit linear PCM.
pub fn decode_wav(bytes: &[u8]) -> Result<DecodedWav> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).map_err(wav_error)?;
    let spec = reader.spec();

    if spec.sample_format != hound::SampleFormat::Int {
        return Err(CadenceError::unsupported_format("IEEE float samples"));
    }
    let divisors = match spec.bits_per_sample {
        16 => (0x8000 as f32, 0x7fff as f32),
        8 => (128.0, 128.0),
        other => {
            return Err(CadenceError::unsupported_format(format!(
                "{} bits per sample",
                other
            )))
        }
    };

    let channels = spec.channels.max(1) as usize;
    let samples = reader
        .into_samples::<i16>()
        .step_by(channels)
        .map(|s| {
            s.map(|val| {
                if val < 0 {
                    val as f32 / divisors.0
                } else {
                    val as f32 / divisors.1
                }
            })
        })
        .collect::<std::result::Result<Vec<f32>, _>>()
        .map_err(wav_error)?;

    Ok(DecodedWav {
        samples,
        sample_rate: spec.sample_rate,
        channel_count: spec.channels,
    })
}

/// Quantize one float sample to 16-bit PCM (asymmetric, clamped)
pub fn float_to_pcm16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 0x8000 as f32).round() as i16
    } else {
        (s * 0x7fff as f32).round() as i16
    }
}

/// Encode interleaved float samples as a canonical 16-bit PCM WAV
pub fn encode_wav(samples: &[f32], sample_rate: u32, channel_count: u16) -> Bytes {
    let channels = channel_count.max(1);
    let bits_per_sample: u16 = 16;
    let block_align = channels * bits_per_sample / 8;
    let byte_rate = sample_rate * block_align as u32;
    let data_size = (samples.len() * 2) as u32;

    let mut wav = BytesMut::with_capacity(WAV_HEADER_LEN + samples.len() * 2);

    // RIFF header
    wav.put_slice(b"RIFF");
    wav.put_u32_le(36 + data_size);
    wav.put_slice(b"WAVE");

    // fmt chunk
    wav.put_slice(b"fmt ");
    wav.put_u32_le(16);
    wav.put_u16_le(FORMAT_PCM);
    wav.put_u16_le(channels);
    wav.put_u32_le(sample_rate);
    wav.put_u32_le(byte_rate);
    wav.put_u16_le(block_align);
    wav.put_u16_le(bits_per_sample);

    // data chunk
    wav.put_slice(b"data");
    wav.put_u32_le(data_size);
    for sample in samples {
        wav.put_i16_le(float_to_pcm16(*sample));
    }

    wav.freeze()
}

/// Number of output samples [`resample`] produces
pub fn resampled_len(input_len: usize, from_rate: u32, to_rate: u32) -> usize {
    if from_rate == 0 {
        return 0;
    }
    ((input_len as u128 * to_rate as u128) / from_rate as u128) as usize
}

/// Linear-interpolation resampling with edge clamping.
///
/// Not band-limited; inputs are short voice snippets.
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return input.to_vec();
    }
    if input.is_empty() || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }

    let output_len = resampled_len(input.len(), from_rate, to_rate);
    let step = from_rate as f64 / to_rate as f64;
    let last = input.len() - 1;

    (0..output_len)
        .map(|i| {
            let src_index = i as f64 * step;
            let floor = (src_index.floor() as usize).min(last);
            let ceil = (floor + 1).min(last);
            let t = (src_index - floor as f64) as f32;
            input[floor] * (1.0 - t) + input[ceil] * t
        })
        .collect()
}

/// Linear-interpolation resampler that keeps its phase across chunks.
///
/// Each chunk interpolates from the previous chunk's last sample, so a
/// stream resampled in pieces matches [`resample`] on the whole buffer. The
/// output position past a chunk's last sample is emitted with the next chunk.
#[derive(Debug, Clone)]
pub struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    emitted: u64,
    consumed: u64,
    last: Option<f32>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate,
            to_rate,
            emitted: 0,
            consumed: 0,
            last: None,
        }
    }

    pub fn rates(&self) -> (u32, u32) {
        (self.from_rate, self.to_rate)
    }

    /// Resample the next chunk of the stream
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.from_rate == self.to_rate {
            self.consumed += input.len() as u64;
            self.emitted += input.len() as u64;
            return input.to_vec();
        }
        if input.is_empty() || self.from_rate == 0 || self.to_rate == 0 {
            return Vec::new();
        }

        let step = self.from_rate as f64 / self.to_rate as f64;
        let end = (input.len() - 1) as f64;
        let mut output = Vec::with_capacity(resampled_len(input.len(), self.from_rate, self.to_rate) + 1);

        loop {
            // Relative to this chunk; -1 is the previous chunk's last sample
            let pos = self.emitted as f64 * step - self.consumed as f64;
            if pos > end {
                break;
            }
            let floor = pos.floor();
            let t = (pos - floor) as f32;
            let index = floor as i64;
            let a = if index < 0 {
                self.last.unwrap_or(input[0])
            } else {
                input[index as usize]
            };
            let b = input.get((index + 1) as usize).copied().unwrap_or(a);
            output.push(a * (1.0 - t) + b * t);
            self.emitted += 1;
        }

        self.consumed += input.len() as u64;
        self.last = input.last().copied();
        output
    }
}

/// Peak-normalize samples to [-1, 1]; silence is returned unchanged
pub fn normalize(samples: &[f32]) -> Vec<f32> {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak == 0.0 {
        return samples.to_vec();
    }
    samples.iter().map(|s| s / peak).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| ((i as f32 * 0.37).sin() * 1.2).clamp(-1.0, 1.0))
            .collect()
    }

    #[test]
    fn test_wav_round_trip_within_quantization() {
        let samples = sweep(1000);
        let wav = encode_wav(&samples, 24000, 1);
        assert_eq!(wav.len(), WAV_HEADER_LEN + samples.len() * 2);

        let decoded = decode_wav(&wav).unwrap();
        assert_eq!(decoded.sample_rate, 24000);
        assert_eq!(decoded.channel_count, 1);
        assert_eq!(decoded.samples.len(), samples.len());
        for (a, b) in samples.iter().zip(decoded.samples.iter()) {
            assert!((a - b).abs() <= 1.0 / 32768.0, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        let wav = encode_wav(&[2.0, -3.0], 16000, 1);
        let decoded = decode_wav(&wav).unwrap();
        assert_eq!(decoded.samples, vec![1.0, -1.0]);
    }

    #[test]
    fn test_missing_riff_is_format_error() {
        let mut wav = encode_wav(&[0.0; 8], 16000, 1).to_vec();
        wav[0..4].copy_from_slice(b"RIFX");
        assert!(matches!(decode_wav(&wav), Err(CadenceError::Format(_))));
        assert!(matches!(decode_wav(b"hello"), Err(CadenceError::Format(_))));
    }

    #[test]
    fn test_missing_wave_is_format_error() {
        let mut wav = encode_wav(&[0.0; 8], 16000, 1).to_vec();
        wav[8..12].copy_from_slice(b"AVI ");
        assert!(matches!(decode_wav(&wav), Err(CadenceError::Format(_))));
    }

    fn header(format_tag: u16, channels: u16, rate: u32, bits: u16, data_len: u32) -> Vec<u8> {
        let block_align = channels * bits / 8;
        let mut wav = Vec::with_capacity(WAV_HEADER_LEN);
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_len).to_le_bytes());
        wav.extend_from_slice(b"WAVEfmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&format_tag.to_le_bytes());
        wav.extend_from_slice(&channels.to_le_bytes());
        wav.extend_from_slice(&rate.to_le_bytes());
        wav.extend_from_slice(&(rate * block_align as u32).to_le_bytes());
        wav.extend_from_slice(&block_align.to_le_bytes());
        wav.extend_from_slice(&bits.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&data_len.to_le_bytes());
        wav
    }

    #[test]
    fn test_float_wav_is_unsupported() {
        let mut wav = header(3, 1, 16000, 32, 8);
        wav.extend_from_slice(&0.5f32.to_le_bytes());
        wav.extend_from_slice(&(-0.5f32).to_le_bytes());
        assert!(matches!(
            decode_wav(&wav),
            Err(CadenceError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_decode_8bit() {
        let mut wav = header(1, 1, 8000, 8, 3);
        wav.extend_from_slice(&[0, 128, 255]);

        let decoded = decode_wav(&wav).unwrap();
        assert_eq!(decoded.sample_rate, 8000);
        assert_eq!(decoded.samples, vec![-1.0, 0.0, 127.0 / 128.0]);
    }

    #[test]
    fn test_asymmetric_16bit_scaling() {
        let mut wav = header(1, 1, 16000, 16, 6);
        for val in [i16::MIN, 0, i16::MAX] {
            wav.extend_from_slice(&val.to_le_bytes());
        }
        assert_eq!(decode_wav(&wav).unwrap().samples, vec![-1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_decode_skips_unknown_chunks_and_keeps_first_channel() {
        let stereo = [0.5f32, -0.5, 0.25, -0.25];
        let canonical = encode_wav(&stereo, 16000, 2).to_vec();

        let mut wav = canonical[..12].to_vec();
        wav.extend_from_slice(b"LIST");
        wav.extend_from_slice(&4u32.to_le_bytes());
        wav.extend_from_slice(&[1, 2, 3, 4]);
        wav.extend_from_slice(&canonical[12..]);

        let decoded = decode_wav(&wav).unwrap();
        assert_eq!(decoded.channel_count, 2);
        assert_eq!(decoded.samples.len(), 2);
        assert!((decoded.samples[0] - 0.5).abs() < 1e-4);
        assert!((decoded.samples[1] - 0.25).abs() < 1e-4);
    }

    #[test]
    fn test_resample_identity() {
        let samples = sweep(333);
        assert_eq!(resample(&samples, 22050, 22050), samples);
    }

    #[test]
    fn test_resample_length() {
        for &(len, from, to) in &[
            (44100 * 3 + 7, 44100, 16000),
            (1000, 16000, 24000),
            (999, 48000, 16000),
            (1, 8000, 16000),
        ] {
            let out = resample(&vec![0.1; len], from, to);
            let expected = (len as f64 * to as f64 / from as f64).floor() as usize;
            assert_eq!(out.len(), expected, "len={} {}->{}", len, from, to);
        }
    }

    #[test]
    fn test_resample_interpolates_and_clamps() {
        let out = resample(&[0.0, 1.0], 1, 2);
        assert_eq!(out, vec![0.0, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn test_stream_resampler_matches_whole_buffer() {
        for &(from, to) in &[(24000, 48000), (1000, 1500), (48000, 16000)] {
            let input = sweep(997);
            let whole = resample(&input, from, to);

            let mut resampler = StreamResampler::new(from, to);
            let mut streamed = Vec::new();
            for chunk in input.chunks(113) {
                streamed.extend(resampler.process(chunk));
            }

            let held_back = (to as f64 / from as f64).ceil() as usize;
            assert!(streamed.len().abs_diff(whole.len()) <= held_back, "{}->{}", from, to);
            for (a, b) in streamed.iter().zip(whole.iter()) {
                assert!((a - b).abs() < 1e-5, "{}->{}: {} vs {}", from, to, a, b);
            }
        }
    }

    #[test]
    fn test_stream_resampler_blends_across_chunks() {
        let mut resampler = StreamResampler::new(1, 2);
        assert_eq!(resampler.process(&[0.0; 4]), vec![0.0; 7]);
        let next = resampler.process(&[1.0; 4]);
        assert_eq!(next[0], 0.5);
        assert!(next[1..].iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(&[0.25, -0.5]), vec![0.5, -1.0]);
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
