//! FFT feature extraction
//!
//! Samples go into a ring buffer; every `hop_size` samples (once the buffer
//! has been filled for the first time) the buffer is windowed, transformed
//! and reduced to an [`AudioFeatureFrame`].

use super::AnalyzerConfig;
use crate::features::{AudioFeatureFrame, SPECTRUM_BINS};
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::{debug, trace};

/// Single-threaded spectrum feature extractor
pub struct FeatureExtractor {
    /// FFT instance
    fft: Arc<dyn Fft<f32>>,

    /// Sanitized configuration
    config: AnalyzerConfig,

    /// Sample rate of the incoming samples
    sample_rate: u32,

    /// Ring buffer holding the last `fft_size` samples
    input_buffer: Vec<f32>,

    /// Write position in ring buffer
    buffer_write_pos: usize,

    /// Samples since last FFT
    samples_since_fft: usize,

    /// Samples between FFT frames
    hop_size: usize,

    fft_buffer: Vec<Complex<f32>>,
    scratch_buffer: Vec<Complex<f32>>,

    /// Hann window coefficients
    window: Vec<f32>,

    /// Normalized, smoothed magnitudes (`fft_size / 2` bins)
    magnitudes: Vec<f32>,

    /// Band split points as bin indices: low `[0, low_end)`, mid
    /// `[low_end, mid_end)`, high `[mid_end, bins)`
    low_end: usize,
    mid_end: usize,

    /// Latest frame
    frame: AudioFeatureFrame,

    total_samples: u64,
    fft_count: u64,
}

impl FeatureExtractor {
    /// Create an extractor for samples arriving at `sample_rate`
    pub fn new(config: &AnalyzerConfig, sample_rate: u32) -> Self {
        let config = config.sanitized();
        let fft_size = config.fft_size;

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        let bins = fft_size / 2;
        let hop_size = (((1.0 - config.overlap) * fft_size as f32) as usize).max(1);
        let (low_end, mid_end) = band_edges(bins);

        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                let t = i as f32 / (fft_size - 1) as f32;
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * t).cos())
            })
            .collect();

        debug!(
            "FeatureExtractor created: sample_rate={}, fft_size={}, hop_size={}, smoothing={}",
            sample_rate, fft_size, hop_size, config.smoothing
        );

        Self {
            fft,
            sample_rate: sample_rate.max(1),
            input_buffer: vec![0.0; fft_size],
            buffer_write_pos: 0,
            samples_since_fft: 0,
            hop_size,
            fft_buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch_buffer: vec![Complex::new(0.0, 0.0); fft_size],
            window,
            magnitudes: vec![0.0; bins],
            low_end,
            mid_end,
            frame: AudioFeatureFrame::silent(),
            total_samples: 0,
            fft_count: 0,
            config,
        }
    }

    /// Feed mono samples. Returns true if at least one new frame was computed.
    ///
    /// Non-finite samples are treated as silence.
    pub fn process_samples(&mut self, samples: &[f32]) -> bool {
        let fft_size = self.config.fft_size;
        let mut updated = false;

        for &sample in samples {
            self.input_buffer[self.buffer_write_pos] = if sample.is_finite() { sample } else { 0.0 };
            self.buffer_write_pos = (self.buffer_write_pos + 1) % fft_size;
            self.samples_since_fft += 1;
            self.total_samples += 1;

            if self.samples_since_fft >= self.hop_size && self.total_samples >= fft_size as u64 {
                self.perform_fft();
                self.samples_since_fft = 0;
                updated = true;
            }
        }

        updated
    }

    fn perform_fft(&mut self) {
        self.fft_count += 1;
        let fft_size = self.config.fft_size;

        // Oldest sample sits at the write position
        for i in 0..fft_size {
            let src_idx = (self.buffer_write_pos + i) % fft_size;
            self.fft_buffer[i] = Complex::new(self.input_buffer[src_idx] * self.window[i], 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.fft_buffer, &mut self.scratch_buffer);

        // Hann coherent gain is 0.5, so a full-scale sine peaks at fft_size / 4
        let norm_factor = 4.0 / fft_size as f32;
        let smoothing = self.config.smoothing;
        for (i, smoothed) in self.magnitudes.iter_mut().enumerate() {
            let value = self.config.scale.normalize(self.fft_buffer[i].norm() * norm_factor);
            *smoothed = *smoothed * smoothing + value * (1.0 - smoothing);
        }

        self.frame = self.build_frame();

        if self.fft_count % 100 == 0 {
            trace!(
                "FFT #{}: volume={:.3} bass={:.3} mid={:.3} high={:.3}",
                self.fft_count,
                self.frame.volume,
                self.frame.bass,
                self.frame.mid,
                self.frame.high
            );
        }
    }

    fn build_frame(&self) -> AudioFeatureFrame {
        let bins = self.magnitudes.len();
        let mut spectrum = [0.0f32; SPECTRUM_BINS];
        for (bucket, value) in spectrum.iter_mut().enumerate() {
            let start = bucket * bins / SPECTRUM_BINS;
            let end = ((bucket + 1) * bins / SPECTRUM_BINS).max(start + 1);
            *value = mean(&self.magnitudes[start..end.min(bins)]);
        }

        AudioFeatureFrame::from_parts(
            mean(&self.magnitudes),
            mean(&self.magnitudes[..self.low_end]),
            mean(&self.magnitudes[self.low_end..self.mid_end]),
            mean(&self.magnitudes[self.mid_end..]),
            spectrum,
        )
        .with_sequence(self.fft_count, self.timestamp())
    }

    /// Latest computed frame; all-zero until the first transform
    pub fn frame(&self) -> AudioFeatureFrame {
        self.frame
    }

    /// Normalized, smoothed magnitude per FFT bin
    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    /// Number of transforms performed since creation or the last reset
    pub fn frames_computed(&self) -> u64 {
        self.fft_count
    }

    /// Seconds of audio processed
    pub fn timestamp(&self) -> f64 {
        self.total_samples as f64 / self.sample_rate as f64
    }

    /// Sample rate this extractor was created for
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Effective (sanitized) configuration
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Drop all buffered audio and smoothing state
    pub fn reset(&mut self) {
        self.input_buffer.fill(0.0);
        self.magnitudes.fill(0.0);
        self.buffer_write_pos = 0;
        self.samples_since_fft = 0;
        self.total_samples = 0;
        self.fft_count = 0;
        self.frame = AudioFeatureFrame::silent();
    }
}

/// Split `bins` at 10 % and 50 %, keeping every band non-empty.
fn band_edges(bins: usize) -> (usize, usize) {
    let low_end = (bins / 10).max(1);
    let mid_end = (bins / 2).max(low_end + 1).min(bins.saturating_sub(1));
    (low_end, mid_end.max(low_end))
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MagnitudeScale;

    const SAMPLE_RATE: u32 = 48_000;
    const FFT_SIZE: usize = 1024;

    fn test_config() -> AnalyzerConfig {
        AnalyzerConfig {
            fft_size: FFT_SIZE,
            smoothing: 0.0,
            scale: MagnitudeScale::Linear,
            ..Default::default()
        }
    }

    /// Full-scale sine centred on FFT bin `bin`
    fn sine_at_bin(bin: usize, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| (2.0 * std::f32::consts::PI * bin as f32 * n as f32 / FFT_SIZE as f32).sin())
            .collect()
    }

    #[test]
    fn test_band_edges() {
        assert_eq!(band_edges(512), (51, 256));
        assert_eq!(band_edges(32), (3, 16));
        // Degenerate sizes still give three non-empty bands
        let (low, mid) = band_edges(4);
        assert!(low >= 1 && mid > low && mid < 4);
    }

    #[test]
    fn test_no_frame_before_buffer_full() {
        let mut extractor = FeatureExtractor::new(&test_config(), SAMPLE_RATE);
        assert!(!extractor.process_samples(&vec![0.5; FFT_SIZE - 1]));
        assert_eq!(extractor.frame(), AudioFeatureFrame::silent());

        assert!(extractor.process_samples(&[0.5]));
        assert_eq!(extractor.frames_computed(), 1);
        assert_eq!(extractor.frame().sequence, 1);
    }

    #[test]
    fn test_silence_gives_zero_frame() {
        let mut extractor = FeatureExtractor::new(&test_config(), SAMPLE_RATE);
        extractor.process_samples(&vec![0.0; FFT_SIZE * 2]);
        assert!(extractor.frame().is_silent());
        assert!(extractor.frame().sequence > 0);
    }

    #[test]
    fn test_low_sine_lands_in_bass() {
        let mut extractor = FeatureExtractor::new(&test_config(), SAMPLE_RATE);
        extractor.process_samples(&sine_at_bin(20, FFT_SIZE * 2));
        let frame = extractor.frame();

        assert!(frame.bass > 10.0 * frame.high, "{:?}", frame);
        assert!(frame.bass > frame.mid);

        // Bin 20 of 512 falls into spectrum bucket 1
        let loudest = frame
            .spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(loudest, Some(1));

        // A full-scale sine peaks at ~1.0 in linear scale
        assert!((extractor.magnitudes()[20] - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_high_sine_lands_in_high_band() {
        let mut extractor = FeatureExtractor::new(&test_config(), SAMPLE_RATE);
        extractor.process_samples(&sine_at_bin(400, FFT_SIZE * 2));
        let frame = extractor.frame();
        assert!(frame.high > 10.0 * frame.bass, "{:?}", frame);
        assert!(frame.spectrum[25] > frame.spectrum[2]);
    }

    #[test]
    fn test_non_finite_input_is_silence() {
        let mut extractor = FeatureExtractor::new(&test_config(), SAMPLE_RATE);
        let mut samples = vec![f32::NAN; FFT_SIZE];
        samples.extend(std::iter::repeat(f32::INFINITY).take(FFT_SIZE));
        extractor.process_samples(&samples);

        let frame = extractor.frame();
        assert!(frame.is_silent());
        assert!(frame.volume.is_finite());
    }

    #[test]
    fn test_smoothing_lags_but_converges() {
        let config = AnalyzerConfig {
            smoothing: 0.9,
            ..test_config()
        };
        let mut extractor = FeatureExtractor::new(&config, SAMPLE_RATE);
        let sine = sine_at_bin(20, FFT_SIZE * 40);

        extractor.process_samples(&sine[..FFT_SIZE]);
        let first = extractor.magnitudes()[20];
        assert!(first < 0.2, "first={}", first);

        extractor.process_samples(&sine[FFT_SIZE..]);
        assert!(extractor.magnitudes()[20] > 0.9);
    }

    #[test]
    fn test_reset() {
        let mut extractor = FeatureExtractor::new(&test_config(), SAMPLE_RATE);
        extractor.process_samples(&sine_at_bin(20, FFT_SIZE * 2));
        assert!(!extractor.frame().is_silent());

        extractor.reset();
        assert_eq!(extractor.frame(), AudioFeatureFrame::silent());
        assert_eq!(extractor.timestamp(), 0.0);
        assert!(extractor.magnitudes().iter().all(|m| *m == 0.0));
    }

    #[test]
    fn test_timestamp_tracks_samples() {
        let mut extractor = FeatureExtractor::new(&test_config(), SAMPLE_RATE);
        extractor.process_samples(&vec![0.0; SAMPLE_RATE as usize / 2]);
        assert!((extractor.timestamp() - 0.5).abs() < 1e-9);
        assert_eq!(extractor.sample_rate(), SAMPLE_RATE);
    }
}
