//! Audio feature extraction.
//!
//! - [`FeatureExtractor`]: single-threaded FFT analysis producing feature frames
//! - [`SpectrumAnalyzer`]: runs an extractor on its own thread against an
//!   attached [`AudioSource`] and publishes the newest frame lock-free
//! - Sources: [`PushSource`], [`WavClip`] and, with the `audio` feature,
//!   [`CpalInput`]

pub mod analyzer;
#[cfg(feature = "audio")]
pub mod cpal_input;
pub mod extractor;
pub mod source;

pub use analyzer::SpectrumAnalyzer;
#[cfg(feature = "audio")]
pub use cpal_input::CpalInput;
pub use extractor::FeatureExtractor;
pub use source::{AudioSource, PushSource, SampleSender, SampleStream, WavClip};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Audio errors
#[derive(Error, Debug)]
pub enum AudioError {
    /// The source could not be opened (permissions, missing device, bad format)
    #[error("Audio source unavailable: {0}")]
    SourceUnavailable(String),
}

/// How raw FFT magnitudes are mapped into `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MagnitudeScale {
    /// Linear magnitude; a full-scale sine centred on a bin reads 1.0
    Linear,
    /// Magnitude in decibels mapped from `floor_db..ceiling_db`
    Decibels {
        /// Level that maps to 0
        floor_db: f32,
        /// Level that maps to 1
        ceiling_db: f32,
    },
}

/// Full scale reads 1.0, so only clipping input saturates
impl Default for MagnitudeScale {
    fn default() -> Self {
        Self::Decibels {
            floor_db: -100.0,
            ceiling_db: 0.0,
        }
    }
}

impl MagnitudeScale {
    /// Map a linear magnitude (1.0 = full scale) into `[0, 1]`
    pub fn normalize(&self, linear: f32) -> f32 {
        let value = match *self {
            Self::Linear => linear,
            Self::Decibels {
                floor_db,
                ceiling_db,
            } => {
                let range = (ceiling_db - floor_db).max(f32::EPSILON);
                let db = 20.0 * linear.max(1e-10).log10();
                (db - floor_db) / range
            }
        };
        if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Configuration for the feature extractor and analysis thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// FFT size (power of 2, at least 64)
    pub fft_size: usize,
    /// Overlap ratio between consecutive transforms (0.0 - 0.95)
    pub overlap: f32,
    /// Exponential smoothing factor (0.0 = off, capped at 0.95)
    pub smoothing: f32,
    /// Magnitude normalization
    pub scale: MagnitudeScale,
    /// Analysis cadence of the background thread in milliseconds
    pub analysis_interval_ms: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            overlap: 0.5,
            smoothing: 0.8,
            scale: MagnitudeScale::default(),
            analysis_interval_ms: 16,
        }
    }
}

impl AnalyzerConfig {
    /// Smallest accepted FFT size; every spectrum bucket needs at least one bin
    pub const MIN_FFT_SIZE: usize = 64;
    /// Largest accepted FFT size
    pub const MAX_FFT_SIZE: usize = 32768;
    /// Upper bound on smoothing; keeps the smoothing lag bounded
    pub const MAX_SMOOTHING: f32 = 0.95;

    /// Copy with every value forced into its valid range
    pub fn sanitized(&self) -> Self {
        let fft_size = self
            .fft_size
            .clamp(Self::MIN_FFT_SIZE, Self::MAX_FFT_SIZE)
            .next_power_of_two()
            .min(Self::MAX_FFT_SIZE);
        Self {
            fft_size,
            overlap: finite_or(self.overlap, 0.5).clamp(0.0, 0.95),
            smoothing: finite_or(self.smoothing, 0.0).clamp(0.0, Self::MAX_SMOOTHING),
            scale: self.scale,
            analysis_interval_ms: self.analysis_interval_ms.max(1),
        }
    }

    /// Analysis cadence as a `Duration`
    pub fn analysis_interval(&self) -> Duration {
        Duration::from_millis(self.analysis_interval_ms.max(1))
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}
