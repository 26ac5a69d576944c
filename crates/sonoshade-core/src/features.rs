//! Audio feature frames consumed by the render host every frame.

use serde::{Deserialize, Serialize};

/// Number of coarse frequency buckets carried in every frame.
pub const SPECTRUM_BINS: usize = 32;

/// One snapshot of audio-derived rendering inputs.
///
/// All energy values live in `[0, 1]`. A frame is a snapshot, not an event:
/// producers overwrite the previous frame and consumers only ever read the
/// newest one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatureFrame {
    /// Overall signal energy
    pub volume: f32,
    /// Low band energy (0-10% of the usable bandwidth)
    pub bass: f32,
    /// Mid band energy (10-50%)
    pub mid: f32,
    /// High band energy (50-100%)
    pub high: f32,
    /// Coarse spectrum, index 0 = lowest frequency
    pub spectrum: [f32; SPECTRUM_BINS],
    /// Analysis cycle that produced this frame (0 = nothing analysed yet)
    pub sequence: u64,
    /// Seconds of audio analysed when the frame was produced
    pub timestamp: f64,
}

impl Default for AudioFeatureFrame {
    fn default() -> Self {
        Self::silent()
    }
}

impl AudioFeatureFrame {
    /// The all-zero frame returned before any analysis has completed.
    pub const fn silent() -> Self {
        Self {
            volume: 0.0,
            bass: 0.0,
            mid: 0.0,
            high: 0.0,
            spectrum: [0.0; SPECTRUM_BINS],
            sequence: 0,
            timestamp: 0.0,
        }
    }

    /// Build a frame from raw values, clamping every field into `[0, 1]`.
    pub fn from_parts(
        volume: f32,
        bass: f32,
        mid: f32,
        high: f32,
        spectrum: [f32; SPECTRUM_BINS],
    ) -> Self {
        Self {
            volume: unit(volume),
            bass: unit(bass),
            mid: unit(mid),
            high: unit(high),
            spectrum: spectrum.map(unit),
            sequence: 0,
            timestamp: 0.0,
        }
    }

    /// Attach the producing cycle number and audio clock.
    pub fn with_sequence(mut self, sequence: u64, timestamp: f64) -> Self {
        self.sequence = sequence;
        self.timestamp = timestamp;
        self
    }

    /// Multiply every energy field by `sensitivity`.
    ///
    /// Negative or non-finite sensitivities count as zero. The result is not
    /// re-clamped: a sensitivity above 1 is allowed to push values past 1.
    pub fn scaled(&self, sensitivity: f32) -> Self {
        let k = if sensitivity.is_finite() {
            sensitivity.max(0.0)
        } else {
            0.0
        };
        Self {
            volume: self.volume * k,
            bass: self.bass * k,
            mid: self.mid * k,
            high: self.high * k,
            spectrum: self.spectrum.map(|v| v * k),
            sequence: self.sequence,
            timestamp: self.timestamp,
        }
    }

    /// True if every energy field is zero.
    pub fn is_silent(&self) -> bool {
        self.volume == 0.0
            && self.bass == 0.0
            && self.mid == 0.0
            && self.high == 0.0
            && self.spectrum.iter().all(|v| *v == 0.0)
    }
}

fn unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_silent_frame() {
        let frame = AudioFeatureFrame::default();
        assert!(frame.is_silent());
        assert_eq!(frame.sequence, 0);
    }

    #[test]
    fn test_from_parts_sanitizes() {
        let mut spectrum = [0.5; SPECTRUM_BINS];
        spectrum[0] = f32::NAN;
        spectrum[1] = 7.0;
        let frame = AudioFeatureFrame::from_parts(1.5, -0.2, f32::INFINITY, 0.3, spectrum);

        assert_eq!(frame.volume, 1.0);
        assert_eq!(frame.bass, 0.0);
        assert_eq!(frame.mid, 0.0);
        assert_eq!(frame.high, 0.3);
        assert_eq!(frame.spectrum[0], 0.0);
        assert_eq!(frame.spectrum[1], 1.0);
        assert_eq!(frame.spectrum[2], 0.5);
    }

    #[test]
    fn test_scaled_keeps_bins_in_place() {
        let mut spectrum = [0.0; SPECTRUM_BINS];
        spectrum[3] = 0.25;
        let frame = AudioFeatureFrame::from_parts(0.5, 0.4, 0.2, 0.1, spectrum).with_sequence(9, 1.0);
        let scaled = frame.scaled(2.0);

        assert_eq!(scaled.volume, 1.0);
        assert_eq!(scaled.bass, 0.8);
        assert_eq!(scaled.spectrum[3], 0.5);
        assert_eq!(scaled.spectrum[4], 0.0);
        assert_eq!(scaled.sequence, 9);
    }

    #[test]
    fn test_scaled_rejects_bad_sensitivity() {
        let frame = AudioFeatureFrame::from_parts(0.5, 0.5, 0.5, 0.5, [0.5; SPECTRUM_BINS]);
        assert!(frame.scaled(-3.0).is_silent());
        assert!(frame.scaled(f32::NAN).is_silent());
    }

    proptest! {
        #[test]
        fn prop_from_parts_always_in_unit_range(
            volume in proptest::num::f32::ANY,
            bass in proptest::num::f32::ANY,
            mid in proptest::num::f32::ANY,
            high in proptest::num::f32::ANY,
            bin in proptest::num::f32::ANY,
        ) {
            let frame = AudioFeatureFrame::from_parts(volume, bass, mid, high, [bin; SPECTRUM_BINS]);
            for v in [frame.volume, frame.bass, frame.mid, frame.high] {
                prop_assert!((0.0..=1.0).contains(&v));
            }
            for v in frame.spectrum {
                prop_assert!((0.0..=1.0).contains(&v));
            }
        }
    }
}
