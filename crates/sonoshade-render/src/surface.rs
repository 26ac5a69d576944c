//! Display surface abstraction and the per-frame program inputs.

use crate::Result;
use bytemuck::{Pod, Zeroable};
use sonoshade_core::{AudioFeatureFrame, SPECTRUM_BINS};

/// Uniform block handed to every program (matches `Inputs` in the program
/// prelude). 160 bytes, 16-byte aligned.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable, PartialEq)]
pub struct ProgramInputs {
    pub resolution: [f32; 2], // 8 bytes
    pub time: f32,            // 4 bytes
    pub volume: f32,          // 4 bytes
    pub bass: f32,            // 4 bytes
    pub mid: f32,             // 4 bytes
    pub high: f32,            // 4 bytes
    _pad: f32,                // 4 bytes
    pub spectrum: [[f32; 4]; SPECTRUM_BINS / 4], // 128 bytes
}

impl ProgramInputs {
    /// Pack a (sensitivity-scaled) frame for upload
    pub fn new(frame: &AudioFeatureFrame, resolution: (u32, u32), time: f32) -> Self {
        let mut spectrum = [[0.0f32; 4]; SPECTRUM_BINS / 4];
        for (i, value) in frame.spectrum.iter().enumerate() {
            spectrum[i / 4][i % 4] = *value;
        }
        Self {
            resolution: [resolution.0 as f32, resolution.1 as f32],
            time,
            volume: frame.volume,
            bass: frame.bass,
            mid: frame.mid,
            high: frame.high,
            _pad: 0.0,
            spectrum,
        }
    }

    /// Spectrum value `index` (0 = lowest)
    pub fn spectrum_at(&self, index: usize) -> f32 {
        let i = index.min(SPECTRUM_BINS - 1);
        self.spectrum[i / 4][i % 4]
    }
}

/// Something that can compile and present rendering programs.
///
/// All methods take `&self`: compiling happens on whichever thread activates a
/// candidate while drawing continues on the render thread.
pub trait DisplaySurface: Send + Sync {
    /// A compiled, ready-to-draw program
    type Program: Send + Sync + 'static;

    /// Compile a full module (prelude already prepended). Failure must be
    /// reported here, never deferred to `draw`.
    fn compile(&self, module: &str) -> Result<Self::Program>;

    /// Draw one frame
    fn draw(&self, program: &Self::Program, inputs: &ProgramInputs) -> Result<()>;

    /// Current size in pixels
    fn size(&self) -> (u32, u32);

    /// The presentation area changed size
    fn resize(&self, width: u32, height: u32);

    /// Free GPU resources. Called once.
    fn release(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inputs_layout() {
        assert_eq!(std::mem::size_of::<ProgramInputs>(), 160);
        assert_eq!(std::mem::size_of::<ProgramInputs>() % 16, 0);
    }

    #[test]
    fn test_inputs_pack_spectrum() {
        let mut spectrum = [0.0; SPECTRUM_BINS];
        spectrum[0] = 0.1;
        spectrum[5] = 0.5;
        spectrum[31] = 0.9;
        let frame = AudioFeatureFrame::from_parts(0.2, 0.3, 0.4, 0.6, spectrum);

        let inputs = ProgramInputs::new(&frame, (640, 480), 1.5);
        assert_eq!(inputs.resolution, [640.0, 480.0]);
        assert_eq!(inputs.time, 1.5);
        assert_eq!(inputs.bass, 0.3);
        assert_eq!(inputs.spectrum[1][1], 0.5);
        assert_eq!(inputs.spectrum_at(31), 0.9);
        assert_eq!(inputs.spectrum_at(99), 0.9);
        assert_eq!(inputs.spectrum_at(0), 0.1);

        let bytes: &[u8] = bytemuck::bytes_of(&inputs);
        assert_eq!(bytes.len(), 160);
    }

    proptest::proptest! {
        #[test]
        fn prop_every_bin_survives_packing(values in proptest::collection::vec(0.0f32..=1.0, SPECTRUM_BINS)) {
            let mut spectrum = [0.0; SPECTRUM_BINS];
            spectrum.copy_from_slice(&values);
            let frame = AudioFeatureFrame::from_parts(0.0, 0.0, 0.0, 0.0, spectrum);
            let inputs = ProgramInputs::new(&frame, (1, 1), 0.0);
            for (i, value) in values.iter().enumerate() {
                proptest::prop_assert_eq!(inputs.spectrum_at(i), *value);
            }
        }
    }
}
