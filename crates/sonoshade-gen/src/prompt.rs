//! Instruction text sent with every request.

use sonoshade_core::program::PROGRAM_PRELUDE;
use sonoshade_core::{AudioFeatureFrame, GenerationInput, GenerationRequest};
use std::fmt::Write;

/// The rendering program contract, as instructions for the model
pub fn system_instruction() -> String {
    format!(
        "You write fragment shaders in WGSL for a live, audio-reactive display.\n\
         \n\
         The following declarations are prepended to your code. Use them and do not redeclare them:\n\
         \n\
         {prelude}\n\
         Rules:\n\
         - Define exactly one entry point: `@fragment fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32>`.\n\
         - Read audio only through `u.volume`, `u.bass`, `u.mid`, `u.high` and `spectrum_at(i)` (i in 0..32). All are in [0, 1].\n\
         - `u.time` is seconds since start and `u.resolution` is the output size in pixels.\n\
         - No textures, samplers or extra bindings.\n\
         - Loops must have constant bounds of at most 64 iterations.\n\
         - Return an opaque color (alpha 1.0).\n\
         \n\
         Answer with a JSON object {{\"code\": <WGSL source>, \"description\": <one sentence>}} and nothing else.",
        prelude = PROGRAM_PRELUDE
    )
}

/// The user turn for `request`
pub fn user_text(request: &GenerationRequest) -> String {
    let mut text = match &request.input {
        GenerationInput::Prompt { text } => {
            format!("Create a visual for this description: {}", text.trim())
        }
        GenerationInput::AudioClip { .. } => {
            "Listen to the attached audio clip and create a visual that matches its mood and rhythm."
                .to_string()
        }
    };

    if let Some(frame) = &request.features {
        text.push_str("\n\n");
        text.push_str(&describe_features(frame));
    }
    text
}

/// One-line summary of an analyzer snapshot
pub fn describe_features(frame: &AudioFeatureFrame) -> String {
    let mut line = format!(
        "Audio levels right now: volume {:.2}, bass {:.2}, mid {:.2}, high {:.2}.",
        frame.volume, frame.bass, frame.mid, frame.high
    );
    if let Some((bin, value)) = frame
        .spectrum
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .filter(|(_, v)| **v > 0.0)
    {
        let _ = write!(line, " Strongest spectrum bin: {} of 32 ({:.2}).", bin, value);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonoshade_core::{ProviderChoice, SPECTRUM_BINS};

    #[test]
    fn test_system_instruction_contains_contract() {
        let text = system_instruction();
        assert!(text.contains("struct Inputs"));
        assert!(text.contains("@fragment fn fs_main"));
        assert!(text.contains("\"code\""));
    }

    #[test]
    fn test_prompt_text() {
        let request = GenerationRequest::from_prompt("  neon rain ", ProviderChoice::Gemini, "m");
        assert_eq!(
            user_text(&request),
            "Create a visual for this description: neon rain"
        );
    }

    #[test]
    fn test_audio_request_with_features() {
        let mut spectrum = [0.0; SPECTRUM_BINS];
        spectrum[4] = 0.75;
        let frame = AudioFeatureFrame::from_parts(0.5, 0.9, 0.2, 0.1, spectrum);
        let request =
            GenerationRequest::from_audio_clip(vec![0u8; 4], "audio/mpeg", ProviderChoice::Gemini, "m")
                .with_features(frame);

        let text = user_text(&request);
        assert!(text.starts_with("Listen to the attached audio"));
        assert!(text.contains("bass 0.90"));
        assert!(text.contains("bin: 4 of 32"));
    }

    #[test]
    fn test_silent_features_skip_spectrum() {
        let line = describe_features(&AudioFeatureFrame::silent());
        assert!(!line.contains("Strongest"));
    }
}
