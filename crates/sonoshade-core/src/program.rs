//! Rendering program contract, validation and code extraction.
//!
//! A rendering program is a WGSL fragment stage. The host prepends
//! [`PROGRAM_PRELUDE`] (the uniform block with the audio inputs and a
//! fullscreen vertex stage) before compiling, so generated code only has to
//! provide a `@fragment` entry point that reads from `u`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

/// Declarations every program is compiled against.
///
/// Keep in sync with `ProgramInputs` in `sonoshade-render`.
pub const PROGRAM_PRELUDE: &str = r#"struct Inputs {
    resolution: vec2<f32>,
    time: f32,
    volume: f32,
    bass: f32,
    mid: f32,
    high: f32,
    _pad: f32,
    spectrum: array<vec4<f32>, 8>,
};

@group(0) @binding(0) var<uniform> u: Inputs;

fn spectrum_at(index: u32) -> f32 {
    let i = min(index, 31u);
    return u.spectrum[i / 4u][i % 4u];
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> @builtin(position) vec4<f32> {
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    return vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
}
"#;

/// Built-in program shown before the first successful activation and used
/// whenever a candidate cannot be salvaged.
pub const DEFAULT_PROGRAM: &str = r#"@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    let uv = (frag.xy - 0.5 * u.resolution) / max(u.resolution.y, 1.0);
    let r = length(uv);
    let band = spectrum_at(u32(clamp(r * 32.0, 0.0, 31.0)));
    let wave = sin(10.0 * r - u.time * 2.0 + u.bass * 6.0);
    let glow = 0.25 + 0.75 * band + 0.3 * u.volume;
    let color = vec3<f32>(
        0.5 + 0.5 * wave,
        0.4 + 0.4 * sin(u.time + u.mid * 3.0),
        0.6 + 0.4 * cos(u.time * 0.7 + u.high * 4.0),
    );
    return vec4<f32>(color * glow, 1.0);
}
"#;

static ENTRY_POINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@fragment\s+fn\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("valid entry point regex")
});

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)```").expect("valid fence regex")
});

/// Name of the fragment entry point, if the program declares one.
pub fn entry_point(code: &str) -> Option<&str> {
    ENTRY_POINT
        .captures(code)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Minimal well-formedness check applied before activation.
pub fn has_entry_point(code: &str) -> bool {
    entry_point(code).is_some()
}

/// The full module handed to the display surface.
pub fn assemble(code: &str) -> String {
    let mut module = String::with_capacity(PROGRAM_PRELUDE.len() + code.len() + 1);
    module.push_str(PROGRAM_PRELUDE);
    module.push('\n');
    module.push_str(code);
    module
}

#[derive(Deserialize)]
struct CodeField {
    code: String,
}

/// Pull a program out of unstructured model output.
///
/// Tried in order: a JSON object with a `code` field, a fenced code block
/// (preferring one that declares a fragment entry point), and finally the
/// whole text if it declares an entry point itself.
pub fn extract_code(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(code) = code_from_json(trimmed) {
        return Some(code);
    }

    let blocks: Vec<&str> = FENCED_BLOCK
        .captures_iter(trimmed)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim()))
        .filter(|block| !block.is_empty())
        .collect();
    if let Some(block) = blocks.iter().find(|b| has_entry_point(b)) {
        return Some((*block).to_string());
    }
    if let Some(block) = blocks.first() {
        return Some((*block).to_string());
    }

    if has_entry_point(trimmed) {
        return Some(trimmed.to_string());
    }

    None
}

fn code_from_json(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<CodeField>(&text[start..=end])
        .ok()
        .map(|field| field.code)
        .filter(|code| !code.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_program_has_entry_point() {
        assert_eq!(entry_point(DEFAULT_PROGRAM), Some("fs_main"));
    }

    #[test]
    fn test_entry_point_across_lines() {
        let code = "@fragment\n\nfn  main_image (@builtin(position) p: vec4<f32>) -> @location(0) vec4<f32> { return p; }";
        assert_eq!(entry_point(code), Some("main_image"));
    }

    #[test]
    fn test_missing_entry_point() {
        assert!(!has_entry_point("fn helper() -> f32 { return 1.0; }"));
        assert!(!has_entry_point(""));
    }

    #[test]
    fn test_extract_from_fenced_block() {
        let text = "Here you go:\n```wgsl\n@fragment\nfn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }\n```\nEnjoy!";
        let code = extract_code(text).unwrap();
        assert!(code.starts_with("@fragment"));
        assert!(!code.contains("```"));
    }

    #[test]
    fn test_extract_prefers_block_with_entry_point() {
        let text = "```\nconst A: f32 = 1.0;\n```\n```wgsl\n@fragment\nfn fs_main() {}\n```";
        let code = extract_code(text).unwrap();
        assert!(code.contains("@fragment"));
    }

    #[test]
    fn test_extract_from_json() {
        let text = r#"Result: {"code": "@fragment\nfn fs_main() {}", "description": "rings"}"#;
        assert_eq!(extract_code(text).unwrap(), "@fragment\nfn fs_main() {}");
    }

    #[test]
    fn test_extract_loose_code() {
        let text = "  @fragment fn fs_main() {}  ";
        assert_eq!(extract_code(text).unwrap(), "@fragment fn fs_main() {}");
    }

    #[test]
    fn test_extract_nothing() {
        assert_eq!(extract_code("I cannot help with that."), None);
        assert_eq!(extract_code("   "), None);
    }

    #[test]
    fn test_assemble_prepends_prelude() {
        let module = assemble(DEFAULT_PROGRAM);
        assert!(module.starts_with("struct Inputs"));
        assert!(module.ends_with(DEFAULT_PROGRAM));
    }
}
