use anyhow::{Context, Result};
use clap::{Args, Parser};
use sonoshade_core::{ColorMode, GenerationRequest, SonoshadeConfig};
use std::path::{Path, PathBuf};

/// Audio-reactive visuals from generated shaders
#[derive(Parser, Debug)]
#[command(name = "sonoshade", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub input: InputArgs,

    /// Analyze this WAV file instead of live input
    #[arg(long, value_name = "FILE")]
    pub wav: Option<PathBuf>,

    /// Restart the WAV file when it ends
    #[arg(long = "loop", requires = "wav")]
    pub looping: bool,

    /// Capture from this input device instead of the default one
    #[arg(long, conflicts_with = "wav")]
    pub device: Option<String>,

    /// Print the available input devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Model identifier
    #[arg(long)]
    pub model: Option<String>,

    /// Multiplier for every audio energy input
    #[arg(long)]
    pub sensitivity: Option<f32>,

    /// Preferred GPU adapter (substring of its name)
    #[arg(long)]
    pub gpu: Option<String>,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (RUST_LOG still wins)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Console colors: auto, always or never
    #[arg(long, value_name = "WHEN")]
    pub color: Option<ColorMode>,

    /// Write the effective configuration back to disk
    #[arg(long)]
    pub save_config: bool,
}

/// What the first generation cycle is derived from
#[derive(Args, Debug, Default)]
#[group(multiple = false)]
pub struct InputArgs {
    /// Describe the visual in words
    #[arg(long)]
    pub prompt: Option<String>,

    /// Send this audio clip to the model
    #[arg(long, value_name = "FILE")]
    pub clip: Option<PathBuf>,
}

impl Cli {
    /// Load the configuration file and apply command line overrides
    pub fn resolve_config(&self) -> Result<SonoshadeConfig> {
        let mut config = match &self.config {
            Some(path) => SonoshadeConfig::load_from(path)
                .with_context(|| format!("Failed to load config {:?}", path))?,
            None => SonoshadeConfig::load(),
        };

        if let Some(model) = &self.model {
            config.provider.model_id = model.clone();
        }
        if let Some(sensitivity) = self.sensitivity {
            config.render.sensitivity = sensitivity;
        }
        if let Some(gpu) = &self.gpu {
            config.render.preferred_gpu = Some(gpu.clone());
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        if let Some(color) = self.color {
            config.log.color = color;
        }
        Ok(config)
    }

    /// Request for the first cycle, if one was asked for
    pub fn initial_request(&self, config: &SonoshadeConfig) -> Result<Option<GenerationRequest>> {
        let provider = config.provider.provider;
        let model = config.provider.model_id.clone();

        if let Some(text) = &self.input.prompt {
            return Ok(Some(GenerationRequest::from_prompt(text.clone(), provider, model)));
        }
        if let Some(path) = &self.input.clip {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read audio clip {:?}", path))?;
            return Ok(Some(GenerationRequest::from_audio_clip(
                bytes,
                clip_mime_type(path),
                provider,
                model,
            )));
        }
        Ok(None)
    }
}

/// MIME type for an audio clip, guessed from its extension
pub fn clip_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mp3",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("aac") => "audio/aac",
        Some("aiff" | "aif") => "audio/aiff",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use sonoshade_core::GenerationInput;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_prompt_and_clip_are_exclusive() {
        let result = Cli::try_parse_from(["sonoshade", "--prompt", "rain", "--clip", "a.wav"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_loop_requires_wav() {
        assert!(Cli::try_parse_from(["sonoshade", "--loop"]).is_err());
        assert!(Cli::try_parse_from(["sonoshade", "--wav", "a.wav", "--loop"]).is_ok());
    }

    #[test]
    fn test_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        SonoshadeConfig::default().save_to(&path).unwrap();

        let cli = Cli::try_parse_from([
            "sonoshade",
            "--config",
            path.to_str().unwrap(),
            "--model",
            "custom-model",
            "--sensitivity",
            "2.5",
            "--log-level",
            "debug",
            "--color",
            "never",
        ])
        .unwrap();
        let config = cli.resolve_config().unwrap();

        assert_eq!(config.provider.model_id, "custom-model");
        assert_eq!(config.render.sensitivity, 2.5);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.color, ColorMode::Never);
        assert_eq!(config.orchestrator.max_retries, 5);
    }

    #[test]
    fn test_initial_request_from_clip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beat.MP3");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let cli = Cli::try_parse_from(["sonoshade", "--clip", path.to_str().unwrap()]).unwrap();
        let request = cli
            .initial_request(&SonoshadeConfig::default())
            .unwrap()
            .unwrap();

        match request.input {
            GenerationInput::AudioClip { bytes, mime_type } => {
                assert_eq!(&*bytes, &[1u8, 2, 3]);
                assert_eq!(mime_type, "audio/mp3");
            }
            other => panic!("unexpected input {:?}", other),
        }
    }

    #[test]
    fn test_no_request_without_input() {
        let cli = Cli::try_parse_from(["sonoshade"]).unwrap();
        assert!(cli
            .initial_request(&SonoshadeConfig::default())
            .unwrap()
            .is_none());
    }
}
