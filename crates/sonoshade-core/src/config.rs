//! User configuration management
//!
//! Settings are stored as JSON in the platform config directory. Loading never
//! fails: a missing or unreadable file yields the defaults.

use crate::audio::AnalyzerConfig;
use crate::generation::ProviderChoice;
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File contents are not valid configuration JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No platform config directory could be determined
    #[error("No configuration directory available")]
    NoConfigDir,
}

/// Retry policy of the generation orchestrator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Rejected activations tolerated before rolling back
    pub max_retries: u32,
    /// Pause between a rejected activation and the next request
    pub retry_backoff_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_backoff_ms: 1500,
        }
    }
}

impl OrchestratorConfig {
    /// Backoff as a `Duration`
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Generative provider settings. The API key itself is never stored here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// Backend to use
    pub provider: ProviderChoice,
    /// Model identifier
    pub model_id: String,
    /// API base URL
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Whole-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: ProviderChoice::Gemini,
            model_id: "gemini-2.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl ProviderConfig {
    /// Request timeout as a `Duration`
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

/// Display settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    /// Multiplier applied to every audio energy input
    pub sensitivity: f32,
    /// Adapter name to prefer, if present
    pub preferred_gpu: Option<String>,
    /// Initial window width
    pub window_width: u32,
    /// Initial window height
    pub window_height: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            sensitivity: 1.0,
            preferred_gpu: None,
            window_width: 1280,
            window_height: 720,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SonoshadeConfig {
    /// Spectrum analyzer
    pub analyzer: AnalyzerConfig,
    /// Retry policy
    pub orchestrator: OrchestratorConfig,
    /// Generative provider
    pub provider: ProviderConfig,
    /// Display
    pub render: RenderConfig,
    /// Logging
    pub log: LogConfig,
}

impl SonoshadeConfig {
    /// Default location: `<config dir>/Sonoshade/config.json`
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("Sonoshade");
            p.push("config.json");
            p
        })
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Ignoring unreadable config {:?}: {}", path, e);
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    /// Load from an explicit path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Save to an explicit path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
