//! Generation requests, results and progress events.

use crate::features::AudioFeatureFrame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Which generative backend serves a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderChoice {
    /// Google Gemini (`streamGenerateContent`)
    #[default]
    Gemini,
}

impl fmt::Display for ProviderChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

/// What a generation cycle is derived from. The two modes are exclusive.
#[derive(Clone, PartialEq, Eq)]
pub enum GenerationInput {
    /// A one-shot audio clip
    AudioClip {
        /// Encoded audio bytes, shared between retries
        bytes: Arc<[u8]>,
        /// MIME type such as `audio/mpeg`
        mime_type: String,
    },
    /// Free-form prompt text
    Prompt {
        /// The user's description of the visual
        text: String,
    },
}

impl fmt::Debug for GenerationInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AudioClip { bytes, mime_type } => f
                .debug_struct("AudioClip")
                .field("len", &bytes.len())
                .field("mime_type", mime_type)
                .finish(),
            Self::Prompt { text } => f.debug_struct("Prompt").field("text", text).finish(),
        }
    }
}

/// Input to one generation cycle. Immutable once submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Audio clip or prompt
    pub input: GenerationInput,
    /// Backend to use
    pub provider: ProviderChoice,
    /// Model identifier understood by the backend
    pub model_id: String,
    /// Analyzer snapshot taken when the request was built
    pub features: Option<AudioFeatureFrame>,
}

impl GenerationRequest {
    /// Request derived from prompt text
    pub fn from_prompt(text: impl Into<String>, provider: ProviderChoice, model_id: impl Into<String>) -> Self {
        Self {
            input: GenerationInput::Prompt { text: text.into() },
            provider,
            model_id: model_id.into(),
            features: None,
        }
    }

    /// Request derived from an audio clip
    pub fn from_audio_clip(
        bytes: impl Into<Arc<[u8]>>,
        mime_type: impl Into<String>,
        provider: ProviderChoice,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            input: GenerationInput::AudioClip {
                bytes: bytes.into(),
                mime_type: mime_type.into(),
            },
            provider,
            model_id: model_id.into(),
            features: None,
        }
    }

    /// Attach an analyzer snapshot
    pub fn with_features(mut self, frame: AudioFeatureFrame) -> Self {
        self.features = Some(frame);
        self
    }

    /// True for audio-clip mode
    pub fn is_audio(&self) -> bool {
        matches!(self.input, GenerationInput::AudioClip { .. })
    }
}

/// Structured output of a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Candidate rendering program
    pub code: String,
    /// Provider rationale, advisory only
    #[serde(default)]
    pub description: String,
}

/// Streaming view of the program text while an attempt is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Code received so far
    pub partial_code: String,
    /// Set on the last event of an attempt
    pub is_complete: bool,
    /// 1-based request number within the cycle
    pub attempt: u32,
}

impl ProgressEvent {
    /// Intermediate event
    pub fn partial(partial_code: impl Into<String>, attempt: u32) -> Self {
        Self {
            partial_code: partial_code.into(),
            is_complete: false,
            attempt,
        }
    }

    /// Terminal event of an attempt
    pub fn complete(code: impl Into<String>, attempt: u32) -> Self {
        Self {
            partial_code: code.into(),
            is_complete: true,
            attempt,
        }
    }
}
