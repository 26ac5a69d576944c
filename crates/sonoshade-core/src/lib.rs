//! Sonoshade Core - Shared Domain Model
//!
//! This crate contains the pieces every other Sonoshade crate builds on:
//! - Audio feature frames and the threaded spectrum analyzer
//! - Generation requests, results and progress events
//! - Listener fan-out with stable unsubscribe handles
//! - Program validation and code extraction helpers
//! - Configuration and logging configuration

#![warn(missing_docs)]

pub mod audio;
pub mod config;
pub mod features;
pub mod generation;
pub mod listeners;
pub mod logging;
pub mod program;
pub mod target;

// --- Re-exports grouped by category ---

// Audio
pub use audio::{
    AnalyzerConfig, AudioError, AudioSource, FeatureExtractor, MagnitudeScale, PushSource,
    SampleStream, SpectrumAnalyzer, WavClip,
};
#[cfg(feature = "audio")]
pub use audio::CpalInput;
pub use features::{AudioFeatureFrame, SPECTRUM_BINS};

// Generation data model
pub use generation::{
    GenerationInput, GenerationRequest, GenerationResult, ProgressEvent, ProviderChoice,
};

// Fan-out & activation
pub use listeners::{Listeners, Subscription};
pub use target::{CancelToken, CommitGuard, ProgramTarget};

// Configuration
pub use config::{ConfigError, OrchestratorConfig, ProviderConfig, RenderConfig, SonoshadeConfig};
pub use logging::{ColorMode, LogConfig};
