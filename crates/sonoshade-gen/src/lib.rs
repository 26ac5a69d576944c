//! Sonoshade Gen - Program Generation
//!
//! Turns prompts and audio clips into rendering programs:
//! - `GenerativeProvider` abstraction with a streaming Gemini backend
//! - Prompt construction around the program contract
//! - The generation orchestrator (single cycle, retries, rollback)

pub mod error;
pub mod gemini;
pub mod orchestrator;
pub mod prompt;
pub mod provider;

pub use error::{GenerationError, ProviderError};
pub use gemini::GeminiProvider;
pub use orchestrator::{
    CycleHandle, CycleOutcome, Orchestrator, OrchestratorEvent, OrchestratorState,
    DEFAULT_DESCRIPTION,
};
pub use provider::{GenerativeProvider, ProviderEvent, ProviderStream};

use sonoshade_core::{ProviderChoice, ProviderConfig};
use std::sync::Arc;

/// Build the provider selected in `config`
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn GenerativeProvider>, ProviderError> {
    match config.provider {
        ProviderChoice::Gemini => Ok(Arc::new(GeminiProvider::new(config)?)),
    }
}
