//! Generative provider abstraction.

use crate::error::ProviderError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use sonoshade_core::{GenerationRequest, GenerationResult};

/// One item of a provider's streamed answer
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// Program text produced so far (cumulative, not a delta)
    Partial(String),
    /// Raw model text that could not be parsed as a structured result
    Text(String),
    /// Structured final result
    Completed(GenerationResult),
}

/// A provider's answer. Always terminates.
pub type ProviderStream = BoxStream<'static, Result<ProviderEvent, ProviderError>>;

/// Something that turns a request into a (streamed) rendering program
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Dispatch `request`. Connection, credential and quota failures are
    /// returned here; failures mid-stream arrive as stream items.
    async fn generate_program(
        &self,
        request: &GenerationRequest,
    ) -> Result<ProviderStream, ProviderError>;
}
