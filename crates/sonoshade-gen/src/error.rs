use thiserror::Error;

/// Failure talking to a generative provider. Terminal for the cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Transport(String),
    #[error("Credential rejected: {0}")]
    Unauthorized(String),
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("Request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("No API key found in ${0}")]
    MissingCredential(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::InvalidResponse(err.to_string())
    }
}

/// Why a generation cycle did not produce the program it asked for
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
    /// The provider answered without any usable program text
    #[error("Provider returned no program")]
    NoCandidate,
    /// The program text has no fragment entry point
    #[error("Generated program has no entry point")]
    MalformedProgram,
    /// Every attempt was rejected; rollback has already happened
    #[error("Program rejected {attempts} times, rolled back")]
    MaxRetriesExceeded { attempts: u32 },
}

impl GenerationError {
    /// Warnings are absorbed by substituting the default program
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::NoCandidate | Self::MalformedProgram)
    }
}
