//! Auth provider error types

use thiserror::Error;

/// Errors that can occur while talking to the auth provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status} from {endpoint}")]
    Http { status: u16, endpoint: String },

    #[error("Provider rejected request: {0}")]
    Protocol(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Check if this error is a transport failure worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network(_) => true,
            ProviderError::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            ProviderError::Protocol(_) => false,
            ProviderError::InvalidResponse(_) => false,
        }
    }
}
