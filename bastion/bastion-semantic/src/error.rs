//! Error types for retrieval and answering.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SemanticError>;

#[derive(Debug, Error)]
pub enum SemanticError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    #[error("Invalid dimension: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Core(#[from] bastion_core::BastionError),
}

impl SemanticError {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    /// Whether the error means a backing service could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Http(_) | Self::Timeout(_) | Self::Provider(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            SemanticError::DimensionMismatch { expected: 8, got: 4 }.to_string(),
            "Invalid dimension: expected 8, got 4"
        );
        assert_eq!(SemanticError::Timeout(250).to_string(), "Operation timed out after 250 ms");
    }

    #[test]
    fn test_core_error_is_transparent() {
        let err: SemanticError = bastion_core::BastionError::invalid_input("empty").into();
        assert_eq!(err.to_string(), "Invalid input: empty");
        assert!(!err.is_unavailable());
        assert!(SemanticError::store("down").is_unavailable());
    }
}
