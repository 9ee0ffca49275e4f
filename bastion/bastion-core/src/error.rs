//! Error types for the Bastion core.

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, BastionError>;

/// Main error type for the Bastion core.
#[derive(Debug, thiserror::Error)]
pub enum BastionError {
    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BastionError {
    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is an invalid input error
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BastionError::invalid_input("empty department");
        assert_eq!(err.to_string(), "Invalid input: empty department");
        assert!(err.is_invalid_input());

        let err = BastionError::config("bad budget");
        assert!(!err.is_invalid_input());
        assert_eq!(err.to_string(), "Configuration error: bad budget");
    }

    #[test]
    fn test_from_serde_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: BastionError = parse_err.into();
        assert!(matches!(err, BastionError::Serialization(_)));
    }
}
