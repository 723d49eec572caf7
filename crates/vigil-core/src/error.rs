use thiserror::Error;

/// Application-wide error types for Vigil.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (fetching a page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Headless-browser rendering failed.
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// A configured or detected CSS selector string is invalid.
    #[error("Selector error: {0}")]
    SelectorError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Invalid or missing configuration.
    #[error("Config error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and the next cycle may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::DatabaseError(_) => true,
            AppError::HttpError(msg) | AppError::BrowserError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true when a static fetch failing with this error should be
    /// escalated to the rendered strategy.
    pub fn worth_escalating(&self) -> bool {
        matches!(
            self,
            AppError::HttpError(_) | AppError::Timeout(_) | AppError::NetworkError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(AppError::NetworkError("reset".into()).is_retryable());
        assert!(AppError::Timeout(30).is_retryable());
        assert!(AppError::DatabaseError("pool closed".into()).is_retryable());
        assert!(AppError::HttpError("connection reset".into()).is_retryable());
        assert!(!AppError::SelectorError("bad css".into()).is_retryable());
        assert!(!AppError::ConfigError("missing env".into()).is_retryable());
    }

    #[test]
    fn test_escalation_classification() {
        assert!(AppError::HttpError("HTTP 403 for x".into()).worth_escalating());
        assert!(AppError::Timeout(30).worth_escalating());
        assert!(!AppError::DatabaseError("nope".into()).worth_escalating());
        assert!(!AppError::BrowserError("no binary".into()).worth_escalating());
    }
}
