//! Error types for the scanner

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the scanner
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    // Exchange REST errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Exchange returned retCode {code}: {message}")]
    Exchange { code: i64, message: String },

    // Stream errors
    #[error("Stream connection failed: {0}")]
    StreamConnection(String),

    #[error("Stream disconnected")]
    StreamDisconnected,

    // Parse errors
    #[error("Parse error: {0}")]
    Parse(String),

    // External store errors
    #[error("Store error: {0}")]
    Store(String),

    // Notification sink errors
    #[error("Sink delivery failed: {0}")]
    Sink(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::StreamConnection(_)
                | Error::StreamDisconnected
                | Error::Store(_)
                | Error::Sink(_)
        )
    }
}

// Conversion from reqwest errors: timeouts and connection failures are
// transport faults, body decoding is a parse fault.
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Error::Parse(e.to_string())
        } else {
            Error::Transport(e.to_string())
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

// Conversion from websocket errors
impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::StreamConnection(e.to_string())
    }
}

// Conversion from redis errors
impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Store(e.to_string())
    }
}

// Conversion from postgres errors
impl From<tokio_postgres::Error> for Error {
    fn from(e: tokio_postgres::Error) -> Self {
        Error::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Transport("timeout".into()).is_retryable());
        assert!(Error::StreamDisconnected.is_retryable());
        assert!(Error::Sink("503".into()).is_retryable());
        assert!(!Error::Config("missing url".into()).is_retryable());
        assert!(!Error::Parse("bad frame".into()).is_retryable());
    }
}
