//! Error types for Turnstile

/// Main error type for Turnstile operations
#[derive(Debug, thiserror::Error)]
pub enum TurnstileError {
    #[error("Store read error: {0}")]
    StoreRead(String),

    #[error("Store write error: {0}")]
    StoreWrite(String),

    #[error("Membership error: {0}")]
    Membership(String),

    #[error("Recipient unreachable: {0}")]
    Unreachable(String),

    #[error("Transient delivery error: {0}")]
    Transient(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TurnstileError {
    /// Whether a delivery failure is worth retrying out-of-band.
    /// Unreachable recipients (blocked the channel) are permanent for this send.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Http(_))
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for TurnstileError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for TurnstileError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for TurnstileError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

/// Result type alias for Turnstile operations
pub type Result<T> = std::result::Result<T, TurnstileError>;
