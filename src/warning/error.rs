//! Error types for the warning system
//!
//! This module defines the errors that can occur while issuing, enforcing and
//! expiring violations.

use thiserror::Error;

use super::ids::ViolationId;

/// Errors that can occur during warning system operations
#[derive(Debug, Error)]
pub enum WarningError {
    /// The violation was already marked expired
    #[error("Violation {0} is already expired")]
    AlreadyExpired(ViolationId),

    /// The violation has no elapsed expiry and the expiry was not forced
    #[error("Violation {0} is not due for expiry")]
    NotYetDue(ViolationId),

    /// Violation record not found
    #[error("Violation not found: {0}")]
    ViolationNotFound(ViolationId),

    /// The backend does not know this user
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Transport failure talking to the backend
    #[error("Backend transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a non-success status
    #[error("Backend returned {status}: {body}")]
    BackendStatus { status: u16, body: String },

    /// A backend call exceeded the configured deadline
    #[error("Backend call timed out: {0}")]
    Timeout(&'static str),

    /// Discord API error
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<poise::serenity_prelude::Error>),

    /// The bot lacks the privilege to act on the target
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Snapshot file I/O failure
    #[error("Persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("Warning system error: {0}")]
    Other(String),
}

impl From<poise::serenity_prelude::Error> for WarningError {
    fn from(error: poise::serenity_prelude::Error) -> Self {
        Self::DiscordApi(Box::new(error))
    }
}

/// Result type for warning system operations
pub type WarningResult<T> = Result<T, WarningError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = WarningError::AlreadyExpired(ViolationId(42));
        assert_eq!(error.to_string(), "Violation 42 is already expired");

        let error = WarningError::Timeout("violations.issue");
        assert_eq!(error.to_string(), "Backend call timed out: violations.issue");

        let error = WarningError::BackendStatus {
            status: 503,
            body: "unavailable".to_string(),
        };
        assert_eq!(error.to_string(), "Backend returned 503: unavailable");

        let error = WarningError::Other("Something went wrong".to_string());
        assert_eq!(error.to_string(), "Warning system error: Something went wrong");
    }
}
