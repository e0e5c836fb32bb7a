//! Error types for the Warden background
//!
//! Taxonomy shared by every component of the orchestrator. The variants map
//! one-to-one onto the way the UI has to react to a failure.

use std::fmt;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Message shown when a pending request id is no longer pending.
pub const STALE_REQUEST_MESSAGE: &str = "Unable to proceed. Please try again";

/// Warden errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or missing request field
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Operation on a pending request that is no longer pending
    #[error("Unable to proceed. Please try again")]
    StaleRequest {
        /// Request id the caller referenced
        id: String,
    },

    /// Explicit refusal by the user
    #[error("Rejected by user")]
    UserRejected,

    /// Silent cancellation (closed popup, superseded request)
    #[error("Cancelled")]
    Cancelled,

    /// Failure inside a process step
    #[error("Step {step} failed: {message}")]
    StepExecution {
        /// Index of the failed step
        step: usize,
        /// Underlying chain error
        message: String,
    },

    /// Wait ceiling reached
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Message type unknown to the dispatcher
    #[error("Unable to handle message of type {0}")]
    UnhandledMessage(String),

    /// Keyring is locked
    #[error("Keyring is locked")]
    Locked,

    /// Password did not match
    #[error("Invalid password")]
    InvalidPassword,

    /// Keyring failure
    #[error("Keyring error: {0}")]
    Keyring(String),

    /// Persistence failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Client port is gone
    #[error("Port disconnected")]
    Disconnected,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a validation error from anything printable
    pub fn validation(msg: impl fmt::Display) -> Self {
        Error::Validation(msg.to_string())
    }

    /// Errors the user caused or can act on; everything else is logged as a fault
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::StaleRequest { .. }
                | Error::UserRejected
                | Error::Cancelled
                | Error::Locked
                | Error::InvalidPassword
                | Error::Timeout(_)
        )
    }

    /// Text shown to the UI in place of the raw error
    pub fn user_message(&self) -> String {
        match self {
            Error::StaleRequest { .. } => STALE_REQUEST_MESSAGE.to_string(),
            Error::Locked => "Your wallet is locked. Please unlock it and try again.".to_string(),
            Error::InvalidPassword => "The password is incorrect.".to_string(),
            Error::Timeout(_) => {
                "The network is taking longer than expected. Please try again in a moment."
                    .to_string()
            }
            Error::StepExecution { message, .. } => message.clone(),
            _ => self.to_string(),
        }
    }

    /// Get error category for logging and UI branching
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Validation(_) | Error::Serialization(_) => ErrorCategory::Validation,
            Error::StaleRequest { .. } => ErrorCategory::StaleReference,
            Error::UserRejected => ErrorCategory::UserRefusal,
            Error::Cancelled => ErrorCategory::UserCancel,
            Error::StepExecution { .. } => ErrorCategory::StepExecution,
            Error::Timeout(_) => ErrorCategory::Timeout,
            Error::UnhandledMessage(_) => ErrorCategory::Unhandled,
            Error::Locked | Error::InvalidPassword | Error::Keyring(_) => ErrorCategory::Keyring,
            Error::Storage(_) | Error::NotFound(_) => ErrorCategory::Storage,
            Error::Disconnected | Error::Other(_) => ErrorCategory::Internal,
        }
    }
}

/// Coarse class carried on every error reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed input, surfaced immediately
    Validation,
    /// Pending request no longer pending
    StaleReference,
    /// Explicit user rejection
    UserRefusal,
    /// User or system cancellation
    UserCancel,
    /// Process step failure
    StepExecution,
    /// Wait ceiling reached
    Timeout,
    /// Unknown message type
    Unhandled,
    /// Keyring errors
    Keyring,
    /// Storage errors
    Storage,
    /// Internal/system errors
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refusal_and_cancel_are_distinct() {
        assert_eq!(Error::Cancelled.to_string(), "Cancelled");
        assert_eq!(Error::UserRejected.to_string(), "Rejected by user");
        assert_ne!(Error::Cancelled.category(), Error::UserRejected.category());
    }

    #[test]
    fn test_stale_request_message() {
        let error = Error::StaleRequest { id: "s1".to_string() };
        assert_eq!(error.to_string(), STALE_REQUEST_MESSAGE);
        assert_eq!(error.category(), ErrorCategory::StaleReference);
        assert!(error.is_user_error());
    }

    #[test]
    fn test_faults_and_user_errors_are_classified() {
        assert_eq!(
            Error::UnhandledMessage("pri(nope)".to_string()).category(),
            ErrorCategory::Unhandled
        );
        assert_eq!(
            Error::StepExecution {
                step: 1,
                message: "boom".to_string()
            }
            .category(),
            ErrorCategory::StepExecution
        );
        assert_eq!(Error::Locked.category(), ErrorCategory::Keyring);
        assert!(!Error::Storage("disk".to_string()).is_user_error());
    }
}
