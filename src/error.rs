//! Error types for the AMI client

use thiserror::Error;

/// Result alias used throughout the crate.
pub type AmiResult<T> = Result<T, AmiError>;

/// Errors raised by the Manager client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AmiError {
    /// Transport-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server sent a block that cannot be framed or decoded.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Caller-supplied data cannot be safely encoded on the wire.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// `Login` was rejected or never answered.
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// No matching response arrived before the deadline.
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The stream reached EOF.
    #[error("connection closed")]
    ConnectionClosed,

    /// The connection dropped while the action was outstanding.
    #[error("connection lost: {reason}")]
    ConnectionLost { reason: String },

    /// The client is not in the `Ready` state.
    #[error("not connected")]
    NotConnected,

    /// The server answered `Response: Error`.
    #[error("action failed: {message}")]
    ActionFailed { message: String },

    /// The login lacks the privilege class the action requires.
    #[error("permission denied")]
    PermissionDenied,

    /// The server answered with a status the exchange does not allow.
    #[error("unexpected response {status:?} from server: {message}")]
    UnexpectedResponse { status: String, message: String },

    /// An event handler failed and the handler policy tore down the connection.
    #[error("event handler for {event} failed: {message}")]
    HandlerFailed { event: String, message: String },

    /// Configuration file missing or invalid.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl AmiError {
    /// Build a [`AmiError::Protocol`].
    pub fn protocol_error(message: impl Into<String>) -> Self {
        AmiError::Protocol {
            message: message.into(),
        }
    }

    /// Build a [`AmiError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        AmiError::Validation {
            message: message.into(),
        }
    }

    /// Build a [`AmiError::AuthenticationFailed`].
    pub fn auth_failed(message: impl Into<String>) -> Self {
        AmiError::AuthenticationFailed {
            message: message.into(),
        }
    }

    /// Build a [`AmiError::ConnectionLost`].
    pub fn connection_lost(reason: impl std::fmt::Display) -> Self {
        AmiError::ConnectionLost {
            reason: reason.to_string(),
        }
    }

    /// Build a [`AmiError::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        AmiError::Config {
            message: message.into(),
        }
    }

    /// `true` for errors that mean the connection is gone.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            AmiError::Io(_)
                | AmiError::ConnectionClosed
                | AmiError::ConnectionLost { .. }
                | AmiError::NotConnected
                | AmiError::Protocol { .. }
        )
    }

    /// `true` for errors that only affect the single action that raised them.
    ///
    /// The connection stays usable after these.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AmiError::ActionFailed { .. }
                | AmiError::PermissionDenied
                | AmiError::Timeout { .. }
                | AmiError::Validation { .. }
                | AmiError::UnexpectedResponse { .. }
        )
    }
}
