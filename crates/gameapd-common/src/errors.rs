//! Error types for the GameAP daemon.

use thiserror::Error;

/// Result type alias for daemon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for daemon operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An illegal task status transition was attempted.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    /// A daemon task carries a verb the factory cannot map.
    #[error("invalid task")]
    InvalidTask,

    /// The command line resolved to a binary that does not exist.
    #[error("executable file not found: {path}")]
    ExecutableNotFound { path: String },

    /// The running child was interrupted by cancellation.
    #[error("command interrupted")]
    Interrupted,

    /// A script template resolved to an empty command line.
    #[error("empty command")]
    EmptyCommand,

    /// The server has no OS user configured.
    #[error("empty user")]
    EmptyUser,

    /// The user is missing from the configured user table.
    #[error("user not found: {user}")]
    UserNotFound { user: String },

    /// The user table entry exists but holds no usable password.
    #[error("invalid user password")]
    InvalidUserPassword,

    /// The supervisor variant cannot inject input into the process.
    #[error("input is not supported")]
    InputNotSupported,

    /// The control-plane API answered with an unexpected status.
    #[error("invalid response from API (status {status}): {body}")]
    InvalidApiResponse { status: u16, body: String },

    /// Transport-level API failure (connect, timeout, decode).
    #[error("API request failed: {0}")]
    ApiTransport(String),

    /// Invalid input or configuration.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// I/O error (wraps std::io::Error).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (shouldn't happen in normal operation).
    #[error("internal error: {0}")]
    Internal(String),

    /// Generic error with context.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        source: Box<Error>,
    },
}

impl Error {
    pub fn executable_not_found(path: impl Into<String>) -> Self {
        Self::ExecutableNotFound { path: path.into() }
    }

    pub fn user_not_found(user: impl Into<String>) -> Self {
        Self::UserNotFound { user: user.into() }
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStatusTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn invalid_api_response(status: u16, body: impl Into<String>) -> Self {
        Self::InvalidApiResponse {
            status,
            body: body.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Adds context to an error.
    pub fn context(self, message: impl Into<String>) -> Self {
        Self::WithContext {
            message: message.into(),
            source: Box::new(self),
        }
    }

    /// True when the error marks a cancelled, not failed, operation.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Interrupted => true,
            Self::WithContext { source, .. } => source.is_interrupted(),
            _ => false,
        }
    }
}

/// Convenience methods for Result types.
pub trait ResultExt<T> {
    /// Adds context to an error result.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(message))
    }
}
