//! Error types for chrootctl.

use thiserror::Error;

/// Result alias used throughout chrootctl.
pub type ChrootResult<T> = Result<T, ChrootError>;

/// Errors that can occur while driving the chroot control scripts.
#[derive(Debug, Error)]
pub enum ChrootError {
    /// No host bridge is attached, so nothing can be executed.
    #[error("No command bridge available")]
    BridgeUnavailable,

    /// The host bridge raised an error while running a command.
    #[error("bridge error: {0}")]
    Bridge(String),

    /// A command ran but reported failure.
    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
