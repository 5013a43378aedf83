// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Routine of trigger '{trigger}' failed: {message}")]
    Routine { trigger: String, message: String },

    #[error("Task was aborted")]
    Aborted,

    #[error("Program exited with code {code}")]
    ProcessExit { code: i32 },

    #[cfg(unix)]
    #[error("Failed to signal process {pid}: {source}")]
    ProcessSignal {
        pid: u32,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("Watch backend error: {0}")]
    WatchBackend(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WatchError {
    /// True if this error (or an error it wraps) represents a cancelled task.
    pub fn is_abort(&self) -> bool {
        match self {
            WatchError::Aborted => true,
            WatchError::Other(inner) => is_abort_error(inner),
            _ => false,
        }
    }
}

/// Check whether an `anyhow::Error` returned by a routine is an abort.
pub fn is_abort_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<WatchError>()
            .is_some_and(WatchError::is_abort)
    })
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WatchError>;
