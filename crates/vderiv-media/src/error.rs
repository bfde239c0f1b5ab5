//! Error types for encoder operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for encoder operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while supervising external encoders.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("encoder binary not found: {0}")]
    EncoderNotFound(String),

    #[error("{label} failed (exit {exit_code:?})\n\nCommand:\n  {command}\n\nLast output (tail):\n{tail}")]
    StageFailed {
        label: String,
        command: String,
        exit_code: Option<i32>,
        tail: String,
    },

    #[error("{label} timed out after {timeout_secs}s\n\nCommand:\n  {command}\n\nLast output (tail):\n{tail}")]
    StageTimeout {
        label: String,
        command: String,
        timeout_secs: u64,
        tail: String,
    },

    #[error("probe failed: {0}")]
    ProbeFailed(String),

    #[error("output file missing or empty: {0}")]
    EmptyOutput(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Create a probe failure error.
    pub fn probe_failed(message: impl Into<String>) -> Self {
        Self::ProbeFailed(message.into())
    }

    /// Check whether this error is a stage timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, MediaError::StageTimeout { .. })
    }
}
