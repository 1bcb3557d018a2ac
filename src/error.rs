use std::path::PathBuf;
use thiserror::Error;

use crate::process::ProcessError;

/// Per-repository failures. All of them end up as data in a `SyncOutcome`.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("clone failed: {reason}")]
    Clone { reason: String },

    #[error("fetch from {remote} failed: {reason}")]
    Fetch { remote: String, reason: String },

    #[error("fast-forward failed: {reason}")]
    FastForward { reason: String },

    #[error("push failed: {reason}")]
    Push { reason: String },

    #[error("cannot inspect repository: {reason}")]
    Inspect { reason: String },

    #[error("no remote configured")]
    NoRemote,

    #[error("not present, not cloneable")]
    NotCloneable,

    #[error("hosting lookup failed: {reason}")]
    Hosting { reason: String },

    #[error("timed out")]
    Timeout,

    #[error("cancelled")]
    Cancelled,
}

impl SyncError {
    /// Wrap a subprocess failure, keeping timeouts and cancellation distinct.
    pub fn from_process(err: ProcessError, wrap: impl FnOnce(String) -> SyncError) -> Self {
        match err {
            ProcessError::TimedOut { .. } => SyncError::Timeout,
            ProcessError::Cancelled { .. } => SyncError::Cancelled,
            other => wrap(other.to_string()),
        }
    }

    /// Timeouts and cancellation abort the repository regardless of which step hit them.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, SyncError::Timeout | SyncError::Cancelled)
    }
}

impl From<git2::Error> for SyncError {
    fn from(err: git2::Error) -> Self {
        SyncError::Inspect {
            reason: err.message().to_string(),
        }
    }
}

/// A configured root that could not be scanned. Reported, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}: {reason}", .path.display())]
pub struct MissingRoot {
    pub path: PathBuf,
    pub reason: String,
}

pub type Result<T> = std::result::Result<T, SyncError>;
