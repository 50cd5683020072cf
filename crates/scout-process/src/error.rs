//! Supervision error types.

use std::time::Duration;

use scout_core::ScoutError;

/// Result type alias for supervision operations.
pub type Result<T> = std::result::Result<T, ProcessError>;

/// Process supervision errors.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The core agent is not running and launching is disabled.
    #[error("core agent not running and launching is disabled")]
    LaunchDisabled,

    /// The binary could not be spawned or exited during startup.
    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    /// The socket never became connectable.
    #[error("core agent did not become ready within {0:?}")]
    StartupTimeout(Duration),

    /// Signalling the process failed.
    #[error("signal failed: {0}")]
    SignalFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// Creates a spawn failure.
    #[must_use]
    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }

    /// Creates a signal failure.
    #[must_use]
    pub fn signal_failed(msg: impl Into<String>) -> Self {
        Self::SignalFailed(msg.into())
    }

    /// Returns true if the process never came up.
    #[must_use]
    pub const fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            Self::LaunchDisabled | Self::SpawnFailed(_) | Self::StartupTimeout(_)
        )
    }
}

impl From<ProcessError> for ScoutError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::LaunchDisabled => Self::AgentLaunchDisabled,
            ProcessError::StartupTimeout(waited) => Self::AgentStartupTimeout(waited),
            ProcessError::Io(e) => Self::Io(e),
            other @ (ProcessError::SpawnFailed(_) | ProcessError::SignalFailed(_)) => {
                Self::Io(std::io::Error::other(other.to_string()))
            }
        }
    }
}
