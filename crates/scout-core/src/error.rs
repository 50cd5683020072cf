//! Error taxonomy for the Scout agent.
//!
//! Setup-time failures (provisioning, supervision) propagate to the caller.
//! Steady-state failures (transport, policy) are surfaced here so the
//! tracking layer can log and swallow them.

use std::time::Duration;

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, ScoutError>;

/// Comprehensive error type for agent operations.
#[derive(Debug, thiserror::Error)]
pub enum ScoutError {
    /// Fetching or unpacking the core agent archive failed.
    #[error("core agent download failed: {0}")]
    DownloadFailed(String),

    /// The binary did not match the checksum recorded in its manifest.
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Path of the verified file.
        path: String,
        /// Checksum recorded in the manifest.
        expected: String,
        /// Checksum computed from the file.
        actual: String,
    },

    /// No core agent build exists for this platform.
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// A download was needed but downloads are disabled.
    #[error("core agent not cached and external download is disallowed")]
    ExternalDownloadDisallowed,

    /// Launching was needed but launching is disabled.
    #[error("core agent not running and launching is disabled")]
    AgentLaunchDisabled,

    /// The core agent socket never became connectable.
    #[error("core agent did not become ready within {0:?}")]
    AgentStartupTimeout(Duration),

    /// No connection to the core agent could be established.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// No response arrived within the configured timeout.
    #[error("send timed out after {0:?}")]
    SendTimeout(Duration),

    /// The socket failed mid-exchange.
    #[error("socket error: {0}")]
    SocketError(String),

    /// Monitoring is switched off; nothing is sent.
    #[error("monitoring is disabled")]
    MonitoringDisabled,

    /// The operation needs an agent and none has been set up.
    #[error("no agent present")]
    NoAgentPresent,

    /// A core agent version string is not valid semver.
    #[error("invalid core agent version {version:?}: {reason}")]
    InvalidVersion {
        /// The rejected version string.
        version: String,
        /// Why parsing failed.
        reason: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Encoding or decoding a wire message failed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScoutError {
    /// Creates a download failure.
    #[must_use]
    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    /// Creates a disconnected error.
    #[must_use]
    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::Disconnected(msg.into())
    }

    /// Creates a socket error.
    #[must_use]
    pub fn socket(msg: impl Into<String>) -> Self {
        Self::SocketError(msg.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a protocol error.
    #[must_use]
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Returns true for failures raised while provisioning or launching the
    /// core agent. These abort `setup()`.
    #[must_use]
    pub const fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Self::DownloadFailed(_)
                | Self::ChecksumMismatch { .. }
                | Self::UnsupportedPlatform(_)
                | Self::ExternalDownloadDisallowed
                | Self::AgentLaunchDisabled
                | Self::AgentStartupTimeout(_)
        )
    }

    /// Returns true for transport failures that may clear up on their own.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Disconnected(_) | Self::SendTimeout(_) | Self::SocketError(_)
        )
    }

    /// Returns true for policy no-ops (nothing was attempted).
    #[must_use]
    pub const fn is_policy_noop(&self) -> bool {
        matches!(self, Self::MonitoringDisabled | Self::NoAgentPresent)
    }
}
