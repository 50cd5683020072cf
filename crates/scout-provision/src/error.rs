//! Provisioning error types.

use scout_core::ScoutError;

/// Result type alias for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Provisioning errors.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// No core agent build exists for this host.
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// The binary is not cached and downloads are disabled.
    #[error("core agent not cached and external download is disallowed")]
    ExternalDownloadDisallowed,

    /// Fetching or unpacking the archive failed.
    #[error("download failed: {0}")]
    DownloadFailed(String),

    /// The binary did not hash to the manifest's checksum.
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Path of the verified binary.
        path: String,
        /// Checksum recorded in the manifest.
        expected: String,
        /// Checksum computed from the binary.
        actual: String,
    },

    /// The manifest is missing, unreadable or describes an unsafe layout.
    #[error("invalid manifest: {0}")]
    Manifest(String),

    /// The bundle holds a different core agent version than requested.
    #[error("version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Requested version.
        expected: String,
        /// Version recorded in the manifest.
        found: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// Creates a download failure.
    #[must_use]
    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    /// Creates a manifest error.
    #[must_use]
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest(msg.into())
    }

    /// Returns true if the bundle on disk cannot be trusted.
    #[must_use]
    pub const fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. } | Self::Manifest(_) | Self::VersionMismatch { .. }
        )
    }
}

impl From<ProvisionError> for ScoutError {
    fn from(err: ProvisionError) -> Self {
        match err {
            ProvisionError::UnsupportedPlatform(p) => Self::UnsupportedPlatform(p),
            ProvisionError::ExternalDownloadDisallowed => Self::ExternalDownloadDisallowed,
            ProvisionError::ChecksumMismatch {
                path,
                expected,
                actual,
            } => Self::ChecksumMismatch {
                path,
                expected,
                actual,
            },
            ProvisionError::Io(e) => Self::download_failed(e.to_string()),
            other @ (ProvisionError::DownloadFailed(_)
            | ProvisionError::Manifest(_)
            | ProvisionError::VersionMismatch { .. }) => Self::download_failed(other.to_string()),
        }
    }
}
