//! Core agent socket addresses.
//!
//! Addresses are written as URIs (`unix:///tmp/core-agent.sock`); the
//! `file://` scheme and bare paths are accepted as well.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, ScoutError};

/// Socket file name placed next to the core agent binary.
pub const DEFAULT_SOCKET_FILE_NAME: &str = "core-agent.sock";

const SCHEMES: [&str; 2] = ["unix://", "file://"];

/// Filesystem path of the core agent's Unix socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SocketAddress {
    path: PathBuf,
}

impl SocketAddress {
    /// Parses `unix://<path>`, `file://<path>` or a bare path.
    ///
    /// # Errors
    /// Returns a configuration error for empty paths or other schemes.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let path = SCHEMES
            .iter()
            .find_map(|scheme| raw.strip_prefix(scheme))
            .unwrap_or(raw);
        if path.is_empty() {
            return Err(ScoutError::config(format!("empty socket path in {raw:?}")));
        }
        if path.contains("://") {
            return Err(ScoutError::config(format!(
                "unsupported socket scheme in {raw:?}"
            )));
        }
        Ok(Self {
            path: PathBuf::from(path),
        })
    }

    /// Wraps a filesystem path.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the default socket next to `binary`.
    #[must_use]
    pub fn beside_binary(binary: &Path) -> Self {
        let dir = binary.parent().unwrap_or_else(|| Path::new("."));
        Self::from_path(dir.join(DEFAULT_SOCKET_FILE_NAME))
    }

    /// Returns the socket path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the address as a `unix://` URI.
    #[must_use]
    pub fn uri(&self) -> String {
        format!("unix://{}", self.path.display())
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unix://{}", self.path.display())
    }
}

impl FromStr for SocketAddress {
    type Err = ScoutError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
