//! Platform triple detection.
//!
//! Core agent builds are published per target triple. Detection order:
//! 1. CPU architecture from the compile target
//! 2. Operating system from the compile target
//! 3. On Linux, the C library (musl when built for musl or when a musl
//!    loader is present, glibc otherwise)

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};

/// A target triple with a published core agent build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformTriple {
    /// 64-bit Intel/AMD Linux, glibc.
    X86_64LinuxGnu,
    /// 64-bit Intel/AMD Linux, musl.
    X86_64LinuxMusl,
    /// 64-bit ARM Linux, glibc.
    Aarch64LinuxGnu,
    /// 64-bit ARM Linux, musl.
    Aarch64LinuxMusl,
    /// Intel macOS.
    X86_64AppleDarwin,
    /// Apple silicon macOS.
    Aarch64AppleDarwin,
}

impl PlatformTriple {
    /// Every supported triple.
    pub const ALL: [Self; 6] = [
        Self::X86_64LinuxGnu,
        Self::X86_64LinuxMusl,
        Self::Aarch64LinuxGnu,
        Self::Aarch64LinuxMusl,
        Self::X86_64AppleDarwin,
        Self::Aarch64AppleDarwin,
    ];

    /// Returns the triple as published in archive names.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::X86_64LinuxGnu => "x86_64-unknown-linux-gnu",
            Self::X86_64LinuxMusl => "x86_64-unknown-linux-musl",
            Self::Aarch64LinuxGnu => "aarch64-unknown-linux-gnu",
            Self::Aarch64LinuxMusl => "aarch64-unknown-linux-musl",
            Self::X86_64AppleDarwin => "x86_64-apple-darwin",
            Self::Aarch64AppleDarwin => "aarch64-apple-darwin",
        }
    }

    /// Detects the triple of the running host.
    ///
    /// # Errors
    /// Returns [`ProvisionError::UnsupportedPlatform`] if no build exists.
    pub fn detect() -> Result<Self> {
        let musl = cfg!(target_env = "musl") || has_musl_loader(Path::new("/lib"));
        Self::from_parts(std::env::consts::ARCH, std::env::consts::OS, musl)
    }

    /// Maps an architecture/OS pair onto a published triple.
    ///
    /// # Errors
    /// Returns [`ProvisionError::UnsupportedPlatform`] for unknown pairs.
    pub fn from_parts(arch: &str, os: &str, musl: bool) -> Result<Self> {
        match (arch, os, musl) {
            ("x86_64", "linux", false) => Ok(Self::X86_64LinuxGnu),
            ("x86_64", "linux", true) => Ok(Self::X86_64LinuxMusl),
            ("aarch64", "linux", false) => Ok(Self::Aarch64LinuxGnu),
            ("aarch64", "linux", true) => Ok(Self::Aarch64LinuxMusl),
            ("x86_64", "macos", _) => Ok(Self::X86_64AppleDarwin),
            ("aarch64", "macos", _) => Ok(Self::Aarch64AppleDarwin),
            _ => Err(ProvisionError::UnsupportedPlatform(format!("{arch}-{os}"))),
        }
    }
}

impl fmt::Display for PlatformTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformTriple {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ProvisionError::UnsupportedPlatform(s.to_string()))
    }
}

/// Looks for a musl dynamic loader (`ld-musl-*.so.1`) in `dir`.
fn has_musl_loader(dir: &Path) -> bool {
    std::fs::read_dir(dir).is_ok_and(|entries| {
        entries
            .filter_map(std::result::Result::ok)
            .any(|e| e.file_name().to_string_lossy().starts_with("ld-musl-"))
    })
}
