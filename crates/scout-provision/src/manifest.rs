//! Bundle manifest and checksum verification.

use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ProvisionError, Result};

/// File name of the manifest inside every bundle.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Describes an unpacked core agent bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest format version.
    pub version: String,
    /// Core agent version contained in the bundle.
    pub core_agent_version: String,
    /// Binary file name, relative to the bundle directory.
    pub core_agent_binary: String,
    /// Hex-encoded SHA-256 of the binary.
    pub core_agent_binary_sha256: String,
}

impl Manifest {
    /// Reads `manifest.json` from a bundle directory.
    ///
    /// # Errors
    /// Returns [`ProvisionError::Manifest`] if the file is missing, malformed
    /// or names a binary outside the bundle.
    pub fn load(bundle_dir: &Path) -> Result<Self> {
        let path = bundle_dir.join(MANIFEST_FILE_NAME);
        let raw = std::fs::read(&path).map_err(|e| {
            ProvisionError::manifest(format!("cannot read {}: {e}", path.display()))
        })?;
        let manifest: Self = serde_json::from_slice(&raw).map_err(|e| {
            ProvisionError::manifest(format!("cannot parse {}: {e}", path.display()))
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Checks that the binary path stays inside the bundle.
    ///
    /// # Errors
    /// Returns [`ProvisionError::Manifest`] for empty, absolute or
    /// parent-relative binary paths.
    pub fn validate(&self) -> Result<()> {
        let binary = Path::new(&self.core_agent_binary);
        if self.core_agent_binary.is_empty()
            || !binary
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(ProvisionError::manifest(format!(
                "binary path {:?} escapes the bundle",
                self.core_agent_binary
            )));
        }
        if self.core_agent_binary_sha256.is_empty() {
            return Err(ProvisionError::manifest("binary checksum is empty"));
        }
        Ok(())
    }

    /// Returns the binary path within `bundle_dir`.
    #[must_use]
    pub fn binary_path(&self, bundle_dir: &Path) -> PathBuf {
        bundle_dir.join(&self.core_agent_binary)
    }

    /// Returns true if the bundle holds `version` (a leading `v` is ignored
    /// on both sides).
    #[must_use]
    pub fn matches_version(&self, version: &str) -> bool {
        strip_v(&self.core_agent_version) == strip_v(version)
    }

    /// Hashes the binary in `bundle_dir` and compares it to the manifest.
    ///
    /// # Errors
    /// Returns [`ProvisionError::ChecksumMismatch`] on mismatch, or an I/O
    /// error if the binary cannot be read.
    pub fn verify(&self, bundle_dir: &Path) -> Result<PathBuf> {
        let binary = self.binary_path(bundle_dir);
        let actual = sha256_file(&binary)?;
        if !actual.eq_ignore_ascii_case(self.core_agent_binary_sha256.trim()) {
            return Err(ProvisionError::ChecksumMismatch {
                path: binary.display().to_string(),
                expected: self.core_agent_binary_sha256.clone(),
                actual,
            });
        }
        Ok(binary)
    }
}

fn strip_v(version: &str) -> &str {
    let trimmed = version.trim();
    trimmed.strip_prefix('v').unwrap_or(trimmed)
}

/// Computes the hex-encoded SHA-256 of a file.
///
/// # Errors
/// Returns an I/O error if the file cannot be read.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn manifest(binary: &str, sha: &str) -> Manifest {
        Manifest {
            version: "1.0".into(),
            core_agent_version: "1.2.8".into(),
            core_agent_binary: binary.into(),
            core_agent_binary_sha256: sha.into(),
        }
    }

    fn write_bundle(dir: &Path, m: &Manifest, contents: &[u8]) {
        std::fs::write(dir.join(&m.core_agent_binary), contents).unwrap();
        std::fs::write(
            dir.join(MANIFEST_FILE_NAME),
            serde_json::to_vec(m).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_sha256_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(sha256_file(&path).unwrap(), HELLO_SHA256);
    }

    #[test]
    fn test_load_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let m = manifest("core-agent", HELLO_SHA256);
        write_bundle(dir.path(), &m, b"hello");
        let loaded = Manifest::load(dir.path()).unwrap();
        assert_eq!(loaded, m);
        assert_eq!(
            loaded.verify(dir.path()).unwrap(),
            dir.path().join("core-agent")
        );
    }

    #[test]
    fn test_verify_accepts_uppercase_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let m = manifest("core-agent", &HELLO_SHA256.to_ascii_uppercase());
        write_bundle(dir.path(), &m, b"hello");
        assert!(m.verify(dir.path()).is_ok());
    }

    #[test]
    fn test_verify_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let m = manifest("core-agent", HELLO_SHA256);
        write_bundle(dir.path(), &m, b"hellO");
        let err = m.verify(dir.path()).unwrap_err();
        assert!(matches!(err, ProvisionError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let err = Manifest::load(dir.path()).unwrap_err();
        assert!(matches!(err, ProvisionError::Manifest(_)));
    }

    #[test]
    fn test_rejects_escaping_binary_path() {
        for bad in ["", "../core-agent", "/usr/bin/core-agent", "a/../../b"] {
            assert!(manifest(bad, HELLO_SHA256).validate().is_err(), "{bad}");
        }
        assert!(manifest("bin/core-agent", HELLO_SHA256).validate().is_ok());
    }

    #[test]
    fn test_matches_version_ignores_prefix() {
        let m = manifest("core-agent", HELLO_SHA256);
        assert!(m.matches_version("v1.2.8"));
        assert!(m.matches_version("1.2.8"));
        assert!(!m.matches_version("v1.2.9"));
    }
}
