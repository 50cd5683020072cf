//! Core agent bundle archives for provisioning tests.
//!
//! Produces `.tgz` files shaped like the published bundles: a single
//! top-level directory holding `manifest.json` and the binary.

use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};

use crate::error::{Result, TestError};

/// Binary file name used inside fixture bundles.
pub const FIXTURE_BINARY_NAME: &str = "core-agent";

/// Builder for a fixture bundle archive.
#[derive(Debug, Clone)]
pub struct AgentArchive {
    core_agent_version: String,
    binary: Vec<u8>,
    checksum: Option<String>,
    nested: bool,
}

impl AgentArchive {
    /// Starts a bundle for `core_agent_version` with a trivial shell binary.
    #[must_use]
    pub fn new(core_agent_version: impl Into<String>) -> Self {
        Self {
            core_agent_version: core_agent_version.into(),
            binary: b"#!/bin/sh\nexec sleep 30\n".to_vec(),
            checksum: None,
            nested: true,
        }
    }

    /// Replaces the binary contents.
    #[must_use]
    pub fn binary(mut self, contents: impl Into<Vec<u8>>) -> Self {
        self.binary = contents.into();
        self
    }

    /// Writes `checksum` into the manifest instead of the real digest.
    #[must_use]
    pub fn checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Places files at the archive root instead of a top-level directory.
    #[must_use]
    pub const fn flat(mut self) -> Self {
        self.nested = false;
        self
    }

    /// Hex SHA-256 of the binary.
    #[must_use]
    pub fn binary_sha256(&self) -> String {
        hex::encode(Sha256::digest(&self.binary))
    }

    /// Writes `<dir>/<bundle_name>.tgz` and returns its path.
    ///
    /// # Errors
    /// Returns an error if the archive cannot be written.
    pub fn write(&self, dir: &Path, bundle_name: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{bundle_name}.tgz"));
        let file = std::fs::File::create(&path)?;
        let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));

        let prefix = if self.nested {
            format!("{bundle_name}/")
        } else {
            String::new()
        };
        let manifest = serde_json::json!({
            "version": "1.0",
            "core_agent_version": self.core_agent_version,
            "core_agent_binary": FIXTURE_BINARY_NAME,
            "core_agent_binary_sha256": self.checksum.clone().unwrap_or_else(|| self.binary_sha256()),
        });
        let manifest = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| TestError::archive(format!("manifest: {e}")))?;

        append(&mut tar, &format!("{prefix}manifest.json"), &manifest, 0o644)?;
        append(
            &mut tar,
            &format!("{prefix}{FIXTURE_BINARY_NAME}"),
            &self.binary,
            0o755,
        )?;

        tar.into_inner()
            .and_then(GzEncoder::finish)
            .map_err(|e| TestError::archive(format!("finish {}: {e}", path.display())))?;
        Ok(path)
    }
}

/// Writes a default fixture bundle for `core_agent_version` into `dir`.
///
/// # Errors
/// Returns an error if the archive cannot be written.
pub fn build_agent_archive(dir: &Path, bundle_name: &str, core_agent_version: &str) -> Result<PathBuf> {
    AgentArchive::new(core_agent_version).write(dir, bundle_name)
}

fn append<W: std::io::Write>(
    tar: &mut tar::Builder<W>,
    name: &str,
    contents: &[u8],
    mode: u32,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(mode);
    header.set_cksum();
    tar.append_data(&mut header, name, contents)
        .map_err(|e| TestError::archive(format!("append {name}: {e}")))
}
