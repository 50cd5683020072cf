//! Core agent provisioning: cache lookup, download, verification, install.
//!
//! # Cache Layout
//! ```text
//! <cache_dir>/
//!   scout_apm_core-<version>-<triple>/
//!     manifest.json
//!     core-agent
//!   core-agent-dl-XXXX/          (in-flight download, removed on drop)
//! ```
//!
//! Bundles are unpacked into a temporary directory next to their final
//! location and renamed into place, so concurrent resolutions never observe
//! a half-written bundle.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use scout_core::{CoreAgentVersion, ScoutConfig};

use crate::error::{ProvisionError, Result};
use crate::manifest::{MANIFEST_FILE_NAME, Manifest};
use crate::triple::PlatformTriple;

/// Prefix of in-flight download directories.
pub const TMP_DIR_PREFIX: &str = "core-agent-dl-";

/// Default core agent name used in archive and directory names.
pub const DEFAULT_CORE_AGENT_NAME: &str = "scout_apm_core";

/// Archive file extension.
pub const ARCHIVE_EXTENSION: &str = "tgz";

/// Default HTTP timeout for archive downloads.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

const FILE_SCHEME: &str = "file://";

/// Options controlling where and how bundles are provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOptions {
    /// Cache root directory.
    pub cache_dir: PathBuf,
    /// Base URL archives are fetched from (`https://…` or `file://…`).
    pub download_url: String,
    /// Re-verify cached bundles instead of trusting them.
    pub update_cache: bool,
    /// Require the manifest's core agent version to match the request.
    pub check_version: bool,
    /// Allow fetching archives when the cache misses.
    pub allow_download: bool,
    /// Core agent name used in archive and directory names.
    pub core_agent_name: String,
    /// Permission bits applied to the installed binary.
    pub binary_mode: u32,
    /// Overrides host triple detection.
    pub triple: Option<PlatformTriple>,
    /// HTTP timeout for archive downloads.
    pub download_timeout: Duration,
}

impl ProvisionOptions {
    /// Creates options with defaults for `cache_dir` and `download_url`.
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>, download_url: impl Into<String>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            download_url: download_url.into(),
            update_cache: true,
            check_version: true,
            allow_download: true,
            core_agent_name: DEFAULT_CORE_AGENT_NAME.to_string(),
            binary_mode: 0o755,
            triple: None,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }

    /// Derives options from agent configuration.
    #[must_use]
    pub fn from_config(config: &ScoutConfig) -> Self {
        Self {
            update_cache: config.core_agent_update_cache,
            check_version: config.core_agent_check_version,
            allow_download: config.core_agent_download,
            ..Self::new(config.core_agent_dir.clone(), config.download_url.clone())
        }
    }

    /// Pins the platform triple instead of detecting it.
    #[must_use]
    pub const fn with_triple(mut self, triple: PlatformTriple) -> Self {
        self.triple = Some(triple);
        self
    }
}

/// Resolves a core agent version to a verified binary on disk.
#[derive(Debug, Clone)]
pub struct Provisioner {
    options: ProvisionOptions,
    http: reqwest::Client,
}

impl Provisioner {
    /// Creates a provisioner.
    #[must_use]
    pub fn new(options: ProvisionOptions) -> Self {
        let http = reqwest::Client::builder()
            .timeout(options.download_timeout)
            .build()
            .unwrap_or_default();
        Self { options, http }
    }

    /// Returns the options in use.
    #[must_use]
    pub const fn options(&self) -> &ProvisionOptions {
        &self.options
    }

    /// Returns the configured or detected platform triple.
    ///
    /// # Errors
    /// Returns [`ProvisionError::UnsupportedPlatform`] on unknown hosts.
    pub fn triple(&self) -> Result<PlatformTriple> {
        self.options.triple.map_or_else(PlatformTriple::detect, Ok)
    }

    /// Returns `<name>-<version>-<triple>`, the stem shared by the archive
    /// and its cache directory.
    ///
    /// # Errors
    /// Returns [`ProvisionError::UnsupportedPlatform`] on unknown hosts.
    pub fn bundle_name(&self, version: &CoreAgentVersion) -> Result<String> {
        Ok(format!(
            "{}-{}-{}",
            self.options.core_agent_name,
            version.raw(),
            self.triple()?
        ))
    }

    /// Returns the cache directory for `version`.
    ///
    /// # Errors
    /// Returns [`ProvisionError::UnsupportedPlatform`] on unknown hosts.
    pub fn bundle_dir(&self, version: &CoreAgentVersion) -> Result<PathBuf> {
        Ok(self.options.cache_dir.join(self.bundle_name(version)?))
    }

    /// Returns the archive URL for `version`.
    ///
    /// # Errors
    /// Returns [`ProvisionError::UnsupportedPlatform`] on unknown hosts.
    pub fn archive_url(&self, version: &CoreAgentVersion) -> Result<String> {
        Ok(format!(
            "{}/{}.{ARCHIVE_EXTENSION}",
            self.options.download_url.trim_end_matches('/'),
            self.bundle_name(version)?
        ))
    }

    /// Resolves `version` to the path of a verified core agent binary,
    /// downloading it if the cache cannot satisfy the request.
    ///
    /// # Errors
    /// Returns an error if the platform is unsupported, the download fails
    /// or is disallowed, or the bundle fails verification.
    pub async fn resolve(&self, version: &CoreAgentVersion) -> Result<PathBuf> {
        let target = self.bundle_dir(version)?;

        let cached = {
            let target = target.clone();
            let options = self.options.clone();
            let version = version.raw().to_string();
            run_blocking(move || Ok(inspect_cache(&target, &options, &version))).await?
        };
        if let Some(binary) = cached {
            tracing::debug!(binary = %binary.display(), "using cached core agent");
            return Ok(binary);
        }

        if !self.options.allow_download {
            tracing::warn!(bundle = %target.display(), "core agent not cached and downloads are disabled");
            return Err(ProvisionError::ExternalDownloadDisallowed);
        }

        let url = self.archive_url(version)?;
        tracing::info!(url = %url, version = %version, "downloading core agent");
        let archive = self.fetch(&url).await?;

        let options = self.options.clone();
        let version = version.raw().to_string();
        let binary = run_blocking(move || install(&archive, &target, &options, &version)).await?;
        tracing::info!(binary = %binary.display(), "core agent installed");
        Ok(binary)
    }

    async fn fetch(&self, url: &str) -> Result<Bytes> {
        if let Some(path) = url.strip_prefix(FILE_SCHEME) {
            return tokio::fs::read(path).await.map(Bytes::from).map_err(|e| {
                ProvisionError::download_failed(format!("cannot read archive {path}: {e}"))
            });
        }
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ProvisionError::download_failed(format!("GET {url}: {e}")))?;
        response
            .bytes()
            .await
            .map_err(|e| ProvisionError::download_failed(format!("reading body of {url}: {e}")))
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ProvisionError::download_failed(format!("provisioning task failed: {e}")))?
}

/// Returns the cached binary if the bundle at `target` can be trusted.
fn inspect_cache(target: &Path, options: &ProvisionOptions, version: &str) -> Option<PathBuf> {
    if !target.join(MANIFEST_FILE_NAME).is_file() {
        return None;
    }
    match trust_bundle(target, options, version) {
        Ok(binary) => Some(binary),
        Err(e) => {
            tracing::warn!(bundle = %target.display(), error = %e, "cached core agent rejected");
            None
        }
    }
}

fn trust_bundle(dir: &Path, options: &ProvisionOptions, version: &str) -> Result<PathBuf> {
    let manifest = Manifest::load(dir)?;
    if options.check_version && !manifest.matches_version(version) {
        return Err(ProvisionError::VersionMismatch {
            expected: version.to_string(),
            found: manifest.core_agent_version,
        });
    }
    if options.update_cache {
        return manifest.verify(dir);
    }
    let binary = manifest.binary_path(dir);
    if binary.is_file() {
        Ok(binary)
    } else {
        Err(ProvisionError::manifest(format!(
            "binary {} is missing",
            binary.display()
        )))
    }
}

/// Unpacks, verifies and atomically installs an archive at `target`.
fn install(
    archive: &[u8],
    target: &Path,
    options: &ProvisionOptions,
    version: &str,
) -> Result<PathBuf> {
    std::fs::create_dir_all(&options.cache_dir)?;
    let staging = tempfile::Builder::new()
        .prefix(TMP_DIR_PREFIX)
        .tempdir_in(&options.cache_dir)?;

    let unpacked = staging.path().join("unpacked");
    unpack(archive, &unpacked)?;
    let bundle = locate_bundle(&unpacked)?;

    let manifest = Manifest::load(&bundle)?;
    if options.check_version && !manifest.matches_version(version) {
        return Err(ProvisionError::VersionMismatch {
            expected: version.to_string(),
            found: manifest.core_agent_version,
        });
    }
    manifest.verify(&bundle)?;
    set_mode(&manifest.binary_path(&bundle), options.binary_mode)?;

    if target.exists() {
        retire(target, &staging.path().join("stale"))?;
    }
    match std::fs::rename(&bundle, target) {
        Ok(()) => Ok(manifest.binary_path(target)),
        Err(e) => {
            // Another resolver won the race; accept its copy if it verifies.
            tracing::debug!(error = %e, "bundle rename lost race, verifying existing copy");
            let winner = Manifest::load(target)?;
            winner.verify(target)
        }
    }
}

/// Moves a stale or rejected bundle to `grave`, inside the staging
/// directory, so it is removed together with it. A bundle that is already
/// gone was retired by a concurrent resolver.
fn retire(target: &Path, grave: &Path) -> Result<()> {
    match std::fs::rename(target, grave) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            tracing::warn!(
                bundle = %target.display(),
                error = %e,
                "cannot move stale core agent bundle aside"
            );
            Err(e.into())
        }
    }
}

fn unpack(archive: &[u8], dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    let decoder = flate2::read::GzDecoder::new(Cursor::new(archive));
    tar::Archive::new(decoder)
        .unpack(dest)
        .map_err(|e| ProvisionError::download_failed(format!("cannot extract archive: {e}")))
}

/// Finds the directory holding `manifest.json`: the archive root or its
/// single top-level directory.
fn locate_bundle(root: &Path) -> Result<PathBuf> {
    if root.join(MANIFEST_FILE_NAME).is_file() {
        return Ok(root.to_path_buf());
    }
    let mut dirs = std::fs::read_dir(root)?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir());
    match (dirs.next(), dirs.next()) {
        (Some(dir), None) if dir.join(MANIFEST_FILE_NAME).is_file() => Ok(dir),
        _ => Err(ProvisionError::manifest(
            "archive does not contain manifest.json",
        )),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
