//! Agent configuration.
//!
//! Sources, later wins: built-in defaults, an optional TOML file, then
//! `SCOUT_*` environment variables. Validation happens once, up front.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoutError};
use crate::types::{CoreAgentVersion, LogLevel, UriReportingLevel};

/// Default base URL core agent archives are downloaded from.
pub const DEFAULT_DOWNLOAD_URL: &str =
    "https://s3-us-west-1.amazonaws.com/scout-public-downloads/apm_core_agent/release";

/// Directory name (under the system temp dir) used as the default cache root.
pub const DEFAULT_CORE_AGENT_DIR_NAME: &str = "scout_apm_core";

/// Prefix of every recognised environment variable.
pub const ENV_PREFIX: &str = "SCOUT_";

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoutConfig {
    /// Application name reported at registration.
    pub name: Option<String>,

    /// Organization key reported at registration.
    pub key: Option<String>,

    /// Whether anything is sent to the core agent at all.
    pub monitor: bool,

    /// Core agent version to run (e.g. `v1.2.8`).
    pub core_agent_version: Option<String>,

    /// Cache root for downloaded core agent builds.
    pub core_agent_dir: PathBuf,

    /// Whether the core agent may be downloaded when not cached.
    pub core_agent_download: bool,

    /// Whether the core agent may be launched when not already running.
    pub core_agent_launch: bool,

    /// Re-verify a cached build instead of trusting it blindly.
    pub core_agent_update_cache: bool,

    /// Reject cached builds whose manifest names a different version.
    pub core_agent_check_version: bool,

    /// Log level passed to the core agent.
    pub core_agent_log_level: LogLevel,

    /// Permission bits applied to the core agent binary and socket.
    #[serde(with = "octal_mode")]
    pub core_agent_permissions: u32,

    /// Ask the core agent to daemonize itself.
    pub core_agent_daemonize: bool,

    /// Base URL archives are downloaded from (`https://` or `file://`).
    pub download_url: String,

    /// Explicit socket path, overriding the one next to the binary.
    pub socket_path: Option<String>,

    /// Log level for this process.
    pub log_level: LogLevel,

    /// Allow `shutdown()` to stop the core agent process.
    pub allow_shutdown: bool,

    /// Path prefixes that are never reported.
    pub ignore: Vec<String>,

    /// How request URIs are reported.
    pub uri_reporting: UriReportingLevel,

    /// Minimum number of pooled connections.
    pub pool_min: usize,

    /// Maximum number of pooled connections.
    pub pool_max: usize,

    /// Time allowed for a full request/response exchange.
    pub send_timeout_ms: u64,

    /// Time allowed for connecting and for each socket read/write.
    pub socket_timeout_ms: u64,

    /// Time allowed for a freshly spawned core agent to become connectable.
    pub startup_wait_ms: u64,

    /// Host name reported in application metadata.
    pub hostname: Option<String>,

    /// Framework name reported in application metadata.
    pub framework: Option<String>,

    /// Framework version reported in application metadata.
    pub framework_version: Option<String>,

    /// Application server reported in application metadata.
    pub app_server: Option<String>,

    /// Application root reported in application metadata.
    pub application_root: Option<String>,

    /// SCM subdirectory reported in application metadata.
    pub scm_subdirectory: Option<String>,

    /// Revision SHA reported in application metadata.
    pub revision_sha: Option<String>,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            name: None,
            key: None,
            monitor: false,
            core_agent_version: None,
            core_agent_dir: std::env::temp_dir().join(DEFAULT_CORE_AGENT_DIR_NAME),
            core_agent_download: true,
            core_agent_launch: true,
            core_agent_update_cache: true,
            core_agent_check_version: true,
            core_agent_log_level: LogLevel::Info,
            core_agent_permissions: 0o700,
            core_agent_daemonize: false,
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            socket_path: None,
            log_level: LogLevel::Info,
            allow_shutdown: false,
            ignore: Vec::new(),
            uri_reporting: UriReportingLevel::FilteredParams,
            pool_min: 0,
            pool_max: 500,
            send_timeout_ms: 5_000,
            socket_timeout_ms: 1_000,
            startup_wait_ms: 1_000,
            hostname: None,
            framework: None,
            framework_version: None,
            app_server: None,
            application_root: None,
            scm_subdirectory: None,
            revision_sha: None,
        }
    }
}

impl ScoutConfig {
    /// Creates a configuration for the given core agent version with all
    /// other values defaulted.
    #[must_use]
    pub fn new(core_agent_version: impl Into<String>) -> Self {
        Self {
            core_agent_version: Some(core_agent_version.into()),
            ..Self::default()
        }
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ScoutError::config(format!("failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ScoutError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds configuration from defaults overlaid with the process
    /// environment.
    ///
    /// # Errors
    /// Returns an error if a `SCOUT_*` variable holds an invalid value.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overlay(std::env::vars())
    }

    /// Overlays `SCOUT_*` variables from `vars` onto this configuration.
    ///
    /// Unknown `SCOUT_*` keys are ignored with a debug log.
    ///
    /// # Errors
    /// Returns an error if a recognised variable holds an invalid value.
    pub fn with_env_overlay<I, K, V>(mut self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            self.apply_env(&name.to_ascii_lowercase(), value.as_ref())?;
        }
        Ok(self)
    }

    fn apply_env(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "name" => self.name = Some(value.to_string()),
            "key" => self.key = Some(value.to_string()),
            "monitor" => self.monitor = parse_bool(name, value)?,
            "core_agent_version" => self.core_agent_version = Some(value.to_string()),
            "core_agent_dir" => self.core_agent_dir = PathBuf::from(value),
            "core_agent_download" => self.core_agent_download = parse_bool(name, value)?,
            "core_agent_launch" => self.core_agent_launch = parse_bool(name, value)?,
            "core_agent_update_cache" => self.core_agent_update_cache = parse_bool(name, value)?,
            "core_agent_check_version" => {
                self.core_agent_check_version = parse_bool(name, value)?;
            }
            "core_agent_log_level" => self.core_agent_log_level = value.parse()?,
            "core_agent_permissions" => self.core_agent_permissions = parse_mode(value)?,
            "core_agent_daemonize" => self.core_agent_daemonize = parse_bool(name, value)?,
            "download_url" => self.download_url = value.to_string(),
            "socket_path" => self.socket_path = Some(value.to_string()),
            "log_level" => self.log_level = value.parse()?,
            "allow_shutdown" => self.allow_shutdown = parse_bool(name, value)?,
            "ignore" => self.ignore = parse_list(value),
            "uri_reporting" => self.uri_reporting = value.parse()?,
            "pool_min" => self.pool_min = parse_number(name, value)?,
            "pool_max" => self.pool_max = parse_number(name, value)?,
            "send_timeout_ms" => self.send_timeout_ms = parse_number(name, value)?,
            "socket_timeout_ms" => self.socket_timeout_ms = parse_number(name, value)?,
            "startup_wait_ms" => self.startup_wait_ms = parse_number(name, value)?,
            "hostname" => self.hostname = Some(value.to_string()),
            "framework" => self.framework = Some(value.to_string()),
            "framework_version" => self.framework_version = Some(value.to_string()),
            "app_server" => self.app_server = Some(value.to_string()),
            "application_root" => self.application_root = Some(value.to_string()),
            "scm_subdirectory" => self.scm_subdirectory = Some(value.to_string()),
            "revision_sha" => self.revision_sha = Some(value.to_string()),
            other => tracing::debug!(key = %other, "ignoring unknown SCOUT_ variable"),
        }
        Ok(())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if let Some(version) = &self.core_agent_version {
            CoreAgentVersion::parse(version.as_str())?;
        }
        if self.pool_max == 0 {
            return Err(ScoutError::config("pool_max must be greater than 0"));
        }
        if self.pool_min > self.pool_max {
            return Err(ScoutError::config("pool_min cannot exceed pool_max"));
        }
        if self.download_url.is_empty() {
            return Err(ScoutError::config("download_url cannot be empty"));
        }
        Ok(())
    }

    /// Returns the parsed core agent version, if one is configured.
    ///
    /// # Errors
    /// Returns an error if the configured version is not valid semver.
    pub fn core_agent_version(&self) -> Result<Option<CoreAgentVersion>> {
        self.core_agent_version
            .as_deref()
            .map(CoreAgentVersion::parse)
            .transpose()
    }

    /// Send timeout as a [`Duration`].
    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Socket timeout as a [`Duration`].
    #[must_use]
    pub const fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    /// Startup wait as a [`Duration`].
    #[must_use]
    pub const fn startup_wait(&self) -> Duration {
        Duration::from_millis(self.startup_wait_ms)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ScoutError::config(format!(
            "{name} expects a boolean, got {other:?}"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ScoutError::config(format!("{name} expects a number, got {value:?}")))
}

fn parse_mode(value: &str) -> Result<u32> {
    u32::from_str_radix(value.trim(), 8)
        .map_err(|_| ScoutError::config(format!("invalid permission bits {value:?}")))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Serde helper: permission bits written as an octal string (`"700"`).
mod octal_mode {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(mode: &u32, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{mode:o}"))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u32, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_mode(&s).map_err(serde::de::Error::custom)
    }
}
