//! Core value types: identifiers, versions, levels.
//!
//! Ids are prefixed UUIDs so they stay unique across restarts of the host
//! process and read unambiguously in core agent logs.

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::ScoutError;

/// Prefix applied to every request id.
pub const REQUEST_ID_PREFIX: &str = "req-";

/// Prefix applied to every span id.
pub const SPAN_ID_PREFIX: &str = "span-";

/// Unique identifier for a tracked request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Creates a new random request id.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("{REQUEST_ID_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a tracked span.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanId(String);

impl SpanId {
    /// Creates a new random span id.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("{SPAN_ID_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SpanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Version of the core agent binary to run.
///
/// Keeps the raw string (including any leading `v`) because it is part of
/// the download URL and cache directory names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreAgentVersion {
    raw: String,
    parsed: semver::Version,
}

impl CoreAgentVersion {
    /// Parses a version such as `v1.2.8` or `1.2.8`.
    ///
    /// # Errors
    /// Returns [`ScoutError::InvalidVersion`] if the string is not semver.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ScoutError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        let numeric = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let parsed = semver::Version::parse(numeric).map_err(|e| ScoutError::InvalidVersion {
            version: raw.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            raw: trimmed.to_string(),
            parsed,
        })
    }

    /// Returns the version exactly as configured.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Returns the parsed semantic version.
    #[must_use]
    pub const fn semver(&self) -> &semver::Version {
        &self.parsed
    }
}

impl FromStr for CoreAgentVersion {
    type Err = ScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CoreAgentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Log verbosity, shared by the agent and the spawned core agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LogLevel {
    /// Very verbose.
    Trace,
    /// Debugging detail.
    Debug,
    /// Normal operation.
    #[default]
    Info,
    /// Something went wrong but work continues.
    Warn,
    /// Something failed.
    Error,
}

impl LogLevel {
    /// Returns the lowercase level name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ScoutError;

    /// Parses a level name case-insensitively (`DEBUG`, `debug`, `DEbUG`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(ScoutError::config(format!("unknown log level {other:?}"))),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = ScoutError;

    fn try_from(value: String) -> Result<Self, ScoutError> {
        value.parse()
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.as_str().to_string()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much of a request URI is reported as the `path` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum UriReportingLevel {
    /// Report the URI untouched.
    Raw,
    /// Report the path only, dropping the query string.
    Path,
    /// Report the path with sensitive query parameters redacted.
    #[default]
    FilteredParams,
}

impl UriReportingLevel {
    /// Returns the canonical level name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Path => "path",
            Self::FilteredParams => "filtered-params",
        }
    }
}

impl FromStr for UriReportingLevel {
    type Err = ScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "raw" => Ok(Self::Raw),
            "path" => Ok(Self::Path),
            "filtered-params" => Ok(Self::FilteredParams),
            other => Err(ScoutError::config(format!(
                "unknown uri reporting level {other:?}"
            ))),
        }
    }
}

impl TryFrom<String> for UriReportingLevel {
    type Error = ScoutError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UriReportingLevel> for String {
    fn from(level: UriReportingLevel) -> Self {
        level.as_str().to_string()
    }
}

/// Formats a timestamp the way the core agent expects (RFC 3339, UTC,
/// microsecond precision).
#[must_use]
pub fn format_timestamp(time: SystemTime) -> String {
    humantime::format_rfc3339_micros(time).to_string()
}
