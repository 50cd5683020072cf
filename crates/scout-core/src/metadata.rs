//! Application metadata pushed to the core agent after registration.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::config::ScoutConfig;
use crate::protocol::{AgentMessage, LANGUAGE};
use crate::types::format_timestamp;

/// Event type used for the metadata push.
pub const METADATA_EVENT_TYPE: &str = "scout.metadata";

/// Describes the instrumented application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationMetadata {
    /// Agent language.
    pub language: String,
    /// Toolchain version the agent was built against.
    pub language_version: String,
    /// Time the metadata was captured (RFC 3339).
    pub server_time: String,
    /// Web framework in use.
    pub framework: String,
    /// Web framework version.
    pub framework_version: String,
    /// Deployment environment.
    pub environment: String,
    /// Application server in use.
    pub app_server: String,
    /// Host name reported to the dashboard.
    pub hostname: String,
    /// Database engine, when known.
    pub database_engine: String,
    /// Database adapter, when known.
    pub database_adapter: String,
    /// Application name.
    pub application_name: String,
    /// Linked libraries as `[name, version]` pairs.
    pub libraries: Vec<(String, String)>,
    /// Platform-as-a-service provider, when known.
    pub paas: String,
    /// Root directory of the application.
    pub application_root: String,
    /// Subdirectory of the repository holding the application.
    pub scm_subdirectory: String,
    /// Revision of the deployed code.
    pub git_sha: String,
}

impl ApplicationMetadata {
    /// Captures metadata from configuration at the current time.
    #[must_use]
    pub fn from_config(config: &ScoutConfig) -> Self {
        Self::from_config_at(config, SystemTime::now())
    }

    /// Captures metadata from configuration at `at`.
    #[must_use]
    pub fn from_config_at(config: &ScoutConfig, at: SystemTime) -> Self {
        let or_empty = |v: &Option<String>| v.clone().unwrap_or_default();
        Self {
            language: LANGUAGE.to_string(),
            language_version: env!("CARGO_PKG_RUST_VERSION").to_string(),
            server_time: format_timestamp(at),
            framework: or_empty(&config.framework),
            framework_version: or_empty(&config.framework_version),
            environment: String::new(),
            app_server: or_empty(&config.app_server),
            hostname: config
                .hostname
                .clone()
                .or_else(|| std::env::var("HOSTNAME").ok())
                .unwrap_or_default(),
            database_engine: String::new(),
            database_adapter: String::new(),
            application_name: or_empty(&config.name),
            libraries: vec![(
                env!("CARGO_PKG_NAME").to_string(),
                env!("CARGO_PKG_VERSION").to_string(),
            )],
            paas: String::new(),
            application_root: or_empty(&config.application_root),
            scm_subdirectory: or_empty(&config.scm_subdirectory),
            git_sha: or_empty(&config.revision_sha),
        }
    }

    /// Builds the `scout.metadata` application event for process `pid`.
    #[must_use]
    pub fn to_event(&self, pid: u32) -> AgentMessage {
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        AgentMessage::application_event(
            METADATA_EVENT_TYPE,
            value,
            format!("Pid: {pid}"),
            SystemTime::now(),
        )
    }
}
