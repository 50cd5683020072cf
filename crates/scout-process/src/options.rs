//! Immutable launch options for the core agent process.

use std::path::PathBuf;
use std::time::Duration;

use scout_core::{LogLevel, ScoutConfig, SocketAddress};

/// Default grace period between SIGTERM and SIGKILL.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Default readiness wait.
pub const DEFAULT_STARTUP_WAIT: Duration = Duration::from_millis(1000);

/// How to launch and supervise one core agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Path of the core agent binary.
    pub binary: PathBuf,
    /// Socket the core agent listens on.
    pub socket: SocketAddress,
    /// Core agent log level.
    pub log_level: LogLevel,
    /// Permission bits for the socket file.
    pub permissions: u32,
    /// Ask the core agent to daemonize.
    pub daemonize: bool,
    /// Additional command-line flags, appended verbatim.
    pub extra_args: Vec<String>,
    /// Spawn the binary when no agent answers on the socket.
    pub launch: bool,
    /// Allow `stop` to terminate the process.
    pub allow_shutdown: bool,
    /// How long `start` waits for the socket.
    pub startup_wait: Duration,
    /// Grace period between SIGTERM and SIGKILL.
    pub stop_grace: Duration,
}

impl ProcessOptions {
    /// Creates options with defaults for everything but the binary and
    /// socket.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>, socket: SocketAddress) -> Self {
        Self {
            binary: binary.into(),
            socket,
            log_level: LogLevel::Info,
            permissions: 0o700,
            daemonize: false,
            extra_args: Vec::new(),
            launch: true,
            allow_shutdown: false,
            startup_wait: DEFAULT_STARTUP_WAIT,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    /// Derives options from agent configuration.
    #[must_use]
    pub fn from_config(
        binary: impl Into<PathBuf>,
        socket: SocketAddress,
        config: &ScoutConfig,
    ) -> Self {
        Self {
            log_level: config.core_agent_log_level,
            permissions: config.core_agent_permissions,
            daemonize: config.core_agent_daemonize,
            launch: config.core_agent_launch,
            allow_shutdown: config.allow_shutdown,
            startup_wait: config.startup_wait(),
            ..Self::new(binary, socket)
        }
    }

    /// Appends extra command-line flags.
    #[must_use]
    pub fn with_extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Builds the core agent command line (without the binary).
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "start".to_string(),
            "--socket".to_string(),
            self.socket.path().display().to_string(),
            "--daemonize".to_string(),
            self.daemonize.to_string(),
            "--log-level".to_string(),
            self.log_level.as_str().to_string(),
            "--permissions".to_string(),
            format!("{:o}", self.permissions),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}
