//! Logging bootstrap.
//!
//! Everything in the workspace logs through `tracing`. Host applications
//! that already install a subscriber keep theirs; [`init`] only fills the
//! gap for those that do not.

use scout_core::{LogLevel, ScoutConfig};
use tracing_subscriber::EnvFilter;

/// Builds the filter: `RUST_LOG` when set and valid, else `log_level`.
#[must_use]
pub fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Installs a fmt subscriber for `config.log_level`.
///
/// Returns false if a global subscriber was already installed, in which
/// case nothing changes.
pub fn init(config: &ScoutConfig) -> bool {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config.log_level))
        .with_target(true)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(level = %config.log_level, "logging initialized");
    }
    installed
}
