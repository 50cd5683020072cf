// Tests may unwrap for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # scout-apm
//!
//! APM agent runtime that reports request and span timings to an
//! out-of-process core agent over a Unix socket.
//!
//! - [`Scout`] coordinates setup: provision the core agent binary, start it,
//!   connect, register
//! - [`core`] shared model: configuration, wire protocol, events, errors
//! - [`provision`] core agent download, verification and cache
//! - [`process`] core agent process supervision
//! - [`transport`] pooled, framed socket client
//! - [`tracking`] requests, spans and task-scoped context
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use scout_apm::prelude::*;
//!
//! let config = ScoutConfig::new("v1.4.0").with_env_overlay(std::env::vars())?;
//! scout_apm::logging::init(&config);
//!
//! let scout = Scout::new(config);
//! scout.setup().await?;
//!
//! scout
//!     .transaction("GET /users", |request| async move {
//!         request.tag_path("/users?page=2").await;
//!         instrument("SQL/users", |_span| async { load_users().await }).await
//!     })
//!     .await;
//!
//! scout.shutdown().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod logging;
mod scout;

pub use scout::Scout;

pub use scout_core as core;
pub use scout_process as process;
pub use scout_provision as provision;
pub use scout_tracking as tracking;
pub use scout_transport as transport;

/// Prelude module for common imports.
pub mod prelude {
    pub use crate::Scout;
    pub use scout_core::{
        AgentMessage, AgentSender, EventBus, LogLevel, RequestId, Result, ScoutConfig, ScoutError,
        ScoutEvent, SpanId, UriReportingLevel,
    };
    pub use scout_tracking::{
        ScoutRequest, ScoutSpan, Tracker, current_request, current_span, instrument,
        instrument_sync, spawn,
    };
}
