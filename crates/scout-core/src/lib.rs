// Tests may unwrap for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # scout-core
//!
//! Shared model for the Scout APM agent runtime.
//!
//! - [`ScoutError`] error taxonomy and [`Result`] alias
//! - [`ScoutConfig`] with TOML and `SCOUT_*` environment sources
//! - [`AgentMessage`] / [`AgentResponse`] wire protocol and the framing codecs
//! - [`EventBus`] for lifecycle events
//! - [`AgentSender`], the seam between tracking and transport
//!
//! ## Example
//!
//! ```rust,ignore
//! use scout_core::{AgentMessage, RequestId, ScoutConfig};
//! use std::time::SystemTime;
//!
//! let config = ScoutConfig::new("v1.2.8").with_env_overlay(std::env::vars())?;
//! let msg = AgentMessage::start_request(RequestId::new(), SystemTime::now());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod metadata;
pub mod protocol;
pub mod socket;
pub mod types;

pub use agent::AgentSender;
pub use codec::{ClientCodec, CollectorCodec, frame_codec};
pub use config::ScoutConfig;
pub use error::{Result, ScoutError};
pub use events::{EventBus, ScoutEvent};
pub use metadata::ApplicationMetadata;
pub use protocol::{AgentMessage, AgentResponse, MessageKind};
pub use socket::SocketAddress;
pub use types::{
    CoreAgentVersion, LogLevel, RequestId, SpanId, UriReportingLevel, format_timestamp,
};
