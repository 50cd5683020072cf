// Tests may unwrap for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # scout-test
//!
//! Testing infrastructure for the Scout APM agent runtime.
//!
//! This crate provides:
//! - **Mock core agent**: a Unix-socket collector that records and answers
//!   framed messages, with silent and rejecting modes
//! - **Recording sender**: an in-memory [`scout_core::AgentSender`] with
//!   switchable failures
//! - **Archive fixtures**: `.tgz` bundles with a manifest and checksum for
//!   provisioning tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use scout_test::{AgentMode, MockCoreAgent};
//!
//! let agent = MockCoreAgent::start().await?;
//! agent.set_mode(AgentMode::Silent);
//! // point an AgentClient at agent.socket() and watch it time out
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod archive;
pub mod error;
pub mod mock_agent;
pub mod recording;

pub use archive::{AgentArchive, FIXTURE_BINARY_NAME, build_agent_archive};
pub use error::{Result, TestError};
pub use mock_agent::{AgentMode, MockCoreAgent};
pub use recording::{FailureMode, RecordingSender};
