// Tests may unwrap for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # scout-process
//!
//! Supervises the core agent process.
//!
//! - [`ProcessOptions`] holds the immutable launch configuration
//! - [`ProcessSupervisor`] spawns (or adopts) the agent, waits for its
//!   socket, and stops it when shutdown is allowed
//!
//! ## Example
//!
//! ```rust,ignore
//! use scout_core::SocketAddress;
//! use scout_process::{ProcessOptions, ProcessSupervisor};
//!
//! let socket = SocketAddress::beside_binary(&binary);
//! let supervisor = ProcessSupervisor::new(ProcessOptions::from_config(binary, socket, &config));
//! let handle = supervisor.start().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod options;
pub mod supervisor;

pub use error::{ProcessError, Result};
pub use options::ProcessOptions;
pub use supervisor::{AGENT_LOG_TARGET, AgentHandle, ProcessSupervisor, is_connectable};
