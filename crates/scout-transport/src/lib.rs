// Tests may unwrap for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # scout-transport
//!
//! Pooled, length-framed Unix-socket transport to the core agent.
//!
//! - [`AgentClient`] exposes `connect`, `send`, `send_async` and
//!   `disconnect`, and publishes connection lifecycle events
//! - [`ConnectionPool`] lends out validated connections, one borrower each
//! - [`AgentConnection`] runs strictly sequential write/read exchanges
//!
//! ## Example
//!
//! ```rust,ignore
//! use scout_transport::{AgentClient, PoolConfig};
//!
//! let client = AgentClient::new(socket, PoolConfig::from_config(&config));
//! client.connect().await?;
//! let ack = client.send(AgentMessage::register("app", "key")).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod connection;
pub mod error;
pub mod pool;

pub use client::AgentClient;
pub use connection::AgentConnection;
pub use error::{Result, TransportError};
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
