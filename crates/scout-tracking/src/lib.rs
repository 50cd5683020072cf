// Tests may unwrap for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # scout-tracking
//!
//! Request and span tracking for the Scout APM agent.
//!
//! - [`Tracker`] creates [`ScoutRequest`]s and runs closures as transactions
//! - [`instrument`] / [`instrument_sync`] wrap work in a [`ScoutSpan`] that is
//!   stopped exactly once however the work ends
//! - [`TrackingContext`] carries the current request and span per tokio task;
//!   [`spawn`] carries it into new tasks
//! - [`PathPolicy`] decides whether and how a request path is reported
//! - [`Dispatcher`] gates sends on an installed agent and the monitor switch
//!
//! Tracking never fails the caller: send errors are logged and dropped.
//!
//! ## Example
//!
//! ```rust,ignore
//! use scout_tracking::{Tracker, instrument};
//!
//! let rows = tracker
//!     .transaction("GET /users", |request| async move {
//!         request.tag_path("/users?page=2").await;
//!         instrument("SQL/users", |_span| async { db.fetch_users().await }).await
//!     })
//!     .await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
pub mod dispatch;
pub mod filter;
pub mod request;
pub mod span;
pub mod tracker;

pub use context::{TrackingContext, current_request, current_span, spawn};
pub use dispatch::Dispatcher;
pub use filter::{FILTERED_MARKER, PATH_TAG, PARAM_DENYLIST, PathPolicy, scrub_params, strip_query};
pub use request::{RequestPhase, ScoutRequest};
pub use span::{ScoutSpan, SpanPhase};
pub use tracker::{Tracker, instrument, instrument_sync};
