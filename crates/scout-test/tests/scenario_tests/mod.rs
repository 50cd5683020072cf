//! Scenario tests, grouped by component.

// Allow test-specific patterns that are denied in production code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::default_trait_access)]

mod provisioning;
mod supervision;
mod tracking;
mod transport;
