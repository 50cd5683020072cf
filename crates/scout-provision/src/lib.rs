// Tests may unwrap for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # scout-provision
//!
//! Locates, downloads and verifies the core agent binary.
//!
//! - [`Provisioner::resolve`] turns a [`scout_core::CoreAgentVersion`] into a
//!   verified binary path
//! - [`PlatformTriple`] picks the build for the running host
//! - [`Manifest`] describes an unpacked bundle and verifies its checksum
//!
//! ## Example
//!
//! ```rust,ignore
//! use scout_provision::{ProvisionOptions, Provisioner};
//!
//! let provisioner = Provisioner::new(ProvisionOptions::from_config(&config));
//! let binary = provisioner.resolve(&version).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod manifest;
pub mod provisioner;
pub mod triple;

pub use error::{ProvisionError, Result};
pub use manifest::{MANIFEST_FILE_NAME, Manifest, sha256_file};
pub use provisioner::{
    DEFAULT_CORE_AGENT_NAME, ProvisionOptions, Provisioner, TMP_DIR_PREFIX,
};
pub use triple::PlatformTriple;
