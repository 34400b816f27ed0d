//! Handoff Common Library
//!
//! Shared constants and configuration loading for the `shm_handoff`
//! workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - Sentinel value, region size and naming defaults
//! - [`config`] - Configuration types and the TOML loader
//!
//! # Usage
//!
//! ```rust
//! use handoff_common::consts::{REGION_SIZE, SENTINEL_VALUE};
//! use handoff_common::config::HandoffConfig;
//!
//! assert_eq!(REGION_SIZE, 4);
//! assert_eq!(SENTINEL_VALUE, 0xDEAD_BEEF);
//! assert!(HandoffConfig::default().validate().is_ok());
//! ```

pub mod config;
pub mod consts;
