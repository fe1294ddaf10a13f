//! BSC configuration management
//!
//! This crate provides configuration loading and parsing for the BSC:
//! - TOML configuration file parsing
//! - BTS tree, MSC pool, timer and policy configuration
//! - Shared mutable state (counters)

pub mod bsc_config;
pub mod toml_config;

pub use bsc_config::*;
pub use toml_config::*;
