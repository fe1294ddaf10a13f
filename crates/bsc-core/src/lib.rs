//! Core utilities for the BSC signaling core
//!
//! This crate provides fundamental types used across the BSC stack:
//! - Resource handles (BTS / TRX / timeslot / lchan, connection, MSC)
//! - Channel kinds, channel modes and encryption descriptors
//! - Mobile identities and NRI ranges
//! - BscTime for timer bookkeeping
//! - Counters and logging setup

pub mod bsc_common;
pub mod bsc_entities;
pub mod bsc_time;
pub mod chan_types;
pub mod counters;
pub mod debug;
pub mod ids;
pub mod meas;
pub mod mobile_identity;
pub mod ranges;

// Re-export commonly used items
pub use bsc_common::*;
pub use bsc_time::BscTime;
pub use chan_types::*;
pub use counters::{BscCounter, Counters};
pub use ids::*;
pub use meas::{MeasRep, MeasRepRing, MAX_MEAS_REP};
pub use mobile_identity::MobileIdentity;
