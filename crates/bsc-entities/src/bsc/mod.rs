pub mod bsc_core;
pub mod components;
pub mod context;
pub mod subentities;

pub use bsc_core::BscCore;
