/// Custom definitions for stack control
pub mod control;

pub mod abis;
pub mod bssap;
pub mod l3;
pub mod mgcp;
pub mod sapmsg;

pub use sapmsg::*;
