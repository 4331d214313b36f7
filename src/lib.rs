//! lswitch - Software Ethernet learning switch
//!
//! Bridges physical NICs and virtual devices (Unix socket sessions) by
//! learning source addresses and forwarding on destination addresses.

pub mod capture;
pub mod config;
pub mod dataplane;
pub mod error;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};
