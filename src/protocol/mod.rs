//! Network protocol implementations
//!
//! Only the Ethernet header matters to a learning switch: the two addresses
//! at the front of every frame.

pub mod ethernet;
pub mod types;

pub use types::*;
