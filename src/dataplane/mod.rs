//! Data plane components
//!
//! Handles packet processing: learning, forwarding decisions, transmission,
//! and the device lifecycle around them.

mod coordinator;
mod device;
mod fdb;
mod packet;
mod registry;
mod switch;

pub use coordinator::Coordinator;
pub use device::{Device, DeviceId, DeviceIo, DeviceKind, DeviceState, DeviceStatus};
pub use fdb::{
    Fdb, Insert, LearnOutcome, MacTable, OutputEntry, OutputTable, TableFullPolicy,
    DEFAULT_CAPACITY,
};
pub use packet::Packet;
pub use registry::{DeviceHandle, DeviceRegistry};
pub use switch::{Disposition, Switch, DEFAULT_BURST_SIZE};
