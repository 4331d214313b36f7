//! Telemetry module for logging and metrics.
//!
//! Provides:
//! - Logging configuration and initialization
//! - Counters for forwarding, learning and per-device traffic

mod logging;
mod metrics;

pub use logging::{init_logging, LogConfig};
pub use metrics::{Counter, DeviceSnapshot, DeviceStats, MetricsRegistry};
