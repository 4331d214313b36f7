//! Configuration types

use crate::dataplane::{TableFullPolicy, DEFAULT_BURST_SIZE, DEFAULT_CAPACITY};
use crate::telemetry::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Switch configuration (config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub switch: SwitchConfig,
    pub logging: LogConfig,
    pub physical: Vec<PhysicalConfig>,
    #[serde(rename = "virtual")]
    pub sessions: Vec<SessionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    /// Number of learnable addresses
    pub mac_table_capacity: usize,
    /// Maximum packets taken from one device per visit
    pub burst_size: usize,
    pub table_full_policy: TableFullPolicy,
    /// Sleep after a sweep that found nothing, in microseconds (0 = busy poll)
    pub idle_sleep_us: u64,
    /// Frames buffered per direction for each virtual session
    pub session_queue_depth: usize,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            mac_table_capacity: DEFAULT_CAPACITY,
            burst_size: DEFAULT_BURST_SIZE,
            table_full_policy: TableFullPolicy::Reject,
            idle_sleep_us: 0,
            session_queue_depth: 512,
        }
    }
}

impl SwitchConfig {
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_micros(self.idle_sleep_us)
    }
}

/// A NIC attached as a physical device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalConfig {
    pub interface: String,
}

/// A Unix socket accepting virtual-device sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub socket: PathBuf,
}
