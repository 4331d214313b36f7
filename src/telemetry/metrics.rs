//! Metrics collection for switching statistics.
//!
//! Thread-safe counters updated by the forwarding thread and read by
//! whoever exports them, at both the switch and the per-device level.

use crate::dataplane::DeviceId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds a value to the counter.
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Gets the current value of the counter.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-device statistics.
#[derive(Debug, Default)]
pub struct DeviceStats {
    pub rx_packets: Counter,
    pub rx_bytes: Counter,
    pub rx_errors: Counter,
    pub tx_packets: Counter,
    pub tx_bytes: Counter,
    /// Deliveries the device refused (zero accepted).
    pub tx_drops: Counter,
}

/// Point-in-time copy of a device's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_errors: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_drops: u64,
}

impl DeviceStats {
    fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            rx_packets: self.rx_packets.get(),
            rx_bytes: self.rx_bytes.get(),
            rx_errors: self.rx_errors.get(),
            tx_packets: self.tx_packets.get(),
            tx_bytes: self.tx_bytes.get(),
            tx_drops: self.tx_drops.get(),
        }
    }
}

/// Switch-wide metrics registry.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    devices: RwLock<HashMap<DeviceId, DeviceStats>>,

    // Forwarding
    /// Frames taken off any device.
    pub packets_received: Counter,
    /// Frames sent to a single learned device.
    pub unicast_forwarded: Counter,
    /// Frames flooded because the destination was unknown.
    pub broadcast_forwarded: Counter,
    /// Known destination was closing; frame dropped.
    pub closing_drops: Counter,
    /// Binding pointed at a removed device; frame flooded instead.
    pub stale_fallbacks: Counter,

    // Learning
    pub macs_learned: Counter,
    pub macs_moved: Counter,
    pub macs_evicted: Counter,
    pub macs_forgotten: Counter,
    /// New addresses turned away by a full table.
    pub learn_rejected: Counter,

    // Gauges
    pub mac_table_size: AtomicU64,
    pub device_count: AtomicU64,
}

impl MetricsRegistry {
    /// Creates a new metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a device.
    pub fn register_device(&self, id: DeviceId) {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        devices.entry(id).or_default();
        self.device_count.store(devices.len() as u64, Ordering::Relaxed);
    }

    /// Stops tracking a device, returning its final counters.
    pub fn unregister_device(&self, id: DeviceId) -> Option<DeviceSnapshot> {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        let stats = devices.remove(&id);
        self.device_count.store(devices.len() as u64, Ordering::Relaxed);
        stats.map(|s| s.snapshot())
    }

    fn with_device(&self, id: DeviceId, f: impl FnOnce(&DeviceStats)) {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(stats) = devices.get(&id) {
            f(stats);
        }
    }

    pub fn record_rx(&self, id: DeviceId, bytes: usize) {
        self.packets_received.inc();
        self.with_device(id, |s| {
            s.rx_packets.inc();
            s.rx_bytes.add(bytes as u64);
        });
    }

    pub fn record_rx_error(&self, id: DeviceId) {
        self.with_device(id, |s| s.rx_errors.inc());
    }

    pub fn record_tx(&self, id: DeviceId, bytes: usize) {
        self.with_device(id, |s| {
            s.tx_packets.inc();
            s.tx_bytes.add(bytes as u64);
        });
    }

    pub fn record_tx_drop(&self, id: DeviceId) {
        self.with_device(id, |s| s.tx_drops.inc());
    }

    pub fn set_mac_table_size(&self, size: usize) {
        self.mac_table_size.store(size as u64, Ordering::Relaxed);
    }

    pub fn device(&self, id: DeviceId) -> Option<DeviceSnapshot> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        devices.get(&id).map(DeviceStats::snapshot)
    }

    /// Exports all metrics as key-value pairs.
    pub fn export(&self) -> Vec<(String, u64)> {
        let mut result = vec![
            ("packets_received".into(), self.packets_received.get()),
            ("unicast_forwarded".into(), self.unicast_forwarded.get()),
            ("broadcast_forwarded".into(), self.broadcast_forwarded.get()),
            ("closing_drops".into(), self.closing_drops.get()),
            ("stale_fallbacks".into(), self.stale_fallbacks.get()),
            ("macs_learned".into(), self.macs_learned.get()),
            ("macs_moved".into(), self.macs_moved.get()),
            ("macs_evicted".into(), self.macs_evicted.get()),
            ("macs_forgotten".into(), self.macs_forgotten.get()),
            ("learn_rejected".into(), self.learn_rejected.get()),
            (
                "mac_table_size".into(),
                self.mac_table_size.load(Ordering::Relaxed),
            ),
            (
                "device_count".into(),
                self.device_count.load(Ordering::Relaxed),
            ),
        ];

        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<&DeviceId> = devices.keys().collect();
        ids.sort();
        for id in ids {
            let s = devices[id].snapshot();
            let prefix = format!("{}{}", id.kind, id.number);
            result.extend([
                (format!("{prefix}_rx_packets"), s.rx_packets),
                (format!("{prefix}_rx_bytes"), s.rx_bytes),
                (format!("{prefix}_rx_errors"), s.rx_errors),
                (format!("{prefix}_tx_packets"), s.tx_packets),
                (format!("{prefix}_tx_bytes"), s.tx_bytes),
                (format!("{prefix}_tx_drops"), s.tx_drops),
            ]);
        }

        result
    }
}
