//! Forwarding engine
//!
//! `Switch` owns the device registry and the forwarding database. Everything
//! here runs with exclusive access (`&mut self`); the coordinator decides who
//! holds it.
//!
//! Per packet:
//! 1. learn the source address on the ingress device
//! 2. look up the destination (lookup only, never insert)
//! 3. unknown destination or dangling binding: flood to every ready device
//!    except ingress; virtual devices get the shared buffer, physical ones an
//!    independent copy
//! 4. known destination: closing device drops, otherwise deliver the
//!    original buffer to that one device, even when it is the ingress

use crate::dataplane::{
    Device, DeviceHandle, DeviceId, DeviceIo, DeviceKind, DeviceRegistry, Fdb, LearnOutcome,
    Packet,
};
use crate::protocol::MacAddr;
use crate::telemetry::MetricsRegistry;
use crate::Result;
use std::sync::Arc;
use tracing::{info, trace, warn};

/// Default maximum packets taken from one device per visit
pub const DEFAULT_BURST_SIZE: usize = 32;

/// What the engine did with a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Delivered to the learned device
    Unicast(DeviceId),
    /// Flooded; `stale` is set when a learned binding no longer resolved
    Broadcast { recipients: usize, stale: bool },
    /// Learned device is being torn down
    DroppedClosing(DeviceId),
    /// Ingress handle did not resolve
    UnknownIngress,
}

pub struct Switch {
    registry: DeviceRegistry,
    fdb: Fdb,
    metrics: Arc<MetricsRegistry>,
    burst_size: usize,
    burst: Vec<Packet>,
}

impl Switch {
    pub fn new(fdb: Fdb, burst_size: usize, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            registry: DeviceRegistry::new(),
            fdb,
            metrics,
            burst_size,
            burst: Vec::with_capacity(burst_size),
        }
    }

    // ========================================
    // Device management
    // ========================================

    pub fn attach(&mut self, device: Device) -> Result<DeviceHandle> {
        let id = device.id();
        let handle = self.registry.insert(device)?;
        self.metrics.register_device(id);
        info!("{} is added to the device list", id);
        Ok(handle)
    }

    /// Remove a device and every address learned on it
    pub fn remove(&mut self, id: DeviceId) -> Option<Device> {
        let device = self.registry.remove(id)?;

        let forgotten = self.fdb.forget_device(id);
        for mac in &forgotten {
            info!("MAC {} is removed from the table", mac);
        }
        self.metrics.macs_forgotten.add(forgotten.len() as u64);
        self.metrics.set_mac_table_size(self.fdb.len());
        self.metrics.unregister_device(id);

        info!("{} is deleted from the device list", id);
        Some(device)
    }

    // ========================================
    // Forwarding loop body
    // ========================================

    /// One pass over every device in attach order. Returns the number of
    /// packets processed.
    pub fn sweep(&mut self) -> usize {
        let mut processed = 0;
        let mut burst = std::mem::take(&mut self.burst);

        for position in 0..self.registry.len() {
            let Some(handle) = self.registry.handle_at(position) else {
                break;
            };
            let Some(device) = self.registry.get_mut(handle) else {
                continue;
            };
            if device.is_closing() {
                continue;
            }

            let id = device.id();
            device.receive(&mut burst, self.burst_size);

            for packet in burst.drain(..) {
                self.metrics.record_rx(id, packet.len());
                self.process(packet, handle);
                processed += 1;
            }
        }

        self.burst = burst;
        processed
    }

    /// Learn from and forward one packet received on `ingress`
    pub fn process(&mut self, packet: Packet, ingress: DeviceHandle) -> Disposition {
        let Some(ingress_id) = self.registry.get(ingress).map(Device::id) else {
            return Disposition::UnknownIngress;
        };

        self.learn(packet.src_mac(), ingress_id, ingress);

        let dst = packet.dst_mac();
        let Some(entry) = self.fdb.lookup(&dst) else {
            trace!("{} unknown, broadcasting", dst);
            return self.broadcast(packet, ingress, false);
        };

        let Some(device) = self.registry.get_mut(entry.handle) else {
            trace!("{} bound to removed {}, broadcasting", dst, entry.device);
            self.metrics.stale_fallbacks.inc();
            return self.broadcast(packet, ingress, true);
        };

        if device.is_closing() {
            self.metrics.closing_drops.inc();
            return Disposition::DroppedClosing(entry.device);
        }

        // single destination: no copy, the original buffer goes out
        transmit(&self.metrics, device, packet);
        self.metrics.unicast_forwarded.inc();
        Disposition::Unicast(entry.device)
    }

    fn learn(&mut self, src: MacAddr, device: DeviceId, handle: DeviceHandle) {
        match self.fdb.learn(src, device, handle) {
            LearnOutcome::Bound {
                moved_from,
                evicted,
                ..
            } => {
                if let Some(previous) = evicted {
                    warn!("MAC table full, evicted {} to learn {}", previous, src);
                    self.metrics.macs_evicted.inc();
                }
                match moved_from {
                    Some(_) => self.metrics.macs_moved.inc(),
                    None => self.metrics.macs_learned.inc(),
                }
                info!("MAC {} is mapped to {}", src, device);
                self.metrics.set_mac_table_size(self.fdb.len());
            }
            LearnOutcome::Rejected => {
                warn!("Cannot add {} to the MAC table: table full", src);
                self.metrics.learn_rejected.inc();
            }
            LearnOutcome::Unchanged { .. } | LearnOutcome::Ignored => {}
        }
    }

    fn broadcast(&mut self, packet: Packet, ingress: DeviceHandle, stale: bool) -> Disposition {
        let mut recipients = 0;

        for position in 0..self.registry.len() {
            let Some(handle) = self.registry.handle_at(position) else {
                break;
            };
            if handle == ingress {
                continue;
            }
            let Some(device) = self.registry.get_mut(handle) else {
                continue;
            };
            if device.is_closing() {
                continue;
            }

            let copy = match device.kind() {
                DeviceKind::Virtual => packet.clone(),
                DeviceKind::Physical => packet.duplicate(),
            };
            if transmit(&self.metrics, device, copy) {
                recipients += 1;
            }
        }

        self.metrics.broadcast_forwarded.inc();
        // `packet` (the original) is released here, once
        Disposition::Broadcast { recipients, stale }
    }

    // ========================================
    // Accessors
    // ========================================

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn fdb(&self) -> &Fdb {
        &self.fdb
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Device currently bound to `mac`, if any
    pub fn lookup(&self, mac: &MacAddr) -> Option<DeviceId> {
        self.fdb.lookup(mac).map(|entry| entry.device)
    }
}

/// Hand `packet` to `device`. A refused buffer is released on the spot.
fn transmit(metrics: &MetricsRegistry, device: &mut Device, packet: Packet) -> bool {
    let id = device.id();
    let len = packet.len();

    let accepted = match device.io_mut() {
        DeviceIo::Virtual(port) => port.enqueue(&packet) > 0,
        DeviceIo::Physical(port) => port.tx(packet).is_ok(),
    };

    if accepted {
        metrics.record_tx(id, len);
    } else {
        metrics.record_tx_drop(id);
    }
    accepted
}
