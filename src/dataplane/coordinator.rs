//! Forwarding / control coordination
//!
//! The forwarding thread holds the switch lock while it sweeps and only lets
//! go when a control thread has announced itself through `pending`. Once
//! released it parks on the gate until every pending control operation has
//! finished, so control work never waits behind more than one sweep and the
//! forwarding thread never contends with control threads for the lock.
//!
//! Device status is reachable without the switch lock through the directory,
//! which lets `detach` mark a device Closing before it queues for the lock.

use crate::dataplane::{Device, DeviceId, DeviceKind, DeviceStatus, Switch};
use crate::telemetry::MetricsRegistry;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info};

pub struct Coordinator {
    switch: Mutex<Switch>,
    metrics: Arc<MetricsRegistry>,
    /// Control operations waiting for or holding the switch
    pending: AtomicUsize,
    shutdown: AtomicBool,
    gate: Mutex<()>,
    released: Condvar,
    directory: RwLock<HashMap<DeviceId, Arc<DeviceStatus>>>,
    idle_sleep: Duration,
}

/// Keeps `pending` raised for the lifetime of one control operation
struct PendingGuard<'a>(&'a Coordinator);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.0.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _gate = self.0.gate.lock().unwrap_or_else(PoisonError::into_inner);
            self.0.released.notify_all();
        }
    }
}

impl Coordinator {
    /// `idle_sleep` of zero means busy polling
    pub fn new(switch: Switch, idle_sleep: Duration) -> Self {
        let metrics = Arc::clone(switch.metrics());
        let directory = switch
            .registry()
            .iter()
            .map(|(_, device)| (device.id(), device.status()))
            .collect();

        Self {
            switch: Mutex::new(switch),
            metrics,
            pending: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            gate: Mutex::new(()),
            released: Condvar::new(),
            directory: RwLock::new(directory),
            idle_sleep,
        }
    }

    fn lock_switch(&self) -> MutexGuard<'_, Switch> {
        self.switch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access to the switch, ahead of the next sweep
    pub fn exclusive<R>(&self, f: impl FnOnce(&mut Switch) -> R) -> R {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let _pending = PendingGuard(self);
        let mut switch = self.lock_switch();
        f(&mut switch)
    }

    // ========================================
    // Control operations
    // ========================================

    pub fn attach(&self, device: Device) -> Result<()> {
        let id = device.id();
        let status = device.status();

        self.exclusive(|switch| switch.attach(device))?;

        self.directory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, status);
        Ok(())
    }

    /// Tear down a virtual device and forget everything learned on it.
    ///
    /// The device is marked Closing first, so packets bound for it are
    /// dropped even before the forwarding thread yields.
    pub fn detach(&self, id: DeviceId) -> Result<()> {
        if id.kind == DeviceKind::Physical {
            return Err(Error::PhysicalDetach(id));
        }

        let status = self
            .directory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(Error::DeviceNotFound(id))?;

        status.begin_closing();
        debug!("{} is closing", id);

        let device = self
            .exclusive(|switch| switch.remove(id))
            .ok_or(Error::DeviceNotFound(id))?;

        self.directory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);

        // releases the port and whatever it still had queued
        drop(device);
        Ok(())
    }

    pub fn devices(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self
            .directory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    // ========================================
    // Forwarding thread
    // ========================================

    /// Forwarding loop. Returns after `shutdown`.
    pub fn run(&self) {
        info!("Forwarding loop started");

        while !self.is_shut_down() {
            let idle = {
                let mut switch = self.lock_switch();
                loop {
                    let processed = switch.sweep();
                    if self.pending.load(Ordering::SeqCst) > 0 || self.is_shut_down() {
                        break false;
                    }
                    if processed == 0 && !self.idle_sleep.is_zero() {
                        break true;
                    }
                }
            };

            if idle {
                std::thread::sleep(self.idle_sleep);
            }
            self.wait_for_control();
        }

        info!("Forwarding loop stopped");
    }

    fn wait_for_control(&self) {
        let gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let _gate = self
            .released
            .wait_while(gate, |_| {
                self.pending.load(Ordering::SeqCst) > 0 && !self.is_shut_down()
            })
            .unwrap_or_else(PoisonError::into_inner);
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.released.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
