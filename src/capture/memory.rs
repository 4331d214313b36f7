//! In-memory loopback port
//!
//! The port half is owned by a device inside the switch; the handle half
//! stays with whoever drives it (a test, an embedding application) to inject
//! received frames and collect transmitted ones.

use super::{PhysicalPort, VirtualPort};
use crate::dataplane::Packet;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Shared {
    rx: VecDeque<Packet>,
    tx: Vec<Packet>,
    receive_calls: usize,
    refused: usize,
    refuse_tx: bool,
    released: bool,
}

#[derive(Debug)]
pub struct MemoryPort {
    shared: Arc<Mutex<Shared>>,
}

#[derive(Debug, Clone)]
pub struct MemoryPortHandle {
    shared: Arc<Mutex<Shared>>,
}

/// Create a connected port/handle pair
pub fn memory_port() -> (MemoryPort, MemoryPortHandle) {
    let shared = Arc::new(Mutex::new(Shared::default()));
    (
        MemoryPort {
            shared: Arc::clone(&shared),
        },
        MemoryPortHandle { shared },
    )
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryPort {
    fn drain(&mut self, out: &mut Vec<Packet>, max: usize) -> usize {
        let mut shared = lock(&self.shared);
        shared.receive_calls += 1;
        let n = shared.rx.len().min(max);
        out.extend(shared.rx.drain(..n));
        n
    }

    fn accept(&mut self, packet: Packet) -> Result<(), Packet> {
        let mut shared = lock(&self.shared);
        if shared.refuse_tx {
            shared.refused += 1;
            return Err(packet);
        }
        shared.tx.push(packet);
        Ok(())
    }
}

impl Drop for MemoryPort {
    fn drop(&mut self) {
        let mut shared = lock(&self.shared);
        shared.rx.clear();
        shared.released = true;
    }
}

impl PhysicalPort for MemoryPort {
    fn rx_burst(&mut self, out: &mut Vec<Packet>, max: usize) -> usize {
        self.drain(out, max)
    }

    fn tx(&mut self, packet: Packet) -> Result<(), Packet> {
        self.accept(packet)
    }
}

impl VirtualPort for MemoryPort {
    fn dequeue_burst(&mut self, out: &mut Vec<Packet>, max: usize) -> usize {
        self.drain(out, max)
    }

    fn enqueue(&mut self, packet: &Packet) -> usize {
        match self.accept(packet.clone()) {
            Ok(()) => 1,
            Err(_) => 0,
        }
    }
}

impl MemoryPortHandle {
    /// Queue a frame as if it arrived on the wire
    pub fn inject(&self, packet: Packet) {
        lock(&self.shared).rx.push_back(packet);
    }

    /// Frames not yet picked up by the switch
    pub fn pending_rx(&self) -> usize {
        lock(&self.shared).rx.len()
    }

    /// Take everything delivered to this port so far
    pub fn take_transmitted(&self) -> Vec<Packet> {
        std::mem::take(&mut lock(&self.shared).tx)
    }

    pub fn transmitted_count(&self) -> usize {
        lock(&self.shared).tx.len()
    }

    pub fn receive_calls(&self) -> usize {
        lock(&self.shared).receive_calls
    }

    /// Make every following transmit report zero accepted
    pub fn set_refuse_tx(&self, refuse: bool) {
        lock(&self.shared).refuse_tx = refuse;
    }

    pub fn refused_count(&self) -> usize {
        lock(&self.shared).refused
    }

    /// True once the owning device has been destroyed
    pub fn is_released(&self) -> bool {
        lock(&self.shared).released
    }
}
