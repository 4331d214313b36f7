//! Forwarding Database (MAC address table)
//!
//! Two index-aligned tables:
//! - `MacTable`: fixed-capacity map from hardware address to slot index.
//!   Owns no device references.
//! - `OutputTable`: one weak device reference per slot.
//!
//! `Fdb` keeps them in step. A slot that holds an address always has an
//! output binding and the pair is created and dropped together.

use crate::dataplane::{DeviceHandle, DeviceId};
use crate::protocol::MacAddr;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Default number of learnable addresses
pub const DEFAULT_CAPACITY: usize = 256;

/// What to do when a new address arrives and every slot is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TableFullPolicy {
    /// Leave the table alone; the packet is still forwarded
    #[default]
    Reject,
    /// Reuse the slot of the longest-resident address
    EvictOldest,
}

/// Result of `MacTable::insert`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    Existing(usize),
    Inserted(usize),
    Evicted { slot: usize, previous: MacAddr },
    Full,
}

#[derive(Debug)]
pub struct MacTable {
    capacity: usize,
    policy: TableFullPolicy,
    index: HashMap<MacAddr, usize>,
    keys: Vec<Option<MacAddr>>,
    /// Slots never handed out are below `capacity` and above this
    next_fresh: usize,
    /// Slots returned by `remove`, reused in release order
    free: VecDeque<usize>,
    /// Occupied slots, oldest first
    residency: VecDeque<usize>,
}

impl MacTable {
    pub fn new(capacity: usize, policy: TableFullPolicy) -> Self {
        Self {
            capacity,
            policy,
            index: HashMap::with_capacity(capacity),
            keys: vec![None; capacity],
            next_fresh: 0,
            free: VecDeque::new(),
            residency: VecDeque::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, mac: MacAddr) -> Insert {
        if let Some(&slot) = self.index.get(&mac) {
            return Insert::Existing(slot);
        }

        let mut evicted = None;
        let slot = if self.next_fresh < self.capacity {
            self.next_fresh += 1;
            self.next_fresh - 1
        } else if let Some(slot) = self.free.pop_front() {
            slot
        } else {
            match (self.policy, self.residency.pop_front()) {
                (TableFullPolicy::EvictOldest, Some(slot)) => {
                    if let Some(previous) = self.keys[slot].take() {
                        self.index.remove(&previous);
                        evicted = Some(previous);
                    }
                    slot
                }
                (TableFullPolicy::EvictOldest, None) => return Insert::Full,
                (TableFullPolicy::Reject, oldest) => {
                    if let Some(slot) = oldest {
                        self.residency.push_front(slot);
                    }
                    return Insert::Full;
                }
            }
        };

        self.keys[slot] = Some(mac);
        self.index.insert(mac, slot);
        self.residency.push_back(slot);

        match evicted {
            Some(previous) => Insert::Evicted { slot, previous },
            None => Insert::Inserted(slot),
        }
    }

    pub fn lookup(&self, mac: &MacAddr) -> Option<usize> {
        self.index.get(mac).copied()
    }

    pub fn remove(&mut self, mac: &MacAddr) -> Option<usize> {
        let slot = self.index.remove(mac)?;
        self.keys[slot] = None;
        self.residency.retain(|&s| s != slot);
        self.free.push_back(slot);
        Some(slot)
    }

    pub fn slot_to_key(&self, slot: usize) -> Option<MacAddr> {
        self.keys.get(slot).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.index.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Weak binding from a slot to the device that last sent from its address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputEntry {
    pub device: DeviceId,
    pub handle: DeviceHandle,
}

#[derive(Debug)]
pub struct OutputTable {
    entries: Vec<Option<OutputEntry>>,
}

impl OutputTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: vec![None; capacity],
        }
    }

    pub fn get(&self, slot: usize) -> Option<OutputEntry> {
        self.entries.get(slot).copied().flatten()
    }

    /// Write the binding if it differs from the current one. Returns the
    /// previous binding when a write happened.
    pub fn bind(&mut self, slot: usize, entry: OutputEntry) -> Option<Option<OutputEntry>> {
        let current = self.entries.get_mut(slot)?;
        if *current == Some(entry) {
            return None;
        }
        Some(current.replace(entry))
    }

    /// Clear every slot bound to `device`; returns the cleared slots
    pub fn invalidate(&mut self, device: DeviceId) -> Vec<usize> {
        let mut cleared = Vec::new();
        for (slot, entry) in self.entries.iter_mut().enumerate() {
            if entry.is_some_and(|e| e.device == device) {
                *entry = None;
                cleared.push(slot);
            }
        }
        cleared
    }

    pub fn bound_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

/// Outcome of learning a source address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnOutcome {
    /// Already bound to this device; nothing written
    Unchanged { slot: usize },
    /// Output binding written
    Bound {
        slot: usize,
        moved_from: Option<DeviceId>,
        evicted: Option<MacAddr>,
    },
    /// Table full under the reject policy
    Rejected,
    /// Group addresses are never learned
    Ignored,
}

#[derive(Debug)]
pub struct Fdb {
    macs: MacTable,
    outputs: OutputTable,
}

impl Default for Fdb {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, TableFullPolicy::default())
    }
}

impl Fdb {
    pub fn new(capacity: usize, policy: TableFullPolicy) -> Self {
        Self {
            macs: MacTable::new(capacity, policy),
            outputs: OutputTable::new(capacity),
        }
    }

    // ========================================
    // MAC Learning
    // ========================================

    /// Record that `mac` was last seen on `device`
    pub fn learn(&mut self, mac: MacAddr, device: DeviceId, handle: DeviceHandle) -> LearnOutcome {
        if !mac.is_unicast() {
            return LearnOutcome::Ignored;
        }

        let entry = OutputEntry { device, handle };
        let (slot, evicted) = match self.macs.insert(mac) {
            Insert::Existing(slot) | Insert::Inserted(slot) => (slot, None),
            Insert::Evicted { slot, previous } => (slot, Some(previous)),
            Insert::Full => return LearnOutcome::Rejected,
        };

        match self.outputs.bind(slot, entry) {
            None => LearnOutcome::Unchanged { slot },
            Some(previous) => LearnOutcome::Bound {
                slot,
                // an evicted slot's old binding belongs to a different address
                moved_from: previous
                    .filter(|_| evicted.is_none())
                    .map(|p| p.device)
                    .filter(|&d| d != device),
                evicted,
            },
        }
    }

    // ========================================
    // Lookup
    // ========================================

    /// Lookup without inserting
    pub fn lookup(&self, mac: &MacAddr) -> Option<OutputEntry> {
        self.outputs.get(self.macs.lookup(mac)?)
    }

    pub fn slot_of(&self, mac: &MacAddr) -> Option<usize> {
        self.macs.lookup(mac)
    }

    // ========================================
    // Device teardown
    // ========================================

    /// Drop every address bound to `device`; returns the forgotten addresses
    pub fn forget_device(&mut self, device: DeviceId) -> Vec<MacAddr> {
        let mut forgotten = Vec::new();
        for slot in self.outputs.invalidate(device) {
            if let Some(mac) = self.macs.slot_to_key(slot) {
                self.macs.remove(&mac);
                forgotten.push(mac);
            }
        }
        forgotten
    }

    /// Every learned address with its binding, in slot order
    pub fn entries(&self) -> impl Iterator<Item = (MacAddr, OutputEntry)> + '_ {
        self.outputs
            .entries
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| Some((self.macs.slot_to_key(slot)?, (*entry)?)))
    }

    pub fn macs(&self) -> &MacTable {
        &self.macs
    }

    pub fn outputs(&self) -> &OutputTable {
        &self.outputs
    }

    pub fn len(&self) -> usize {
        self.macs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macs.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.macs.capacity()
    }
}
