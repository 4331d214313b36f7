//! Device registry
//!
//! Devices live in generational slots. A `DeviceHandle` is a non-owning
//! reference: slot index plus the generation it was issued for. Removing a
//! device bumps the slot generation, so any handle still held elsewhere
//! (e.g. in the output table) stops resolving instead of aliasing whatever
//! device reuses the slot later.
//!
//! Iteration follows attach order.

use crate::dataplane::{Device, DeviceId};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    device: Option<Device>,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Occupied slot indices in attach order
    order: Vec<u32>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a device. Rejects a second device with the same (kind, number).
    pub fn insert(&mut self, device: Device) -> Result<DeviceHandle> {
        if self.find(device.id()).is_some() {
            return Err(Error::DuplicateDevice(device.id()));
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.device = Some(device);
        self.order.push(index);

        Ok(DeviceHandle {
            index,
            generation: slot.generation,
        })
    }

    /// Take a device out of the registry, invalidating all its handles
    pub fn remove(&mut self, id: DeviceId) -> Option<Device> {
        let handle = self.find(id)?;
        let slot = &mut self.slots[handle.index as usize];
        let device = slot.device.take()?;
        slot.generation = slot.generation.wrapping_add(1);

        self.order.retain(|&i| i != handle.index);
        self.free.push(handle.index);
        Some(device)
    }

    pub fn find(&self, id: DeviceId) -> Option<DeviceHandle> {
        self.order.iter().copied().find_map(|index| {
            let slot = &self.slots[index as usize];
            match &slot.device {
                Some(dev) if dev.id() == id => Some(DeviceHandle {
                    index,
                    generation: slot.generation,
                }),
                _ => None,
            }
        })
    }

    /// Resolve a handle; `None` once the device has been removed
    pub fn get(&self, handle: DeviceHandle) -> Option<&Device> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.device.as_ref()
    }

    pub fn get_mut(&mut self, handle: DeviceHandle) -> Option<&mut Device> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.device.as_mut()
    }

    /// Handle of the device at `position` in attach order
    pub fn handle_at(&self, position: usize) -> Option<DeviceHandle> {
        let index = *self.order.get(position)?;
        Some(DeviceHandle {
            index,
            generation: self.slots[index as usize].generation,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceHandle, &Device)> + '_ {
        self.order.iter().filter_map(|&index| {
            let slot = &self.slots[index as usize];
            slot.device.as_ref().map(|dev| {
                (
                    DeviceHandle {
                        index,
                        generation: slot.generation,
                    },
                    dev,
                )
            })
        })
    }

    pub fn ids(&self) -> Vec<DeviceId> {
        self.iter().map(|(_, dev)| dev.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
