//! Attachment points
//!
//! A device is identified by the pair (kind, number). Physical port numbers
//! and virtual session numbers are allocated independently, so the bare
//! number is never enough to tell two devices apart.

use crate::capture::{PhysicalPort, VirtualPort};
use crate::dataplane::Packet;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceKind {
    Physical,
    Virtual,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Physical => write!(f, "physical"),
            DeviceKind::Virtual => write!(f, "virtual"),
        }
    }
}

/// Composite device identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId {
    pub kind: DeviceKind,
    pub number: u32,
}

impl DeviceId {
    pub const fn physical(number: u32) -> Self {
        Self {
            kind: DeviceKind::Physical,
            number,
        }
    }

    pub const fn virtual_device(number: u32) -> Self {
        Self {
            kind: DeviceKind::Virtual,
            number,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} device {}", self.kind, self.number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceState {
    Ready = 0,
    Closing = 1,
}

/// Lifecycle flag shared between the control plane and the forwarding loop.
///
/// The control plane flips it to `Closing` before it takes the registry lock,
/// so it must be readable without that lock.
#[derive(Debug)]
pub struct DeviceStatus(AtomicU8);

impl DeviceStatus {
    fn new() -> Self {
        Self(AtomicU8::new(DeviceState::Ready as u8))
    }

    pub fn state(&self) -> DeviceState {
        match self.0.load(Ordering::Acquire) {
            0 => DeviceState::Ready,
            _ => DeviceState::Closing,
        }
    }

    pub fn is_closing(&self) -> bool {
        self.state() == DeviceState::Closing
    }

    /// Ready -> Closing. There is no way back.
    pub fn begin_closing(&self) {
        self.0.store(DeviceState::Closing as u8, Ordering::Release);
    }
}

pub enum DeviceIo {
    Physical(Box<dyn PhysicalPort>),
    Virtual(Box<dyn VirtualPort>),
}

pub struct Device {
    id: DeviceId,
    status: Arc<DeviceStatus>,
    io: DeviceIo,
}

impl Device {
    pub fn physical(number: u32, port: impl PhysicalPort + 'static) -> Self {
        Self {
            id: DeviceId::physical(number),
            status: Arc::new(DeviceStatus::new()),
            io: DeviceIo::Physical(Box::new(port)),
        }
    }

    pub fn virtual_device(number: u32, port: impl VirtualPort + 'static) -> Self {
        Self {
            id: DeviceId::virtual_device(number),
            status: Arc::new(DeviceStatus::new()),
            io: DeviceIo::Virtual(Box::new(port)),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn kind(&self) -> DeviceKind {
        self.id.kind
    }

    pub fn state(&self) -> DeviceState {
        self.status.state()
    }

    pub fn is_closing(&self) -> bool {
        self.status.is_closing()
    }

    pub fn status(&self) -> Arc<DeviceStatus> {
        Arc::clone(&self.status)
    }

    pub fn io_mut(&mut self) -> &mut DeviceIo {
        &mut self.io
    }

    /// Drain up to `max` packets into `out`. Closing devices are never read.
    pub fn receive(&mut self, out: &mut Vec<Packet>, max: usize) -> usize {
        if self.is_closing() {
            return 0;
        }
        match &mut self.io {
            DeviceIo::Physical(port) => port.rx_burst(out, max),
            DeviceIo::Virtual(port) => port.dequeue_burst(out, max),
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
