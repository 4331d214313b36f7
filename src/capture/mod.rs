//! Device I/O backends
//!
//! Every operation is non-blocking and reports how much work it did. Zero
//! is a normal answer meaning "nothing right now", never an error.
//!
//! - AF_PACKET: raw socket bound to a physical NIC
//! - Session: framed Unix stream socket, one virtual device per connection
//! - Memory: in-process loopback for tests and embedding

mod af_packet;
mod memory;
pub mod session;

pub use af_packet::{interface_mac, AfPacketPort};
pub use memory::{memory_port, MemoryPort, MemoryPortHandle};
pub use session::{SessionListener, SessionPort};

use crate::dataplane::Packet;

/// Physical NIC queue pair
pub trait PhysicalPort: Send {
    /// Append up to `max` received packets to `out`; returns how many were added.
    fn rx_burst(&mut self, out: &mut Vec<Packet>, max: usize) -> usize;

    /// Transmit one packet. A refused packet is handed back to the caller.
    fn tx(&mut self, packet: Packet) -> Result<(), Packet>;
}

/// Virtual interface with shared-buffer hand-off
pub trait VirtualPort: Send {
    /// Append up to `max` packets sent by the guest to `out`.
    fn dequeue_burst(&mut self, out: &mut Vec<Packet>, max: usize) -> usize;

    /// Hand a shared reference to the guest; returns the accepted count.
    fn enqueue(&mut self, packet: &Packet) -> usize;
}

impl<T: PhysicalPort + ?Sized> PhysicalPort for Box<T> {
    fn rx_burst(&mut self, out: &mut Vec<Packet>, max: usize) -> usize {
        (**self).rx_burst(out, max)
    }

    fn tx(&mut self, packet: Packet) -> Result<(), Packet> {
        (**self).tx(packet)
    }
}

impl<T: VirtualPort + ?Sized> VirtualPort for Box<T> {
    fn dequeue_burst(&mut self, out: &mut Vec<Packet>, max: usize) -> usize {
        (**self).dequeue_burst(out, max)
    }

    fn enqueue(&mut self, packet: &Packet) -> usize {
        (**self).enqueue(packet)
    }
}
