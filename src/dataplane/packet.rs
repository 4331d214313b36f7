//! Packet buffers
//!
//! A `Packet` is a reference-counted, immutable frame. Cloning the handle
//! shares the buffer (the hand-off virtual devices accept); `duplicate`
//! produces an independent buffer for ports that need their own copy.
//! Dropping the last handle releases the buffer.

use crate::protocol::ethernet::Frame;
use crate::protocol::MacAddr;
use crate::Result;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct Packet {
    data: Arc<[u8]>,
    dst: MacAddr,
    src: MacAddr,
}

impl Packet {
    /// Wrap a received frame. Fails for frames without a full address header.
    pub fn new(data: Vec<u8>) -> Result<Self> {
        let (dst, src) = addresses(&data)?;
        Ok(Self {
            data: data.into(),
            dst,
            src,
        })
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let (dst, src) = addresses(data)?;
        Ok(Self {
            data: data.into(),
            dst,
            src,
        })
    }

    pub fn dst_mac(&self) -> MacAddr {
        self.dst
    }

    pub fn src_mac(&self) -> MacAddr {
        self.src
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Independent copy with its own lifetime
    pub fn duplicate(&self) -> Packet {
        Self {
            data: Arc::from(&self.data[..]),
            dst: self.dst,
            src: self.src,
        }
    }

    /// True if both handles point at the same buffer
    pub fn shares_buffer(&self, other: &Packet) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Number of live handles to this buffer
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }
}

fn addresses(data: &[u8]) -> Result<(MacAddr, MacAddr)> {
    let frame = Frame::parse(data)?;
    Ok((frame.dst_mac(), frame.src_mac()))
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("dst", &self.dst_mac())
            .field("src", &self.src_mac())
            .field("len", &self.len())
            .finish()
    }
}
