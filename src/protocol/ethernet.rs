//! Ethernet frame addressing
//!
//! The switch only looks at the two hardware addresses at the start of a
//! frame. Everything after them (EtherType, tags, payload) is carried
//! through untouched.

use super::MacAddr;
use crate::{Error, Result};

/// Destination + source address bytes
pub const ADDRS_LEN: usize = 2 * MacAddr::LEN;
/// Maximum Ethernet frame size (without FCS, with VLAN tag)
pub const MAX_FRAME_SIZE: usize = 1522;

const DST_OFFSET: usize = 0;
const SRC_OFFSET: usize = MacAddr::LEN;

/// Borrowed view over the address header of a frame
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    buffer: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < ADDRS_LEN {
            return Err(Error::InvalidPacket(format!(
                "frame of {} bytes is shorter than the address header",
                buffer.len()
            )));
        }
        Ok(Self { buffer })
    }

    pub fn dst_mac(&self) -> MacAddr {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.buffer[DST_OFFSET..DST_OFFSET + MacAddr::LEN]);
        MacAddr(mac)
    }

    pub fn src_mac(&self) -> MacAddr {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.buffer[SRC_OFFSET..SRC_OFFSET + MacAddr::LEN]);
        MacAddr(mac)
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.buffer
    }
}

/// Builder for constructing Ethernet frames
pub struct FrameBuilder {
    buffer: Vec<u8>,
}

impl FrameBuilder {
    pub fn new(dst: MacAddr, src: MacAddr) -> Self {
        let mut buffer = Vec::with_capacity(MAX_FRAME_SIZE);
        buffer.extend_from_slice(&dst.0);
        buffer.extend_from_slice(&src.0);
        Self { buffer }
    }

    pub fn ethertype(mut self, ethertype: u16) -> Self {
        self.buffer.extend_from_slice(&ethertype.to_be_bytes());
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.buffer.extend_from_slice(payload);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}
