//! AF_PACKET socket implementation

use super::PhysicalPort;
use crate::dataplane::{DeviceId, Packet};
use crate::protocol::ethernet::ADDRS_LEN;
use crate::protocol::MacAddr;
use crate::telemetry::MetricsRegistry;
use crate::{Error, Result};
use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use tracing::{trace, warn};

/// Large enough for anything the kernel hands up, offloads included
const RECV_BUFFER_SIZE: usize = 65536;

/// Raw socket bound to one NIC, in promiscuous mode while open
pub struct AfPacketPort {
    fd: RawFd,
    ifindex: i32,
    name: String,
    device: DeviceId,
    metrics: Arc<MetricsRegistry>,
    buf: Vec<u8>,
}

impl AfPacketPort {
    /// Open a non-blocking AF_PACKET socket on `ifname`.
    ///
    /// `device` and `metrics` are used to count frames too short to carry
    /// both addresses.
    pub fn open(ifname: &str, device: DeviceId, metrics: Arc<MetricsRegistry>) -> Result<Self> {
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                (libc::ETH_P_ALL as u16).to_be() as i32,
            )
        };

        if fd < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        let ifindex = match Self::get_ifindex(fd, ifname) {
            Ok(index) => index,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        // Bind to interface
        let sockaddr = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: (libc::ETH_P_ALL as u16).to_be(),
            sll_ifindex: ifindex,
            sll_hatype: 0,
            sll_pkttype: 0,
            sll_halen: 0,
            sll_addr: [0; 8],
        };

        let ret = unsafe {
            libc::bind(
                fd,
                &sockaddr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as u32,
            )
        };

        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::Io(err));
        }

        if let Err(e) = Self::set_promisc(fd, ifindex, true) {
            unsafe { libc::close(fd) };
            return Err(e);
        }

        Ok(Self {
            fd,
            ifindex,
            name: ifname.to_string(),
            device,
            metrics,
            buf: vec![0u8; RECV_BUFFER_SIZE],
        })
    }

    fn get_ifindex(fd: RawFd, ifname: &str) -> Result<i32> {
        let not_found = || Error::InterfaceNotFound {
            name: ifname.to_string(),
        };

        let ifname_c = CString::new(ifname).map_err(|_| not_found())?;
        let name_bytes = ifname_c.as_bytes_with_nul();
        if name_bytes.len() > libc::IFNAMSIZ {
            return Err(not_found());
        }

        let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
        for (dst, src) in ifr.ifr_name.iter_mut().zip(name_bytes) {
            *dst = *src as libc::c_char;
        }

        let ret = unsafe { libc::ioctl(fd, libc::SIOCGIFINDEX, &mut ifr) };
        if ret < 0 {
            return Err(not_found());
        }

        Ok(unsafe { ifr.ifr_ifru.ifru_ifindex })
    }

    fn set_promisc(fd: RawFd, ifindex: i32, enable: bool) -> Result<()> {
        let mreq = libc::packet_mreq {
            mr_ifindex: ifindex,
            mr_type: libc::PACKET_MR_PROMISC as u16,
            mr_alen: 0,
            mr_address: [0; 8],
        };

        let optname = if enable {
            libc::PACKET_ADD_MEMBERSHIP
        } else {
            libc::PACKET_DROP_MEMBERSHIP
        };

        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_PACKET,
                optname,
                &mreq as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::packet_mreq>() as u32,
            )
        };

        if ret < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        Ok(())
    }

    /// One frame, or `None` when the socket has nothing queued
    fn recv_one(&mut self) -> Option<io::Result<(usize, u8)>> {
        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        let mut addr_len = std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;

        let n = unsafe {
            libc::recvfrom(
                self.fd,
                self.buf.as_mut_ptr() as *mut libc::c_void,
                self.buf.len(),
                libc::MSG_DONTWAIT,
                &mut addr as *mut _ as *mut libc::sockaddr,
                &mut addr_len,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock => None,
                _ => Some(Err(err)),
            };
        }
        Some(Ok((n as usize, addr.sll_pkttype)))
    }
}

impl PhysicalPort for AfPacketPort {
    fn rx_burst(&mut self, out: &mut Vec<Packet>, max: usize) -> usize {
        let mut received = 0;

        while received < max {
            let (len, pkttype) = match self.recv_one() {
                None => break,
                Some(Ok(frame)) => frame,
                Some(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Some(Err(e)) => {
                    warn!("{}: receive failed: {}", self.name, e);
                    break;
                }
            };

            // our own transmissions loop back on a raw socket
            if pkttype == libc::PACKET_OUTGOING {
                continue;
            }
            if len < ADDRS_LEN {
                trace!("{}: dropped {} byte runt", self.name, len);
                self.metrics.record_rx_error(self.device);
                continue;
            }

            match Packet::from_slice(&self.buf[..len]) {
                Ok(packet) => {
                    out.push(packet);
                    received += 1;
                }
                Err(_) => self.metrics.record_rx_error(self.device),
            }
        }

        received
    }

    fn tx(&mut self, packet: Packet) -> std::result::Result<(), Packet> {
        let bytes = packet.as_bytes();
        let n = unsafe {
            libc::send(
                self.fd,
                bytes.as_ptr() as *const libc::c_void,
                bytes.len(),
                libc::MSG_DONTWAIT,
            )
        };

        if n < 0 {
            trace!("{}: send failed: {}", self.name, io::Error::last_os_error());
            return Err(packet);
        }
        Ok(())
    }
}

impl Drop for AfPacketPort {
    fn drop(&mut self) {
        let _ = Self::set_promisc(self.fd, self.ifindex, false);
        unsafe { libc::close(self.fd) };
    }
}

/// Hardware address of a local interface, read from sysfs
pub fn interface_mac(ifname: &str) -> Result<MacAddr> {
    let path = format!("/sys/class/net/{}/address", ifname);
    let content = std::fs::read_to_string(&path).map_err(|_| Error::InterfaceNotFound {
        name: ifname.to_string(),
    })?;
    content
        .trim()
        .parse()
        .map_err(|e| Error::Parse(format!("{}: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_mac_unknown_interface() {
        let err = interface_mac("lswitch-test-none0").unwrap_err();
        assert!(matches!(err, Error::InterfaceNotFound { .. }));
    }

    #[test]
    fn test_interface_mac_loopback() {
        // lo exists on every Linux host and has an all-zero address
        if let Ok(mac) = interface_mac("lo") {
            assert_eq!(mac, MacAddr::ZERO);
        }
    }
}
