//! Virtual device sessions over Unix stream sockets
//!
//! Every accepted connection becomes one virtual device for as long as it
//! stays open. Frames travel as a 2-byte big-endian length followed by the
//! raw Ethernet frame, in both directions.
//!
//! Socket tasks and the forwarding thread meet at two bounded channels per
//! session. The forwarding side only ever uses `try_recv`/`try_send`.

use super::VirtualPort;
use crate::dataplane::{Coordinator, Device, DeviceId, Packet};
use crate::protocol::ethernet::ADDRS_LEN;
use crate::{Error, Result};
use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Largest frame the length prefix can describe
pub const MAX_SESSION_FRAME: usize = u16::MAX as usize;

/// Read one length-prefixed frame. `None` on a clean close between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let len = match reader.read_u16().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

/// Write one length-prefixed frame
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
    let len = u16::try_from(frame.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds length prefix", frame.len()),
        )
    })?;

    let mut buf = Vec::with_capacity(2 + frame.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(frame);
    writer.write_all(&buf).await
}

/// Forwarding-thread end of a session
pub struct SessionPort {
    inbound: mpsc::Receiver<Packet>,
    outbound: mpsc::Sender<Packet>,
}

impl SessionPort {
    pub fn new(inbound: mpsc::Receiver<Packet>, outbound: mpsc::Sender<Packet>) -> Self {
        Self { inbound, outbound }
    }
}

impl VirtualPort for SessionPort {
    fn dequeue_burst(&mut self, out: &mut Vec<Packet>, max: usize) -> usize {
        let mut received = 0;
        while received < max {
            match self.inbound.try_recv() {
                Ok(packet) => {
                    out.push(packet);
                    received += 1;
                }
                Err(_) => break,
            }
        }
        received
    }

    fn enqueue(&mut self, packet: &Packet) -> usize {
        match self.outbound.try_send(packet.clone()) {
            Ok(()) => 1,
            Err(_) => 0,
        }
    }
}

/// Accepts sessions and attaches/detaches them as virtual devices.
///
/// Clones share the device-number counter, so several sockets can be served
/// without two sessions ever getting the same number.
#[derive(Clone)]
pub struct SessionListener {
    coordinator: Arc<Coordinator>,
    next_number: Arc<AtomicU32>,
    queue_depth: usize,
}

impl SessionListener {
    pub fn new(coordinator: Arc<Coordinator>, queue_depth: usize) -> Self {
        Self {
            coordinator,
            next_number: Arc::new(AtomicU32::new(0)),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Bind `path`, replacing a stale socket file, and open it to every user.
    /// Anything else already at `path` is left alone and reported.
    pub fn bind(path: &Path) -> Result<UnixListener> {
        match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_socket() => std::fs::remove_file(path)?,
            Ok(_) => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists and is not a socket", path.display()),
                )))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let listener = UnixListener::bind(path)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))?;
        info!("Listening for sessions on {}", path.display());
        Ok(listener)
    }

    /// Accept sessions until the task is dropped
    pub async fn serve(&self, listener: UnixListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let session = self.clone();
                    tokio::spawn(async move { session.run_session(stream).await });
                }
                Err(e) => warn!("accept failed: {}", e),
            }
        }
    }

    async fn run_session(self, stream: UnixStream) {
        let number = self.next_number.fetch_add(1, Ordering::SeqCst);
        let id = DeviceId::virtual_device(number);

        let (to_switch, inbound) = mpsc::channel(self.queue_depth);
        let (outbound, from_switch) = mpsc::channel(self.queue_depth);
        let device = Device::virtual_device(number, SessionPort::new(inbound, outbound));

        let coordinator = Arc::clone(&self.coordinator);
        match tokio::task::spawn_blocking(move || coordinator.attach(device)).await {
            Ok(Ok(())) => info!("{} connected", id),
            Ok(Err(e)) => {
                warn!("{}: attach failed: {}", id, e);
                return;
            }
            Err(e) => {
                warn!("{}: attach task failed: {}", id, e);
                return;
            }
        }

        let (reader, writer) = stream.into_split();
        let outcome = tokio::select! {
            r = self.read_loop(id, reader, to_switch) => r,
            r = write_loop(writer, from_switch) => r,
        };

        match outcome {
            Ok(()) => info!("{} disconnected", id),
            Err(e) => warn!("{}: session failed: {}", id, e),
        }

        let coordinator = Arc::clone(&self.coordinator);
        match tokio::task::spawn_blocking(move || coordinator.detach(id)).await {
            Ok(Ok(())) => debug!("{} detached", id),
            Ok(Err(e)) => warn!("{}: detach failed: {}", id, e),
            Err(e) => warn!("{}: detach task failed: {}", id, e),
        }
    }

    async fn read_loop(
        &self,
        id: DeviceId,
        mut reader: OwnedReadHalf,
        to_switch: mpsc::Sender<Packet>,
    ) -> Result<()> {
        while let Some(frame) = read_frame(&mut reader).await? {
            if frame.len() < ADDRS_LEN {
                trace!("{}: dropped {} byte runt", id, frame.len());
                self.coordinator.metrics().record_rx_error(id);
                continue;
            }
            let packet = Packet::new(frame)?;
            if to_switch.send(packet).await.is_err() {
                // device already gone
                break;
            }
        }
        Ok(())
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut from_switch: mpsc::Receiver<Packet>,
) -> Result<()> {
    while let Some(packet) = from_switch.recv().await {
        if packet.len() > MAX_SESSION_FRAME {
            trace!("dropped {} byte frame, too long for session", packet.len());
            continue;
        }
        write_frame(&mut writer, packet.as_bytes())
            .await
            .map_err(Error::Io)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::memory_port;
    use crate::dataplane::{Fdb, Switch};
    use crate::protocol::ethernet::FrameBuilder;
    use crate::protocol::MacAddr;
    use crate::telemetry::MetricsRegistry;
    use std::time::Duration;

    const GUEST: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x10]);
    const WIRE: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x20]);

    #[tokio::test]
    async fn test_frame_codec() {
        let (mut client, mut server) = tokio::io::duplex(256);
        write_frame(&mut client, &[1, 2, 3]).await.unwrap();
        write_frame(&mut client, &[]).await.unwrap();
        drop(client);

        assert_eq!(read_frame(&mut server).await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(read_frame(&mut server).await.unwrap(), Some(vec![]));
        assert_eq!(read_frame(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_truncated_frame_is_error() {
        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(&[0, 10, 1, 2]).await.unwrap();
        drop(client);

        assert!(read_frame(&mut server).await.is_err());
    }

    #[test]
    fn test_session_port_queues() {
        let (to_switch, inbound) = mpsc::channel(4);
        let (outbound, mut from_switch) = mpsc::channel(1);
        let mut port = SessionPort::new(inbound, outbound);

        let packet = Packet::new(FrameBuilder::new(WIRE, GUEST).build()).unwrap();
        to_switch.try_send(packet.clone()).unwrap();
        to_switch.try_send(packet.clone()).unwrap();

        let mut out = Vec::new();
        assert_eq!(port.dequeue_burst(&mut out, 1), 1);
        assert_eq!(port.dequeue_burst(&mut out, 8), 1);
        assert_eq!(port.dequeue_burst(&mut out, 8), 0);

        assert_eq!(port.enqueue(&packet), 1);
        // queue depth 1: the second hand-off is refused, not blocked on
        assert_eq!(port.enqueue(&packet), 0);
        assert!(from_switch.try_recv().unwrap().shares_buffer(&packet));
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switch.sock");

        let first = SessionListener::bind(&path).unwrap();
        drop(first);
        assert!(path.exists());

        // a leftover socket from an earlier run is replaced
        let _second = SessionListener::bind(&path).unwrap();
        UnixStream::connect(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_refuses_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"keep me").unwrap();

        let err = SessionListener::bind(&path).unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::AlreadyExists));
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_session_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switch.sock");

        let metrics = Arc::new(MetricsRegistry::new());
        let mut switch = Switch::new(Fdb::default(), 32, metrics);
        let (wire_port, wire) = memory_port();
        switch.attach(Device::physical(0, wire_port)).unwrap();

        let coordinator = Arc::new(Coordinator::new(switch, Duration::from_micros(100)));
        let forwarding = {
            let coordinator = Arc::clone(&coordinator);
            std::thread::spawn(move || coordinator.run())
        };

        let listener = SessionListener::bind(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o666);

        let sessions = SessionListener::new(Arc::clone(&coordinator), 16);
        let server = tokio::spawn(async move { sessions.serve(listener).await });

        let mut client = UnixStream::connect(&path).await.unwrap();
        wait_for(|| coordinator.devices().contains(&DeviceId::virtual_device(0))).await;

        // guest -> wire: unknown destination, flooded to the physical port
        let hello = FrameBuilder::new(WIRE, GUEST).payload(b"hello").build();
        write_frame(&mut client, &hello).await.unwrap();
        wait_for(|| wire.transmitted_count() == 1).await;
        assert_eq!(wire.take_transmitted()[0].as_bytes(), &hello[..]);

        // wire -> guest: GUEST is learned now
        let reply = FrameBuilder::new(GUEST, WIRE).payload(b"world").build();
        wire.inject(Packet::from_slice(&reply).unwrap());
        let received = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut client))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Some(reply));

        // runts are counted, not forwarded
        write_frame(&mut client, &[0u8; 4]).await.unwrap();
        wait_for(|| {
            coordinator
                .metrics()
                .device(DeviceId::virtual_device(0))
                .map(|s| s.rx_errors)
                == Some(1)
        })
        .await;

        drop(client);
        wait_for(|| coordinator.devices() == vec![DeviceId::physical(0)]).await;
        assert_eq!(coordinator.exclusive(|switch| switch.lookup(&GUEST)), None);

        server.abort();
        coordinator.shutdown();
        forwarding.join().unwrap();
    }
}
