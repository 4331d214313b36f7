//! Switching integration tests
//!
//! Drive a running forwarding thread through `Coordinator` with in-memory
//! ports, from several control threads at once.
//!
//! Topology used by most tests:
//! ```text
//!   V1 (AA) ──┐
//!             ├── lswitch ── P0 (wire)
//!   V2 (BB) ──┘
//! ```

use lswitch::capture::{memory_port, MemoryPortHandle};
use lswitch::config;
use lswitch::dataplane::{Coordinator, Device, DeviceId, Fdb, Packet, Switch, TableFullPolicy};
use lswitch::protocol::ethernet::FrameBuilder;
use lswitch::protocol::MacAddr;
use lswitch::telemetry::MetricsRegistry;
use lswitch::Error;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const AA: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0xaa]);
const BB: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0xbb]);
const CC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0xcc]);

fn frame(dst: MacAddr, src: MacAddr) -> Packet {
    Packet::new(
        FrameBuilder::new(dst, src)
            .ethertype(0x0800)
            .payload(&[0u8; 46])
            .build(),
    )
    .unwrap()
}

fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

struct Running {
    coordinator: Arc<Coordinator>,
    forwarding: Option<JoinHandle<()>>,
}

impl Running {
    fn start(switch: Switch, idle_sleep: Duration) -> Self {
        let coordinator = Arc::new(Coordinator::new(switch, idle_sleep));
        let forwarding = {
            let coordinator = Arc::clone(&coordinator);
            thread::Builder::new()
                .name("forwarding".to_string())
                .spawn(move || coordinator.run())
                .unwrap()
        };
        Self {
            coordinator,
            forwarding: Some(forwarding),
        }
    }

    fn attach_virtual(&self, number: u32) -> MemoryPortHandle {
        let (port, handle) = memory_port();
        self.coordinator
            .attach(Device::virtual_device(number, port))
            .unwrap();
        handle
    }

    fn lookup(&self, mac: MacAddr) -> Option<DeviceId> {
        self.coordinator.exclusive(|switch| switch.lookup(&mac))
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.coordinator.shutdown();
        if let Some(forwarding) = self.forwarding.take() {
            forwarding.join().unwrap();
        }
    }
}

/// Switch with P0 attached, as bootstrap would leave it
fn switch_with_wire() -> (Switch, MemoryPortHandle) {
    let mut switch = Switch::new(Fdb::default(), 32, Arc::new(MetricsRegistry::new()));
    let (port, wire) = memory_port();
    switch.attach(Device::physical(0, port)).unwrap();
    (switch, wire)
}

#[test]
fn test_learn_then_unicast() {
    let (switch, wire) = switch_with_wire();
    let running = Running::start(switch, Duration::ZERO);
    let v1 = running.attach_virtual(1);
    let v2 = running.attach_virtual(2);

    // AA -> BB: BB unknown, flooded to P0 and V2
    v1.inject(frame(BB, AA));
    wait_until("flood", || {
        wire.transmitted_count() == 1 && v2.transmitted_count() == 1
    });
    assert_eq!(v1.transmitted_count(), 0);
    assert_eq!(running.lookup(AA), Some(DeviceId::virtual_device(1)));

    wire.take_transmitted();
    v2.take_transmitted();

    // BB -> AA: AA known, V1 only
    v2.inject(frame(AA, BB));
    wait_until("unicast", || v1.transmitted_count() == 1);
    assert_eq!(running.lookup(BB), Some(DeviceId::virtual_device(2)));

    // let another sweep pass to be sure nothing else went out
    running.coordinator.exclusive(|switch| switch.sweep());
    assert_eq!(wire.transmitted_count(), 0);
    assert_eq!(v2.transmitted_count(), 0);
}

#[test]
fn test_station_move_between_devices() {
    let (switch, wire) = switch_with_wire();
    let running = Running::start(switch, Duration::from_micros(50));
    let v1 = running.attach_virtual(1);

    v1.inject(frame(CC, AA));
    wait_until("learn on V1", || {
        running.lookup(AA) == Some(DeviceId::virtual_device(1))
    });

    // AA shows up on the wire
    wire.inject(frame(CC, AA));
    wait_until("move to P0", || {
        running.lookup(AA) == Some(DeviceId::physical(0))
    });

    let metrics = Arc::clone(running.coordinator.metrics());
    assert_eq!(metrics.macs_learned.get(), 1);
    assert_eq!(metrics.macs_moved.get(), 1);
}

#[test]
fn test_detach_while_forwarding() {
    let (switch, wire) = switch_with_wire();
    let running = Running::start(switch, Duration::ZERO);
    let v1 = running.attach_virtual(1);
    let v2 = running.attach_virtual(2);

    v1.inject(frame(BB, AA));
    wait_until("learn AA", || running.lookup(AA).is_some());

    // V2 keeps talking to AA while V1 goes away
    let stop = Arc::new(AtomicBool::new(false));
    let sender = {
        let v2 = v2.clone();
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                if v2.pending_rx() < 64 {
                    v2.inject(frame(AA, BB));
                }
                thread::yield_now();
            }
        })
    };

    wait_until("unicast traffic", || v1.transmitted_count() > 0);
    running
        .coordinator
        .detach(DeviceId::virtual_device(1))
        .unwrap();

    // the device and every trace of it are gone as soon as detach returns
    assert!(v1.is_released());
    let delivered = v1.transmitted_count();
    assert_eq!(running.lookup(AA), None);
    assert_eq!(
        running.coordinator.devices(),
        vec![DeviceId::physical(0), DeviceId::virtual_device(2)]
    );

    // AA is unknown again: V2's traffic floods to the wire
    wire.take_transmitted();
    wait_until("flood after detach", || wire.transmitted_count() > 0);

    stop.store(true, Ordering::Relaxed);
    sender.join().unwrap();

    assert_eq!(v1.transmitted_count(), delivered);
    let metrics = running.coordinator.metrics();
    assert_eq!(metrics.macs_forgotten.get(), 1);
    assert!(metrics.device(DeviceId::virtual_device(1)).is_none());
}

#[test]
fn test_detach_errors() {
    let (switch, _wire) = switch_with_wire();
    let running = Running::start(switch, Duration::ZERO);

    let err = running
        .coordinator
        .detach(DeviceId::physical(0))
        .unwrap_err();
    assert!(matches!(err, Error::PhysicalDetach(_)));

    let err = running
        .coordinator
        .detach(DeviceId::virtual_device(0))
        .unwrap_err();
    assert!(matches!(err, Error::DeviceNotFound(_)));

    // virtual 0 and physical 0 are different devices
    let _v0 = running.attach_virtual(0);
    running
        .coordinator
        .detach(DeviceId::virtual_device(0))
        .unwrap();
    assert_eq!(running.coordinator.devices(), vec![DeviceId::physical(0)]);
}

#[test]
fn test_concurrent_control_threads() {
    let (switch, wire) = switch_with_wire();
    let running = Running::start(switch, Duration::ZERO);

    // background traffic from the wire keeps the forwarding thread busy
    for i in 0..32u8 {
        wire.inject(frame(MacAddr::BROADCAST, MacAddr([0x02, 0, 0, 1, 0, i])));
    }

    let workers: Vec<_> = (0..4u32)
        .map(|worker| {
            let coordinator = Arc::clone(&running.coordinator);
            thread::spawn(move || {
                for round in 0..25u32 {
                    let number = worker * 100 + round;
                    let (port, handle) = memory_port();
                    coordinator
                        .attach(Device::virtual_device(number, port))
                        .unwrap();

                    let src = MacAddr([0x02, 0, 0, 2, worker as u8, round as u8]);
                    handle.inject(frame(MacAddr::BROADCAST, src));

                    coordinator
                        .detach(DeviceId::virtual_device(number))
                        .unwrap();
                    assert!(handle.is_released());
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(running.coordinator.devices(), vec![DeviceId::physical(0)]);
    running.coordinator.exclusive(|switch| {
        // only addresses learned on the wire can remain
        for (mac, entry) in switch.fdb().entries() {
            assert_eq!(entry.device, DeviceId::physical(0), "{} left behind", mac);
        }
        assert_eq!(switch.registry().len(), 1);
    });
}

#[test]
fn test_switch_sized_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[switch]\nmac_table_capacity = 2\ntable_full_policy = \"evict-oldest\"\n\n[[virtual]]\nsocket = \"/tmp/lswitch-test.sock\""
    )
    .unwrap();

    let cfg = config::load(file.path()).unwrap();
    assert!(!config::validate(&cfg).has_errors());
    assert_eq!(cfg.switch.table_full_policy, TableFullPolicy::EvictOldest);

    let fdb = Fdb::new(cfg.switch.mac_table_capacity, cfg.switch.table_full_policy);
    let (mut switch, _wire) = {
        let mut switch = Switch::new(fdb, cfg.switch.burst_size, Arc::new(MetricsRegistry::new()));
        let (port, wire) = memory_port();
        switch.attach(Device::physical(0, port)).unwrap();
        (switch, wire)
    };
    let (port, v1) = memory_port();
    switch.attach(Device::virtual_device(1, port)).unwrap();

    for src in [AA, BB, CC] {
        v1.inject(frame(MacAddr::BROADCAST, src));
        switch.sweep();
    }

    // AA was the oldest resident and made room for CC
    assert_eq!(switch.lookup(&AA), None);
    assert_eq!(switch.lookup(&BB), Some(DeviceId::virtual_device(1)));
    assert_eq!(switch.lookup(&CC), Some(DeviceId::virtual_device(1)));
    assert_eq!(switch.metrics().macs_evicted.get(), 1);
}
