use std::fs;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use super::{overlay_port_pair, ptp_message};
use crate::error::{DeferReason, NetError};
use crate::net::device::{
    ClockPathResolver, Device, ReadStatus, SysfsResolver, inherit_clock_path, pick_clock_device,
};
use crate::net::event::NetEvent;
use crate::net::socket::{OVERLAY_MTU, TimestampMode, poll_readable};
use crate::protocol::ethernet::{ETH_HLEN, GPTP_FRAME_SIZE};
use crate::time::monotonic_ns;
use crate::types::NetConfig;

// ===== Clock path resolution =====

#[test]
fn test_sysfs_resolver_virtual_devices() {
    let resolver = SysfsResolver::default();
    assert_eq!(resolver.resolve("cbeth3").as_deref(), Some("cbptp3"));
}

#[test]
fn test_sysfs_resolver_reads_first_ptp_directory() {
    let root = TempDir::new().unwrap();
    let ptp = root.path().join("eth9/device/ptp");
    fs::create_dir_all(ptp.join("ptp3")).unwrap();
    fs::write(ptp.join("aaa_not_a_dir"), b"").unwrap();
    let resolver = SysfsResolver::with_root(root.path());
    assert_eq!(resolver.resolve("eth9").as_deref(), Some("/dev/ptp3"));
    assert_eq!(resolver.resolve("eth10"), None);
}

#[test]
fn test_closure_resolver() {
    let resolver = |name: &str| (name == "eth1").then(|| "/dev/ptp1".to_string());
    assert_eq!(resolver.resolve("eth1").as_deref(), Some("/dev/ptp1"));
    assert_eq!(resolver.resolve("eth0"), None);
}

#[test]
fn test_pick_first_clock_device() {
    assert_eq!(pick_clock_device([None, Some("/dev/ptp1"), Some("/dev/ptp2")], None), Some(1));
    assert_eq!(pick_clock_device([None, None], None), None);
}

#[test]
fn test_pick_master_clock_device() {
    let paths = [Some("/dev/ptp0"), Some("/dev/ptp1")];
    assert_eq!(pick_clock_device(paths, Some("/dev/ptp1")), Some(1));
    assert_eq!(pick_clock_device(paths, Some("/dev/ptp9")), Some(0));
}

// ===== Overlay devices =====

fn overlay_pair() -> (Device, Device) {
    let port = overlay_port_pair();
    let config = NetConfig::default();
    let resolver = SysfsResolver::default();
    let a = Device::open("cbeth0", Some(port), &resolver, &config);
    let b = Device::open("cbeth1", Some(port + 1), &resolver, &config);
    assert!(a.is_open() && b.is_open());
    (a, b)
}

/// Read `device` until `want` events arrived or a second passed.
fn collect_events(device: &mut Device, want: usize) -> Vec<NetEvent> {
    let mut buf = vec![0u8; GPTP_FRAME_SIZE];
    let mut events = Vec::new();
    let start = Instant::now();
    while events.len() < want && start.elapsed() < Duration::from_secs(1) {
        let fd = device.socket().unwrap();
        if !poll_readable(&[fd], 50_000_000).unwrap()[0] {
            continue;
        }
        loop {
            match device.read(&mut buf, &mut events, &mut || 0) {
                Ok(ReadStatus::Data) => {}
                Ok(_) => break,
                Err(e) => panic!("read failed: {e}"),
            }
        }
    }
    events
}

fn load(device: &mut Device, msgtype: u8, seq: u16) -> usize {
    let msg = ptp_message(msgtype, 0, seq);
    device.payload_mut()[..msg.len()].copy_from_slice(&msg);
    msg.len()
}

#[test]
fn test_overlay_device_identity() {
    let (a, b) = overlay_pair();
    assert_eq!(a.mac(), [0x02, 0x01, 0x45, 0x10, 0x00, 0x30]);
    assert_eq!(a.link().port_id, [0x02, 0x01, 0x45, 0xFF, 0xFE, 0x10, 0x00, 0x30]);
    assert_eq!(a.mtu(), OVERLAY_MTU);
    assert_eq!(a.timestamp_mode(), Some(TimestampMode::Software));
    assert_eq!(a.link().ptpdev, "cbptp0");
    assert!(a.has_clock());
    assert_eq!(b.overlay_port(), a.overlay_port().map(|p| p + 1));
}

#[test]
fn test_overlay_activation_starts_down() {
    let (mut a, _b) = overlay_pair();
    assert!(a.activate().is_none());
    assert!(!a.link().up);
}

#[test]
fn test_overlay_exchange() {
    let (mut a, mut b) = overlay_pair();
    let mut side = Vec::new();

    let len = load(&mut a, 0, 42);
    assert_eq!(a.send(0, monotonic_ns(), len, &mut side).unwrap(), ETH_HLEN + len);
    assert!(side.is_empty());

    let events = collect_events(&mut b, 2);
    assert!(matches!(&events[0], NetEvent::DevUp(s) if s.devname == "cbeth1"));
    match &events[1] {
        NetEvent::Recv(frame) => {
            assert_eq!(frame.msgtype, 0);
            assert_eq!(frame.payload.len(), len);
            assert_eq!(&frame.payload[30..32], &42u16.to_be_bytes());
            assert!(frame.ts.is_some());
        }
        other => panic!("expected RECV, got {other:?}"),
    }
    assert!(b.link().up);

    let events = collect_events(&mut a, 1);
    match &events[0] {
        NetEvent::TxTimestamp(ts) => {
            assert_eq!(ts.msgtype, 0);
            assert_eq!(ts.sequence_id, 42);
            assert!(ts.ts > 0);
        }
        other => panic!("expected TXTS, got {other:?}"),
    }
    assert_eq!(a.pacer().awaiting_deadline(), None);
}

#[test]
fn test_second_event_deferred_until_timestamp() {
    let (mut a, _b) = overlay_pair();
    let mut side = Vec::new();
    let now = monotonic_ns();
    let len = load(&mut a, 2, 1);
    a.send(0, now, len, &mut side).unwrap();

    let len = load(&mut a, 2, 2);
    let err = a.send(0, now + 1_000_000, len, &mut side).unwrap_err();
    assert!(matches!(
        err,
        NetError::SendDeferred {
            reason: DeferReason::AwaitingTxTimestamp,
            ..
        }
    ));

    let len = load(&mut a, 0x0B, 3);
    let err = a.send(0, now + 1, len, &mut side).unwrap_err();
    assert!(matches!(
        err,
        NetError::SendDeferred {
            reason: DeferReason::GuardTime,
            ..
        }
    ));
    assert!(err.is_deferral());
}

#[test]
fn test_oversized_frame_rejected() {
    let (mut a, _b) = overlay_pair();
    let err = a.send(0, monotonic_ns(), 1501, &mut Vec::new()).unwrap_err();
    assert!(matches!(err, NetError::FrameTooLarge { length: 1501, max: 1500 }));
}

#[test]
fn test_unopenable_device_stays_closed() {
    let config = NetConfig::default();
    let mut device = Device::open("nosuchdev0", None, &SysfsResolver::default(), &config);
    assert!(!device.is_open());
    assert!(!device.has_clock());
    assert!(device.activate().is_none());
    let mut buf = vec![0u8; GPTP_FRAME_SIZE];
    assert_eq!(
        device.read(&mut buf, &mut Vec::new(), &mut || 0).unwrap(),
        ReadStatus::Empty
    );
}

#[test]
fn test_clock_path_inheritance() {
    let port = overlay_port_pair();
    let config = NetConfig::default();
    let only_first = |name: &str| (name == "cbeth0").then(|| "cbptp0".to_string());
    let mut devices = vec![
        Device::open("cbeth0", Some(port), &only_first, &config),
        Device::open("cbeth1", Some(port + 1), &only_first, &config),
    ];
    assert!(!devices[1].has_clock());
    inherit_clock_path(&mut devices);
    assert_eq!(devices[1].link().ptpdev, "cbptp0");
}
