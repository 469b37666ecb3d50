use super::ManualHost;
use crate::clock::{ClockHandle, ClockTable, VIRTUAL_CLOCK_HANDLE_BASE};
use crate::error::NetError;

#[test]
fn test_virtual_names_dispatch_to_virtual_table() {
    let host = ManualHost::at(1_000);
    let mut table = ClockTable::with_host(host.clone(), 0);

    let h = table.open("cbptpw0").unwrap();
    assert_eq!(h, ClockHandle::Virtual(VIRTUAL_CLOCK_HANDLE_BASE));
    assert!(h.is_virtual());
    assert_eq!(table.virtuals().len(), 1);
    assert_eq!(table.hardware_count(), 0);

    assert_eq!(table.read(h).unwrap(), 1_000);
    table.adjust_frequency(h, 1_000_000).unwrap();
    host.advance(1_000_000_000);
    assert_eq!(table.read(h).unwrap(), 1_000 + 1_001_000_000);

    table.write(h, 5).unwrap();
    assert_eq!(table.read(h).unwrap(), 5);
    table.close(h).unwrap();
    assert!(table.virtuals().is_empty());
}

#[test]
fn test_base_rate_reaches_virtual_clocks() {
    let host = ManualHost::at(0);
    let mut table = ClockTable::with_host(host.clone(), -200);
    let h = table.open("cbptp3").unwrap();
    table.read(h).unwrap();
    host.advance(1_000_000_000);
    assert_eq!(table.read(h).unwrap(), 999_999_800);
}

#[test]
fn test_read_only_virtual_rejects_adjustment() {
    let mut table = ClockTable::with_host(ManualHost::at(0), 0);
    let h = table.open("cbptp0").unwrap();
    assert!(matches!(
        table.adjust_frequency(h, 10),
        Err(NetError::Clock { .. })
    ));
    assert!(table.write(h, 10).is_err());
}

#[test]
fn test_unknown_handles_fail() {
    let mut table = ClockTable::default();
    assert!(table.read(ClockHandle::Hardware(999)).is_err());
    assert!(table.read(ClockHandle::Virtual(VIRTUAL_CLOCK_HANDLE_BASE)).is_err());
    assert!(table.close(ClockHandle::Hardware(999)).is_err());
}

#[test]
fn test_missing_phc_fails_to_open() {
    let mut table = ClockTable::default();
    assert!(table.open("/dev/ptp-not-here").is_err());
    assert_eq!(table.hardware_count(), 0);
}

#[test]
fn test_handle_display() {
    assert_eq!(ClockHandle::Hardware(7).to_string(), "phc:7");
    assert_eq!(ClockHandle::Virtual(3018).to_string(), "virtual:3018");
    assert_eq!(ClockHandle::Virtual(3018).raw(), 3018);
}
