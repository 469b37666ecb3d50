use super::ptp_message;
use crate::error::NetError;
use crate::net::socket::{ControlMessage, ReceivedMessage, SCM_TIMESTAMP, SO_TIMESTAMPING};
use crate::net::timestamp::{
    TimestampSource, capture_rx, from_timestamping, from_timeval, parse_tx_completion,
    rx_timestamp, tx_from_completion, tx_timestamp,
};
use crate::protocol::ethernet::{ETH_P_1588, EthHeader, OVERLAY_PREFIX_LEN};

fn timespec(sec: i64, nsec: i64) -> Vec<u8> {
    let mut out = (sec as libc::time_t).to_ne_bytes().to_vec();
    out.extend_from_slice(&(nsec as libc::c_long).to_ne_bytes());
    out
}

fn timestamping(sw: (i64, i64), hw_sys: (i64, i64), hw_raw: (i64, i64)) -> ControlMessage {
    let mut data = timespec(sw.0, sw.1);
    data.extend(timespec(hw_sys.0, hw_sys.1));
    data.extend(timespec(hw_raw.0, hw_raw.1));
    ControlMessage {
        level: libc::SOL_SOCKET,
        kind: SO_TIMESTAMPING,
        data,
    }
}

fn timeval(sec: i64, usec: i64) -> ControlMessage {
    let mut data = (sec as libc::time_t).to_ne_bytes().to_vec();
    data.extend_from_slice(&(usec as libc::suseconds_t).to_ne_bytes());
    ControlMessage {
        level: libc::SOL_SOCKET,
        kind: SCM_TIMESTAMP,
        data,
    }
}

fn frame(msgtype: u8, seq: u16) -> Vec<u8> {
    let mut out = EthHeader::gptp([2, 0, 0, 0, 0, 1]).encode().to_vec();
    out.extend(ptp_message(msgtype, 0, seq));
    out
}

fn message(control: Vec<ControlMessage>, len: usize) -> ReceivedMessage {
    ReceivedMessage {
        len,
        flags: 0,
        control,
    }
}

// ===== Extractor order =====

#[test]
fn test_hardware_system_preferred() {
    let cmsg = timestamping((1, 1), (2, 2), (3, 3));
    assert_eq!(
        from_timestamping(&cmsg.data).unwrap(),
        Some((TimestampSource::HardwareSystem, 2_000_000_002))
    );
}

#[test]
fn test_hardware_raw_before_software() {
    let cmsg = timestamping((1, 1), (0, 0), (3, 3));
    assert_eq!(
        from_timestamping(&cmsg.data).unwrap(),
        Some((TimestampSource::HardwareRaw, 3_000_000_003))
    );
}

#[test]
fn test_software_fallback() {
    let cmsg = timestamping((5, 500), (0, 0), (0, 0));
    assert_eq!(
        from_timestamping(&cmsg.data).unwrap(),
        Some((TimestampSource::Software, 5_000_000_500))
    );
}

#[test]
fn test_nanoseconds_alone_count_as_set() {
    let cmsg = timestamping((0, 0), (0, 0), (0, 7));
    assert_eq!(
        from_timestamping(&cmsg.data).unwrap(),
        Some((TimestampSource::HardwareRaw, 7))
    );
}

#[test]
fn test_all_zero_is_none() {
    let cmsg = timestamping((0, 0), (0, 0), (0, 0));
    assert_eq!(from_timestamping(&cmsg.data).unwrap(), None);
    assert_eq!(tx_timestamp(&[cmsg]).unwrap(), None);
}

#[test]
fn test_short_record_is_malformed() {
    let cmsg = timestamping((1, 0), (0, 0), (0, 0));
    let short = &cmsg.data[..cmsg.data.len() - 1];
    assert!(matches!(
        from_timestamping(short),
        Err(NetError::MalformedFrame { .. })
    ));
}

#[test]
fn test_timeval() {
    assert_eq!(from_timeval(&timeval(3, 250).data), Some(3_000_250_000));
    assert_eq!(from_timeval(&[0u8; 3]), None);
}

#[test]
fn test_tx_ignores_other_records() {
    let other = ControlMessage {
        level: libc::IPPROTO_IP,
        kind: SO_TIMESTAMPING,
        data: timestamping((9, 9), (0, 0), (0, 0)).data,
    };
    assert_eq!(tx_timestamp(&[other, timeval(1, 1)]).unwrap(), None);
}

#[test]
fn test_rx_accepts_timeval() {
    assert_eq!(rx_timestamp(&[timeval(1, 2)]).unwrap(), Some(1_000_002_000));
    assert_eq!(
        rx_timestamp(&[timestamping((4, 0), (0, 0), (0, 0))]).unwrap(),
        Some(4_000_000_000)
    );
}

// ===== TX completions =====

#[test]
fn test_tx_completion_fields() {
    let data = frame(0, 77);
    let fields = parse_tx_completion(&data, false).unwrap();
    assert_eq!(fields.msgtype, 0);
    assert_eq!(fields.sequence_id, 77);

    let ts = tx_from_completion(
        &data,
        &message(vec![timestamping((1, 5), (0, 0), (0, 0))], data.len()),
        false,
    )
    .unwrap();
    assert_eq!(ts.sequence_id, 77);
    assert_eq!(ts.ts, 1_000_000_005);
}

#[test]
fn test_tx_completion_overlay_prefix_skipped() {
    let mut data = vec![0u8; OVERLAY_PREFIX_LEN];
    data.extend(frame(2, 9));
    let fields = parse_tx_completion(&data, true).unwrap();
    assert_eq!(fields.msgtype, 2);
    assert_eq!(fields.sequence_id, 9);
    // without the overlay flag the prefix is read as the frame
    assert!(parse_tx_completion(&data, false).is_err());
}

#[test]
fn test_tx_completion_too_short() {
    let data = frame(0, 1);
    assert!(parse_tx_completion(&data[..47], false).is_err());
}

#[test]
fn test_tx_completion_wrong_ether_type() {
    let mut data = frame(0, 1);
    data[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
    let err = parse_tx_completion(&data, false).unwrap_err();
    assert!(err.is_frame_fault());
    data[12..14].copy_from_slice(&ETH_P_1588.to_be_bytes());
    assert!(parse_tx_completion(&data, false).is_ok());
}

#[test]
fn test_tx_completion_general_message_rejected() {
    for msgtype in [8, 0x0B] {
        assert!(parse_tx_completion(&frame(msgtype, 1), false).is_err());
    }
}

#[test]
fn test_tx_completion_without_timestamp() {
    let data = frame(3, 1);
    let err = tx_from_completion(&data, &message(Vec::new(), data.len()), false).unwrap_err();
    assert!(matches!(err, NetError::NoTimestamp { msgtype: 3 }));
}

// ===== RX =====

#[test]
fn test_rx_event_message_takes_timestamp() {
    let data = frame(0, 5);
    let msg = message(vec![timestamping((2, 0), (0, 0), (0, 0))], data.len());
    let (fields, ts) = capture_rx(&data, &msg).unwrap();
    assert_eq!(fields.sequence_id, 5);
    assert_eq!(ts, Some(2_000_000_000));
}

#[test]
fn test_rx_general_message_needs_no_timestamp() {
    let data = frame(0x0B, 5);
    let (fields, ts) = capture_rx(&data, &message(Vec::new(), data.len())).unwrap();
    assert_eq!(fields.msgtype, 0x0B);
    assert_eq!(ts, None);
}

#[test]
fn test_rx_event_without_timestamp_fails() {
    let data = frame(2, 5);
    let err = capture_rx(&data, &message(Vec::new(), data.len())).unwrap_err();
    assert!(matches!(err, NetError::NoTimestamp { msgtype: 2 }));
}

#[test]
fn test_rx_truncation_rejected() {
    let data = frame(0x0B, 5);
    let mut msg = message(Vec::new(), data.len());
    msg.flags = libc::MSG_TRUNC;
    assert!(capture_rx(&data, &msg).is_err());
    msg.flags = libc::MSG_CTRUNC;
    assert!(capture_rx(&data, &msg).is_err());
}

#[test]
fn test_rx_short_frame_rejected() {
    let data = frame(0x0B, 5);
    assert!(capture_rx(&data[..20], &message(Vec::new(), 20)).is_err());
}
