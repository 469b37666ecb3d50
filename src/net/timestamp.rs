//! TX/RX timestamp extraction from socket ancillary data.
//!
//! `SO_TIMESTAMPING` delivers three `timespec` values: software, hardware
//! converted to system time, and raw hardware. They are tried in a fixed
//! order (hardware-system, hardware-raw, software) and the first non-zero
//! one wins.

use std::io;
use std::mem;
use std::os::fd::BorrowedFd;

use byteorder::{ByteOrder, NativeEndian};

use super::event::TxTimestamp;
use super::socket::{self, ControlMessage, ReceivedMessage, SCM_TIMESTAMP, SO_TIMESTAMPING};
use crate::error::{NetError, Result};
use crate::protocol::ethernet::{ETH_HLEN, ETH_P_1588, OVERLAY_PREFIX_LEN};
use crate::protocol::message::{HeaderFields, is_event_type};
use crate::time::{timespec_to_ns, timeval_to_ns};

/// Shortest error-queue completion worth looking at.
pub const MIN_TX_COMPLETION_LEN: usize = 48;

/// Which of the kernel timestamps was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSource {
    /// Hardware timestamp converted to system time
    HardwareSystem,
    /// Raw hardware timestamp
    HardwareRaw,
    /// Kernel software timestamp
    Software,
    /// `SO_TIMESTAMP` microsecond timestamp
    Legacy,
}

/// Extraction order: slot in the `SO_TIMESTAMPING` array per source.
const TIMESTAMPING_ORDER: [(TimestampSource, usize); 3] = [
    (TimestampSource::HardwareSystem, 1),
    (TimestampSource::HardwareRaw, 2),
    (TimestampSource::Software, 0),
];

const TIME_T_LEN: usize = mem::size_of::<libc::time_t>();
const TIMESPEC_LEN: usize = mem::size_of::<libc::timespec>();
const TIMEVAL_LEN: usize = mem::size_of::<libc::timeval>();

fn read_ne_int(bytes: &[u8]) -> i64 {
    match bytes.len() {
        8 => NativeEndian::read_i64(bytes),
        4 => i64::from(NativeEndian::read_i32(bytes)),
        _ => 0,
    }
}

#[allow(clippy::cast_possible_truncation, reason = "each field is read at its own width")]
fn read_timespec(bytes: &[u8]) -> libc::timespec {
    libc::timespec {
        tv_sec: read_ne_int(&bytes[..TIME_T_LEN]) as libc::time_t,
        tv_nsec: read_ne_int(&bytes[TIME_T_LEN..TIMESPEC_LEN]) as libc::c_long,
    }
}

#[allow(clippy::cast_possible_truncation, reason = "each field is read at its own width")]
fn read_timeval(bytes: &[u8]) -> libc::timeval {
    libc::timeval {
        tv_sec: read_ne_int(&bytes[..TIME_T_LEN]) as libc::time_t,
        tv_usec: read_ne_int(&bytes[TIME_T_LEN..TIMEVAL_LEN]) as libc::suseconds_t,
    }
}

/// Pick a timestamp out of an `SO_TIMESTAMPING` payload.
///
/// # Errors
///
/// Returns `NetError::MalformedFrame` if the payload is shorter than three
/// `timespec` values.
pub fn from_timestamping(data: &[u8]) -> Result<Option<(TimestampSource, i64)>> {
    if data.len() < TIMESPEC_LEN * 3 {
        return Err(NetError::malformed(format!(
            "short SO_TIMESTAMPING record ({}/{})",
            data.len(),
            TIMESPEC_LEN * 3
        )));
    }
    for (source, slot) in TIMESTAMPING_ORDER {
        let start = slot * TIMESPEC_LEN;
        let ts = read_timespec(&data[start..start + TIMESPEC_LEN]);
        if ts.tv_sec != 0 || ts.tv_nsec != 0 {
            return Ok(Some((source, timespec_to_ns(&ts))));
        }
    }
    Ok(None)
}

/// Read an `SO_TIMESTAMP` (`timeval`) payload.
#[must_use]
pub fn from_timeval(data: &[u8]) -> Option<i64> {
    if data.len() < TIMEVAL_LEN {
        return None;
    }
    Some(timeval_to_ns(&read_timeval(&data[..TIMEVAL_LEN])))
}

/// Timestamp of a TX completion: only `SO_TIMESTAMPING` records count.
///
/// # Errors
///
/// Returns `NetError::MalformedFrame` on a short record.
pub fn tx_timestamp(control: &[ControlMessage]) -> Result<Option<i64>> {
    let mut found = None;
    for cmsg in control {
        if cmsg.level == libc::SOL_SOCKET && cmsg.kind == SO_TIMESTAMPING {
            if let Some((source, ts)) = from_timestamping(&cmsg.data)? {
                tracing::trace!(?source, ts, "TX timestamp");
                found = Some(ts);
            }
        }
    }
    Ok(found)
}

/// Timestamp of a received frame: `SO_TIMESTAMPING` or `SO_TIMESTAMP`.
///
/// # Errors
///
/// Returns `NetError::MalformedFrame` on a short `SO_TIMESTAMPING` record.
pub fn rx_timestamp(control: &[ControlMessage]) -> Result<Option<i64>> {
    let mut found = None;
    for cmsg in control.iter().filter(|c| c.level == libc::SOL_SOCKET) {
        match cmsg.kind {
            SCM_TIMESTAMP => {
                if let Some(ts) = from_timeval(&cmsg.data) {
                    tracing::trace!(source = ?TimestampSource::Legacy, ts, "RX timestamp");
                    found = Some(ts);
                }
            }
            SO_TIMESTAMPING => match from_timestamping(&cmsg.data)? {
                Some((source, ts)) => {
                    tracing::trace!(?source, ts, "RX timestamp");
                    found = Some(ts);
                }
                None => tracing::warn!("RX timestamping record without a timestamp"),
            },
            _ => {}
        }
    }
    Ok(found)
}

/// Decode the looped-back frame of a TX completion.
///
/// Overlay devices get the packet back with its IPv4 and UDP headers in
/// front, which are skipped.
///
/// # Errors
///
/// Returns `NetError::MalformedFrame` if the completion is too short, is not
/// a 1588 frame or is not an event message.
pub fn parse_tx_completion(data: &[u8], overlay: bool) -> Result<HeaderFields> {
    if data.len() < MIN_TX_COMPLETION_LEN {
        return Err(NetError::malformed(format!(
            "TX completion has only {} bytes",
            data.len()
        )));
    }
    let frame = if overlay {
        data.get(OVERLAY_PREFIX_LEN..)
            .ok_or_else(|| NetError::malformed("TX completion shorter than the overlay prefix"))?
    } else {
        data
    };
    if frame.len() < ETH_HLEN + HeaderFields::SIZE {
        return Err(NetError::malformed(format!(
            "TX completion frame has only {} bytes",
            frame.len()
        )));
    }
    let proto = u16::from_be_bytes([frame[12], frame[13]]);
    if proto != ETH_P_1588 {
        return Err(NetError::malformed(format!(
            "not an ETH_P_1588 frame: {proto:#06x}"
        )));
    }
    let fields = HeaderFields::decode(&frame[ETH_HLEN..])
        .ok_or_else(|| NetError::malformed("short PTP header in TX completion"))?;
    if !fields.is_event() {
        return Err(NetError::malformed(format!(
            "message type {} is not an event message",
            fields.msgtype
        )));
    }
    Ok(fields)
}

/// Build a TX timestamp from one error-queue message.
///
/// # Errors
///
/// Returns a frame fault if the completion is unusable or carries no
/// timestamp.
pub fn tx_from_completion(
    data: &[u8],
    msg: &ReceivedMessage,
    overlay: bool,
) -> Result<TxTimestamp> {
    let fields = parse_tx_completion(data, overlay)?;
    let ts = tx_timestamp(&msg.control)?.ok_or(NetError::NoTimestamp {
        msgtype: fields.msgtype,
    })?;
    Ok(TxTimestamp {
        msgtype: fields.msgtype,
        sequence_id: fields.sequence_id,
        domain: fields.domain,
        ts,
    })
}

/// Read one TX completion from the socket error queue without blocking.
///
/// Returns `Ok(None)` when the queue is empty.
///
/// # Errors
///
/// Returns a frame fault for an unusable completion and `NetError::Io` for
/// socket errors.
pub fn capture_tx(fd: BorrowedFd<'_>, buf: &mut [u8], overlay: bool) -> Result<Option<TxTimestamp>> {
    let msg = match socket::recv_msg(fd, buf, libc::MSG_ERRQUEUE | libc::MSG_DONTWAIT) {
        Ok(msg) => msg,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if msg.len == 0 {
        return Err(NetError::malformed("error queue returned 0 bytes"));
    }
    tx_from_completion(&buf[..msg.len], &msg, overlay).map(Some)
}

/// Check a received frame and pick its timestamp.
///
/// Returns `(header fields, timestamp)`; general messages have no
/// timestamp.
///
/// # Errors
///
/// Returns a frame fault for truncated frames or an event message without
/// a timestamp.
pub fn capture_rx(frame: &[u8], msg: &ReceivedMessage) -> Result<(HeaderFields, Option<i64>)> {
    if msg.is_truncated() {
        return Err(NetError::malformed("received truncated message"));
    }
    if msg.is_control_truncated() {
        return Err(NetError::malformed("received truncated ancillary data"));
    }
    let fields = frame
        .get(ETH_HLEN..)
        .and_then(HeaderFields::decode)
        .ok_or_else(|| NetError::malformed(format!("frame has only {} bytes", frame.len())))?;
    if !is_event_type(fields.msgtype) {
        return Ok((fields, None));
    }
    match rx_timestamp(&msg.control)? {
        Some(ts) => Ok((fields, Some(ts))),
        None => Err(NetError::NoTimestamp {
            msgtype: fields.msgtype,
        }),
    }
}
