mod device;
mod timestamp;

use std::sync::atomic::{AtomicU16, Ordering};

use crate::protocol::message::HeaderFields;

static NEXT_OVERLAY_PORT: AtomicU16 = AtomicU16::new(41_000);

/// A fresh even overlay port; its odd neighbour is the peer.
pub(super) fn overlay_port_pair() -> u16 {
    NEXT_OVERLAY_PORT.fetch_add(2, Ordering::SeqCst)
}

/// A 44-byte PTP message with the given header fields.
pub(super) fn ptp_message(msgtype: u8, domain: u8, sequence_id: u16) -> Vec<u8> {
    let mut msg = vec![0u8; 44];
    msg[1] = 0x02;
    HeaderFields {
        msgtype,
        domain,
        sequence_id,
    }
    .encode_into(&mut msg);
    msg
}
