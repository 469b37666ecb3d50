//! gPTP message types and the common header fields the engine reads.
//!
//! The engine does not interpret message bodies. It only needs the
//! message type (to tell event messages from general ones), the domain
//! number and the sequence id, all of which live in the 34-byte common
//! header defined by IEEE 1588 Section 13.3.

use byteorder::{BigEndian, ByteOrder};

/// Message types below this value are event messages and carry timestamps.
pub const EVENT_MESSAGE_LIMIT: u8 = 8;

/// gPTP message type identifiers (IEEE 802.1AS Table 10-5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PtpMessageType {
    /// Sync message, the timing reference of the master.
    Sync = 0x00,
    /// Delay request (not used by 802.1AS, kept for completeness).
    DelayReq = 0x01,
    /// Peer delay request.
    PdelayReq = 0x02,
    /// Peer delay response.
    PdelayResp = 0x03,
    /// Follow-up, carries the precise origin timestamp of a Sync.
    FollowUp = 0x08,
    /// Delay response.
    DelayResp = 0x09,
    /// Peer delay response follow-up.
    PdelayRespFollowUp = 0x0A,
    /// Announce, carries the grandmaster properties.
    Announce = 0x0B,
    /// Signaling (interval requests, gPTP capable).
    Signaling = 0x0C,
    /// Management.
    Management = 0x0D,
}

impl PtpMessageType {
    /// Parse from the lower 4 bits of a byte.
    ///
    /// Returns `None` for reserved values.
    #[must_use]
    pub fn from_nibble(value: u8) -> Option<Self> {
        match value & 0x0F {
            0x00 => Some(Self::Sync),
            0x01 => Some(Self::DelayReq),
            0x02 => Some(Self::PdelayReq),
            0x03 => Some(Self::PdelayResp),
            0x08 => Some(Self::FollowUp),
            0x09 => Some(Self::DelayResp),
            0x0A => Some(Self::PdelayRespFollowUp),
            0x0B => Some(Self::Announce),
            0x0C => Some(Self::Signaling),
            0x0D => Some(Self::Management),
            _ => None,
        }
    }

    /// Name as written in IEEE 1588.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sync => "Sync",
            Self::DelayReq => "Delay_Req",
            Self::PdelayReq => "Pdelay_Req",
            Self::PdelayResp => "Pdelay_Resp",
            Self::FollowUp => "Follow_Up",
            Self::DelayResp => "Delay_Resp",
            Self::PdelayRespFollowUp => "Pdelay_Resp_Follow_Up",
            Self::Announce => "Announce",
            Self::Signaling => "Signaling",
            Self::Management => "Management",
        }
    }

    /// Whether this message type is an event message (requires timestamping).
    #[must_use]
    pub fn is_event(&self) -> bool {
        is_event_type(*self as u8)
    }
}

impl std::fmt::Display for PtpMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a raw message type value denotes an event message.
#[must_use]
pub fn is_event_type(msgtype: u8) -> bool {
    msgtype < EVENT_MESSAGE_LIMIT
}

/// Human readable name of a raw message type, for logs.
#[must_use]
pub fn msgtype_name(msgtype: u8) -> &'static str {
    PtpMessageType::from_nibble(msgtype).map_or("unknown", |t| t.name())
}

/// The header fields the transport layer cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderFields {
    /// Raw message type (lower nibble of byte 0).
    pub msgtype: u8,
    /// Domain number (byte 4).
    pub domain: u8,
    /// Sequence id (bytes 30..32, big endian).
    pub sequence_id: u16,
}

impl HeaderFields {
    /// Common header size in bytes.
    pub const SIZE: usize = 34;

    const DOMAIN_OFFSET: usize = 4;
    const SEQID_OFFSET: usize = 30;

    /// Read the fields from the start of a PTP message.
    ///
    /// Returns `None` if the slice is shorter than the common header.
    #[must_use]
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            msgtype: data[0] & 0x0F,
            domain: data[Self::DOMAIN_OFFSET],
            sequence_id: BigEndian::read_u16(&data[Self::SEQID_OFFSET..Self::SEQID_OFFSET + 2]),
        })
    }

    /// Write the fields into an existing header, leaving the other bytes alone.
    ///
    /// Returns `false` if `data` is shorter than the common header.
    pub fn encode_into(&self, data: &mut [u8]) -> bool {
        if data.len() < Self::SIZE {
            return false;
        }
        data[0] = (data[0] & 0xF0) | (self.msgtype & 0x0F);
        data[Self::DOMAIN_OFFSET] = self.domain;
        BigEndian::write_u16(
            &mut data[Self::SEQID_OFFSET..Self::SEQID_OFFSET + 2],
            self.sequence_id,
        );
        true
    }

    /// Whether these fields describe an event message.
    #[must_use]
    pub fn is_event(&self) -> bool {
        is_event_type(self.msgtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_classification() {
        assert!(PtpMessageType::Sync.is_event());
        assert!(PtpMessageType::PdelayReq.is_event());
        assert!(PtpMessageType::PdelayResp.is_event());
        assert!(!PtpMessageType::FollowUp.is_event());
        assert!(!PtpMessageType::Announce.is_event());
        assert!(!PtpMessageType::Signaling.is_event());
        assert!(is_event_type(7));
        assert!(!is_event_type(8));
    }

    #[test]
    fn test_from_nibble_ignores_transport_specific() {
        assert_eq!(
            PtpMessageType::from_nibble(0x1B),
            Some(PtpMessageType::Announce)
        );
        assert_eq!(PtpMessageType::from_nibble(0x05), None);
    }

    #[test]
    fn test_msgtype_name() {
        assert_eq!(msgtype_name(0), "Sync");
        assert_eq!(msgtype_name(0x0A), "Pdelay_Resp_Follow_Up");
        assert_eq!(msgtype_name(0x07), "unknown");
        assert_eq!(PtpMessageType::PdelayResp.to_string(), msgtype_name(0x03));
    }

    #[test]
    fn test_header_fields_decode() {
        let mut data = [0u8; 44];
        data[0] = 0x12; // majorSdoId=1, Pdelay_Req
        data[4] = 3;
        data[30] = 0x01;
        data[31] = 0x02;
        let fields = HeaderFields::decode(&data).unwrap();
        assert_eq!(fields.msgtype, 2);
        assert_eq!(fields.domain, 3);
        assert_eq!(fields.sequence_id, 0x0102);
        assert!(fields.is_event());
    }

    #[test]
    fn test_header_fields_too_short() {
        assert!(HeaderFields::decode(&[0u8; 33]).is_none());
        let mut short = [0u8; 10];
        assert!(!HeaderFields::default().encode_into(&mut short));
    }

    #[test]
    fn test_header_fields_encode_keeps_upper_nibble() {
        let mut data = [0u8; 34];
        data[0] = 0x10;
        let fields = HeaderFields {
            msgtype: 0x0B,
            domain: 1,
            sequence_id: 77,
        };
        assert!(fields.encode_into(&mut data));
        assert_eq!(data[0], 0x1B);
        assert_eq!(HeaderFields::decode(&data), Some(fields));
    }
}
