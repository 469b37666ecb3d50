//! gPTP framing: the parts of the wire format the transport engine reads.
//!
//! The engine only ever looks at the Ethernet header and the first 34
//! bytes of a PTP message. Message bodies are handed to the protocol
//! state machines untouched.
//!
//! ## Event vs general messages
//!
//! - **Event** (type < 8): Sync, `Pdelay_Req`, `Pdelay_Resp`; these require
//!   TX/RX timestamps.
//! - **General** (type >= 8): `Follow_Up`, `Pdelay_Resp_Follow_Up`,
//!   Announce, Signaling; no timestamp needed.

pub mod ethernet;
pub mod message;

pub use ethernet::{
    ETH_HLEN, ETH_P_1588, EthHeader, GPTP_FRAME_SIZE, GPTP_MAX_PACKET_SIZE,
    GPTP_MULTICAST_DEST_ADDR,
};
pub use message::{EVENT_MESSAGE_LIMIT, HeaderFields, PtpMessageType, is_event_type};
