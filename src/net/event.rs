//! Events delivered to the protocol layer.

use bytes::Bytes;

/// Link duplex mode as reported by ethtool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Duplex {
    /// Not known (link down or not reported)
    #[default]
    Unknown = 0,
    /// Full duplex
    Full = 1,
    /// Half duplex
    Half = 2,
}

/// Snapshot of a device's link.
///
/// Two snapshots are equal only if every field is equal; the engine
/// reports a link event only when the snapshot changes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkState {
    /// Carrier is up
    pub up: bool,
    /// Link speed in Mbps, 0 if unknown
    pub speed: u32,
    /// Duplex mode
    pub duplex: Duplex,
    /// Interface name
    pub devname: String,
    /// Path of the PTP clock serving this interface
    pub ptpdev: String,
    /// Port identity derived from the MAC address
    pub port_id: [u8; 8],
}

/// A TX completion: the timestamp of a frame we sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxTimestamp {
    /// PTP message type
    pub msgtype: u8,
    /// Sequence id of the sent message
    pub sequence_id: u16,
    /// Domain number of the sent message
    pub domain: u8,
    /// Transmit time in nanoseconds
    pub ts: i64,
}

/// A received PTP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecvFrame {
    /// The PTP message, starting at the common header
    pub payload: Bytes,
    /// PTP message type
    pub msgtype: u8,
    /// Domain number
    pub domain: u8,
    /// Receive time in nanoseconds; only event messages carry one
    pub ts: Option<i64>,
}

/// Event kinds, for logs and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Periodic or extra timeout
    Timeout,
    /// Link came up
    DevUp,
    /// Link went down
    DevDown,
    /// TX timestamp retrieved
    TxTimestamp,
    /// Frame received
    Recv,
}

/// An event delivered through [`EventHandler`](super::EventHandler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    /// The loop deadline expired (port index 0)
    Timeout,
    /// The link of a device came up
    DevUp(LinkState),
    /// The link of a device went down
    DevDown(LinkState),
    /// A TX timestamp was retrieved from the error queue
    TxTimestamp(TxTimestamp),
    /// A PTP message was received
    Recv(RecvFrame),
}

impl NetEvent {
    /// The kind of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Timeout => EventKind::Timeout,
            Self::DevUp(_) => EventKind::DevUp,
            Self::DevDown(_) => EventKind::DevDown,
            Self::TxTimestamp(_) => EventKind::TxTimestamp,
            Self::Recv(_) => EventKind::Recv,
        }
    }

    /// Link up/down event for a snapshot.
    #[must_use]
    pub fn link(state: LinkState) -> Self {
        if state.up {
            Self::DevUp(state)
        } else {
            Self::DevDown(state)
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Timeout => "TIMEOUT",
            Self::DevUp => "DEVUP",
            Self::DevDown => "DEVDOWN",
            Self::TxTimestamp => "TXTS",
            Self::Recv => "RECV",
        };
        f.write_str(name)
    }
}
