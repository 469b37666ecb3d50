//! Network transport and timestamping.
//!
//! One socket per interface: an `AF_PACKET` socket on ether-type 0x88F7,
//! or for overlay (`cbeth`) devices a UDP socket pair on 127.0.0.1. Frames
//! go out through a per-device [`SendPacer`]; TX timestamps come back on
//! the socket error queue and are delivered as [`NetEvent::TxTimestamp`].
//! Link changes arrive over rtnetlink.

pub mod device;
pub mod engine;
pub mod event;
pub mod netlink;
pub mod pacer;
pub mod schedule;
pub mod socket;
pub mod timestamp;

#[cfg(test)]
mod tests;

pub use device::{ClockPathResolver, Device, ReadStatus, SysfsResolver};
pub use engine::{Engine, EventHandler, IpcVerdict, Transport};
pub use event::{Duplex, EventKind, LinkState, NetEvent, RecvFrame, TxTimestamp};
pub use netlink::{LinkMonitor, LinkQuery};
pub use pacer::{PacerState, SendPacer};
pub use schedule::{Deadline, Wait};
pub use socket::TimestampMode;
