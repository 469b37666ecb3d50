//! # gptpnet
//!
//! Network transport and timestamping engine for a gPTP (IEEE 802.1AS)
//! daemon on Linux.
//!
//! ## Features
//!
//! - Raw `AF_PACKET` sockets on ether-type 0x88F7, with hardware or
//!   software TX/RX timestamps
//! - Overlay (`cbeth`) devices carried over UDP on the loopback interface
//! - Per-device send pacing: after-send guard time and TX timestamp wait
//! - Link state tracking over rtnetlink
//! - PTP hardware clocks and virtual clocks behind one handle type
//! - Datagram IPC side channel to local tools
//!
//! ## Example
//!
//! ```rust,no_run
//! use gptpnet::prelude::*;
//!
//! struct Printer;
//!
//! impl EventHandler for Printer {
//!     fn on_event(
//!         &mut self,
//!         _transport: &mut Transport,
//!         port_index: usize,
//!         event: &NetEvent,
//!         event_ts: i64,
//!     ) -> gptpnet::Result<()> {
//!         println!("port {port_index}: {} at {event_ts}", event.kind());
//!         Ok(())
//!     }
//! }
//!
//! # fn example() -> gptpnet::Result<()> {
//! let mut engine = Engine::open(&["eth0"], NetConfig::default(), Printer)?;
//! engine.activate()?;
//! loop {
//!     engine.run_once()?;
//! }
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Engine**: `Engine` owns a `Transport` and an `EventHandler`, and
//!   drives a single-threaded poll loop
//! - **Transport**: devices, clocks, deadline and IPC, handed to the
//!   handler on every callback
//! - **Low-level**: `net::socket`, `net::timestamp`, `net::netlink` and
//!   `clock` modules

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
/// Clocks
pub mod clock;
/// Error types
pub mod error;
/// IPC side channel
pub mod ipc;
/// Network transport
pub mod net;
/// gPTP framing
pub mod protocol;
/// Time helpers
pub mod time;
/// Core types
pub mod types;

// Re-exports
pub use clock::{ClockHandle, ClockTable};
pub use error::{DeferReason, NetError, Result};
pub use ipc::{IpcAddr, IpcClient, IpcServer};
pub use net::{
    ClockPathResolver, Engine, EventHandler, EventKind, IpcVerdict, LinkState, NetEvent,
    RecvFrame, Transport, TxTimestamp,
};
pub use types::{NetConfig, NetConfigBuilder};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for common imports
///
/// Convenient re-exports
pub mod prelude {
    pub use crate::{
        ClockHandle, Engine, EventHandler, EventKind, IpcAddr, IpcVerdict, LinkState, NetConfig,
        NetError, NetEvent, RecvFrame, Transport, TxTimestamp,
    };
}
