//! Datagram side channel to local tools.
//!
//! The server fans engine notifications out to every client that has sent
//! it a datagram. Clients are kept in a bounded set; when it is full the
//! oldest registration is evicted. The transport is either a Unix datagram
//! socket at a filesystem node or a UDP port, never both.

mod client;
mod server;


use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

pub use client::IpcClient;
pub use server::IpcServer;

/// Largest datagram the bridge moves.
pub const IPC_MAX_DATAGRAM: usize = 1500;

/// Address of an IPC peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IpcAddr {
    /// Unix datagram socket bound to a path
    Unix(PathBuf),
    /// UDP endpoint
    Udp(SocketAddr),
    /// Unix socket without a name; it can't be answered
    Unnamed,
}

impl IpcAddr {
    /// Whether replies can be addressed to this peer.
    #[must_use]
    pub fn is_addressable(&self) -> bool {
        !matches!(self, Self::Unnamed)
    }
}

impl fmt::Display for IpcAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "{}", path.display()),
            Self::Udp(addr) => write!(f, "{addr}"),
            Self::Unnamed => write!(f, "(unnamed)"),
        }
    }
}

/// Insertion-ordered, bounded set of client addresses.
#[derive(Debug, Clone)]
pub struct ClientSet {
    capacity: usize,
    clients: VecDeque<IpcAddr>,
}

impl ClientSet {
    /// Create an empty set holding at most `capacity` clients.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            clients: VecDeque::with_capacity(capacity),
        }
    }

    /// Register `addr`.
    ///
    /// Registering a known address changes nothing. Registering into a full
    /// set evicts and returns the earliest registration.
    pub fn register(&mut self, addr: IpcAddr) -> Option<IpcAddr> {
        if self.contains(&addr) {
            return None;
        }
        let evicted = if self.clients.len() >= self.capacity {
            self.clients.pop_front()
        } else {
            None
        };
        self.clients.push_back(addr);
        evicted
    }

    /// Remove `addr`; returns whether it was registered.
    pub fn remove(&mut self, addr: &IpcAddr) -> bool {
        match self.clients.iter().position(|a| a == addr) {
            Some(pos) => {
                self.clients.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Whether `addr` is registered.
    #[must_use]
    pub fn contains(&self, addr: &IpcAddr) -> bool {
        self.clients.contains(addr)
    }

    /// Registered addresses, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &IpcAddr> {
        self.clients.iter()
    }

    /// Number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Maximum number of clients.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
