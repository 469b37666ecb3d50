use std::fs;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{SocketAddr as UnixSocketAddr, UnixDatagram};
use std::path::{Path, PathBuf};

use super::{ClientSet, IpcAddr};
use crate::error::{NetError, Result};
use crate::types::NetConfig;

#[derive(Debug)]
enum ServerSocket {
    Unix { socket: UnixDatagram, node: PathBuf },
    Udp(UdpSocket),
}

/// IPC server socket plus its registered clients.
#[derive(Debug)]
pub struct IpcServer {
    socket: ServerSocket,
    clients: ClientSet,
}

fn unix_addr(addr: &UnixSocketAddr) -> IpcAddr {
    addr.as_pathname()
        .map_or(IpcAddr::Unnamed, |p| IpcAddr::Unix(p.to_path_buf()))
}

impl IpcServer {
    /// Bind the transport selected by `config`: UDP when `ipc_udp_port` is
    /// set, else a Unix node at `ipc_node`.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Ipc` if the socket can't be bound.
    pub fn from_config(config: &NetConfig) -> Result<Self> {
        if config.ipc_udp_port != 0 {
            Self::bind_udp(config.ipc_udp_port, config.max_ipc_clients)
        } else {
            Self::bind_unix(&config.ipc_node, config.max_ipc_clients)
        }
    }

    /// Bind a Unix datagram socket at `node`, replacing a stale node.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Ipc` if the node can't be bound.
    pub fn bind_unix(node: impl AsRef<Path>, max_clients: usize) -> Result<Self> {
        let node = node.as_ref().to_path_buf();
        match fs::remove_file(&node) {
            Ok(()) => tracing::debug!(node = %node.display(), "removed stale IPC node"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(node = %node.display(), error = %e, "can't remove IPC node"),
        }
        let socket = UnixDatagram::bind(&node).map_err(|e| {
            NetError::ipc(format!("bind to {}", node.display()), Some(e))
        })?;
        socket
            .set_nonblocking(true)
            .map_err(|e| NetError::ipc("set_nonblocking", Some(e)))?;
        if let Err(e) = fs::set_permissions(&node, fs::Permissions::from_mode(0o777)) {
            tracing::warn!(node = %node.display(), error = %e, "chmod of IPC node failed");
        }
        tracing::info!(node = %node.display(), "IPC server listening");
        Ok(Self {
            socket: ServerSocket::Unix { socket, node },
            clients: ClientSet::new(max_clients),
        })
    }

    /// Bind a UDP socket on all addresses at `port` (0 picks a free port).
    ///
    /// # Errors
    ///
    /// Returns `NetError::Ipc` if the port can't be bound.
    pub fn bind_udp(port: u16, max_clients: usize) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
            .map_err(|e| NetError::ipc(format!("bind to UDP port {port}"), Some(e)))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| NetError::ipc("set_nonblocking", Some(e)))?;
        tracing::info!(port, "IPC server listening on UDP");
        Ok(Self {
            socket: ServerSocket::Udp(socket),
            clients: ClientSet::new(max_clients),
        })
    }

    /// Path of the Unix node, if this is a Unix server.
    #[must_use]
    pub fn node(&self) -> Option<&Path> {
        match &self.socket {
            ServerSocket::Unix { node, .. } => Some(node),
            ServerSocket::Udp(_) => None,
        }
    }

    /// Bound UDP address, if this is a UDP server.
    #[must_use]
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        match &self.socket {
            ServerSocket::Udp(socket) => socket.local_addr().ok(),
            ServerSocket::Unix { .. } => None,
        }
    }

    /// Registered clients.
    #[must_use]
    pub fn clients(&self) -> &ClientSet {
        &self.clients
    }

    /// Read one datagram and register its sender.
    ///
    /// Returns `Ok(None)` when nothing is queued.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Ipc` on a receive error.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, IpcAddr)>> {
        let received = match &self.socket {
            ServerSocket::Unix { socket, .. } => {
                socket.recv_from(buf).map(|(n, addr)| (n, unix_addr(&addr)))
            }
            ServerSocket::Udp(socket) => socket.recv_from(buf).map(|(n, addr)| (n, IpcAddr::Udp(addr))),
        };
        let (len, from) = match received {
            Ok(r) => r,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(NetError::ipc("recvfrom", Some(e))),
        };
        if from.is_addressable() {
            if !self.clients.contains(&from) {
                tracing::info!(client = %from, "new IPC client");
            }
            if let Some(evicted) = self.clients.register(from.clone()) {
                tracing::warn!(client = %evicted, "too many IPC clients, evicting the oldest");
            }
        } else {
            tracing::debug!("IPC datagram from an unnamed socket");
        }
        Ok(Some((len, from)))
    }

    fn send_to(&self, data: &[u8], addr: &IpcAddr) -> io::Result<usize> {
        match (&self.socket, addr) {
            (ServerSocket::Unix { socket, .. }, IpcAddr::Unix(path)) => socket.send_to(data, path),
            (ServerSocket::Udp(socket), IpcAddr::Udp(sa)) => socket.send_to(data, sa),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("address {addr} doesn't match the IPC transport"),
            )),
        }
    }

    /// Send `data` to every client; clients that fail are removed.
    ///
    /// Returns the number of clients reached.
    pub fn notify(&mut self, data: &[u8]) -> usize {
        let mut failed = Vec::new();
        let mut delivered = 0;
        for addr in self.clients.iter() {
            match self.send_to(data, addr) {
                Ok(_) => delivered += 1,
                Err(e) => {
                    tracing::info!(client = %addr, error = %e, "IPC client gone, removing");
                    failed.push(addr.clone());
                }
            }
        }
        for addr in &failed {
            self.clients.remove(addr);
        }
        delivered
    }

    /// Send `data` to one address.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Ipc` if the datagram can't be sent.
    pub fn respond(&self, addr: &IpcAddr, data: &[u8]) -> Result<()> {
        self.send_to(data, addr)
            .map(|_| ())
            .map_err(|e| NetError::ipc(format!("send to {addr}"), Some(e)))
    }

    /// Forget a client; returns whether it was registered.
    pub fn remove(&mut self, addr: &IpcAddr) -> bool {
        let removed = self.clients.remove(addr);
        if removed {
            tracing::info!(client = %addr, "IPC client removed");
        }
        removed
    }
}

impl AsFd for IpcServer {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match &self.socket {
            ServerSocket::Unix { socket, .. } => socket.as_fd(),
            ServerSocket::Udp(socket) => socket.as_fd(),
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if let ServerSocket::Unix { node, .. } = &self.socket {
            if let Err(e) = fs::remove_file(node) {
                tracing::warn!(node = %node.display(), error = %e, "can't unlink IPC node");
            }
        }
    }
}
