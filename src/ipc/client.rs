use std::fs;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{NetError, Result};

#[derive(Debug)]
enum ClientSocket {
    Unix { socket: UnixDatagram, node: PathBuf },
    Udp(UdpSocket),
}

/// Client end of the IPC channel.
///
/// A Unix client binds its own node (removed on drop) so the server can
/// answer it, and connects to the server node.
#[derive(Debug)]
pub struct IpcClient {
    socket: ClientSocket,
}

impl IpcClient {
    /// Bind `own_node` and connect to the server at `server_node`.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Ipc` if binding or connecting fails.
    pub fn connect_unix(own_node: impl AsRef<Path>, server_node: impl AsRef<Path>) -> Result<Self> {
        let node = own_node.as_ref().to_path_buf();
        match fs::remove_file(&node) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                tracing::warn!(node = %node.display(), error = %e, "can't remove IPC node");
            }
            _ => {}
        }
        let socket = UnixDatagram::bind(&node)
            .map_err(|e| NetError::ipc(format!("bind to {}", node.display()), Some(e)))?;
        let server_node = server_node.as_ref();
        if let Err(e) = socket.connect(server_node) {
            let _ = fs::remove_file(&node);
            return Err(NetError::ipc(
                format!("connect to {}", server_node.display()),
                Some(e),
            ));
        }
        Ok(Self {
            socket: ClientSocket::Unix { socket, node },
        })
    }

    /// Connect a UDP client to `server`.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Ipc` if binding or connecting fails.
    pub fn connect_udp(server: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
            .map_err(|e| NetError::ipc("bind UDP client", Some(e)))?;
        socket
            .connect(server)
            .map_err(|e| NetError::ipc(format!("connect to {server}"), Some(e)))?;
        Ok(Self {
            socket: ClientSocket::Udp(socket),
        })
    }

    /// Send one datagram to the server.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Ipc` on a send error.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        let sent = match &self.socket {
            ClientSocket::Unix { socket, .. } => socket.send(data),
            ClientSocket::Udp(socket) => socket.send(data),
        };
        sent.map(|_| ()).map_err(|e| NetError::ipc("send", Some(e)))
    }

    /// Wait up to `timeout` for a datagram from the server.
    ///
    /// Returns `Ok(None)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Ipc` on a receive error.
    pub fn recv_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<Option<usize>> {
        let received = match &self.socket {
            ClientSocket::Unix { socket, .. } => socket
                .set_read_timeout(Some(timeout))
                .and_then(|()| socket.recv(buf)),
            ClientSocket::Udp(socket) => socket
                .set_read_timeout(Some(timeout))
                .and_then(|()| socket.recv(buf)),
        };
        match received {
            Ok(n) => Ok(Some(n)),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(NetError::ipc("recv", Some(e))),
        }
    }

    /// Own node path of a Unix client.
    #[must_use]
    pub fn node(&self) -> Option<&Path> {
        match &self.socket {
            ClientSocket::Unix { node, .. } => Some(node),
            ClientSocket::Udp(_) => None,
        }
    }

    /// Local address of a UDP client.
    #[must_use]
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        match &self.socket {
            ClientSocket::Udp(socket) => socket.local_addr().ok(),
            ClientSocket::Unix { .. } => None,
        }
    }
}

impl AsFd for IpcClient {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match &self.socket {
            ClientSocket::Unix { socket, .. } => socket.as_fd(),
            ClientSocket::Udp(socket) => socket.as_fd(),
        }
    }
}

impl Drop for IpcClient {
    fn drop(&mut self) {
        if let ClientSocket::Unix { node, .. } = &self.socket {
            let _ = fs::remove_file(node);
        }
    }
}
