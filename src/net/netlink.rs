//! Link state monitoring over rtnetlink.
//!
//! The monitor socket subscribes to `RTMGRP_LINK`. Each `RTM_NEWLINK`
//! message for a known interface is turned into a candidate [`LinkState`]
//! and compared with the device's cache; only a change is reported.
#![allow(unsafe_code)]

use std::ffi::CStr;
use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use byteorder::{ByteOrder, NativeEndian};
use libc::c_void;

use super::event::{Duplex, LinkState, NetEvent};
use crate::error::{NetError, Result};

/// rtnetlink multicast group for link changes.
pub const RTMGRP_LINK: u32 = 1;

const NLMSG_ALIGNTO: usize = 4;
const NLMSG_HDRLEN: usize = 16;
const NLMSG_ERROR: u16 = 2;
const NLMSG_DONE: u16 = 3;
const RTM_NEWLINK: u16 = 16;

const IFINFOMSG_LEN: usize = 16;
const RTA_ALIGNTO: usize = 4;
const RTA_HDRLEN: usize = 4;
const IFLA_IFNAME: u16 = 3;

/// `IFF_RUNNING` from `<net/if.h>`.
pub const IFF_RUNNING: u32 = 0x40;

/// Receive buffer size for one netlink read.
pub const NETLINK_BUF_LEN: usize = 4096;

const fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

const fn rta_align(len: usize) -> usize {
    (len + RTA_ALIGNTO - 1) & !(RTA_ALIGNTO - 1)
}

/// One `RTM_NEWLINK` notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMessage {
    /// Interface index
    pub index: i32,
    /// `ifi_flags`
    pub flags: u32,
    /// Interface name from `IFLA_IFNAME`, if present
    pub ifname: Option<String>,
}

impl LinkMessage {
    /// Whether the interface reports `IFF_RUNNING`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.flags & IFF_RUNNING != 0
    }

    /// Interface name, looked up by index when the message has none.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.ifname.clone().or_else(|| index_to_name(self.index))
    }
}

fn parse_ifname(attrs: &[u8]) -> Option<String> {
    let mut rest = attrs;
    while rest.len() >= RTA_HDRLEN {
        let rta_len = usize::from(NativeEndian::read_u16(&rest[0..2]));
        let rta_type = NativeEndian::read_u16(&rest[2..4]);
        if rta_len < RTA_HDRLEN || rta_len > rest.len() {
            break;
        }
        if rta_type == IFLA_IFNAME {
            let value = &rest[RTA_HDRLEN..rta_len];
            let end = value.iter().position(|&b| b == 0).unwrap_or(value.len());
            return std::str::from_utf8(&value[..end]).ok().map(str::to_owned);
        }
        rest = rest.get(rta_align(rta_len)..).unwrap_or(&[]);
    }
    None
}

/// Walk a netlink datagram and collect its link messages.
///
/// `NLMSG_DONE` ends the walk; message types other than `RTM_NEWLINK` are
/// skipped.
///
/// # Errors
///
/// Returns `NetError::Netlink` for an `NLMSG_ERROR` message or a short
/// `RTM_NEWLINK` body.
pub fn parse_messages(buf: &[u8]) -> Result<Vec<LinkMessage>> {
    let mut links = Vec::new();
    let mut rest = buf;
    while rest.len() >= NLMSG_HDRLEN {
        let msg_len = NativeEndian::read_u32(&rest[0..4]) as usize;
        let msg_type = NativeEndian::read_u16(&rest[4..6]);
        if msg_len < NLMSG_HDRLEN || msg_len > rest.len() {
            break;
        }
        match msg_type {
            NLMSG_DONE => break,
            NLMSG_ERROR => {
                return Err(NetError::Netlink {
                    message: "received NLMSG_ERROR".to_string(),
                });
            }
            RTM_NEWLINK => {
                let body = &rest[NLMSG_HDRLEN..msg_len];
                if body.len() < IFINFOMSG_LEN {
                    return Err(NetError::Netlink {
                        message: format!("RTM_NEWLINK body has only {} bytes", body.len()),
                    });
                }
                links.push(LinkMessage {
                    index: NativeEndian::read_i32(&body[4..8]),
                    flags: NativeEndian::read_u32(&body[8..12]),
                    ifname: parse_ifname(&body[IFINFOMSG_LEN..]),
                });
            }
            other => tracing::trace!(msg_type = other, "ignoring netlink message"),
        }
        rest = rest.get(nlmsg_align(msg_len)..).unwrap_or(&[]);
    }
    Ok(links)
}

fn index_to_name(index: i32) -> Option<String> {
    let index = u32::try_from(index).ok()?;
    let mut buf = [0 as libc::c_char; libc::IF_NAMESIZE];
    // SAFETY:
    // - buf holds IF_NAMESIZE bytes as if_indextoname requires
    let ptr = unsafe { libc::if_indextoname(index, buf.as_mut_ptr()) };
    if ptr.is_null() {
        return None;
    }
    // SAFETY:
    // - on success buf holds a NUL-terminated name
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    name.to_str().ok().map(str::to_owned)
}

/// Live link queries for one interface.
pub trait LinkQuery {
    /// Carrier state (`ETHTOOL_GLINK`).
    fn carrier(&self) -> bool;
    /// Speed in Mbps and duplex (`ETHTOOL_GSET`).
    fn settings(&self) -> (u32, Duplex);
}

/// Build the candidate snapshot for a link notification.
///
/// A link that isn't running is down with the rest of the cache kept;
/// otherwise carrier is re-queried, and speed/duplex only if it is up.
#[must_use]
pub fn candidate_state(cache: &LinkState, running: bool, link: &impl LinkQuery) -> LinkState {
    let mut candidate = cache.clone();
    if !running {
        candidate.up = false;
        return candidate;
    }
    candidate.up = link.carrier();
    if candidate.up {
        let (speed, duplex) = link.settings();
        candidate.speed = speed;
        candidate.duplex = duplex;
    }
    candidate
}

/// Store `candidate` in the cache and return the event if it changed.
pub fn apply_state(cache: &mut LinkState, candidate: LinkState) -> Option<NetEvent> {
    if *cache == candidate {
        return None;
    }
    tracing::info!(
        device = %candidate.devname,
        up = candidate.up,
        speed = candidate.speed,
        "link status changed"
    );
    *cache = candidate.clone();
    Some(NetEvent::link(candidate))
}

/// rtnetlink socket subscribed to link changes.
#[derive(Debug)]
pub struct LinkMonitor {
    fd: OwnedFd,
}

impl LinkMonitor {
    /// Open and bind the monitor socket.
    ///
    /// The port id is left to the kernel so several engines can coexist in
    /// one process.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Netlink` if the socket can't be created or bound.
    pub fn open() -> Result<Self> {
        // SAFETY:
        // - plain socket(2) call, the result is checked before use
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                libc::NETLINK_ROUTE,
            )
        };
        if raw < 0 {
            return Err(netlink_os_error("can't open"));
        }
        // SAFETY:
        // - raw is a fresh descriptor owned by nobody else
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY:
        // - sockaddr_nl is a plain C struct, all-zero is valid
        let mut sa: libc::sockaddr_nl = unsafe { mem::zeroed() };
        sa.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        sa.nl_groups = RTMGRP_LINK;
        // SAFETY:
        // - sa is a valid sockaddr_nl and the length matches its size
        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                std::ptr::from_ref(&sa).cast::<libc::sockaddr>(),
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(netlink_os_error("can't bind"));
        }
        tracing::debug!(fd = fd.as_raw_fd(), "link monitor opened");
        Ok(Self { fd })
    }

    /// Read one datagram of pending notifications without blocking.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Netlink` on a receive error or an error message.
    pub fn read_links(&self) -> Result<Vec<LinkMessage>> {
        let mut buf = [0u8; NETLINK_BUF_LEN];
        // SAFETY:
        // - buf is valid for writes of its whole length
        let n = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr().cast::<c_void>(),
                buf.len(),
                libc::MSG_DONTWAIT,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                tracing::info!("link monitor readable without data");
                return Ok(Vec::new());
            }
            return Err(NetError::Netlink {
                message: format!("error in recvmsg: {err}"),
            });
        }
        parse_messages(&buf[..n.unsigned_abs()])
    }
}

impl AsFd for LinkMonitor {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

fn netlink_os_error(what: &str) -> NetError {
    NetError::Netlink {
        message: format!("{what}: {}", io::Error::last_os_error()),
    }
}
