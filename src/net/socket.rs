//! Linux socket plumbing for device sockets.
//!
//! Everything that needs `libc` directly lives here: raw packet and overlay
//! sockets, `SO_TIMESTAMPING` setup, interface ioctls and `recvmsg` with
//! ancillary data. Callers get owned descriptors and plain byte buffers.
#![allow(unsafe_code)]

use std::ffi::CString;
use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use libc::{c_char, c_int, c_void};

use super::event::Duplex;
use crate::protocol::ethernet::{ETH_ALEN, ETH_HLEN, ETH_P_1588};

// <linux/net_tstamp.h>
const SOF_TIMESTAMPING_TX_HARDWARE: u32 = 1 << 0;
const SOF_TIMESTAMPING_TX_SOFTWARE: u32 = 1 << 1;
const SOF_TIMESTAMPING_RX_HARDWARE: u32 = 1 << 2;
const SOF_TIMESTAMPING_RX_SOFTWARE: u32 = 1 << 3;
const SOF_TIMESTAMPING_SOFTWARE: u32 = 1 << 4;
const SOF_TIMESTAMPING_SYS_HARDWARE: u32 = 1 << 5;
const SOF_TIMESTAMPING_RAW_HARDWARE: u32 = 1 << 6;

const HWTSTAMP_TX_ON: c_int = 1;
const HWTSTAMP_FILTER_PTP_V2_EVENT: c_int = 12;
const HWTSTAMP_FILTER_PTP_V2_L2_EVENT: c_int = 9;

/// `SO_TIMESTAMPING` socket option and control message type.
pub const SO_TIMESTAMPING: c_int = 37;

/// `SO_TIMESTAMP` control message type (`struct timeval`).
pub const SCM_TIMESTAMP: c_int = libc::SO_TIMESTAMP;

// <linux/sockios.h>
const SIOCGIFMTU: libc::c_ulong = 0x8921;
const SIOCGIFHWADDR: libc::c_ulong = 0x8927;
const SIOCADDMULTI: libc::c_ulong = 0x8931;
const SIOCETHTOOL: libc::c_ulong = 0x8946;
const SIOCSHWTSTAMP: libc::c_ulong = 0x89b0;

// <linux/ethtool.h>
const ETHTOOL_GSET: u32 = 0x0000_0001;
const ETHTOOL_GLINK: u32 = 0x0000_000a;
const DUPLEX_HALF: u8 = 0x00;
const DUPLEX_FULL: u8 = 0x01;

const ARPHRD_ETHER: u16 = 1;
const PACKET_OTHERHOST: u8 = 3;

/// VLAN tag allowance added to the interface MTU.
const VLAN_TAG_LEN: usize = 4;

/// Usable frame size of an overlay device (IPv4 + UDP headers deducted).
pub const OVERLAY_MTU: usize = 1500 - (ETH_HLEN + VLAN_TAG_LEN + 20);

const CONTROL_BUF_LEN: usize = 512;

/// Timestamping capability obtained for a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampMode {
    /// NIC timestamps (`SIOCSHWTSTAMP` accepted)
    Hardware,
    /// Kernel software timestamps
    Software,
}

impl TimestampMode {
    fn so_flags(self) -> u32 {
        match self {
            Self::Hardware => {
                SOF_TIMESTAMPING_TX_HARDWARE
                    | SOF_TIMESTAMPING_RX_HARDWARE
                    | SOF_TIMESTAMPING_SYS_HARDWARE
                    | SOF_TIMESTAMPING_RAW_HARDWARE
            }
            Self::Software => {
                SOF_TIMESTAMPING_TX_SOFTWARE
                    | SOF_TIMESTAMPING_RX_SOFTWARE
                    | SOF_TIMESTAMPING_SOFTWARE
            }
        }
    }
}

/// One ancillary data record, copied out of the control buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    /// `cmsg_level`
    pub level: c_int,
    /// `cmsg_type`
    pub kind: c_int,
    /// Payload bytes
    pub data: Vec<u8>,
}

/// Result of a `recvmsg` call.
#[derive(Debug, Clone, Default)]
pub struct ReceivedMessage {
    /// Bytes written into the data buffer
    pub len: usize,
    /// `msg_flags` reported by the kernel
    pub flags: c_int,
    /// Ancillary data records
    pub control: Vec<ControlMessage>,
}

impl ReceivedMessage {
    /// Whether the data was truncated.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.flags & libc::MSG_TRUNC != 0
    }

    /// Whether the ancillary data was truncated.
    #[must_use]
    pub fn is_control_truncated(&self) -> bool {
        self.flags & libc::MSG_CTRUNC != 0
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
union IfreqData {
    data: *mut c_void,
    hwaddr: libc::sockaddr,
    mtu: c_int,
    pad: [u8; 24],
}

#[repr(C)]
struct Ifreq {
    name: [c_char; libc::IFNAMSIZ],
    ifru: IfreqData,
}

impl Ifreq {
    fn new(ifname: &str) -> io::Result<Self> {
        if ifname.is_empty() || ifname.len() >= libc::IFNAMSIZ {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("bad interface name '{ifname}'"),
            ));
        }
        let mut name = [0 as c_char; libc::IFNAMSIZ];
        for (dst, src) in name.iter_mut().zip(ifname.bytes()) {
            *dst = src as c_char;
        }
        Ok(Self {
            name,
            ifru: IfreqData { pad: [0; 24] },
        })
    }
}

#[repr(C)]
#[derive(Default)]
struct HwtstampConfig {
    flags: c_int,
    tx_type: c_int,
    rx_filter: c_int,
}

#[repr(C)]
#[derive(Default)]
struct EthtoolValue {
    cmd: u32,
    data: u32,
}

#[repr(C)]
#[derive(Default)]
struct EthtoolCmd {
    cmd: u32,
    supported: u32,
    advertising: u32,
    speed: u16,
    duplex: u8,
    port: u8,
    phy_address: u8,
    transceiver: u8,
    autoneg: u8,
    mdio_support: u8,
    maxtxpkt: u32,
    maxrxpkt: u32,
    speed_hi: u16,
    eth_tp_mdix: u8,
    eth_tp_mdix_ctrl: u8,
    lp_advertising: u32,
    reserved: [u32; 2],
}

fn cvt(ret: c_int) -> io::Result<c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn ioctl_ifreq(fd: BorrowedFd<'_>, request: libc::c_ulong, ifr: &mut Ifreq) -> io::Result<()> {
    // SAFETY:
    // - ifr is a valid, fully initialized ifreq-compatible struct
    // - every request used in this module reads or writes at most sizeof(ifreq)
    cvt(unsafe { libc::ioctl(fd.as_raw_fd(), request as _, std::ptr::from_mut(ifr)) })?;
    Ok(())
}

/// Open an `AF_PACKET` socket bound to `ifname` for ether-type 0x88F7.
///
/// # Errors
///
/// Returns the OS error if the socket can't be created or bound.
pub fn open_packet_socket(ifname: &str) -> io::Result<OwnedFd> {
    let proto = ETH_P_1588.to_be();
    // SAFETY:
    // - plain socket(2) call, the result is checked before use
    let raw = cvt(unsafe {
        libc::socket(
            libc::AF_PACKET,
            libc::SOCK_RAW | libc::SOCK_CLOEXEC,
            c_int::from(proto),
        )
    })?;
    // SAFETY:
    // - raw is a fresh descriptor owned by nobody else
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    let c_name = CString::new(ifname)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "NUL in interface name"))?;
    // SAFETY:
    // - c_name is a valid NUL-terminated string
    let ifindex = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if ifindex == 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY:
    // - sockaddr_ll is a plain C struct, all-zero is valid
    let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as u16;
    addr.sll_protocol = proto;
    addr.sll_ifindex = c_int::try_from(ifindex)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "interface index overflow"))?;
    addr.sll_hatype = ARPHRD_ETHER;
    addr.sll_pkttype = PACKET_OTHERHOST;
    addr.sll_halen = ETH_ALEN as u8;

    // SAFETY:
    // - addr is a valid sockaddr_ll and the length matches its size
    cvt(unsafe {
        libc::bind(
            fd.as_raw_fd(),
            std::ptr::from_ref(&addr).cast::<libc::sockaddr>(),
            mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    })?;
    Ok(fd)
}

/// Open an overlay device socket: UDP on 127.0.0.1:`lport` connected to
/// 127.0.0.1:`dport`.
///
/// # Errors
///
/// Returns the OS error if the port can't be bound.
pub fn open_overlay_socket(lport: u16, dport: u16) -> io::Result<OwnedFd> {
    let sock = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, lport))?;
    sock.connect(SocketAddrV4::new(Ipv4Addr::LOCALHOST, dport))?;
    Ok(OwnedFd::from(sock))
}

/// MAC address of a real interface.
///
/// # Errors
///
/// Returns the OS error from `SIOCGIFHWADDR`.
pub fn mac_address(fd: BorrowedFd<'_>, ifname: &str) -> io::Result<[u8; ETH_ALEN]> {
    let mut ifr = Ifreq::new(ifname)?;
    ioctl_ifreq(fd, SIOCGIFHWADDR, &mut ifr)?;
    // SAFETY:
    // - SIOCGIFHWADDR filled the hwaddr member of the union
    let sa_data = unsafe { ifr.ifru.hwaddr.sa_data };
    let mut mac = [0u8; ETH_ALEN];
    for (dst, src) in mac.iter_mut().zip(sa_data.iter()) {
        *dst = *src as u8;
    }
    Ok(mac)
}

/// Frame size usable on a real interface: MTU plus Ethernet header and a
/// VLAN tag.
///
/// # Errors
///
/// Returns the OS error from `SIOCGIFMTU`.
pub fn frame_mtu(fd: BorrowedFd<'_>, ifname: &str) -> io::Result<usize> {
    let mut ifr = Ifreq::new(ifname)?;
    ioctl_ifreq(fd, SIOCGIFMTU, &mut ifr)?;
    // SAFETY:
    // - SIOCGIFMTU filled the mtu member of the union
    let mtu = unsafe { ifr.ifru.mtu };
    let mtu = usize::try_from(mtu).unwrap_or(0);
    Ok(mtu + ETH_HLEN + VLAN_TAG_LEN)
}

/// Add a multicast MAC to the interface filter.
///
/// # Errors
///
/// Returns the OS error from `SIOCADDMULTI`.
pub fn join_multicast(fd: BorrowedFd<'_>, ifname: &str, mac: &[u8; ETH_ALEN]) -> io::Result<()> {
    let mut ifr = Ifreq::new(ifname)?;
    // SAFETY:
    // - sockaddr is a plain C struct, all-zero is valid
    let mut sa: libc::sockaddr = unsafe { mem::zeroed() };
    sa.sa_family = libc::AF_UNSPEC as libc::sa_family_t;
    for (dst, src) in sa.sa_data.iter_mut().zip(mac.iter()) {
        *dst = *src as c_char;
    }
    ifr.ifru = IfreqData { hwaddr: sa };
    ioctl_ifreq(fd, SIOCADDMULTI, &mut ifr)
}

fn hwtstamp_ioctl(fd: BorrowedFd<'_>, ifname: &str, rx_filter: c_int) -> io::Result<()> {
    let mut config = HwtstampConfig {
        flags: 0,
        tx_type: HWTSTAMP_TX_ON,
        rx_filter,
    };
    let mut ifr = Ifreq::new(ifname)?;
    ifr.ifru = IfreqData {
        data: std::ptr::from_mut(&mut config).cast::<c_void>(),
    };
    ioctl_ifreq(fd, SIOCSHWTSTAMP, &mut ifr)?;
    tracing::info!(
        ifname,
        tx_type = config.tx_type,
        rx_filter = config.rx_filter,
        "SIOCSHWTSTAMP accepted"
    );
    Ok(())
}

/// Enable packet timestamping on a device socket.
///
/// Hardware timestamping is requested on `ioctl_ifname` with the PTPv2 L2
/// event filter, then the generic PTPv2 event filter. If the driver refuses
/// both, software timestamping is enabled instead.
///
/// # Errors
///
/// Returns the OS error if `SO_TIMESTAMPING` can't be set at all.
pub fn enable_timestamping(fd: BorrowedFd<'_>, ioctl_ifname: &str) -> io::Result<TimestampMode> {
    let mode = match hwtstamp_ioctl(fd, ioctl_ifname, HWTSTAMP_FILTER_PTP_V2_L2_EVENT)
        .or_else(|_| hwtstamp_ioctl(fd, ioctl_ifname, HWTSTAMP_FILTER_PTP_V2_EVENT))
    {
        Ok(()) => TimestampMode::Hardware,
        Err(e) => {
            tracing::info!(
                ifname = ioctl_ifname,
                error = %e,
                "HW timestamping is not available, using software timestamping"
            );
            TimestampMode::Software
        }
    };

    let flags: u32 = mode.so_flags();
    // SAFETY:
    // - &flags points to a u32 that lives across the call, length matches
    cvt(unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            SO_TIMESTAMPING,
            std::ptr::from_ref(&flags).cast::<c_void>(),
            mem::size_of::<u32>() as libc::socklen_t,
        )
    })?;
    Ok(mode)
}

/// Carrier state from `ETHTOOL_GLINK`.
///
/// # Errors
///
/// Returns the OS error from `SIOCETHTOOL`.
pub fn ethtool_link(fd: BorrowedFd<'_>, ifname: &str) -> io::Result<bool> {
    let mut value = EthtoolValue {
        cmd: ETHTOOL_GLINK,
        data: 0,
    };
    let mut ifr = Ifreq::new(ifname)?;
    ifr.ifru = IfreqData {
        data: std::ptr::from_mut(&mut value).cast::<c_void>(),
    };
    ioctl_ifreq(fd, SIOCETHTOOL, &mut ifr)?;
    Ok(value.data != 0)
}

/// Speed and duplex from `ETHTOOL_GSET`.
///
/// # Errors
///
/// Returns the OS error from `SIOCETHTOOL`.
pub fn ethtool_settings(fd: BorrowedFd<'_>, ifname: &str) -> io::Result<(u32, Duplex)> {
    let mut cmd = EthtoolCmd {
        cmd: ETHTOOL_GSET,
        ..EthtoolCmd::default()
    };
    let mut ifr = Ifreq::new(ifname)?;
    ifr.ifru = IfreqData {
        data: std::ptr::from_mut(&mut cmd).cast::<c_void>(),
    };
    ioctl_ifreq(fd, SIOCETHTOOL, &mut ifr)?;
    Ok((
        normalize_speed(cmd.speed, cmd.speed_hi),
        duplex_from_ethtool(cmd.duplex),
    ))
}

/// Combine the split ethtool speed; "unknown" markers become 0.
#[must_use]
pub fn normalize_speed(speed: u16, speed_hi: u16) -> u32 {
    let speed = (u32::from(speed_hi) << 16) | u32::from(speed);
    if speed == u32::from(u16::MAX) || speed == u32::MAX {
        0
    } else {
        speed
    }
}

/// Map an ethtool duplex value.
#[must_use]
pub fn duplex_from_ethtool(duplex: u8) -> Duplex {
    match duplex {
        DUPLEX_FULL => Duplex::Full,
        DUPLEX_HALF => Duplex::Half,
        _ => Duplex::Unknown,
    }
}

/// Write one frame.
///
/// # Errors
///
/// Returns the OS error; `ConnectionRefused` on an overlay socket means the
/// peer is not listening.
pub fn send_frame(fd: BorrowedFd<'_>, frame: &[u8]) -> io::Result<usize> {
    // SAFETY:
    // - frame is a valid readable slice for its whole length
    let n = unsafe { libc::send(fd.as_raw_fd(), frame.as_ptr().cast::<c_void>(), frame.len(), 0) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n.unsigned_abs())
    }
}

/// `recvmsg` into `buf`, copying out every ancillary record.
///
/// # Errors
///
/// Returns the OS error; `WouldBlock` when `MSG_DONTWAIT` finds nothing.
pub fn recv_msg(fd: BorrowedFd<'_>, buf: &mut [u8], flags: c_int) -> io::Result<ReceivedMessage> {
    // u64 storage keeps the control buffer aligned for cmsghdr
    let mut control = [0u64; CONTROL_BUF_LEN / 8];
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast::<c_void>(),
        iov_len: buf.len(),
    };
    // SAFETY:
    // - msghdr is a plain C struct, all-zero is a valid empty header
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast::<c_void>();
    msg.msg_controllen = CONTROL_BUF_LEN as _;

    // SAFETY:
    // - msg points at iov (valid for buf.len() bytes) and the control buffer
    // - both buffers outlive the call
    let n = unsafe { libc::recvmsg(fd.as_raw_fd(), &mut msg, flags) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut records = Vec::new();
    let control_start = control.as_ptr().cast::<u8>();
    #[allow(clippy::useless_conversion, reason = "msg_controllen width varies by libc")]
    let control_len = usize::try_from(msg.msg_controllen).unwrap_or(0).min(CONTROL_BUF_LEN);
    // SAFETY:
    // - recvmsg succeeded, msg_control/msg_controllen describe our buffer
    // - CMSG_FIRSTHDR/CMSG_NXTHDR return null or a header inside the buffer
    // - data slices are clamped to the filled part of the buffer
    unsafe {
        let end = control_start.add(control_len);
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            let data = libc::CMSG_DATA(cmsg);
            let header_len = data.offset_from(cmsg.cast::<u8>()).unsigned_abs();
            #[allow(clippy::useless_conversion, reason = "cmsg_len width varies by libc")]
            let record_len = usize::try_from((*cmsg).cmsg_len).unwrap_or(0);
            let available = end.offset_from(data).max(0).unsigned_abs();
            let data_len = record_len.saturating_sub(header_len).min(available);
            records.push(ControlMessage {
                level: (*cmsg).cmsg_level,
                kind: (*cmsg).cmsg_type,
                data: std::slice::from_raw_parts(data, data_len).to_vec(),
            });
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    Ok(ReceivedMessage {
        len: n.unsigned_abs(),
        flags: msg.msg_flags,
        control: records,
    })
}

/// Wait until any of `fds` is readable or `timeout_ns` passes.
///
/// Returns one flag per descriptor; all `false` means the wait timed out.
/// `POLLERR` counts as readable so error-queue completions wake the loop.
///
/// # Errors
///
/// Returns the OS error from `ppoll`, `Interrupted` included.
pub fn poll_readable(fds: &[BorrowedFd<'_>], timeout_ns: i64) -> io::Result<Vec<bool>> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|fd| libc::pollfd {
            fd: fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();
    let timeout = crate::time::ns_to_timespec(timeout_ns.max(0));
    // SAFETY:
    // - pollfds is a valid array of nfds entries for the whole call
    // - timeout points to an initialized timespec, no signal mask is passed
    cvt(unsafe {
        libc::ppoll(
            pollfds.as_mut_ptr(),
            pollfds.len() as libc::nfds_t,
            &timeout,
            std::ptr::null(),
        )
    })?;
    Ok(pollfds
        .iter()
        .map(|p| p.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0)
        .collect())
}
