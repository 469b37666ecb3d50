//! Network devices: one socket, send buffer and link cache per interface.

use std::fs;
use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::PathBuf;

use bytes::Bytes;

use super::event::{Duplex, LinkState, NetEvent, RecvFrame};
use super::netlink::LinkQuery;
use super::pacer::SendPacer;
use super::socket::{self, OVERLAY_MTU, TimestampMode};
use super::timestamp;
use crate::error::{NetError, Result};
use crate::protocol::ethernet::{
    ETH_ALEN, ETH_HLEN, EthHeader, GPTP_FRAME_SIZE, GPTP_MAX_PACKET_SIZE,
    GPTP_MULTICAST_DEST_ADDR, is_virtual_ethdev, overlay_peer_port, port_id_from_mac,
    virtual_mac, virtual_ptpdev_for,
};
use crate::protocol::message::{PtpMessageType, msgtype_name};
use crate::types::NetConfig;

/// Finds the PTP clock serving a network interface.
pub trait ClockPathResolver {
    /// Clock path for `ifname`, or `None` if it has no clock.
    fn resolve(&self, ifname: &str) -> Option<String>;
}

impl<F> ClockPathResolver for F
where
    F: Fn(&str) -> Option<String>,
{
    fn resolve(&self, ifname: &str) -> Option<String> {
        self(ifname)
    }
}

/// Resolver backed by sysfs.
///
/// Overlay devices map `cbethN` to `cbptpN`; other interfaces use the first
/// directory under `<root>/<ifname>/device/ptp`, as `/dev/<name>`.
#[derive(Debug, Clone)]
pub struct SysfsResolver {
    root: PathBuf,
}

impl SysfsResolver {
    /// Resolver rooted at another directory than `/sys/class/net`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SysfsResolver {
    fn default() -> Self {
        Self::with_root("/sys/class/net")
    }
}

impl ClockPathResolver for SysfsResolver {
    fn resolve(&self, ifname: &str) -> Option<String> {
        if let Some(ptpdev) = virtual_ptpdev_for(ifname) {
            return Some(ptpdev);
        }
        let dir = self.root.join(ifname).join("device").join("ptp");
        let mut names: Vec<String> = fs::read_dir(dir)
            .ok()?
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        names.first().map(|name| format!("/dev/{name}"))
    }
}

/// What a single device read produced, besides the events it pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// A message was consumed; more may be queued
    Data,
    /// Nothing queued
    Empty,
    /// The overlay peer refused; wait for it to come back
    PeerWaiting,
}

/// One network interface.
#[derive(Debug)]
pub struct Device {
    socket: Option<OwnedFd>,
    mtu: usize,
    mac: [u8; ETH_ALEN],
    send_buf: Vec<u8>,
    link: LinkState,
    pacer: SendPacer,
    overlay_port: Option<u16>,
    txts_lost_ns: i64,
    timestamp_mode: Option<TimestampMode>,
}

impl Device {
    /// Open `name`.
    ///
    /// A device that can't be opened is returned closed, with the failure
    /// logged; it never produces events.
    pub fn open(
        name: &str,
        overlay_port: Option<u16>,
        resolver: &dyn ClockPathResolver,
        config: &NetConfig,
    ) -> Self {
        let mut device = Self {
            socket: None,
            mtu: 0,
            mac: [0; ETH_ALEN],
            send_buf: vec![0; GPTP_FRAME_SIZE],
            link: LinkState {
                devname: name.to_string(),
                ptpdev: resolver.resolve(name).unwrap_or_default(),
                ..LinkState::default()
            },
            pacer: SendPacer::new(config.aftersend_guard_time_ns, config.txts_lost_time_ns),
            overlay_port,
            txts_lost_ns: config.txts_lost_time_ns,
            timestamp_mode: None,
        };
        if let Err(e) = device.open_socket() {
            tracing::error!(device = name, error = %e, "network device can't be opened");
        }
        device
    }

    fn open_socket(&mut self) -> Result<()> {
        let name = self.link.devname.clone();
        let open_err = |message: &str, source: io::Error| NetError::DeviceOpen {
            device: name.clone(),
            message: message.to_string(),
            source: Some(source),
        };

        let (fd, mac, mtu) = if let Some(lport) = self.overlay_port {
            let dport = overlay_peer_port(lport);
            let fd = socket::open_overlay_socket(lport, dport)
                .map_err(|e| open_err("overlay socket", e))?;
            tracing::debug!(device = %name, lport, dport, "overlay socket opened");
            (fd, virtual_mac(&name), OVERLAY_MTU)
        } else {
            let fd = socket::open_packet_socket(&name).map_err(|e| open_err("packet socket", e))?;
            let mac = socket::mac_address(fd.as_fd(), &name).map_err(|e| open_err("MAC address", e))?;
            let mtu = socket::frame_mtu(fd.as_fd(), &name).map_err(|e| open_err("MTU", e))?;
            socket::join_multicast(fd.as_fd(), &name, &GPTP_MULTICAST_DEST_ADDR)
                .map_err(|e| open_err("failed to add multicast address", e))?;
            (fd, mac, mtu)
        };

        let ioctl_name = if self.overlay_port.is_some() { "lo" } else { name.as_str() };
        let mode = socket::enable_timestamping(fd.as_fd(), ioctl_name)
            .map_err(|e| open_err("timestamping", e))?;

        self.send_buf[..ETH_HLEN].copy_from_slice(&EthHeader::gptp(mac).encode());
        self.link.port_id = port_id_from_mac(&mac);
        self.mac = mac;
        self.mtu = mtu;
        self.timestamp_mode = Some(mode);
        self.socket = Some(fd);
        tracing::info!(device = %name, ?mode, mtu, "network device opened");
        Ok(())
    }

    /// Interface name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.link.devname
    }

    /// Borrow the socket, if open.
    #[must_use]
    pub fn socket(&self) -> Option<BorrowedFd<'_>> {
        self.socket.as_ref().map(AsFd::as_fd)
    }

    /// Whether the socket is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Whether this is an overlay (`cbeth`) device.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        is_virtual_ethdev(&self.link.devname)
    }

    /// Whether the socket is an overlay UDP socket.
    #[must_use]
    pub fn is_overlay(&self) -> bool {
        self.overlay_port.is_some()
    }

    /// Local overlay port, if any.
    #[must_use]
    pub fn overlay_port(&self) -> Option<u16> {
        self.overlay_port
    }

    /// Whether this device resolved a clock and opened.
    #[must_use]
    pub fn has_clock(&self) -> bool {
        self.is_open() && !self.link.ptpdev.is_empty()
    }

    /// Local MAC address.
    #[must_use]
    pub fn mac(&self) -> [u8; ETH_ALEN] {
        self.mac
    }

    /// Usable frame size.
    #[must_use]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Timestamping mode negotiated at open.
    #[must_use]
    pub fn timestamp_mode(&self) -> Option<TimestampMode> {
        self.timestamp_mode
    }

    /// Cached link snapshot.
    #[must_use]
    pub fn link(&self) -> &LinkState {
        &self.link
    }

    pub(crate) fn link_mut(&mut self) -> &mut LinkState {
        &mut self.link
    }

    /// Time after which a missing TX timestamp is given up.
    #[must_use]
    pub fn txts_lost_time(&self) -> i64 {
        self.txts_lost_ns
    }

    /// The send pacer of this device.
    #[must_use]
    pub fn pacer(&self) -> &SendPacer {
        &self.pacer
    }

    pub(crate) fn set_ptpdev(&mut self, ptpdev: String) {
        self.link.ptpdev = ptpdev;
    }

    /// Payload area of the send buffer, after the Ethernet header.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.send_buf[ETH_HLEN..ETH_HLEN + GPTP_MAX_PACKET_SIZE]
    }

    /// Query the initial link state.
    ///
    /// Overlay devices start down and come up with their first frame. A
    /// link with unknown speed counts as down.
    pub fn activate(&mut self) -> Option<NetEvent> {
        if !self.is_open() {
            return None;
        }
        if self.is_virtual() {
            self.link.up = false;
            return None;
        }
        let up = self.carrier();
        let (speed, duplex) = self.settings();
        self.link.up = up && speed != 0;
        self.link.speed = speed;
        self.link.duplex = duplex;
        tracing::info!(
            device = %self.link.devname,
            up = self.link.up,
            speed,
            ?duplex,
            "initial link state"
        );
        self.link.up.then(|| NetEvent::DevUp(self.link.clone()))
    }

    /// Send `len` bytes of the payload buffer at `now`.
    ///
    /// Returns the number of frame bytes written, Ethernet header included.
    /// A refused overlay send marks the link down and pushes `DevDown` to
    /// `events`.
    ///
    /// # Errors
    ///
    /// `FrameTooLarge`, `SendDeferred` from the pacer, `PeerDown` for a
    /// refused overlay send, or the OS error.
    pub fn send(
        &mut self,
        index: usize,
        now: i64,
        len: usize,
        events: &mut Vec<NetEvent>,
    ) -> Result<usize> {
        if len > GPTP_MAX_PACKET_SIZE {
            tracing::error!(index, len, "frame too big");
            return Err(NetError::FrameTooLarge {
                length: len,
                max: GPTP_MAX_PACKET_SIZE,
            });
        }
        let msgtype = self.send_buf[ETH_HLEN] & 0x0F;
        self.pacer
            .check(now, msgtype)
            .map_err(|reason| NetError::SendDeferred { index, reason })?;
        let Some(fd) = self.socket.as_ref() else {
            return Err(NetError::DeviceOpen {
                device: self.link.devname.clone(),
                message: "device is not open".to_string(),
                source: None,
            });
        };
        self.pacer.on_sent(now, msgtype);
        tracing::trace!(
            index,
            msgtype = msgtype_name(msgtype),
            len,
            "send"
        );
        match socket::send_frame(fd.as_fd(), &self.send_buf[..ETH_HLEN + len]) {
            Ok(written) => Ok(written),
            Err(e) if self.is_overlay() && e.kind() == io::ErrorKind::ConnectionRefused => {
                self.peer_refused(events);
                Err(NetError::PeerDown { index })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn peer_refused(&mut self, events: &mut Vec<NetEvent>) {
        if self.link.up && self.is_virtual() {
            tracing::debug!(device = %self.link.devname, "device down");
            self.link.up = false;
            events.push(NetEvent::DevDown(self.link.clone()));
        }
    }

    /// Read one message: a TX completion first, else a received frame.
    ///
    /// Events are pushed to `events` in delivery order. `sync_offset` gives
    /// the correction added to Sync timestamps on overlay devices.
    ///
    /// # Errors
    ///
    /// Frame faults for unusable messages (the next read may still
    /// succeed) and OS errors.
    pub fn read(
        &mut self,
        buf: &mut [u8],
        events: &mut Vec<NetEvent>,
        sync_offset: &mut dyn FnMut() -> i64,
    ) -> Result<ReadStatus> {
        let overlay = self.is_overlay();
        let Some(fd) = self.socket.as_ref() else {
            return Ok(ReadStatus::Empty);
        };

        match timestamp::capture_tx(fd.as_fd(), buf, overlay) {
            Ok(Some(mut txts)) => {
                self.pacer.on_tx_timestamp();
                if overlay && txts.msgtype == PtpMessageType::Sync as u8 {
                    txts.ts += sync_offset();
                }
                events.push(NetEvent::TxTimestamp(txts));
                return Ok(ReadStatus::Data);
            }
            Ok(None) => {}
            Err(e) => {
                if e.is_frame_fault() {
                    self.pacer.release_guard();
                }
                return Err(e);
            }
        }

        let msg = match socket::recv_msg(fd.as_fd(), buf, libc::MSG_DONTWAIT) {
            Ok(msg) => msg,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadStatus::Empty),
            Err(e) if overlay && e.kind() == io::ErrorKind::ConnectionRefused => {
                self.peer_refused(events);
                return Ok(ReadStatus::PeerWaiting);
            }
            Err(e) => return Err(e.into()),
        };
        if msg.len == 0 {
            return Err(NetError::malformed("recvmsg returned 0 bytes"));
        }
        if !self.link.up && self.is_virtual() {
            tracing::debug!(device = %self.link.devname, "device up");
            self.link.up = true;
            events.push(NetEvent::DevUp(self.link.clone()));
        }

        let frame = &buf[..msg.len.min(buf.len())];
        let (fields, mut ts) = timestamp::capture_rx(frame, &msg)?;
        if overlay && fields.msgtype == PtpMessageType::Sync as u8 {
            ts = ts.map(|ts| ts + sync_offset());
        }
        events.push(NetEvent::Recv(RecvFrame {
            payload: Bytes::copy_from_slice(&frame[ETH_HLEN..]),
            msgtype: fields.msgtype,
            domain: fields.domain,
            ts,
        }));
        Ok(ReadStatus::Data)
    }
}

impl LinkQuery for Device {
    fn carrier(&self) -> bool {
        let Some(fd) = self.socket.as_ref() else {
            return false;
        };
        socket::ethtool_link(fd.as_fd(), &self.link.devname).unwrap_or_else(|e| {
            tracing::debug!(device = %self.link.devname, error = %e, "ETHTOOL_GLINK failed");
            false
        })
    }

    fn settings(&self) -> (u32, Duplex) {
        let Some(fd) = self.socket.as_ref() else {
            return (0, Duplex::Unknown);
        };
        socket::ethtool_settings(fd.as_fd(), &self.link.devname).unwrap_or_else(|e| {
            tracing::debug!(device = %self.link.devname, error = %e, "ETHTOOL_GSET failed");
            (0, Duplex::Unknown)
        })
    }
}

/// Index of the device that provides the clock.
///
/// `clock_paths` yields, per device, its clock path if the device opened
/// and resolved one. The first such device is picked, unless one matches
/// `master`.
pub fn pick_clock_device<'a>(
    clock_paths: impl IntoIterator<Item = Option<&'a str>>,
    master: Option<&str>,
) -> Option<usize> {
    let mut first = None;
    for (i, path) in clock_paths.into_iter().enumerate() {
        let Some(path) = path else { continue };
        if first.is_none() {
            first = Some(i);
        }
        if master.is_some_and(|m| m == path) {
            first = Some(i);
        }
    }
    first
}

/// Give every device without a clock path the path of device 0.
pub fn inherit_clock_path(devices: &mut [Device]) {
    let Some((first, rest)) = devices.split_first_mut() else {
        return;
    };
    for device in rest.iter_mut().filter(|d| d.link.ptpdev.is_empty()) {
        tracing::info!(
            device = %device.link.devname,
            ptpdev = %first.link.ptpdev,
            "network device has no PTP device, using the first one"
        );
        device.set_ptpdev(first.link.ptpdev.clone());
    }
}
