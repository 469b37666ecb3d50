//! Ethernet framing for gPTP (IEEE 802.1AS Section 10.4 / 11.3).

use byteorder::{BigEndian, ByteOrder};

/// Ethernet header length.
pub const ETH_HLEN: usize = 14;

/// MAC address length.
pub const ETH_ALEN: usize = 6;

/// Ether-type of IEEE 1588 / 802.1AS frames.
pub const ETH_P_1588: u16 = 0x88F7;

/// Destination MAC of gPTP peer-to-peer messages.
pub const GPTP_MULTICAST_DEST_ADDR: [u8; ETH_ALEN] = [0x01, 0x80, 0xC2, 0x00, 0x00, 0x0E];

/// Largest PTP payload (an Announce with a full path trace TLV).
pub const GPTP_MAX_PACKET_SIZE: usize = 1500;

/// Largest frame including the Ethernet header.
pub const GPTP_FRAME_SIZE: usize = GPTP_MAX_PACKET_SIZE + ETH_HLEN;

/// IPv4 + UDP headers in front of a looped-back overlay frame.
pub const OVERLAY_PREFIX_LEN: usize = ETH_HLEN + 20 + 8;

/// Name prefix of overlay (Ethernet over UDP) devices.
pub const VIRTUAL_ETHDEV_PREFIX: &str = "cbeth";

/// Name prefix of virtual PTP clocks paired with overlay devices.
pub const VIRTUAL_PTPDEV_PREFIX: &str = "cbptp";

/// Upper two thirds of the MAC given to overlay devices.
pub const VIRTUAL_ETHDEV_MAC_PREFIX: [u8; 4] = [0x02, 0x01, 0x45, 0x10];

/// Ethernet II header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthHeader {
    /// Destination MAC.
    pub dest: [u8; ETH_ALEN],
    /// Source MAC.
    pub source: [u8; ETH_ALEN],
    /// Ether-type.
    pub proto: u16,
}

impl EthHeader {
    /// Header addressed to the gPTP multicast group.
    #[must_use]
    pub fn gptp(source: [u8; ETH_ALEN]) -> Self {
        Self {
            dest: GPTP_MULTICAST_DEST_ADDR,
            source,
            proto: ETH_P_1588,
        }
    }

    /// Encode to 14 bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; ETH_HLEN] {
        let mut buf = [0u8; ETH_HLEN];
        buf[0..6].copy_from_slice(&self.dest);
        buf[6..12].copy_from_slice(&self.source);
        BigEndian::write_u16(&mut buf[12..14], self.proto);
        buf
    }

    /// Decode from the start of a frame.
    #[must_use]
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < ETH_HLEN {
            return None;
        }
        let mut dest = [0u8; ETH_ALEN];
        let mut source = [0u8; ETH_ALEN];
        dest.copy_from_slice(&data[0..6]);
        source.copy_from_slice(&data[6..12]);
        Some(Self {
            dest,
            source,
            proto: BigEndian::read_u16(&data[12..14]),
        })
    }
}

/// Whether `name` is an overlay (Ethernet over UDP) device.
#[must_use]
pub fn is_virtual_ethdev(name: &str) -> bool {
    name.starts_with(VIRTUAL_ETHDEV_PREFIX)
}

/// Whether `path` names a virtual PTP clock.
#[must_use]
pub fn is_virtual_ptpdev(path: &str) -> bool {
    path.starts_with(VIRTUAL_PTPDEV_PREFIX)
}

/// Virtual clock name paired with an overlay device (`cbeth0` -> `cbptp0`).
#[must_use]
pub fn virtual_ptpdev_for(ethdev: &str) -> Option<String> {
    ethdev
        .strip_prefix(VIRTUAL_ETHDEV_PREFIX)
        .map(|suffix| format!("{VIRTUAL_PTPDEV_PREFIX}{suffix}"))
}

/// MAC of an overlay device: fixed prefix, then the byte sum of the name
/// suffix in the lower two bytes (`cbeth0` -> `02:01:45:10:00:30`).
#[must_use]
pub fn virtual_mac(ethdev: &str) -> [u8; ETH_ALEN] {
    let suffix = ethdev.strip_prefix(VIRTUAL_ETHDEV_PREFIX).unwrap_or(ethdev);
    let sum = suffix
        .bytes()
        .fold(0u16, |acc, b| acc.wrapping_add(u16::from(b)));
    let [hi, lo] = sum.to_be_bytes();
    let m = VIRTUAL_ETHDEV_MAC_PREFIX;
    [m[0], m[1], m[2], m[3], hi, lo]
}

/// Port identity from a MAC: EUI-48 to EUI-64 by inserting `FF:FE`.
#[must_use]
pub fn port_id_from_mac(mac: &[u8; ETH_ALEN]) -> [u8; 8] {
    [mac[0], mac[1], mac[2], 0xFF, 0xFE, mac[3], mac[4], mac[5]]
}

/// Clock identity for a domain: the port id with bytes 3..5 replaced by
/// `0, domain` for non-zero domains.
#[must_use]
pub fn clock_id_for_domain(port_id: &[u8; 8], domain: u8) -> [u8; 8] {
    let mut id = *port_id;
    if domain != 0 {
        id[3] = 0;
        id[4] = domain;
    }
    id
}

/// The paired overlay port: even ports talk to `port + 1`, odd to `port - 1`.
#[must_use]
pub fn overlay_peer_port(port: u16) -> u16 {
    if port % 2 == 1 { port - 1 } else { port + 1 }
}
