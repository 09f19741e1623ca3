//! Canopy wire format: link-layer addresses and the mesh packet envelope.
//!
//! The envelope mirrors the mesh stack's own framing: a fixed header with
//! destination, source and protocol tag, followed by a variable-length
//! options section and an optional user-data section. Options are repeatable
//! and key-tagged; the topology protocol carries all of its content in them.
//!
//! The fixed header is `#[repr(C)]` over byte-aligned fields and uses
//! zerocopy derives, so reading and writing it needs no unsafe code and no
//! manual offset arithmetic.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// ── Address ───────────────────────────────────────────────────────────────────

/// A 6-byte link-layer address. The sole identity key of a mesh node.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, AsBytes, FromBytes, FromZeroes, Unaligned,
    Serialize, Deserialize,
)]
#[repr(C)]
#[serde(try_from = "String", into = "String")]
pub struct Address(pub [u8; 6]);

assert_eq_size!(Address, [u8; 6]);

impl Address {
    /// Destination meaning "everyone". Never a node identity.
    pub const BROADCAST: Address = Address([0u8; 6]);

    /// Wire width of one address.
    pub const LEN: usize = 6;

    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Decode a packed run of addresses. The input length must be a
    /// multiple of [`Address::LEN`].
    pub fn unpack(bytes: &[u8]) -> Result<Vec<Address>, WireError> {
        if bytes.len() % Self::LEN != 0 {
            return Err(WireError::MisalignedAddressList(bytes.len()));
        }
        Address::slice_from(bytes)
            .map(<[Address]>::to_vec)
            .ok_or(WireError::MisalignedAddressList(bytes.len()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WireError::InvalidAddress(s.to_string());
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != Self::LEN || parts.iter().any(|p| p.len() != 2) {
            return Err(invalid());
        }
        let bytes = hex::decode(parts.concat()).map_err(|_| invalid())?;
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&bytes);
        Ok(Address(octets))
    }
}

impl TryFrom<String> for Address {
    type Error = WireError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> String {
        addr.to_string()
    }
}

impl From<[u8; 6]> for Address {
    fn from(octets: [u8; 6]) -> Self {
        Address(octets)
    }
}

// ── Protocol and option tags ──────────────────────────────────────────────────

/// User-data protocol tag carried in every mesh header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolId(pub u8);

impl ProtocolId {
    /// No user protocol. Topology tests travel under this tag and carry
    /// everything in header options.
    pub const NONE: ProtocolId = ProtocolId(0);
    pub const HTTP: ProtocolId = ProtocolId(1);
    pub const JSON: ProtocolId = ProtocolId(2);
    pub const MQTT: ProtocolId = ProtocolId(3);
    pub const BINARY: ProtocolId = ProtocolId(4);
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProtocolId::NONE => write!(f, "none"),
            ProtocolId::HTTP => write!(f, "http"),
            ProtocolId::JSON => write!(f, "json"),
            ProtocolId::MQTT => write!(f, "mqtt"),
            ProtocolId::BINARY => write!(f, "binary"),
            ProtocolId(other) => write!(f, "0x{other:02x}"),
        }
    }
}

/// Key of a header option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OptionKey(pub u8);

impl OptionKey {
    /// Topology request. Value: the address the request is directed at.
    pub const TOPO_REQ: OptionKey = OptionKey(5);
    /// Topology response. Value: packed sub-node addresses. Repeatable.
    pub const TOPO_RESP: OptionKey = OptionKey(6);
}

// ── Fixed header ──────────────────────────────────────────────────────────────

/// Fixed mesh header preceding every packet.
///
/// Wire size: 20 bytes. Multi-byte fields are big-endian.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct MeshHeader {
    /// Wire format version. Currently 0x01.
    pub version: u8,
    /// Bit flags, see `FLAG_*`.
    pub flags: u8,
    /// User-data protocol tag.
    pub protocol: u8,
    /// Reserved, must be zero.
    pub reserved: u8,
    /// Total packet length including this header.
    pub length: U16<BigEndian>,
    /// Length of the options section that follows the header.
    pub options_len: U16<BigEndian>,
    pub dst: Address,
    pub src: Address,
}

assert_eq_size!(MeshHeader, [u8; 20]);

/// Size of [`MeshHeader`] on the wire.
pub const HEADER_LEN: usize = 20;

/// Point-to-point delivery requested.
pub const FLAG_P2P: u8 = 0x01;
/// Piggybacked request for a send permit.
pub const FLAG_FLOW_REQ: u8 = 0x02;
/// An options section is present.
pub const FLAG_OPTIONS: u8 = 0x04;

// ── Options ───────────────────────────────────────────────────────────────────

/// One key-tagged header option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshOption {
    pub key: OptionKey,
    value: Bytes,
}

impl MeshOption {
    pub fn new(key: OptionKey, value: impl Into<Bytes>) -> Result<Self, WireError> {
        let value = value.into();
        if value.len() > MAX_OPTION_VALUE {
            return Err(WireError::OptionTooLong(value.len()));
        }
        Ok(Self { key, value })
    }

    /// Build an option whose value is a packed address list.
    pub fn with_addresses(key: OptionKey, addrs: &[Address]) -> Result<Self, WireError> {
        Self::new(key, Bytes::copy_from_slice(addrs.as_bytes()))
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Interpret the value as a packed address list.
    pub fn addresses(&self) -> Result<Vec<Address>, WireError> {
        Address::unpack(&self.value)
    }

    fn encoded_len(&self) -> usize {
        2 + self.value.len()
    }
}

// ── Packet ────────────────────────────────────────────────────────────────────

/// An addressed mesh packet: header fields, options and user data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshPacket {
    pub dst: Address,
    pub src: Address,
    pub protocol: ProtocolId,
    pub flags: u8,
    options: Vec<MeshOption>,
    data: Bytes,
}

impl MeshPacket {
    /// Create an empty envelope with no options and no user data.
    pub fn new(dst: Address, src: Address, protocol: ProtocolId) -> Self {
        Self {
            dst,
            src,
            protocol,
            flags: 0,
            options: Vec::new(),
            data: Bytes::new(),
        }
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    /// Append an option. Options keep their insertion order.
    pub fn add_option(&mut self, option: MeshOption) {
        self.flags |= FLAG_OPTIONS;
        self.options.push(option);
    }

    /// All occurrences of `key`, in wire order.
    pub fn options(&self, key: OptionKey) -> impl Iterator<Item = &MeshOption> + '_ {
        self.options.iter().filter(move |o| o.key == key)
    }

    pub fn has_option(&self, key: OptionKey) -> bool {
        self.options(key).next().is_some()
    }

    /// The user-data section, or `None` if the packet carries none.
    pub fn user_data(&self) -> Option<&[u8]> {
        if self.data.is_empty() {
            None
        } else {
            Some(&self.data)
        }
    }

    /// Total encoded size.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.options_len() + self.data.len()
    }

    fn options_len(&self) -> usize {
        self.options.iter().map(MeshOption::encoded_len).sum()
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let total = self.encoded_len();
        if total > MAX_PACKET {
            return Err(WireError::PacketTooLarge(total));
        }
        let header = MeshHeader {
            version: WIRE_VERSION,
            flags: self.flags,
            protocol: self.protocol.0,
            reserved: 0,
            length: U16::new(total as u16),
            options_len: U16::new(self.options_len() as u16),
            dst: self.dst,
            src: self.src,
        };

        let mut buf = BytesMut::with_capacity(total);
        buf.put_slice(header.as_bytes());
        for option in &self.options {
            buf.put_u8(option.key.0);
            buf.put_u8(option.value.len() as u8);
            buf.put_slice(&option.value);
        }
        buf.put_slice(&self.data);
        Ok(buf.freeze())
    }

    /// Parse wire bytes. Trailing bytes beyond the declared length are ignored.
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let header = MeshHeader::read_from_prefix(raw).ok_or(WireError::Truncated(raw.len()))?;
        if header.version != WIRE_VERSION {
            return Err(WireError::UnknownVersion(header.version));
        }

        let length = header.length.get() as usize;
        let options_len = header.options_len.get() as usize;
        if length < HEADER_LEN || options_len > length - HEADER_LEN {
            return Err(WireError::BadLength(length));
        }
        if raw.len() < length {
            return Err(WireError::Truncated(raw.len()));
        }

        let mut section = &raw[HEADER_LEN..HEADER_LEN + options_len];
        let mut options = Vec::new();
        while !section.is_empty() {
            if section.len() < 2 {
                return Err(WireError::MalformedOption);
            }
            let key = OptionKey(section[0]);
            let len = section[1] as usize;
            if section.len() < 2 + len {
                return Err(WireError::MalformedOption);
            }
            options.push(MeshOption {
                key,
                value: Bytes::copy_from_slice(&section[2..2 + len]),
            });
            section = &section[2 + len..];
        }

        Ok(Self {
            dst: header.dst,
            src: header.src,
            protocol: ProtocolId(header.protocol),
            flags: header.flags,
            options,
            data: Bytes::copy_from_slice(&raw[HEADER_LEN + options_len..length]),
        })
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Current wire format version.
pub const WIRE_VERSION: u8 = 0x01;

/// Maximum option value length (the length field is one byte).
pub const MAX_OPTION_VALUE: usize = 255;

/// Addresses that fit in one option value.
pub const ADDRESSES_PER_OPTION: usize = MAX_OPTION_VALUE / Address::LEN;

/// Maximum packet length (the length field is two bytes).
pub const MAX_PACKET: usize = u16::MAX as usize;

/// IPv6 link-local multicast address used by the link transport.
pub const MULTICAST_ADDR: &str = "ff02::1";

/// Default UDP port of the link transport.
pub const DEFAULT_MESH_PORT: u16 = 49152;

/// Default interval between topology tests, in milliseconds.
pub const TOPOLOGY_INTERVAL_MS: u64 = 15_000;

/// Default age after which a silent sub-node is evicted, in milliseconds.
pub const SUB_NODE_TIMEOUT_MS: u64 = 30_000;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when building or interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("address list of {0} bytes is not a multiple of 6")]
    MisalignedAddressList(usize),

    #[error("option value of {0} bytes exceeds maximum {}", MAX_OPTION_VALUE)]
    OptionTooLong(usize),

    #[error("packet of {0} bytes exceeds maximum {}", MAX_PACKET)]
    PacketTooLarge(usize),

    #[error("truncated packet ({0} bytes)")]
    Truncated(usize),

    #[error("declared packet length {0} is inconsistent")]
    BadLength(usize),

    #[error("unknown wire version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("malformed options section")]
    MalformedOption,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
