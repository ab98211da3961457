use crate::protocol::error::{ProtocolError, ProtocolResult};
use bytes::Bytes;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Type tag plus the two byte length field
pub const FRAME_PREFIX_LEN: usize = 3;

/// Fixed header of Hello, HelloAck and Goodbye (type, length, session id)
pub const HANDSHAKE_HEADER_LEN: usize = 7;

/// Fixed header of Data (type, length, session id, path id, sequence)
pub const DATA_HEADER_LEN: usize = 12;

/// Largest frame the 16-bit length field can describe
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Largest payload a single Data packet can carry
pub const MAX_DATA_PAYLOAD: usize = MAX_FRAME_LEN - DATA_HEADER_LEN;

/// Chunk size used to split writes into Data packets
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Hello = 1,
    HelloAck = 2,
    Data = 3,
    Goodbye = 4,
}

impl PacketType {
    pub fn name(&self) -> &'static str {
        match self {
            PacketType::Hello => "Hello",
            PacketType::HelloAck => "HelloAck",
            PacketType::Data => "Data",
            PacketType::Goodbye => "Goodbye",
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> ProtocolResult<Self> {
        match tag {
            1 => Ok(PacketType::Hello),
            2 => Ok(PacketType::HelloAck),
            3 => Ok(PacketType::Data),
            4 => Ok(PacketType::Goodbye),
            other => Err(ProtocolError::UnknownPacketType(other)),
        }
    }
}

/// Encoding of the raw bytes inside a reachable address descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddrKind {
    /// UTF-8 `ip:port` text
    Text = 0,
    /// 4 address bytes followed by a big-endian port
    Ipv4 = 4,
    /// 16 address bytes followed by a big-endian port
    Ipv6 = 6,
}

/// One address a peer advertises in its HelloAck for path discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReachableAddr {
    pub kind: u8,
    pub addr: Vec<u8>,
}

impl ReachableAddr {
    pub fn new(kind: u8, addr: Vec<u8>) -> Self {
        Self { kind, addr }
    }

    /// Textual descriptor, the form sessions advertise their listeners in
    pub fn text(addr: SocketAddr) -> Self {
        Self {
            kind: AddrKind::Text as u8,
            addr: addr.to_string().into_bytes(),
        }
    }

    pub fn binary(addr: SocketAddr) -> Self {
        let mut raw = Vec::with_capacity(18);
        let kind = match addr.ip() {
            IpAddr::V4(ip) => {
                raw.extend_from_slice(&ip.octets());
                AddrKind::Ipv4
            }
            IpAddr::V6(ip) => {
                raw.extend_from_slice(&ip.octets());
                AddrKind::Ipv6
            }
        };
        raw.extend_from_slice(&addr.port().to_be_bytes());
        Self {
            kind: kind as u8,
            addr: raw,
        }
    }

    /// Resolve the descriptor into a dialable socket address
    pub fn to_socket_addr(&self) -> ProtocolResult<SocketAddr> {
        let raw = self.addr.as_slice();
        match self.kind {
            k if k == AddrKind::Text as u8 => std::str::from_utf8(raw)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| {
                    ProtocolError::InvalidAddress(String::from_utf8_lossy(raw).into_owned())
                }),
            k if k == AddrKind::Ipv4 as u8 && raw.len() == 6 => {
                let ip = Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]);
                let port = u16::from_be_bytes([raw[4], raw[5]]);
                Ok(SocketAddr::new(IpAddr::V4(ip), port))
            }
            k if k == AddrKind::Ipv6 as u8 && raw.len() == 18 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&raw[..16]);
                let port = u16::from_be_bytes([raw[16], raw[17]]);
                Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
            }
            k => Err(ProtocolError::InvalidAddress(format!(
                "kind {k} with {} bytes",
                raw.len()
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Opens path 0 of a new session (id 0) or joins an existing one
    Hello { session_id: u32 },

    /// Answers a Hello with the assigned id and the sender's listen addresses
    HelloAck {
        session_id: u32,
        addrs: Vec<ReachableAddr>,
    },

    Data {
        session_id: u32,
        path_id: u8,
        sequence: u32,
        payload: Bytes,
    },

    /// Teardown signal
    Goodbye { session_id: u32 },
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Hello { .. } => PacketType::Hello,
            Packet::HelloAck { .. } => PacketType::HelloAck,
            Packet::Data { .. } => PacketType::Data,
            Packet::Goodbye { .. } => PacketType::Goodbye,
        }
    }

    pub fn session_id(&self) -> u32 {
        match self {
            Packet::Hello { session_id }
            | Packet::HelloAck { session_id, .. }
            | Packet::Data { session_id, .. }
            | Packet::Goodbye { session_id } => *session_id,
        }
    }

    /// Value of the length field: header plus everything after it
    pub fn encoded_len(&self) -> usize {
        match self {
            Packet::Hello { .. } | Packet::Goodbye { .. } => HANDSHAKE_HEADER_LEN,
            Packet::HelloAck { addrs, .. } => {
                HANDSHAKE_HEADER_LEN + addrs.iter().map(|a| 2 + a.addr.len()).sum::<usize>()
            }
            Packet::Data { payload, .. } => DATA_HEADER_LEN + payload.len(),
        }
    }
}
