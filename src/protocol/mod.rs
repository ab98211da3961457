//! Wire protocol for multipath sessions
//!
//! Every frame starts with a one byte type tag and a two byte big-endian
//! total length. Four packet kinds exist: Hello, HelloAck, Data and Goodbye.

pub mod codec;
pub mod error;
pub mod types;

pub use codec::{decode, encode, read_packet, write_packet};
pub use error::{ProtocolError, ProtocolResult};
pub use types::{
    AddrKind, Packet, PacketType, ReachableAddr, DATA_HEADER_LEN, DEFAULT_CHUNK_SIZE,
    FRAME_PREFIX_LEN, HANDSHAKE_HEADER_LEN, MAX_DATA_PAYLOAD, MAX_FRAME_LEN,
};
