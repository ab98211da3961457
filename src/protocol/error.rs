use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown packet type: {0}")]
    UnknownPacketType(u8),

    #[error("Truncated packet: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Length field {declared} does not match frame size {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Invalid length {length} for {kind} packet")]
    InvalidLength { kind: &'static str, length: usize },

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Address descriptor too long: {0} bytes")]
    AddressTooLong(usize),

    #[error("Invalid address descriptor: {0}")]
    InvalidAddress(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
