//! Receive-side reordering of Data payloads into one contiguous byte stream

pub mod buffer;

pub use buffer::Reassembler;
