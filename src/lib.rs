//! Multipath sessions over QUIC
//!
//! A session stripes one ordered byte stream across several QUIC paths. The
//! sender picks a path per chunk with a weighted round robin scheduler and
//! numbers chunks with a session-wide sequence; the receiver puts them back
//! in order before handing bytes to `read`.

pub mod metrics;
pub mod network;
pub mod protocol;
pub mod reassembly;
pub mod scheduler;
pub mod session;

pub use session::{ManagerConfig, Session, SessionError, SessionManager, SessionResult, SessionState};
