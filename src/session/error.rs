use crate::network::NetworkError;
use crate::protocol::ProtocolError;
use crate::scheduler::SchedulerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Unknown session id: {0}")]
    UnknownSession(u32),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Transport error: {0}")]
    Transport(#[from] NetworkError),

    #[error("Session is closed")]
    Closed,

    #[error("All paths failed: {0}")]
    AllPathsFailed(String),

    #[error("Peer did not finish the session within {0:?}; written data may be lost")]
    CloseTimeout(std::time::Duration),

    #[error("Too many paths (limit {0})")]
    TooManyPaths(usize),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Config(err.to_string())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
