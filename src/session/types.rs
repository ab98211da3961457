use crate::network::{ConnectionConfig, PathStatus};
use crate::scheduler::{PathId, SchedulerConfig};
use crate::session::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Session id carried by a Hello that asks for a new session
pub const UNASSIGNED_SESSION_ID: u32 = 0;

/// Path ids travel in one byte
pub const MAX_PATHS: usize = u8::MAX as usize + 1;

/// Upper bound on the close exchange; a responsive peer ends it much sooner
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Handshaking,
    Active,
    /// Goodbye sent or received
    Closing,
    Closed,
    /// Every path failed before teardown
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathStats {
    pub path_id: PathId,
    pub remote_addr: SocketAddr,
    pub status: PathStatus,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Settings every session of a manager shares
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub scheduler: SchedulerConfig,
    pub close_grace: Duration,
    /// Addresses advertised to peers in HelloAck
    pub advertised_addrs: Vec<SocketAddr>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            close_grace: DEFAULT_CLOSE_GRACE,
            advertised_addrs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// One listener per address, one path per listener
    pub listen_addrs: Vec<SocketAddr>,
    pub connection: ConnectionConfig,
    pub scheduler: SchedulerConfig,
    /// How long `close` waits for the peer to read everything and finish
    /// its side of every path before aborting
    pub close_grace: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            listen_addrs: Vec::new(),
            connection: ConnectionConfig::default(),
            scheduler: SchedulerConfig::default(),
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }
}

impl ManagerConfig {
    pub fn new(listen_addrs: Vec<SocketAddr>) -> Self {
        Self {
            listen_addrs,
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> SessionResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SessionResult<()> {
        if self.listen_addrs.is_empty() {
            return Err(SessionError::Config("no listen address configured".into()));
        }
        if self.listen_addrs.len() > MAX_PATHS {
            return Err(SessionError::TooManyPaths(MAX_PATHS));
        }
        self.scheduler.validate()?;
        Ok(())
    }

    pub(crate) fn session_config(&self, advertised_addrs: Vec<SocketAddr>) -> SessionConfig {
        SessionConfig {
            scheduler: self.scheduler.clone(),
            close_grace: self.close_grace,
            advertised_addrs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerKind;

    #[test]
    fn test_manager_config_from_json() {
        let config = ManagerConfig::from_json(
            r#"{
                "listen_addrs": ["127.0.0.1:4242", "127.0.0.1:4243"],
                "scheduler": { "weights": [3, 1] },
                "close_grace": { "secs": 1, "nanos": 0 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.listen_addrs.len(), 2);
        assert_eq!(config.scheduler.weights, vec![3, 1]);
        assert_eq!(config.scheduler.kind, SchedulerKind::UserWeighted);
        assert_eq!(config.close_grace, Duration::from_secs(1));
        assert!(config.connection.insecure_skip_verify);
    }

    #[test]
    fn test_manager_config_rejects_empty() {
        assert!(matches!(
            ManagerConfig::from_json("{}"),
            Err(SessionError::Config(_))
        ));
        assert!(matches!(
            ManagerConfig::from_json("not json"),
            Err(SessionError::Config(_))
        ));
    }

    #[test]
    fn test_manager_config_rejects_zero_weight() {
        let mut config = ManagerConfig::new(vec!["127.0.0.1:0".parse().unwrap()]);
        config.scheduler.weights = vec![0];
        assert!(matches!(
            config.validate(),
            Err(SessionError::Scheduler(_))
        ));
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Closed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Closing.is_terminal());
        assert!(!SessionState::Active.is_terminal());
    }
}
