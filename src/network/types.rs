use quinn::{Connection, RecvStream, SendStream};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PathStatus {
    Active,
    /// Transport or protocol failure; the path no longer carries traffic
    Failed,
    /// Peer finished its side cleanly
    Retired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Local address outbound paths are dialed from
    pub bind_addr: SocketAddr,
    pub max_idle_timeout: Duration,
    pub keep_alive_interval: Duration,
    /// Accept any server certificate. Listeners use ephemeral self-signed
    /// certificates, so this is on by default.
    pub insecure_skip_verify: bool,
    pub server_name: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            max_idle_timeout: Duration::from_secs(60),
            keep_alive_interval: Duration::from_secs(5),
            insecure_skip_verify: true,
            server_name: "localhost".into(),
        }
    }
}

/// One established path: a QUIC connection and its single bidirectional stream
#[derive(Debug)]
pub struct PathStream {
    pub connection: Connection,
    pub send: SendStream,
    pub recv: RecvStream,
    pub remote_addr: SocketAddr,
}
