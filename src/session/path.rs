use crate::network::{NetworkResult, PathStatus};
use crate::scheduler::PathId;
use crate::session::types::PathStats;
use parking_lot::RwLock;
use quinn::{Connection, SendStream};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// QUIC application error code used when a path is torn down on purpose
pub(crate) const CLOSE_CODE_NORMAL: u32 = 0;

/// Application error code for a peer that broke the protocol
pub(crate) const CLOSE_CODE_PROTOCOL: u32 = 1;

/// Send side and bookkeeping of one path. The receive half lives in the
/// path's receive task.
pub(crate) struct Path {
    id: PathId,
    remote_addr: SocketAddr,
    local_ip: Option<IpAddr>,
    connection: Connection,
    send: Mutex<SendStream>,
    status: RwLock<PathStatus>,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl Path {
    pub fn new(id: PathId, connection: Connection, send: SendStream, remote_addr: SocketAddr) -> Self {
        Self {
            id,
            remote_addr,
            local_ip: connection.local_ip(),
            connection,
            send: Mutex::new(send),
            status: RwLock::new(PathStatus::Active),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> PathId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn local_ip(&self) -> Option<IpAddr> {
        self.local_ip
    }

    pub fn status(&self) -> PathStatus {
        *self.status.read()
    }

    pub fn is_active(&self) -> bool {
        self.status() == PathStatus::Active
    }

    /// Move an active path to `status`; returns false if it had already left Active
    pub fn deactivate(&self, status: PathStatus) -> bool {
        let mut current = self.status.write();
        if *current != PathStatus::Active {
            return false;
        }
        *current = status;
        true
    }

    /// Write one encoded frame; frames from concurrent callers never interleave
    pub async fn send_frame(&self, frame: &[u8]) -> NetworkResult<()> {
        let mut send = self.send.lock().await;
        send.write_all(frame).await?;
        Ok(())
    }

    /// Finish the send half without waiting for the peer
    pub async fn finish_send(&self) {
        let mut send = self.send.lock().await;
        let _ = send.finish();
    }

    pub fn close(&self, code: u32, reason: &[u8]) {
        self.connection.close(code.into(), reason);
    }

    pub fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn stats(&self) -> PathStats {
        PathStats {
            path_id: self.id,
            remote_addr: self.remote_addr,
            status: self.status(),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}
