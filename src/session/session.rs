//! A logical connection striped across several QUIC paths.
//!
//! Outbound bytes are cut into chunks, each chunk gets the next session-wide
//! sequence number and travels on the path the scheduler picks. Every path
//! has its own receive task feeding Data payloads into the shared
//! reassembler, which `read` drains in order.
//!
//! `write` expects a single writer per session. Concurrent writers are memory
//! safe but their chunks interleave in sequence order.

use crate::metrics::{record_path_added, record_path_failed, set_reorder_pending, SessionMetrics};
use crate::network::{NetworkError, PathStatus, PathStream, QuicTransport};
use crate::protocol::{encode, read_packet, Packet, ReachableAddr};
use crate::reassembly::Reassembler;
use crate::scheduler::{PathId, PathScheduler, SchedulerError};
use crate::session::error::{SessionError, SessionResult};
use crate::session::path::{Path, CLOSE_CODE_NORMAL, CLOSE_CODE_PROTOCOL};
use crate::session::types::{
    PathStats, SessionConfig, SessionState, MAX_PATHS, UNASSIGNED_SESSION_ID,
};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use quinn::{Connection, RecvStream, SendStream};
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

struct WriterState {
    scheduler: PathScheduler,
    next_sequence: u32,
}

struct SessionInner {
    id: AtomicU32,
    state: RwLock<SessionState>,
    /// Indexed by path id, append-only
    paths: RwLock<Vec<Arc<Path>>>,
    writer: Mutex<WriterState>,
    reassembler: Mutex<Reassembler>,
    /// Signalled on every push, on Goodbye and on path loss
    data_ready: Notify,
    /// Path the peer's Goodbye arrived on
    goodbye_path: Mutex<Option<PathId>>,
    closed_locally: AtomicBool,
    failure: Mutex<Option<String>>,
    transport: Arc<QuicTransport>,
    config: SessionConfig,
    metrics: SessionMetrics,
}

/// Handle to a multipath session; clones share the same session
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(
        id: u32,
        transport: Arc<QuicTransport>,
        config: SessionConfig,
        role: &'static str,
    ) -> Self {
        let scheduler = PathScheduler::new(config.scheduler.clone());
        Self {
            inner: Arc::new(SessionInner {
                id: AtomicU32::new(id),
                state: RwLock::new(SessionState::Created),
                paths: RwLock::new(Vec::new()),
                writer: Mutex::new(WriterState {
                    scheduler,
                    next_sequence: 0,
                }),
                reassembler: Mutex::new(Reassembler::new()),
                data_ready: Notify::new(),
                goodbye_path: Mutex::new(None),
                closed_locally: AtomicBool::new(false),
                failure: Mutex::new(None),
                transport,
                config,
                metrics: SessionMetrics::start(role),
            }),
        }
    }

    /// Session id, `0` until a peer has assigned one
    pub fn id(&self) -> u32 {
        self.inner.id.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    /// Paths ever attached, including failed and retired ones
    pub fn path_count(&self) -> usize {
        self.inner.paths.read().len()
    }

    pub fn live_path_count(&self) -> usize {
        self.inner.paths.read().iter().filter(|p| p.is_active()).count()
    }

    pub fn path_stats(&self) -> Vec<PathStats> {
        self.inner.paths.read().iter().map(|p| p.stats()).collect()
    }

    /// Ordered bytes waiting for `read`
    pub fn buffered_len(&self) -> usize {
        self.inner.reassembler.lock().buffered_len()
    }

    pub fn is_same_session(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Open a path to `addr` and join (or create, while the id is unassigned)
    /// the session on the peer.
    ///
    /// Addresses the peer advertises in its HelloAck that are not connected
    /// yet are dialed as extra paths. A failure on one of those is logged and
    /// skipped; a failure on `addr` itself is returned.
    pub async fn connect(&self, addr: SocketAddr) -> SessionResult<()> {
        self.ensure_open()?;
        {
            let mut state = self.inner.state.write();
            if *state == SessionState::Created {
                *state = SessionState::Handshaking;
            }
        }

        let advertised = match self.open_path(addr).await {
            Ok(advertised) => advertised,
            Err(e) => {
                if self.path_count() == 0 {
                    self.set_failed(e.to_string());
                }
                return Err(e);
            }
        };

        let mut pending: VecDeque<SocketAddr> = self.undiscovered(advertised).into();
        while let Some(next) = pending.pop_front() {
            if self.is_connected_to(next) {
                continue;
            }
            match self.open_path(next).await {
                Ok(more) => {
                    for addr in self.undiscovered(more) {
                        if !pending.contains(&addr) {
                            pending.push_back(addr);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = self.id(),
                        addr = %next,
                        error = %e,
                        "could not open advertised path"
                    );
                }
            }
        }

        Ok(())
    }

    /// Dial one path, run the Hello/HelloAck exchange and attach it.
    /// Returns the addresses the peer advertised.
    async fn open_path(&self, addr: SocketAddr) -> SessionResult<Vec<ReachableAddr>> {
        let PathStream {
            connection,
            mut send,
            mut recv,
            remote_addr,
        } = self.inner.transport.dial(addr).await?;

        let hello = encode(&Packet::Hello {
            session_id: self.id(),
        })?;
        if let Err(e) = send.write_all(&hello).await {
            connection.close(CLOSE_CODE_NORMAL.into(), b"handshake failed");
            return Err(NetworkError::from(e).into());
        }
        tracing::debug!(session_id = self.id(), %remote_addr, "sent Hello");

        let reply = match read_packet(&mut recv).await {
            Ok(reply) => reply,
            Err(e) => {
                connection.close(CLOSE_CODE_PROTOCOL.into(), b"handshake failed");
                return Err(e.into());
            }
        };

        match reply {
            Some(Packet::HelloAck { session_id, addrs }) => {
                if let Err(e) = self.adopt_id(session_id) {
                    connection.close(CLOSE_CODE_PROTOCOL.into(), b"session mismatch");
                    return Err(e);
                }
                self.attach_path(connection, send, recv, remote_addr)?;
                Ok(addrs)
            }
            Some(other) => {
                connection.close(CLOSE_CODE_PROTOCOL.into(), b"expected HelloAck");
                Err(SessionError::Handshake(format!(
                    "expected HelloAck from {remote_addr}, got {}",
                    other.packet_type().name()
                )))
            }
            None => {
                connection.close(CLOSE_CODE_NORMAL.into(), b"handshake failed");
                Err(SessionError::Handshake(format!(
                    "{remote_addr} closed the path during handshake"
                )))
            }
        }
    }

    fn adopt_id(&self, assigned: u32) -> SessionResult<()> {
        if assigned == UNASSIGNED_SESSION_ID {
            return Err(SessionError::Handshake(
                "peer answered with an unassigned session id".into(),
            ));
        }
        match self.inner.id.compare_exchange(
            UNASSIGNED_SESSION_ID,
            assigned,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {
                tracing::info!(session_id = assigned, "session id assigned by peer");
                Ok(())
            }
            Err(current) if current == assigned => Ok(()),
            Err(current) => Err(SessionError::Handshake(format!(
                "peer answered for session {assigned}, expected {current}"
            ))),
        }
    }

    fn undiscovered(&self, advertised: Vec<ReachableAddr>) -> Vec<SocketAddr> {
        advertised
            .into_iter()
            .filter_map(|desc| match desc.to_socket_addr() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    tracing::warn!(session_id = self.id(), error = %e, "ignoring advertised address");
                    None
                }
            })
            .filter(|addr| !self.is_connected_to(*addr))
            .collect()
    }

    fn is_connected_to(&self, addr: SocketAddr) -> bool {
        self.inner
            .paths
            .read()
            .iter()
            .any(|p| p.remote_addr() == addr && p.is_active())
    }

    /// Answer an inbound Hello with a HelloAck and attach the path
    pub(crate) async fn accept_path(&self, stream: PathStream) -> SessionResult<PathId> {
        let PathStream {
            connection,
            mut send,
            recv,
            remote_addr,
        } = stream;

        if let Err(e) = self.ensure_open() {
            connection.close(CLOSE_CODE_NORMAL.into(), b"session closed");
            return Err(e);
        }

        let addrs = self
            .inner
            .config
            .advertised_addrs
            .iter()
            .map(|addr| ReachableAddr::text(*addr))
            .collect();
        let ack = encode(&Packet::HelloAck {
            session_id: self.id(),
            addrs,
        })?;
        if let Err(e) = send.write_all(&ack).await {
            connection.close(CLOSE_CODE_NORMAL.into(), b"handshake failed");
            return Err(NetworkError::from(e).into());
        }

        self.attach_path(connection, send, recv, remote_addr)
    }

    fn attach_path(
        &self,
        connection: Connection,
        send: SendStream,
        recv: RecvStream,
        remote_addr: SocketAddr,
    ) -> SessionResult<PathId> {
        let path = {
            let mut paths = self.inner.paths.write();
            if let Err(e) = self.ensure_open() {
                connection.close(CLOSE_CODE_NORMAL.into(), b"session closed");
                return Err(e);
            }
            if paths.len() >= MAX_PATHS {
                connection.close(CLOSE_CODE_NORMAL.into(), b"too many paths");
                return Err(SessionError::TooManyPaths(MAX_PATHS));
            }
            let path_id = self.inner.writer.lock().scheduler.add_path();
            let path = Arc::new(Path::new(path_id, connection, send, remote_addr));
            paths.push(Arc::clone(&path));
            path
        };

        {
            let mut state = self.inner.state.write();
            if matches!(*state, SessionState::Created | SessionState::Handshaking) {
                *state = SessionState::Active;
            }
        }

        record_path_added(path.id());
        tracing::info!(
            session_id = self.id(),
            path = path.id(),
            %remote_addr,
            local_ip = ?path.local_ip(),
            "path attached"
        );

        let path_id = path.id();
        let session = self.clone();
        tokio::spawn(async move { session.receive_loop(path, recv).await });
        Ok(path_id)
    }

    async fn receive_loop(self, path: Arc<Path>, mut recv: RecvStream) {
        let path_id = path.id();

        loop {
            let packet = match read_packet(&mut recv).await {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    // answer the peer's half close so its teardown can complete
                    path.finish_send().await;
                    self.retire_path(&path, "finished by peer");
                    return;
                }
                Err(e) => {
                    if self.is_winding_down() {
                        self.retire_path(&path, "closed during teardown");
                    } else {
                        self.fail_path(&path, &e.to_string());
                    }
                    return;
                }
            };

            match packet {
                Packet::Data {
                    session_id,
                    sequence,
                    payload,
                    ..
                } => {
                    if session_id != self.id() {
                        self.fail_path(&path, &format!("data for foreign session {session_id}"));
                        path.close(CLOSE_CODE_PROTOCOL, b"wrong session");
                        return;
                    }
                    let len = payload.len();
                    path.record_received(len);
                    self.inner.metrics.add_received(path_id, len);

                    let pending = {
                        let mut reassembler = self.inner.reassembler.lock();
                        reassembler.push(sequence, payload);
                        reassembler.pending_len()
                    };
                    set_reorder_pending(pending);
                    self.inner.data_ready.notify_waiters();
                }
                Packet::Goodbye { .. } => self.on_goodbye(path_id),
                Packet::Hello { .. } | Packet::HelloAck { .. } => {
                    self.fail_path(
                        &path,
                        &format!(
                            "unexpected {} on established path",
                            packet.packet_type().name()
                        ),
                    );
                    path.close(CLOSE_CODE_PROTOCOL, b"unexpected handshake");
                    return;
                }
            }
        }
    }

    fn on_goodbye(&self, path_id: PathId) {
        {
            let mut goodbye = self.inner.goodbye_path.lock();
            if goodbye.is_some() {
                return;
            }
            *goodbye = Some(path_id);
        }
        {
            let mut state = self.inner.state.write();
            if !state.is_terminal() {
                *state = SessionState::Closing;
            }
        }
        tracing::info!(session_id = self.id(), path = path_id, "goodbye received");
        self.inner.data_ready.notify_waiters();
    }

    fn is_winding_down(&self) -> bool {
        self.inner.closed_locally.load(Ordering::SeqCst) || self.inner.goodbye_path.lock().is_some()
    }

    fn fail_path(&self, path: &Path, reason: &str) {
        if !path.deactivate(PathStatus::Failed) {
            return;
        }
        tracing::warn!(session_id = self.id(), path = path.id(), reason, "path failed");
        record_path_failed(path.id());
        self.remove_from_rotation(path, reason);
    }

    fn retire_path(&self, path: &Path, reason: &str) {
        if !path.deactivate(PathStatus::Retired) {
            return;
        }
        tracing::debug!(session_id = self.id(), path = path.id(), reason, "path retired");
        self.remove_from_rotation(path, reason);
    }

    fn remove_from_rotation(&self, path: &Path, reason: &str) {
        let live = {
            let mut writer = self.inner.writer.lock();
            let _ = writer.scheduler.remove_path(path.id());
            writer.scheduler.live_paths()
        };

        // a local close() finishes its own teardown
        if live == 0 && !self.inner.closed_locally.load(Ordering::SeqCst) {
            let goodbye_received = self.inner.goodbye_path.lock().is_some();
            if goodbye_received {
                self.set_closed_by_peer();
            } else {
                self.set_failed(format!("last path {} lost: {reason}", path.id()));
            }
        }
        self.inner.data_ready.notify_waiters();
    }

    /// Goodbye received and every path has ended
    fn set_closed_by_peer(&self) {
        {
            let mut state = self.inner.state.write();
            if state.is_terminal() {
                return;
            }
            *state = SessionState::Closed;
        }
        self.inner.metrics.finish();
        tracing::info!(
            session_id = self.id(),
            bytes_received = self.inner.metrics.bytes_received(),
            elapsed = ?self.inner.metrics.elapsed(),
            "session closed by peer"
        );
    }

    fn set_failed(&self, reason: String) {
        tracing::warn!(session_id = self.id(), reason = %reason, "session failed");
        *self.inner.failure.lock() = Some(reason);
        {
            let mut state = self.inner.state.write();
            if !state.is_terminal() {
                *state = SessionState::Failed;
            }
        }
        self.inner.metrics.finish();
        self.inner.data_ready.notify_waiters();
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.inner.closed_locally.load(Ordering::SeqCst)
            || self.inner.goodbye_path.lock().is_some()
        {
            return Err(SessionError::Closed);
        }
        if let Some(reason) = self.inner.failure.lock().clone() {
            return Err(SessionError::AllPathsFailed(reason));
        }
        Ok(())
    }

    fn path(&self, path_id: PathId) -> SessionResult<Arc<Path>> {
        self.inner
            .paths
            .read()
            .get(path_id)
            .cloned()
            .ok_or(SessionError::Scheduler(SchedulerError::UnknownPath(path_id)))
    }

    /// After Goodbye, end of stream is reached once every other path has
    /// stopped delivering and the ordered buffer is empty.
    fn peer_finished(&self) -> bool {
        let Some(goodbye_path) = *self.inner.goodbye_path.lock() else {
            return false;
        };
        self.inner
            .paths
            .read()
            .iter()
            .all(|p| p.id() == goodbye_path || !p.is_active())
    }

    /// Read ordered bytes into `buf`.
    ///
    /// Waits until at least one byte is available. Returns `Ok(0)` once the
    /// peer said Goodbye and everything before it has been read.
    pub async fn read(&self, buf: &mut [u8]) -> SessionResult<usize> {
        loop {
            let notified = self.inner.data_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut reassembler = self.inner.reassembler.lock();
                if buf.is_empty() || !reassembler.is_empty() {
                    return Ok(reassembler.read(buf));
                }
            }

            if self.peer_finished() {
                let pending = self.inner.reassembler.lock().pending_len();
                if pending > 0 {
                    tracing::debug!(
                        session_id = self.id(),
                        pending,
                        "end of stream with chunks still missing their predecessors"
                    );
                }
                return Ok(0);
            }
            if self.inner.closed_locally.load(Ordering::SeqCst) {
                return Err(SessionError::Closed);
            }
            let failure = self.inner.failure.lock().clone();
            if let Some(reason) = failure {
                return Err(SessionError::AllPathsFailed(reason));
            }

            notified.await;
        }
    }

    /// Stripe `buf` across the paths. Returns the bytes handed to the
    /// transport, not bytes delivered.
    pub async fn write(&self, buf: &[u8]) -> SessionResult<usize> {
        self.ensure_open()?;

        let session_id = self.id();
        let chunk_size = self.inner.config.scheduler.chunk_size.max(1);
        let mut total = 0;

        for chunk in buf.chunks(chunk_size) {
            let (path_id, sequence) = {
                let mut writer = self.inner.writer.lock();
                let path_id = writer.scheduler.pick_path(chunk.len())?;
                let sequence = writer.next_sequence;
                writer.next_sequence = sequence.wrapping_add(1);
                (path_id, sequence)
            };
            let path = self.path(path_id)?;

            let frame = encode(&Packet::Data {
                session_id,
                path_id: path_id as u8,
                sequence,
                payload: Bytes::copy_from_slice(chunk),
            })?;

            if let Err(e) = path.send_frame(&frame).await {
                self.fail_path(&path, &e.to_string());
                return Err(e.into());
            }

            path.record_sent(chunk.len());
            self.inner.metrics.add_sent(path_id, chunk.len());
            total += chunk.len();
        }

        Ok(total)
    }

    /// Resolves once `path` has left the Active state
    async fn wait_path_ended(&self, path: &Path) {
        loop {
            let notified = self.inner.data_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !path.is_active() {
                return;
            }
            notified.await;
        }
    }

    /// Finish our side of `path` and wait until the peer has read all of it
    /// and finished its own side in reply
    async fn drain_path(&self, path: &Path) {
        path.finish_send().await;
        self.wait_path_ended(path).await;
    }

    /// Resolves once no path is active any more
    async fn wait_paths_settled(&self) {
        loop {
            let notified = self.inner.data_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.live_path_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Tear the session down.
    ///
    /// Half-closes every live path except the lowest one and waits until the
    /// peer has read each to the end, then sends Goodbye on the lowest live
    /// path (path 0 unless it failed), half-closes it and waits for the peer
    /// to finish its side of every path. Only then are the connections
    /// closed.
    ///
    /// The whole exchange is bounded by `close_grace`. If the peer has not
    /// finished in time the connections are aborted anyway and
    /// [`SessionError::CloseTimeout`] is returned, since written data may
    /// not have been delivered. Calling it again is a no-op.
    pub async fn close(&self) -> SessionResult<()> {
        if self.inner.closed_locally.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        {
            let mut state = self.inner.state.write();
            if !state.is_terminal() {
                *state = SessionState::Closing;
            }
        }

        let grace = self.inner.config.close_grace;
        let paths: Vec<Arc<Path>> = self.inner.paths.read().clone();
        let live: Vec<Arc<Path>> = paths.iter().filter(|p| p.is_active()).cloned().collect();

        let teardown = async {
            let drains = live.iter().skip(1).map(|p| self.drain_path(p));
            futures::future::join_all(drains).await;

            if let Some(path) = live.first() {
                let frame = encode(&Packet::Goodbye {
                    session_id: self.id(),
                })?;
                path.send_frame(&frame).await?;
                tracing::debug!(session_id = self.id(), path = path.id(), "sent Goodbye");
                path.finish_send().await;
            }

            self.wait_paths_settled().await;
            Ok::<(), SessionError>(())
        };

        let outcome = match tokio::time::timeout(grace, teardown).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    session_id = self.id(),
                    grace = ?grace,
                    live_paths = self.live_path_count(),
                    "peer did not finish every path in time; aborting"
                );
                Err(SessionError::CloseTimeout(grace))
            }
        };

        for path in &paths {
            path.close(CLOSE_CODE_NORMAL, b"goodbye");
        }

        {
            let mut state = self.inner.state.write();
            if *state != SessionState::Failed {
                *state = SessionState::Closed;
            }
        }
        self.inner.metrics.finish();
        self.inner.data_ready.notify_waiters();
        tracing::info!(
            session_id = self.id(),
            paths = paths.len(),
            bytes_sent = self.inner.metrics.bytes_sent(),
            bytes_received = self.inner.metrics.bytes_received(),
            elapsed = ?self.inner.metrics.elapsed(),
            "session closed"
        );

        outcome
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("paths", &self.path_count())
            .finish()
    }
}
