use crate::metrics::init_metrics;
use crate::network::{QuicListener, QuicTransport};
use crate::protocol::{read_packet, Packet};
use crate::session::error::{SessionError, SessionResult};
use crate::session::path::CLOSE_CODE_PROTOCOL;
use crate::session::session::Session;
use crate::session::types::{ManagerConfig, SessionConfig, UNASSIGNED_SESSION_ID};
use parking_lot::Mutex;
use quinn::Incoming;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type SessionTable = Arc<Mutex<HashMap<u32, Session>>>;

/// State the accept tasks share
struct AcceptContext {
    transport: Arc<QuicTransport>,
    session_config: SessionConfig,
    sessions: SessionTable,
    accepted: mpsc::UnboundedSender<Session>,
}

/// Listens on a set of addresses and turns inbound paths into sessions.
///
/// A Hello with session id 0 creates a session with a fresh random id; a
/// Hello naming a known id adds a path to that session. Only newly created
/// sessions are handed out by [`SessionManager::accept`].
pub struct SessionManager {
    transport: Arc<QuicTransport>,
    config: ManagerConfig,
    local_addrs: Vec<SocketAddr>,
    sessions: SessionTable,
    accepted: tokio::sync::Mutex<mpsc::UnboundedReceiver<Session>>,
    accept_tasks: Vec<JoinHandle<()>>,
}

impl SessionManager {
    /// Listen on every address in `listen_addrs` with default settings
    pub async fn bind(listen_addrs: Vec<SocketAddr>) -> SessionResult<Self> {
        Self::new(ManagerConfig::new(listen_addrs)).await
    }

    pub async fn new(config: ManagerConfig) -> SessionResult<Self> {
        config.validate()?;
        init_metrics();

        let transport = Arc::new(QuicTransport::new(config.connection.clone()).await?);

        let mut listeners = Vec::with_capacity(config.listen_addrs.len());
        for addr in &config.listen_addrs {
            listeners.push(transport.listen(*addr).await?);
        }
        let local_addrs: Vec<SocketAddr> = listeners.iter().map(|l| l.local_addr()).collect();

        let sessions: SessionTable = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let context = Arc::new(AcceptContext {
            transport: Arc::clone(&transport),
            session_config: config.session_config(local_addrs.clone()),
            sessions: Arc::clone(&sessions),
            accepted: tx,
        });

        let accept_tasks = listeners
            .into_iter()
            .map(|listener| tokio::spawn(Self::accept_loop(listener, Arc::clone(&context))))
            .collect();

        tracing::info!(addrs = ?local_addrs, "session manager listening");

        Ok(Self {
            transport,
            config,
            local_addrs,
            sessions,
            accepted: tokio::sync::Mutex::new(rx),
            accept_tasks,
        })
    }

    async fn accept_loop(listener: QuicListener, context: Arc<AcceptContext>) {
        let local_addr = listener.local_addr();
        loop {
            let incoming = match listener.next_incoming().await {
                Ok(incoming) => incoming,
                Err(e) => {
                    tracing::debug!(%local_addr, error = %e, "listener stopped");
                    return;
                }
            };

            let context = Arc::clone(&context);
            tokio::spawn(async move {
                let remote_addr = incoming.remote_address();
                if let Err(e) = Self::handle_incoming(incoming, context).await {
                    tracing::warn!(%local_addr, %remote_addr, error = %e, "rejected inbound path");
                }
            });
        }
    }

    async fn handle_incoming(incoming: Incoming, context: Arc<AcceptContext>) -> SessionResult<()> {
        let mut stream = QuicListener::establish(incoming).await?;

        let requested = match read_packet(&mut stream.recv).await {
            Ok(Some(Packet::Hello { session_id })) => session_id,
            Ok(Some(other)) => {
                stream
                    .connection
                    .close(CLOSE_CODE_PROTOCOL.into(), b"expected Hello");
                return Err(SessionError::Handshake(format!(
                    "expected Hello, got {}",
                    other.packet_type().name()
                )));
            }
            Ok(None) => {
                return Err(SessionError::Handshake(
                    "peer closed the path before Hello".into(),
                ))
            }
            Err(e) => {
                stream
                    .connection
                    .close(CLOSE_CODE_PROTOCOL.into(), b"malformed Hello");
                return Err(e.into());
            }
        };

        let (session, created) = {
            let mut sessions = context.sessions.lock();
            sessions.retain(|_, session| !session.state().is_terminal());

            if requested == UNASSIGNED_SESSION_ID {
                let id = Self::allocate_id(&sessions);
                let session = Session::new(
                    id,
                    Arc::clone(&context.transport),
                    context.session_config.clone(),
                    "accept",
                );
                sessions.insert(id, session.clone());
                (session, true)
            } else {
                match sessions.get(&requested) {
                    Some(session) => (session.clone(), false),
                    None => {
                        stream
                            .connection
                            .close(CLOSE_CODE_PROTOCOL.into(), b"unknown session");
                        return Err(SessionError::UnknownSession(requested));
                    }
                }
            }
        };

        let session_id = session.id();
        if let Err(e) = session.accept_path(stream).await {
            if created {
                context.sessions.lock().remove(&session_id);
            }
            return Err(e);
        }

        if created {
            tracing::info!(session_id, "new session accepted");
            // receiver gone means the manager is shutting down
            let _ = context.accepted.send(session);
        }
        Ok(())
    }

    /// Random non-zero id not used by a live session
    fn allocate_id(sessions: &HashMap<u32, Session>) -> u32 {
        loop {
            let id: u32 = rand::random();
            if id != UNASSIGNED_SESSION_ID && !sessions.contains_key(&id) {
                return id;
            }
        }
    }

    /// Wait for the next newly created inbound session
    pub async fn accept(&self) -> SessionResult<Session> {
        self.accepted
            .lock()
            .await
            .recv()
            .await
            .ok_or(SessionError::Closed)
    }

    /// Open a new session to `addr`, along with every path its HelloAck
    /// advertises
    pub async fn connect(&self, addr: SocketAddr) -> SessionResult<Session> {
        let session = Session::new(
            UNASSIGNED_SESSION_ID,
            Arc::clone(&self.transport),
            self.config.session_config(self.local_addrs.clone()),
            "connect",
        );
        session.connect(addr).await?;
        Ok(session)
    }

    /// Bound listen addresses, in configuration order
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Inbound session by id
    pub fn session(&self, id: u32) -> Option<Session> {
        self.sessions.lock().get(&id).cloned()
    }

    /// Inbound sessions that have not reached a terminal state
    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .filter(|s| !s.state().is_terminal())
            .count()
    }

    /// Stop accepting paths and close every inbound session
    pub async fn shutdown(&self) {
        for task in &self.accept_tasks {
            task.abort();
        }

        let sessions: Vec<Session> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in sessions {
            if let Err(e) = session.close().await {
                tracing::debug!(session_id = session.id(), error = %e, "close during shutdown failed");
            }
        }
        self.transport.close();
        tracing::info!("session manager shut down");
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        for task in &self.accept_tasks {
            task.abort();
        }
    }
}
