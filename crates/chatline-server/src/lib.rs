//! Chatline production server.
//!
//! Production server implementation using Tokio for the async runtime and
//! plain TCP for transport.
//!
//! # Architecture
//!
//! This crate provides production "glue" that wraps [`chatline_core`]'s
//! action-based [`Session`] with real I/O. Each accepted socket gets:
//!
//! - a reader loop that decodes frames, feeds them to the session, and
//!   executes the returned [`SessionAction`]s
//! - a writer task that drains the session's bounded outbound queue to the
//!   socket in FIFO order
//!
//! Sessions never talk to each other directly; all cross-session traffic goes
//! through the shared [`SessionRegistry`].
//!
//! # Components
//!
//! - [`Server`]: Accept loop and connection lifecycle
//! - [`SessionRegistry`]: Username ownership and broadcast fan-out
//! - [`ServerRuntimeConfig`]: Bind address, limits, timeouts

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod registry;

use std::{
    collections::VecDeque,
    future::Future,
    io,
    net::SocketAddr,
    ops::ControlFlow,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use chatline_core::{Session, SessionAction, SessionConfig, SessionError, SessionId};
use chatline_proto::{DEFAULT_PORT, FrameCodec, InboundBuffer};
pub use error::ServerError;
pub use registry::{Registration, SessionHandle, SessionRegistry};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    sync::{Notify, mpsc},
    time::{Instant, MissedTickBehavior},
};

/// Default number of frames buffered per session before it is evicted.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Default maximum number of concurrent connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

/// How long a closing connection may spend flushing its queue.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:1967")
    pub bind_address: String,
    /// Connections beyond this are closed immediately on accept
    pub max_connections: usize,
    /// Frames queued per session before the session is evicted
    pub outbound_queue_capacity: usize,
    /// How often each session checks its timeouts
    pub tick_interval: Duration,
    /// Per-session settings (login timeout, frame size limit)
    pub session: SessionConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{DEFAULT_PORT}"),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            tick_interval: Duration::from_secs(1),
            session: SessionConfig::default(),
        }
    }
}

impl ServerRuntimeConfig {
    fn validate(&self) -> Result<(), ServerError> {
        if self.max_connections == 0 {
            return Err(ServerError::Config("max_connections must be at least 1".to_string()));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(ServerError::Config(
                "outbound_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(ServerError::Config("tick_interval must be non-zero".to_string()));
        }
        if self.session.codec.max_frame_size() == 0 {
            return Err(ServerError::Config("max_frame_size must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Production Chatline server.
///
/// Owns the listening socket and the shared registry. Each accepted
/// connection runs on its own task; the registry is the only state they
/// share.
pub struct Server {
    /// Listening socket
    listener: TcpListener,
    /// Username registry shared by every connection
    registry: Arc<SessionRegistry>,
    /// Runtime configuration
    config: Arc<ServerRuntimeConfig>,
    /// Source of session ids
    next_session_id: AtomicU64,
    /// Live connection count, for the `max_connections` limit
    active_connections: Arc<AtomicUsize>,
}

impl Server {
    /// Validate the configuration and bind the listening socket.
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let listener = TcpListener::bind(&config.bind_address).await.map_err(|e| {
            ServerError::Config(format!("failed to bind {}: {e}", config.bind_address))
        })?;

        Ok(Self {
            listener,
            registry: Arc::new(SessionRegistry::new()),
            config: Arc::new(config),
            next_session_id: AtomicU64::new(1),
            active_connections: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared registry, for inspection.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Run the server, accepting connections until the process exits.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server until `shutdown` completes.
    ///
    /// Stops accepting new connections when `shutdown` resolves. Connections
    /// already running are left to finish on their own tasks.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<(), ServerError> {
        tracing::info!("Server starting on {}", self.local_addr()?);

        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    return Ok(());
                },
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => self.spawn_connection(stream, peer),
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                },
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let Some(guard) =
            ConnectionGuard::acquire(&self.active_connections, self.config.max_connections)
        else {
            tracing::warn!(%peer, "Connection limit reached, refusing connection");
            drop(stream);
            return;
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.registry);
        let config = Arc::clone(&self.config);

        tokio::spawn(async move {
            let _guard = guard;
            tracing::debug!(session_id, %peer, "New connection");

            if let Err(e) = handle_connection(stream, session_id, &registry, &config).await {
                tracing::warn!(session_id, %peer, "Connection error: {}", e);
            }

            tracing::debug!(session_id, %peer, "Connection closed");
        });
    }
}

/// Slot in the connection limit, released on drop.
struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    fn acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()?;
        Some(Self { active: Arc::clone(active) })
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// What woke the connection loop.
enum Wake {
    Read(io::Result<usize>),
    Evicted,
    Tick,
}

/// Drive one connection from accept to close.
///
/// Whatever ends the loop (EOF, I/O error, framing error, protocol
/// violation, logout, eviction, login timeout) goes through
/// [`Session::close`], so the registry entry is always released and the
/// departure is always announced exactly once.
async fn handle_connection(
    stream: TcpStream,
    session_id: SessionId,
    registry: &SessionRegistry,
    config: &ServerRuntimeConfig,
) -> Result<(), ServerError> {
    stream.set_nodelay(true)?;
    let (mut reader, writer) = stream.into_split();

    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_capacity);
    let close = Arc::new(Notify::new());
    let handle = SessionHandle::new(session_id, outbound_tx, Arc::clone(&close));
    let writer_task = tokio::spawn(write_loop(writer, outbound_rx, Arc::clone(&close)));
    let writer_abort = writer_task.abort_handle();

    let mut session = Session::new(session_id, Instant::now(), config.session.clone());
    session.accept(Instant::now())?;

    let mut inbound = InboundBuffer::new(config.session.codec);
    let mut ticker = tokio::time::interval(config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut failure = None;

    'session: loop {
        let wake = tokio::select! {
            read = reader.read_buf(inbound.buf_mut()) => Wake::Read(read),
            () = close.notified() => Wake::Evicted,
            _ = ticker.tick() => Wake::Tick,
        };

        match wake {
            Wake::Read(Ok(0)) => {
                let actions = session.close("peer closed connection");
                if execute_actions(&mut session, actions, &handle, registry).is_break() {
                    break 'session;
                }
            },
            Wake::Read(Ok(_)) => loop {
                let actions = match inbound.next_message() {
                    Ok(Some(message)) => match session.handle_message(message) {
                        Ok(actions) => actions,
                        Err(e) => {
                            tracing::warn!(session_id, "Closing session: {}", e);
                            let reason = e.to_string();
                            failure = Some(ServerError::Session(e));
                            session.close(reason)
                        },
                    },
                    Ok(None) => break,
                    Err(e) => {
                        let e = SessionError::Framing(e);
                        tracing::warn!(session_id, "Closing session: {}", e);
                        let reason = e.to_string();
                        failure = Some(ServerError::Session(e));
                        session.close(reason)
                    },
                };

                if execute_actions(&mut session, actions, &handle, registry).is_break() {
                    break 'session;
                }
            },
            Wake::Read(Err(e)) => {
                let e = SessionError::from(e);
                let actions = session.close(e.to_string());
                failure = Some(ServerError::Session(e));
                if execute_actions(&mut session, actions, &handle, registry).is_break() {
                    break 'session;
                }
            },
            Wake::Evicted => {
                let actions = session.close("outbound queue closed");
                if execute_actions(&mut session, actions, &handle, registry).is_break() {
                    break 'session;
                }
            },
            Wake::Tick => {
                let actions = session.tick(Instant::now());
                if execute_actions(&mut session, actions, &handle, registry).is_break() {
                    break 'session;
                }
            },
        }
    }

    session.finish_close();

    // Dropping the last sender lets the writer flush what is queued and exit
    drop(handle);
    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer_task).await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => return Err(ServerError::Internal(format!("writer task failed: {e}"))),
        Err(_) => {
            tracing::debug!(session_id, "Writer did not drain in time, dropping queue");
            writer_abort.abort();
        },
    }

    failure.map_or(Ok(()), Err)
}

/// Execute session actions in order.
///
/// Returns `Break` once a `Close` action has been executed.
fn execute_actions(
    session: &mut Session<Instant>,
    actions: Vec<SessionAction>,
    handle: &SessionHandle,
    registry: &SessionRegistry,
) -> ControlFlow<()> {
    let session_id = handle.session_id;
    let mut queue = VecDeque::from(actions);

    while let Some(action) = queue.pop_front() {
        match action {
            SessionAction::Send(message) => {
                if let Err(e) = handle.outbound.try_send(FrameCodec::encode(&message)) {
                    tracing::warn!(session_id, "Reply dropped, closing: {}", e);
                    queue.extend(session.close("outbound queue full"));
                }
            },

            SessionAction::Register { username } => {
                let accepted = match registry.try_register(&username, handle.clone()) {
                    Registration::Accepted => true,
                    Registration::UsernameTaken => {
                        tracing::info!(session_id, username = username.as_str(), "Login rejected");
                        false
                    },
                    Registration::QueueUnavailable => {
                        // Not a conflict; the peer could not be told either way
                        queue.extend(session.close("outbound queue full"));
                        continue;
                    },
                };

                match session.login_outcome(accepted) {
                    Ok(follow_up) => queue.extend(follow_up),
                    Err(e) => {
                        tracing::error!(session_id, "Login bookkeeping failed: {}", e);
                        queue.extend(session.close(e.to_string()));
                    },
                }
            },

            SessionAction::Broadcast(message) => {
                registry.broadcast(&message, Some(session_id));
            },

            SessionAction::Deregister { username } => {
                registry.deregister(&username, session_id);
            },

            SessionAction::Close { reason } => {
                tracing::info!(session_id, "Closing connection: {}", reason);
                return ControlFlow::Break(());
            },
        }
    }

    ControlFlow::Continue(())
}

/// Drain the outbound queue to the socket in order.
///
/// Exits when every sender is gone and the queue is empty, or on the first
/// write error (which also wakes the reader so the session closes).
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Bytes>,
    close: Arc<Notify>,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            tracing::debug!("Write failed: {}", e);
            close.notify_one();
            return;
        }
    }

    if let Err(e) = writer.shutdown().await {
        tracing::debug!("Shutdown failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use chatline_core::SessionState;
    use chatline_proto::ChatMessage;

    use super::*;

    #[test]
    fn default_config_matches_protocol_defaults() {
        let config = ServerRuntimeConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0:1967");
        assert_eq!(config.max_connections, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let config = ServerRuntimeConfig { outbound_queue_capacity: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }

    #[test]
    fn login_with_full_queue_closes_instead_of_rejecting() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::channel(1);
        let handle = SessionHandle::new(1, tx, Arc::new(Notify::new()));
        handle.outbound.try_send(Bytes::from_static(b"filler")).unwrap();

        let mut session = Session::new(1, Instant::now(), SessionConfig::default());
        session.accept(Instant::now()).unwrap();
        let actions = session.handle_message(ChatMessage::login("alice")).unwrap();

        assert!(execute_actions(&mut session, actions, &handle, &registry).is_break());
        assert_eq!(session.state(), SessionState::Closing);
        assert!(registry.is_empty());

        // No "username taken" was queued behind the filler
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"filler"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn connection_guard_enforces_limit() {
        let active = Arc::new(AtomicUsize::new(0));

        let first = ConnectionGuard::acquire(&active, 2);
        let second = ConnectionGuard::acquire(&active, 2);
        assert!(first.is_some() && second.is_some());
        assert!(ConnectionGuard::acquire(&active, 2).is_none());

        drop(first);
        assert_eq!(active.load(Ordering::Acquire), 1);
        assert!(ConnectionGuard::acquire(&active, 2).is_some());
    }
}
