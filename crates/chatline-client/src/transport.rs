//! TCP transport for the client.
//!
//! Provides [`ClientConnection`], which owns the socket on a background task
//! and drives the Sans-IO [`Client`] with whatever arrives. Application code
//! issues commands through the connection handle and reads [`ChatEvent`]s
//! back; it never touches frames.
//!
//! Events are queued without limit. The connection task never waits on the
//! application, so commands are served and the socket is drained even while
//! nobody reads events. Unread events accumulate in memory until the handle
//! is dropped.

use std::collections::VecDeque;

use chatline_proto::{FrameCodec, InboundBuffer};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, tcp::OwnedWriteHalf},
    sync::{mpsc, oneshot},
};

use crate::{
    client::Client,
    error::ClientError,
    event::{ChatEvent, ClientAction, ClientEvent},
};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The connection is gone.
    #[error("connection closed: {0}")]
    Closed(String),

    /// The client state machine refused the command.
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Server's answer to a login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Username admitted.
    Accepted,
    /// Username refused; the connection is still open for another try.
    Rejected {
        /// Server-supplied reason.
        reason: String,
    },
}

/// Command sent to the connection task, with a reply slot.
struct Command {
    event: ClientEvent,
    reply: oneshot::Sender<Result<(), ClientError>>,
}

/// Handle to a chat connection.
///
/// Dropping the handle disconnects.
pub struct ClientConnection {
    /// Commands to the connection task
    commands: mpsc::Sender<Command>,
    /// Events from the connection task
    events: mpsc::UnboundedReceiver<ChatEvent>,
    /// Events read while waiting for something else
    backlog: VecDeque<ChatEvent>,
}

impl ClientConnection {
    /// Connect to a chat server.
    ///
    /// The first event returned by [`Self::next_event`] is
    /// [`ChatEvent::Connected`].
    pub async fn connect(address: &str, port: u16) -> Result<Self, TransportError> {
        Self::connect_with_codec(address, port, FrameCodec::default()).await
    }

    /// Connect with a custom frame size limit.
    pub async fn connect_with_codec(
        address: &str,
        port: u16,
        codec: FrameCodec,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect((address, port))
            .await
            .map_err(|e| TransportError::Connection(format!("{address}:{port}: {e}")))?;
        stream.set_nodelay(true).map_err(|e| TransportError::Connection(e.to_string()))?;

        let mut client = Client::new();
        let connected = client.handle(ClientEvent::Connected)?;

        let (command_tx, command_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut backlog = VecDeque::new();
        for action in connected {
            if let ClientAction::Emit(event) = action {
                backlog.push_back(event);
            }
        }

        tracing::debug!("Connected to {}:{}", address, port);
        tokio::spawn(run_connection(stream, client, codec, command_rx, event_tx));

        Ok(Self { commands: command_tx, events: event_rx, backlog })
    }

    /// Log in and wait for the server's verdict.
    ///
    /// Events that arrive before the verdict stay queued for
    /// [`Self::next_event`].
    pub async fn login(&mut self, username: &str) -> Result<LoginOutcome, TransportError> {
        self.command(ClientEvent::Login { username: username.to_string() }).await?;

        let mut deferred = Vec::new();
        let outcome = loop {
            let Some(event) = self.events.recv().await else {
                break Err(TransportError::Closed("connection task ended".to_string()));
            };

            match event {
                ChatEvent::LoginAccepted => break Ok(LoginOutcome::Accepted),
                ChatEvent::LoginRejected { reason } => break Ok(LoginOutcome::Rejected { reason }),
                ChatEvent::Disconnected { reason } => {
                    deferred.push(ChatEvent::Disconnected { reason: reason.clone() });
                    break Err(TransportError::Closed(reason));
                },
                other => deferred.push(other),
            }
        };

        self.backlog.extend(deferred);
        outcome
    }

    /// Send a chat line. Refused locally until a login was accepted.
    pub async fn send_text(&mut self, body: &str) -> Result<(), TransportError> {
        self.command(ClientEvent::SendText { body: body.to_string() }).await
    }

    /// Log out (if logged in) and close the connection.
    pub async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.command(ClientEvent::Disconnect).await
    }

    /// Next event for the application. `None` once the connection task has
    /// ended and every event was delivered.
    pub async fn next_event(&mut self) -> Option<ChatEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        self.events.recv().await
    }

    async fn command(&mut self, event: ClientEvent) -> Result<(), TransportError> {
        let (reply, response) = oneshot::channel();

        self.commands
            .send(Command { event, reply })
            .await
            .map_err(|_| TransportError::Closed("connection task ended".to_string()))?;

        response
            .await
            .map_err(|_| TransportError::Closed("connection task ended".to_string()))?
            .map_err(TransportError::from)
    }
}

/// What the connection task should do after executing actions.
enum Flow {
    Continue,
    Stop,
}

/// Run the connection, bridging between the socket and the handle.
async fn run_connection(
    stream: TcpStream,
    mut client: Client,
    codec: FrameCodec,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<ChatEvent>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut inbound = InboundBuffer::new(codec);

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(Command { event, reply }) = command else {
                    // Handle dropped
                    let actions = client.handle(ClientEvent::Disconnect).unwrap_or_default();
                    execute_actions(&mut client, actions, &mut writer, &events).await;
                    return;
                };

                match client.handle(event) {
                    Ok(actions) => {
                        let flow = execute_actions(&mut client, actions, &mut writer, &events).await;
                        let _ = reply.send(Ok(()));
                        if let Flow::Stop = flow {
                            return;
                        }
                    },
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    },
                }
            },

            read = reader.read_buf(inbound.buf_mut()) => {
                let lost = match read {
                    Ok(0) => Some("server closed connection".to_string()),
                    Ok(_) => drain_inbound(&mut client, &mut inbound, &mut writer, &events).await,
                    Err(e) => Some(format!("read failed: {e}")),
                };

                if let Some(reason) = lost {
                    connection_lost(&mut client, reason, &mut writer, &events).await;
                    return;
                }
            },
        }
    }
}

/// Decode and dispatch every complete frame in the buffer.
///
/// Returns the reason if the connection has to be dropped.
async fn drain_inbound(
    client: &mut Client,
    inbound: &mut InboundBuffer,
    writer: &mut OwnedWriteHalf,
    events: &mpsc::UnboundedSender<ChatEvent>,
) -> Option<String> {
    loop {
        let message = match inbound.next_message() {
            Ok(Some(message)) => message,
            Ok(None) => return None,
            Err(e) => return Some(format!("framing error: {e}")),
        };

        match client.handle(ClientEvent::MessageReceived(message)) {
            Ok(actions) => {
                if let Flow::Stop = execute_actions(client, actions, writer, events).await {
                    return Some("connection closed".to_string());
                }
            },
            Err(e) => return Some(e.to_string()),
        }
    }
}

async fn connection_lost(
    client: &mut Client,
    reason: String,
    writer: &mut OwnedWriteHalf,
    events: &mpsc::UnboundedSender<ChatEvent>,
) {
    tracing::debug!("Connection lost: {}", reason);
    let actions = client.handle(ClientEvent::ConnectionLost { reason }).unwrap_or_default();
    execute_actions(client, actions, writer, events).await;
    let _ = writer.shutdown().await;
}

/// Execute client actions in order.
async fn execute_actions(
    client: &mut Client,
    actions: Vec<ClientAction>,
    writer: &mut OwnedWriteHalf,
    events: &mpsc::UnboundedSender<ChatEvent>,
) -> Flow {
    let mut queue = VecDeque::from(actions);

    while let Some(action) = queue.pop_front() {
        match action {
            ClientAction::Send(message) => {
                if let Err(e) = writer.write_all(&FrameCodec::encode(&message)).await {
                    let reason = format!("write failed: {e}");
                    tracing::debug!("{}", reason);
                    queue.extend(
                        client.handle(ClientEvent::ConnectionLost { reason }).unwrap_or_default(),
                    );
                }
            },
            ClientAction::Emit(event) => {
                let closed = matches!(event, ChatEvent::Disconnected { .. });
                // The handle may already be gone; nothing left to tell
                let _ = events.send(event);
                if closed {
                    return Flow::Stop;
                }
            },
            ClientAction::Close { reason } => {
                tracing::debug!("Closing connection: {}", reason);
                let _ = writer.shutdown().await;
            },
        }
    }

    Flow::Continue
}
