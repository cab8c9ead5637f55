//! Agent side of the transport link.
//!
//! A single background task owns the socket. It connects, sends a ping and
//! treats the link as live once the first pong arrives. Envelopes submitted
//! before that are held in a pending queue and flushed in order. When the
//! link drops the task waits for the reconnect delay (or an explicit
//! [`LinkClient::connect`]) and tries again.

use chatbridge_types::{Direction, Envelope, Frame, ProtocolError, Transcoder};
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::{interval_at, sleep, sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Link lifecycle as seen by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Socket open, waiting for the first pong.
    Open,
    /// Pong received; envelopes flow.
    Live,
}

#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub url: String,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
    pub pong_timeout: Duration,
    pub max_frame_bytes: usize,
    pub pending_limit: usize,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] ProtocolError),

    #[error("link task has stopped")]
    Closed,

    #[error("connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),
}

enum Command {
    Send(String),
    Shutdown,
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    nudge: Notify,
    started: AtomicBool,
    commands: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    inbound: mpsc::UnboundedSender<Envelope>,
}

impl Shared {
    fn set(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

/// Handle to the agent's link. Cheap to clone.
#[derive(Clone)]
pub struct LinkClient {
    settings: Arc<LinkSettings>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl LinkClient {
    /// Creates a client and the receiver of target→source envelopes.
    ///
    /// Nothing connects until [`connect`](Self::connect) is called.
    pub fn new(settings: LinkSettings) -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let client = Self {
            settings: Arc::new(settings),
            shared: Arc::new(Shared {
                state,
                nudge: Notify::new(),
                started: AtomicBool::new(false),
                commands: Mutex::new(Some(commands_rx)),
                inbound: inbound_tx,
            }),
            commands: commands_tx,
        };
        (client, inbound_rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Requests a connection.
    ///
    /// A no-op while a connection is open or being established. Otherwise
    /// starts the link task, or cuts short a pending reconnect delay.
    /// Returns `true` if an attempt was started.
    pub fn connect(&self) -> bool {
        if self.state() != ConnectionState::Disconnected {
            tracing::debug!(state = ?self.state(), "connect ignored, link already active");
            return false;
        }

        if self.shared.started.swap(true, Ordering::SeqCst) {
            self.shared.nudge.notify_one();
            return true;
        }

        let commands = self
            .shared
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(commands) = commands else {
            return false;
        };

        self.shared.set(ConnectionState::Connecting);
        tokio::spawn(run(
            Arc::clone(&self.settings),
            Arc::clone(&self.shared),
            commands,
        ));
        true
    }

    /// Queues an envelope for the relay.
    ///
    /// Delivered immediately when live, otherwise held until the link
    /// becomes live.
    pub fn send(&self, envelope: &Envelope) -> Result<(), LinkError> {
        let frame = Frame::Envelope(envelope.clone()).encode()?;
        self.commands
            .send(Command::Send(frame))
            .map_err(|_| LinkError::Closed)
    }

    /// Closes the link and stops reconnecting.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

enum SessionEnd {
    Dropped(String),
    Shutdown,
}

fn enqueue(pending: &mut VecDeque<String>, frame: String, limit: usize) {
    if pending.len() >= limit {
        pending.pop_front();
        tracing::warn!(limit, "pending queue full, dropping oldest envelope");
    }
    pending.push_back(frame);
}

async fn attempt(settings: &LinkSettings) -> Result<Socket, LinkError> {
    let config = WebSocketConfig::default()
        .max_message_size(Some(settings.max_frame_bytes))
        .max_frame_size(Some(settings.max_frame_bytes));

    match timeout(
        settings.connect_timeout,
        connect_async_with_config(settings.url.as_str(), Some(config), false),
    )
    .await
    {
        Ok(Ok((socket, _))) => Ok(socket),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(LinkError::Timeout(settings.connect_timeout)),
    }
}

async fn run(
    settings: Arc<LinkSettings>,
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut pending = VecDeque::new();

    loop {
        shared.set(ConnectionState::Connecting);
        match attempt(&settings).await {
            Ok(socket) => {
                shared.set(ConnectionState::Open);
                tracing::info!(url = %settings.url, "link open");
                match run_session(socket, &settings, &shared, &mut commands, &mut pending).await {
                    SessionEnd::Shutdown => {
                        shared.set(ConnectionState::Disconnected);
                        tracing::info!("link closed by agent");
                        return;
                    }
                    SessionEnd::Dropped(reason) => {
                        tracing::warn!(reason = %reason, "link dropped, retrying soon");
                    }
                }
            }
            Err(e) => tracing::warn!(url = %settings.url, "link connect failed: {}", e),
        }

        shared.set(ConnectionState::Disconnected);

        let delay = sleep(settings.reconnect_delay);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                () = &mut delay => break,
                () = shared.nudge.notified() => break,
                command = commands.recv() => match command {
                    Some(Command::Send(frame)) => enqueue(&mut pending, frame, settings.pending_limit),
                    Some(Command::Shutdown) | None => {
                        tracing::info!("link closed by agent");
                        return;
                    }
                },
            }
        }
    }
}

async fn run_session(
    socket: Socket,
    settings: &LinkSettings,
    shared: &Shared,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    pending: &mut VecDeque<String>,
) -> SessionEnd {
    let (mut sink, mut stream) = socket.split();
    let transcoder = Transcoder::unlimited();

    let ping = match Frame::Ping.encode() {
        Ok(ping) => ping,
        Err(e) => return SessionEnd::Dropped(e.to_string()),
    };
    if let Err(e) = sink.send(Message::Text(ping.clone().into())).await {
        return SessionEnd::Dropped(e.to_string());
    }

    let mut live = false;
    let mut pong_deadline = Some(Instant::now() + settings.pong_timeout);
    let mut heartbeat = interval_at(
        Instant::now() + settings.heartbeat_interval,
        settings.heartbeat_interval,
    );

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match Frame::decode_with(text.as_str(), &transcoder) {
                    Ok(Frame::Pong) => {
                        pong_deadline = None;
                        if !live {
                            live = true;
                            shared.set(ConnectionState::Live);
                            tracing::info!(pending = pending.len(), "link live");
                            while let Some(frame) = pending.pop_front() {
                                if let Err(e) = sink.send(Message::Text(frame.clone().into())).await {
                                    pending.push_front(frame);
                                    return SessionEnd::Dropped(e.to_string());
                                }
                            }
                        }
                    }
                    Ok(Frame::Ping) => {
                        if let Ok(pong) = Frame::Pong.encode() {
                            if let Err(e) = sink.send(Message::Text(pong.into())).await {
                                return SessionEnd::Dropped(e.to_string());
                            }
                        }
                    }
                    Ok(Frame::Envelope(envelope)) if envelope.direction == Direction::TargetToSource => {
                        if shared.inbound.send(envelope).is_err() {
                            tracing::debug!("no consumer for inbound envelopes, dropping");
                        }
                    }
                    Ok(Frame::Envelope(envelope)) => {
                        tracing::warn!(direction = %envelope.direction, "dropping envelope travelling the wrong way");
                    }
                    Err(e) => tracing::warn!("dropping malformed frame: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return SessionEnd::Dropped("closed by relay".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
            },
            command = commands.recv() => match command {
                Some(Command::Send(frame)) if live => {
                    if let Err(e) = sink.send(Message::Text(frame.clone().into())).await {
                        pending.push_front(frame);
                        return SessionEnd::Dropped(e.to_string());
                    }
                }
                Some(Command::Send(frame)) => enqueue(pending, frame, settings.pending_limit),
                Some(Command::Shutdown) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            },
            _ = heartbeat.tick(), if pong_deadline.is_none() => {
                if let Err(e) = sink.send(Message::Text(ping.clone().into())).await {
                    return SessionEnd::Dropped(e.to_string());
                }
                pong_deadline = Some(Instant::now() + settings.pong_timeout);
            },
            () = sleep_until(pong_deadline.unwrap_or_else(Instant::now)), if pong_deadline.is_some() => {
                return SessionEnd::Dropped("pong timeout".to_string());
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_queue_drops_oldest_beyond_limit() {
        let mut pending = VecDeque::new();
        for i in 0..4 {
            enqueue(&mut pending, i.to_string(), 3);
        }
        assert_eq!(pending, VecDeque::from(vec!["1".to_string(), "2".to_string(), "3".to_string()]));
    }

    #[tokio::test]
    async fn starts_disconnected_and_queues_sends() {
        let (client, _inbound) = LinkClient::new(LinkSettings {
            url: "ws://127.0.0.1:1/ws".to_string(),
            connect_timeout: Duration::from_millis(100),
            reconnect_delay: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            max_frame_bytes: 1024,
            pending_limit: 8,
        });
        assert_eq!(client.state(), ConnectionState::Disconnected);

        let envelope = Envelope::text(Direction::SourceToTarget, "jane-doe", "hi");
        assert!(client.send(&envelope).is_ok());
    }
}
