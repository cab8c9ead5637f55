//! Relay side of the transport link.
//!
//! At most one agent session is current. A new connection supersedes the
//! previous one: the old socket is closed and anything it still sends is
//! ignored.

use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo,
    },
    response::IntoResponse,
    Extension,
};
use chatbridge_types::{Direction, Frame};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, RwLock};
use uuid::Uuid;

/// One accepted agent connection.
#[derive(Debug)]
pub struct LinkSession {
    pub id: Uuid,
    pub remote: SocketAddr,
    tx: mpsc::Sender<String>,
    superseded: Notify,
}

impl LinkSession {
    /// Queues a frame on this session without waiting.
    ///
    /// Returns `false` if the outbound buffer is full or the socket is gone.
    pub fn try_send(&self, frame: String) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(session_id = %self.id, "dropping frame for agent link: {}", e);
                false
            }
        }
    }
}

/// Tracks the current agent session.
#[derive(Clone, Default)]
pub struct LinkManager {
    current: Arc<RwLock<Option<Arc<LinkSession>>>>,
}

impl LinkManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a new session current, superseding any previous one.
    pub async fn attach(&self, remote: SocketAddr, tx: mpsc::Sender<String>) -> Arc<LinkSession> {
        let session = Arc::new(LinkSession {
            id: Uuid::new_v4(),
            remote,
            tx,
            superseded: Notify::new(),
        });

        let previous = {
            let mut current = self.current.write().await;
            current.replace(Arc::clone(&session))
        };

        if let Some(previous) = previous {
            tracing::info!(
                old_session = %previous.id,
                old_remote = %previous.remote,
                new_session = %session.id,
                "agent link superseded by new connection"
            );
            previous.superseded.notify_one();
        }

        session
    }

    /// Clears the current session if it is still `session_id`.
    pub async fn detach(&self, session_id: Uuid) {
        let mut current = self.current.write().await;
        if current.as_ref().is_some_and(|s| s.id == session_id) {
            *current = None;
            tracing::info!(session_id = %session_id, "agent link closed");
        }
    }

    pub async fn is_current(&self, session_id: Uuid) -> bool {
        self.current
            .read()
            .await
            .as_ref()
            .is_some_and(|s| s.id == session_id)
    }

    pub async fn is_connected(&self) -> bool {
        self.current.read().await.is_some()
    }

    /// Sends a frame to the current agent.
    ///
    /// Returns `false` (and logs) when no agent is connected or the frame
    /// could not be queued.
    pub async fn send(&self, frame: String) -> bool {
        let current = self.current.read().await;
        match current.as_ref() {
            Some(session) => session.try_send(frame),
            None => {
                tracing::debug!("no agent connected, frame not sent");
                false
            }
        }
    }
}

/// `GET /ws`: upgrades the agent's connection.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::info!(remote_addr = %addr, "agent link connecting");
    let max = state.max_frame_bytes;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, remote: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();

    // Frames beyond the buffer are dropped with a warning.
    let (tx, mut rx) = mpsc::channel::<String>(state.link_queue_depth);

    let session = state.link.attach(remote, tx).await;
    tracing::info!(session_id = %session.id, remote_addr = %remote, "agent link open");

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            () = session.superseded.notified() => {
                tracing::debug!(session_id = %session.id, "closing superseded agent link");
                break;
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if !state.link.is_current(session.id).await {
                        tracing::debug!(session_id = %session.id, "ignoring frame from superseded session");
                        break;
                    }
                    handle_frame(&state, &session, text.as_str());
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(session_id = %session.id, "agent link read error: {}", e);
                    break;
                }
            },
        }
    }

    state.link.detach(session.id).await;
    send_task.abort();
}

fn handle_frame(state: &AppState, session: &LinkSession, text: &str) {
    let frame = match Frame::decode_with(text, &state.transcoder) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(session_id = %session.id, "dropping malformed frame: {}", e);
            return;
        }
    };

    match frame {
        Frame::Ping => match Frame::Pong.encode() {
            Ok(pong) => {
                session.try_send(pong);
            }
            Err(e) => tracing::error!("failed to encode pong: {}", e),
        },
        Frame::Pong => tracing::trace!(session_id = %session.id, "pong from agent"),
        Frame::Envelope(envelope) if envelope.direction == Direction::SourceToTarget => {
            tracing::debug!(
                session_id = %session.id,
                key = %envelope.conversation_key,
                kind = envelope.kind.as_str(),
                "envelope from agent"
            );
            state.pump.submit_from_agent(envelope);
        }
        Frame::Envelope(envelope) => {
            tracing::warn!(
                session_id = %session.id,
                direction = %envelope.direction,
                "dropping envelope travelling the wrong way"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[tokio::test]
    async fn send_without_agent_is_a_noop() {
        let link = LinkManager::new();
        assert!(!link.is_connected().await);
        assert!(!link.send("{}".to_string()).await);
    }

    #[tokio::test]
    async fn attach_supersedes_previous_session() {
        let link = LinkManager::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);

        let first = link.attach(addr(), tx1).await;
        let second = link.attach(addr(), tx2).await;

        assert!(!link.is_current(first.id).await);
        assert!(link.is_current(second.id).await);

        // The superseded session was signalled.
        tokio::time::timeout(std::time::Duration::from_secs(1), first.superseded.notified())
            .await
            .unwrap();

        assert!(link.send("hello".to_string()).await);
        assert_eq!(rx2.recv().await.as_deref(), Some("hello"));
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_detach_keeps_current_session() {
        let link = LinkManager::new();
        let (tx1, _rx1) = mpsc::channel(4);
        let (tx2, _rx2) = mpsc::channel(4);

        let first = link.attach(addr(), tx1).await;
        let second = link.attach(addr(), tx2).await;

        link.detach(first.id).await;
        assert!(link.is_current(second.id).await);

        link.detach(second.id).await;
        assert!(!link.is_connected().await);
    }

    #[tokio::test]
    async fn full_buffer_drops_frames() {
        let link = LinkManager::new();
        let (tx, _rx) = mpsc::channel(1);
        link.attach(addr(), tx).await;

        assert!(link.send("a".to_string()).await);
        assert!(!link.send("b".to_string()).await);
    }
}
