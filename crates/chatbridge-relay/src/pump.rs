//! The delivery pump moves envelopes between the link and the platform.
//!
//! Forward path: an envelope from the agent is resolved to a container and
//! sent as one platform message. Reverse path: a platform event is turned
//! into an envelope, its attachments fetched concurrently, and the result
//! pushed to the agent. Both paths run on the per-conversation lane so two
//! messages for one conversation are delivered in arrival order.

use crate::event::PlatformEvent;
use crate::fetch::{AttachmentFetcher, FetchError};
use crate::link::LinkManager;
use crate::serial::KeyedSerializer;
use chatbridge_routing::{canonicalize, ContainerId, ConversationRouter, PlatformError, RouteError};
use chatbridge_types::{Attachment, Direction, Envelope, Frame, ProtocolError};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while delivering a single envelope.
#[derive(Debug, Error)]
pub enum PumpError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("envelope has direction {0}, which this path does not carry")]
    WrongDirection(Direction),

    #[error("no agent connected")]
    NoAgent,

    #[error("failed to encode frame: {0}")]
    Encode(#[from] ProtocolError),
}

/// Outcome of handing a platform event to the pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    IgnoredOwnMessage,
    IgnoredBot,
    IgnoredNoContainerName,
    IgnoredEmpty,
}

impl Submission {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::IgnoredOwnMessage => "own message",
            Self::IgnoredBot => "bot author",
            Self::IgnoredNoContainerName => "container has no name",
            Self::IgnoredEmpty => "no content",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PumpSettings {
    /// The relay's own author id on the platform.
    pub self_id: Option<String>,
    /// Bound on each platform call.
    pub request_timeout: Duration,
    /// Bound on each attachment download.
    pub fetch_timeout: Duration,
    /// How long an idle conversation lane is kept.
    pub lane_idle: Duration,
}

impl Default for PumpSettings {
    fn default() -> Self {
        Self {
            self_id: None,
            request_timeout: Duration::from_secs(15),
            fetch_timeout: Duration::from_secs(15),
            lane_idle: Duration::from_secs(300),
        }
    }
}

#[derive(Clone)]
pub struct DeliveryPump {
    router: ConversationRouter,
    fetcher: Arc<dyn AttachmentFetcher>,
    link: LinkManager,
    lanes: KeyedSerializer,
    settings: Arc<PumpSettings>,
}

impl DeliveryPump {
    pub fn new(
        router: ConversationRouter,
        fetcher: Arc<dyn AttachmentFetcher>,
        link: LinkManager,
        settings: PumpSettings,
    ) -> Self {
        Self {
            router,
            fetcher,
            link,
            lanes: KeyedSerializer::new(settings.lane_idle),
            settings: Arc::new(settings),
        }
    }

    /// Queues an envelope received from the agent for delivery.
    pub fn submit_from_agent(&self, envelope: Envelope) {
        let key = canonicalize(&envelope.conversation_key);
        let pump = self.clone();
        let lane_key = key.clone();
        self.lanes.dispatch(&lane_key, async move {
            let kind = envelope.kind;
            let attachments = envelope.attachments.len();
            match pump.deliver_to_target(envelope).await {
                Ok(container) => tracing::info!(
                    key = %key,
                    container = %container,
                    kind = kind.as_str(),
                    attachments,
                    "delivered message to platform"
                ),
                Err(e) => tracing::error!(key = %key, "failed to deliver message to platform: {}", e),
            }
        });
    }

    /// Resolves the envelope's container and sends it as one message.
    pub async fn deliver_to_target(&self, envelope: Envelope) -> Result<ContainerId, PumpError> {
        if envelope.direction != Direction::SourceToTarget {
            return Err(PumpError::WrongDirection(envelope.direction));
        }

        let timeout = self.settings.request_timeout;
        let resolve = self.router.resolve_target(&envelope.conversation_key);
        let binding = match tokio::time::timeout(timeout, resolve).await {
            Ok(result) => result?,
            Err(_) => return Err(PlatformError::Timeout(timeout).into()),
        };
        let send = self.router.platform().send(
            &binding.container,
            &envelope.content,
            &envelope.attachments,
        );
        match tokio::time::timeout(timeout, send).await {
            Ok(result) => result?,
            Err(_) => return Err(PlatformError::Timeout(timeout).into()),
        }
        Ok(binding.container)
    }

    /// Filters a platform event and queues it for the agent.
    pub fn submit_from_platform(&self, event: PlatformEvent) -> Submission {
        if self.settings.self_id.as_deref() == Some(event.author.id.as_str()) {
            return Submission::IgnoredOwnMessage;
        }
        if event.author.bot {
            return Submission::IgnoredBot;
        }
        let Some(name) = event.container.name.as_deref().filter(|n| !n.trim().is_empty()) else {
            return Submission::IgnoredNoContainerName;
        };
        if event.content.is_empty() && event.attachments.is_empty() {
            return Submission::IgnoredEmpty;
        }

        let key = canonicalize(name);
        let pump = self.clone();
        let lane_key = key.clone();
        self.lanes.dispatch(&lane_key, async move {
            let message_id = event.message_id.clone().unwrap_or_default();
            match pump.relay_to_source(&key, event).await {
                Ok(()) => tracing::info!(key = %key, message_id = %message_id, "relayed platform message to agent"),
                Err(PumpError::NoAgent) => {
                    tracing::warn!(key = %key, message_id = %message_id, "no agent connected, dropping platform message")
                }
                Err(e) => tracing::error!(key = %key, "failed to relay platform message: {}", e),
            }
        });
        Submission::Queued
    }

    /// Builds the reverse envelope for `event` and pushes it to the agent.
    pub async fn relay_to_source(&self, key: &str, event: PlatformEvent) -> Result<(), PumpError> {
        if !self.link.is_connected().await {
            return Err(PumpError::NoAgent);
        }

        let envelope = self.build_reverse_envelope(key, event).await;
        let frame = Frame::Envelope(envelope).encode()?;
        if self.link.send(frame).await {
            Ok(())
        } else {
            Err(PumpError::NoAgent)
        }
    }

    /// Fetches attachments concurrently and assembles the reverse envelope.
    ///
    /// A failed fetch drops that attachment only. If every fetch fails the
    /// result degrades to a text envelope carrying just the content.
    pub async fn build_reverse_envelope(&self, key: &str, event: PlatformEvent) -> Envelope {
        let fetches = event.attachments.iter().map(|reference| async move {
            let result = match tokio::time::timeout(
                self.settings.fetch_timeout,
                self.fetcher.fetch(reference),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(self.settings.fetch_timeout)),
            };
            result.map_err(|e| (reference.url.clone(), e))
        });

        let attachments: Vec<Attachment> = join_all(fetches)
            .await
            .into_iter()
            .filter_map(|result| match result {
                Ok(attachment) => Some(attachment),
                Err((url, e)) => {
                    tracing::warn!(key = %key, url = %url, "skipping attachment: {}", e);
                    None
                }
            })
            .collect();

        if !event.attachments.is_empty() && attachments.is_empty() {
            tracing::warn!(key = %key, "all attachment fetches failed, relaying text only");
        }

        Envelope::message(Direction::TargetToSource, key, event.content, attachments)
    }
}
