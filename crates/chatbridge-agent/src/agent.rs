//! The agent's routing and filtering core.
//!
//! Forward: observed events pass the session tracker, are turned into
//! source→target envelopes keyed by the canonical conversation label, and go
//! out on the link. Reverse: target→source envelopes are rendered only if the
//! view currently shows their conversation.

use crate::link::LinkClient;
use crate::source::{ObservedEvent, SourceView};
use chatbridge_dedup::{Observation, SessionTracker, TrackerSettings};
use chatbridge_routing::{canonicalize, matches_key};
use chatbridge_types::{Attachment, Direction, Envelope, MessageKind};
use std::time::Duration;
use tokio::sync::mpsc;

/// How often expired fingerprints are swept when retention is configured.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// What happened to a target→source envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    Injected,
    /// The view shows another conversation (or none).
    NotActive,
    /// A text reply with nothing to type.
    Empty,
    WrongDirection,
    Failed,
}

/// Builds the forward envelope for an observed event.
///
/// Captured attachments make a file envelope with the text as caption.
/// Without any, the extracted text is sent, falling back to the whole
/// visible text. Returns `None` when there is nothing to send.
pub fn forward_envelope(event: &ObservedEvent) -> Option<Envelope> {
    let key = canonicalize(&event.sender_label);

    let attachments: Vec<Attachment> = event
        .attachments
        .iter()
        .filter_map(|captured| match &captured.payload {
            Some(bytes) => Some(Attachment::new(
                captured.name.clone(),
                captured.mime_type.clone(),
                bytes.clone(),
            )),
            None => {
                tracing::debug!(source_ref = %captured.source_ref, "attachment was not captured, skipping");
                None
            }
        })
        .collect();

    let text = event.text.trim();
    if !attachments.is_empty() {
        return Some(Envelope::file(Direction::SourceToTarget, key, text, attachments));
    }
    if !text.is_empty() {
        return Some(Envelope::text(Direction::SourceToTarget, key, text));
    }
    event
        .fallback_text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| Envelope::text(Direction::SourceToTarget, key, t))
}

pub struct Agent<V> {
    tracker: SessionTracker,
    link: LinkClient,
    view: V,
    retention: bool,
}

impl<V: SourceView> Agent<V> {
    pub fn new(link: LinkClient, view: V, tracker: TrackerSettings) -> Self {
        Self {
            retention: tracker.retention.is_some(),
            tracker: SessionTracker::new(tracker),
            link,
            view,
        }
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    /// Dedups an observed event and sends its envelope.
    ///
    /// Returns the envelope that was queued on the link, if any.
    pub fn handle_observed(&mut self, event: ObservedEvent) -> Option<Envelope> {
        match self.tracker.observe(event.node, &event.signature()) {
            Observation::New(fingerprint) => {
                let envelope = forward_envelope(&event)?;
                tracing::debug!(
                    fingerprint = %fingerprint,
                    key = %envelope.conversation_key,
                    kind = envelope.kind.as_str(),
                    "forwarding observed message"
                );
                match self.link.send(&envelope) {
                    Ok(()) => Some(envelope),
                    Err(e) => {
                        tracing::error!("failed to queue envelope: {}", e);
                        None
                    }
                }
            }
            Observation::Duplicate => None,
            Observation::Noise => {
                tracing::trace!("ignoring empty observation");
                None
            }
        }
    }

    /// Renders a target→source envelope if its conversation is on screen.
    pub async fn handle_reply(&self, envelope: &Envelope) -> ReplyOutcome {
        if envelope.direction != Direction::TargetToSource {
            return ReplyOutcome::WrongDirection;
        }

        let active = self.view.active_conversation();
        let shown = active
            .as_deref()
            .is_some_and(|label| matches_key(label, &envelope.conversation_key));
        if !shown {
            tracing::debug!(
                key = %envelope.conversation_key,
                active = active.as_deref().unwrap_or("<none>"),
                "reply is for another conversation, not rendering"
            );
            return ReplyOutcome::NotActive;
        }

        let result = match envelope.kind {
            MessageKind::File => {
                self.view
                    .inject_attachments(&envelope.attachments, &envelope.content)
                    .await
            }
            MessageKind::Text if envelope.content.is_empty() => return ReplyOutcome::Empty,
            MessageKind::Text => self.view.inject_text(&envelope.content).await,
        };

        match result {
            Ok(()) => {
                tracing::info!(key = %envelope.conversation_key, kind = envelope.kind.as_str(), "rendered reply");
                ReplyOutcome::Injected
            }
            Err(e) => {
                tracing::warn!(key = %envelope.conversation_key, "failed to render reply: {}", e);
                ReplyOutcome::Failed
            }
        }
    }

    /// Drives the agent until the observer channel closes.
    pub async fn run(
        mut self,
        mut observed: mpsc::Receiver<ObservedEvent>,
        mut replies: mpsc::UnboundedReceiver<Envelope>,
    ) {
        self.link.connect();
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            tokio::select! {
                event = observed.recv() => match event {
                    Some(event) => {
                        self.handle_observed(event);
                    }
                    None => break,
                },
                Some(envelope) = replies.recv() => {
                    self.handle_reply(&envelope).await;
                }
                _ = sweep.tick(), if self.retention => {
                    let evicted = self.tracker.evict_expired(std::time::Instant::now());
                    if evicted > 0 {
                        tracing::debug!(evicted, "evicted expired fingerprints");
                    }
                }
            }
        }

        tracing::info!("observer closed, shutting down agent");
        self.link.close();
    }
}
