//! Envelope model and its JSON wire form.
//!
//! A frame on the transport link is either a control frame
//! (`{"kind":"ping"}` / `{"kind":"pong"}`) or a chat envelope tagged with a
//! `direction` and a `type`:
//!
//! ```json
//! {
//!   "direction": "source_to_target",
//!   "type": "file",
//!   "sender": "jane-doe",
//!   "content": "see attached",
//!   "files": [{ "name": "a.png", "mime": "image/png", "base64": "..." }]
//! }
//! ```
//!
//! Source-to-target envelopes carry the conversation key in `sender`,
//! target-to-source envelopes carry it in `recipient`.

use crate::error::ProtocolError;
use crate::transcode::{self, Transcoder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Which way an envelope travels across the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// From the observed web chat towards the target platform.
    SourceToTarget,
    /// From the target platform back into the observed web chat.
    TargetToSource,
}

impl Direction {
    /// Returns the wire label for this direction.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SourceToTarget => "source_to_target",
            Self::TargetToSource => "target_to_source",
        }
    }
}

impl FromStr for Direction {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source_to_target" | "messenger_to_discord" => Ok(Self::SourceToTarget),
            "target_to_source" | "discord_to_messenger" => Ok(Self::TargetToSource),
            other => Err(ProtocolError::UnknownDirection(other.to_string())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chat envelope payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Text,
    File,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::File => "file",
        }
    }
}

impl FromStr for MessageKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "file" => Ok(Self::File),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

/// A binary attachment captured from either platform.
///
/// The payload is shared and immutable once captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub payload: Arc<[u8]>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            payload: payload.into(),
        }
    }

    /// Size of the raw payload in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// One chat message crossing the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub direction: Direction,
    pub kind: MessageKind,
    /// Canonical key of the logical conversation.
    pub conversation_key: String,
    /// Message text, or the caption of a file envelope. Never null.
    pub content: String,
    pub attachments: Vec<Attachment>,
}

impl Envelope {
    /// Builds a text envelope.
    pub fn text(
        direction: Direction,
        conversation_key: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            direction,
            kind: MessageKind::Text,
            conversation_key: conversation_key.into(),
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    /// Builds a file envelope with an optional caption.
    pub fn file(
        direction: Direction,
        conversation_key: impl Into<String>,
        caption: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Self {
        Self {
            direction,
            kind: MessageKind::File,
            conversation_key: conversation_key.into(),
            content: caption.into(),
            attachments,
        }
    }

    /// Builds a text envelope when `attachments` is empty and a file
    /// envelope otherwise.
    pub fn message(
        direction: Direction,
        conversation_key: impl Into<String>,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Self {
        if attachments.is_empty() {
            Self::text(direction, conversation_key, content)
        } else {
            Self::file(direction, conversation_key, content, attachments)
        }
    }

    /// Checks the structural rules every envelope must satisfy.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.conversation_key.trim().is_empty() {
            return Err(ProtocolError::MissingConversationKey);
        }
        match self.kind {
            MessageKind::File if self.attachments.is_empty() => {
                Err(ProtocolError::EmptyAttachments)
            }
            MessageKind::Text if !self.attachments.is_empty() => {
                Err(ProtocolError::UnexpectedAttachments(self.attachments.len()))
            }
            _ => Ok(()),
        }
    }
}

/// Any frame that can cross the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Liveness probe; answered with exactly one [`Frame::Pong`].
    Ping,
    /// Liveness acknowledgment.
    Pong,
    /// A chat envelope.
    Envelope(Envelope),
}

impl Frame {
    /// Decodes a text frame without an attachment size limit.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Self::decode_with(text, &Transcoder::unlimited())
    }

    /// Decodes and validates a text frame.
    ///
    /// Attachments that fail to transcode are dropped with a warning; a
    /// file envelope left with none is rejected.
    pub fn decode_with(text: &str, transcoder: &Transcoder) -> Result<Self, ProtocolError> {
        let wire: WireFrame = serde_json::from_str(text)?;

        if let Some(kind) = wire.kind.as_deref() {
            return match kind {
                "ping" => Ok(Self::Ping),
                "pong" => Ok(Self::Pong),
                other => Err(ProtocolError::UnknownKind(other.to_string())),
            };
        }

        let direction: Direction = wire
            .direction
            .as_deref()
            .ok_or(ProtocolError::Untagged)?
            .parse()?;
        let kind: MessageKind = wire
            .message_type
            .as_deref()
            .unwrap_or_default()
            .parse()?;

        let (primary, fallback) = match direction {
            Direction::SourceToTarget => (wire.sender, wire.recipient),
            Direction::TargetToSource => (wire.recipient, wire.sender),
        };
        let conversation_key = primary
            .filter(|k| !k.trim().is_empty())
            .or(fallback)
            .ok_or(ProtocolError::MissingConversationKey)?;

        let attachments = match kind {
            MessageKind::Text => Vec::new(),
            MessageKind::File => wire
                .files
                .unwrap_or_default()
                .into_iter()
                .filter_map(|file| match transcoder.decode(&file.base64) {
                    Ok(bytes) => Some(Attachment::new(file.name, file.mime, bytes)),
                    Err(e) => {
                        tracing::warn!(name = %file.name, "dropping undecodable attachment: {}", e);
                        None
                    }
                })
                .collect(),
        };

        let envelope = Envelope {
            direction,
            kind,
            conversation_key,
            content: wire.content.unwrap_or_default(),
            attachments,
        };
        envelope.validate()?;
        Ok(Self::Envelope(envelope))
    }

    /// Encodes this frame into its JSON wire form.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let wire = match self {
            Self::Ping => WireFrame::control("ping"),
            Self::Pong => WireFrame::control("pong"),
            Self::Envelope(envelope) => {
                let (sender, recipient) = match envelope.direction {
                    Direction::SourceToTarget => (Some(envelope.conversation_key.clone()), None),
                    Direction::TargetToSource => (None, Some(envelope.conversation_key.clone())),
                };
                let files = match envelope.kind {
                    MessageKind::Text => None,
                    MessageKind::File => Some(
                        envelope
                            .attachments
                            .iter()
                            .map(|a| WireFile {
                                name: a.name.clone(),
                                mime: a.mime_type.clone(),
                                base64: transcode::encode(&a.payload),
                            })
                            .collect(),
                    ),
                };
                WireFrame {
                    kind: None,
                    direction: Some(envelope.direction.as_str().to_string()),
                    message_type: Some(envelope.kind.as_str().to_string()),
                    content: Some(envelope.content.clone()),
                    files,
                    sender,
                    recipient,
                }
            }
        };
        Ok(serde_json::to_string(&wire)?)
    }
}

/// Loosely typed wire shape; every field is optional so that unknown values
/// surface as [`ProtocolError`] variants instead of opaque serde errors.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    direction: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    message_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    files: Option<Vec<WireFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recipient: Option<String>,
}

impl WireFrame {
    fn control(kind: &str) -> Self {
        Self {
            kind: Some(kind.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFile {
    #[serde(default)]
    name: String,
    #[serde(default = "default_mime")]
    mime: String,
    #[serde(default)]
    base64: String,
}

fn default_mime() -> String {
    "application/octet-stream".to_string()
}
