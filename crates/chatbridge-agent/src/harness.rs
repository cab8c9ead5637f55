//! Line-delimited JSON harness for driving the agent from another process.
//!
//! A browser automation layer writes commands on stdin, one JSON object per
//! line:
//!
//! ```text
//! {"command":"focus","label":"Jane Doe"}
//! {"command":"observe","sender":"Jane Doe","text":"hello","timestamp":"10:42"}
//! ```
//!
//! and reads injections from stdout:
//!
//! ```text
//! {"inject":"text","conversation":"Jane Doe","content":"hi"}
//! {"inject":"files","conversation":"Jane Doe","caption":"","files":[{"name":"a.png","mime":"image/png","base64":"..."}]}
//! ```

use crate::source::{CapturedAttachment, ObservedEvent, SourceView, ViewError};
use async_trait::async_trait;
use chatbridge_dedup::NodeId;
use chatbridge_types::{transcode, Attachment};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum HarnessCommand {
    /// A message appeared in the view.
    Observe(ObservedWire),
    /// The view switched conversations; `None` when nothing is open.
    Focus {
        #[serde(default)]
        label: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedWire {
    #[serde(default)]
    pub node: Option<u64>,
    #[serde(default)]
    pub stable_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    pub sender: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub fallback_text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentWire>,
}

#[derive(Debug, Deserialize)]
pub struct AttachmentWire {
    #[serde(rename = "ref")]
    pub source_ref: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
    /// Captured bytes; absent when capture failed.
    #[serde(default)]
    pub base64: Option<String>,
}

impl From<ObservedWire> for ObservedEvent {
    fn from(wire: ObservedWire) -> Self {
        let attachments = wire
            .attachments
            .into_iter()
            .enumerate()
            .map(|(i, a)| {
                let payload = a.base64.as_deref().and_then(|b64| match transcode::decode(b64) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        tracing::warn!(source_ref = %a.source_ref, "undecodable captured attachment: {}", e);
                        None
                    }
                });
                CapturedAttachment {
                    name: a.name.unwrap_or_else(|| format!("file-{}", i + 1)),
                    mime_type: a
                        .mime
                        .unwrap_or_else(|| "application/octet-stream".to_string()),
                    source_ref: a.source_ref,
                    payload,
                }
            })
            .collect();

        ObservedEvent {
            node: wire.node.map(NodeId),
            stable_id: wire.stable_id,
            timestamp: wire.timestamp,
            sender_label: wire.sender,
            text: wire.text,
            fallback_text: wire.fallback_text,
            attachments,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "inject", rename_all = "snake_case")]
pub enum Injection {
    Text {
        conversation: String,
        content: String,
    },
    Files {
        conversation: String,
        caption: String,
        files: Vec<FileWire>,
    },
}

#[derive(Debug, Serialize)]
pub struct FileWire {
    pub name: String,
    pub mime: String,
    pub base64: String,
}

/// [`SourceView`] backed by the harness: tracks the focused conversation
/// and emits injections as JSON lines.
#[derive(Clone)]
pub struct StdioView {
    active: Arc<RwLock<Option<String>>>,
    out: mpsc::UnboundedSender<String>,
}

impl StdioView {
    /// Returns the view and the receiver of serialized injection lines.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (out, rx) = mpsc::unbounded_channel();
        (
            Self {
                active: Arc::new(RwLock::new(None)),
                out,
            },
            rx,
        )
    }

    pub fn focus(&self, label: Option<String>) {
        tracing::debug!(label = label.as_deref().unwrap_or("<none>"), "view focus changed");
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = label;
    }

    fn emit(&self, injection: &Injection) -> Result<(), ViewError> {
        let line = serde_json::to_string(injection).map_err(|e| ViewError::Failed(e.to_string()))?;
        self.out
            .send(line)
            .map_err(|_| ViewError::Failed("output closed".to_string()))
    }

    fn conversation(&self) -> Result<String, ViewError> {
        self.active_conversation().ok_or(ViewError::ComposerNotFound)
    }
}

#[async_trait]
impl SourceView for StdioView {
    fn active_conversation(&self) -> Option<String> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn inject_text(&self, text: &str) -> Result<(), ViewError> {
        self.emit(&Injection::Text {
            conversation: self.conversation()?,
            content: text.to_string(),
        })
    }

    async fn inject_attachments(
        &self,
        attachments: &[Attachment],
        caption: &str,
    ) -> Result<(), ViewError> {
        self.emit(&Injection::Files {
            conversation: self.conversation()?,
            caption: caption.to_string(),
            files: attachments
                .iter()
                .map(|a| FileWire {
                    name: a.name.clone(),
                    mime: a.mime_type.clone(),
                    base64: transcode::encode(&a.payload),
                })
                .collect(),
        })
    }
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<Result<HarnessCommand, serde_json::Error>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str(line))
}
