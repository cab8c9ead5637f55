//! The source chat surface as the agent sees it.
//!
//! Scraping the page is someone else's job: observed events arrive already
//! extracted, and replies leave through a [`SourceView`].

use async_trait::async_trait;
use chatbridge_dedup::{EventSignature, NodeId};
use chatbridge_types::Attachment;
use thiserror::Error;

/// An attachment captured from a rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedAttachment {
    /// Where the attachment was found (image src, link href).
    pub source_ref: String,
    pub name: String,
    pub mime_type: String,
    /// `None` when the bytes could not be captured.
    pub payload: Option<Vec<u8>>,
}

/// A message observed in the source view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedEvent {
    /// Identity of the rendered node, if the observer tracks one.
    pub node: Option<NodeId>,
    pub stable_id: Option<String>,
    pub timestamp: Option<String>,
    /// Label of the conversation the message was observed in.
    pub sender_label: String,
    /// Extracted message text.
    pub text: String,
    /// Whole visible text of the message, used when extraction found none.
    pub fallback_text: Option<String>,
    pub attachments: Vec<CapturedAttachment>,
}

impl ObservedEvent {
    pub fn signature(&self) -> EventSignature {
        EventSignature {
            stable_id: self.stable_id.clone(),
            timestamp: self.timestamp.clone(),
            text: self.text.clone(),
            attachment_refs: self
                .attachments
                .iter()
                .map(|a| a.source_ref.clone())
                .collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("message composer not found")]
    ComposerNotFound,

    #[error("injection failed: {0}")]
    Failed(String),
}

/// Actuator for the source chat surface.
#[async_trait]
pub trait SourceView: Send + Sync {
    /// Label of the conversation currently shown, if any.
    fn active_conversation(&self) -> Option<String>;

    /// Types `text` into the composer and sends it.
    async fn inject_text(&self, text: &str) -> Result<(), ViewError>;

    /// Attaches files to the composer with an optional caption and sends.
    async fn inject_attachments(
        &self,
        attachments: &[Attachment],
        caption: &str,
    ) -> Result<(), ViewError>;
}

#[async_trait]
impl<T: SourceView + ?Sized> SourceView for std::sync::Arc<T> {
    fn active_conversation(&self) -> Option<String> {
        (**self).active_conversation()
    }

    async fn inject_text(&self, text: &str) -> Result<(), ViewError> {
        (**self).inject_text(text).await
    }

    async fn inject_attachments(
        &self,
        attachments: &[Attachment],
        caption: &str,
    ) -> Result<(), ViewError> {
        (**self).inject_attachments(attachments, caption).await
    }
}
