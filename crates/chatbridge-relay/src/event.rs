//! Inbound target-platform events.
//!
//! The platform's gateway (or a webhook forwarder in front of it) posts one
//! [`PlatformEvent`] per message created in a bridged container.

use serde::Deserialize;

/// A message created on the target platform.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformEvent {
    /// Platform message id, used only for logging.
    #[serde(default)]
    pub message_id: Option<String>,
    pub author: EventAuthor,
    pub container: EventContainer,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

/// Author of a [`PlatformEvent`].
#[derive(Debug, Clone, Deserialize)]
pub struct EventAuthor {
    pub id: String,
    /// Whether the author is an automated account.
    #[serde(default)]
    pub bot: bool,
}

/// Container a [`PlatformEvent`] was posted in.
#[derive(Debug, Clone, Deserialize)]
pub struct EventContainer {
    pub id: String,
    /// Container name; equals the canonical conversation key for bridged
    /// containers.
    #[serde(default)]
    pub name: Option<String>,
}

/// Reference to an attachment hosted by the target platform.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    pub url: String,
    #[serde(default, alias = "filename")]
    pub name: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_event() {
        let event: PlatformEvent = serde_json::from_str(
            r#"{"author":{"id":"7"},"container":{"id":"c1","name":"jane-doe"},"content":"hi"}"#,
        )
        .unwrap();
        assert!(!event.author.bot);
        assert_eq!(event.container.name.as_deref(), Some("jane-doe"));
        assert!(event.attachments.is_empty());
    }

    #[test]
    fn parses_attachment_refs() {
        let event: PlatformEvent = serde_json::from_str(
            r#"{
                "messageId": "m1",
                "author": {"id": "7", "bot": true},
                "container": {"id": "c1"},
                "attachments": [
                    {"url": "https://cdn.example/a.png", "filename": "a.png", "contentType": "image/png"},
                    {"url": "https://cdn.example/b"}
                ]
            }"#,
        )
        .unwrap();
        assert!(event.author.bot);
        assert_eq!(event.content, "");
        assert_eq!(event.attachments[0].name.as_deref(), Some("a.png"));
        assert_eq!(event.attachments[0].content_type.as_deref(), Some("image/png"));
        assert!(event.attachments[1].name.is_none());
    }
}
