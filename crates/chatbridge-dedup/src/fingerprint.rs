//! Fingerprints: content-derived dedup keys for source-side events.

use sha2::{Digest, Sha256};
use std::fmt;

/// Maximum length, in characters, of the composite signature that is hashed
/// when an event has no stable identifier.
pub const MAX_COMPOSITE_CHARS: usize = 500;

/// The content of a source-side event that identifies it across re-renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSignature {
    /// Identifier supplied by the source platform, when it exposes one.
    pub stable_id: Option<String>,
    /// Rendered timestamp or tooltip label of the event.
    pub timestamp: Option<String>,
    /// Extracted message text.
    pub text: String,
    /// References (URLs) of attachments shown with the event.
    pub attachment_refs: Vec<String>,
}

impl EventSignature {
    /// Returns `true` when nothing identifies the event: no stable id, no
    /// text and no attachment references.
    pub fn is_empty(&self) -> bool {
        self.stable_id
            .as_deref()
            .map_or(true, |id| id.trim().is_empty())
            && self.text.trim().is_empty()
            && self.attachment_refs.iter().all(|r| r.is_empty())
    }

    /// Builds the pre-hash key: the stable id, or
    /// `timestamp::text::ref1|ref2` truncated to [`MAX_COMPOSITE_CHARS`].
    fn key(&self) -> String {
        if let Some(id) = self.stable_id.as_deref().filter(|id| !id.trim().is_empty()) {
            return format!("id:{}", id);
        }
        let refs = self
            .attachment_refs
            .iter()
            .filter(|r| !r.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("|");
        let composite = format!(
            "{}::{}::{}",
            self.timestamp.as_deref().unwrap_or_default(),
            self.text.trim(),
            refs
        );
        let truncated: String = composite.chars().take(MAX_COMPOSITE_CHARS).collect();
        format!("composite:{}", truncated)
    }
}

/// A fixed-width dedup token (128 bits of SHA-256, hex encoded).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derives the fingerprint of an event, or `None` if the event carries
    /// nothing to identify it by.
    pub fn derive(signature: &EventSignature) -> Option<Self> {
        if signature.is_empty() {
            return None;
        }
        let digest = Sha256::digest(signature.key().as_bytes());
        Some(Self(hex::encode(&digest[..16])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
