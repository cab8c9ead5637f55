//! Conversation key canonicalization.
//!
//! Both ends of the link derive the conversation key from a human-readable
//! label with the same function, so a reply can find its way back without a
//! shared lookup table. The key doubles as the target container name.

use chatbridge_types::UNKNOWN_CONVERSATION;
use unicode_normalization::UnicodeNormalization;

/// Maximum length of a canonical key, in characters.
pub const MAX_KEY_CHARS: usize = 90;

/// Canonicalizes a conversation label into a routing key.
///
/// Steps: NFKD normalization, lower-casing, dropping everything except ASCII
/// word characters, whitespace and `-`, collapsing whitespace runs into a
/// single `-`, truncating to [`MAX_KEY_CHARS`]. An empty result becomes
/// `"unknown"`.
///
/// The output only contains `[a-z0-9_-]`, which makes the function
/// idempotent.
pub fn canonicalize(label: &str) -> String {
    let kept: String = label
        .nfkd()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();

    let key: String = kept
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .take(MAX_KEY_CHARS)
        .collect();

    if key.is_empty() {
        UNKNOWN_CONVERSATION.to_string()
    } else {
        key
    }
}

/// Returns `true` if `label` canonicalizes to `key`.
///
/// `key` is canonicalized too, so a raw label on either side still matches.
pub fn matches_key(label: &str, key: &str) -> bool {
    canonicalize(label) == canonicalize(key)
}
