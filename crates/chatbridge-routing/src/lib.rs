//! Conversation routing for the chatbridge relay.
//!
//! A conversation on the source surface is identified by a human-readable
//! label (the chat header). [`canonicalize`] turns that label into a key that
//! both sides derive identically; the [`ConversationRouter`] binds each key to
//! a container on the target platform, creating the container the first time
//! a message for the conversation arrives.
//!
//! The target platform itself is reached through the [`TargetPlatform`]
//! trait so the router never depends on a concrete client library.

pub mod canonical;
pub mod platform;
pub mod router;

pub use canonical::{canonicalize, matches_key, MAX_KEY_CHARS};
pub use platform::{ContainerId, PlatformError, TargetPlatform};
pub use router::{Binding, ConversationRouter, RouteError};
