//! Shared types for the chatbridge workspace.
//!
//! This crate defines the message envelope protocol spoken over the
//! transport link between the in-browser agent and the relay, plus the
//! attachment transcoder that turns binary payloads into the text-safe form
//! used on the wire.
//!
//! Every other crate in the workspace depends on `chatbridge-types` for the
//! wire model, and nothing here depends on any other workspace crate.

pub mod envelope;
pub mod error;
pub mod transcode;

pub use envelope::{Attachment, Direction, Envelope, Frame, MessageKind};
pub use error::{ProtocolError, TranscodeError};
pub use transcode::Transcoder;

/// Label used when a conversation key canonicalizes to nothing.
pub const UNKNOWN_CONVERSATION: &str = "unknown";

/// Default delay before the agent retries a dropped link.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2_000;

/// Default maximum size of a single link frame (32 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;
