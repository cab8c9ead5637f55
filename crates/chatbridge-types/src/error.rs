//! Error types for the envelope protocol and the attachment transcoder.

use thiserror::Error;

/// Errors raised while decoding or validating a frame.
///
/// Every variant is a protocol fault: callers log it and drop the frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON or has the wrong shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The frame carries neither a `kind` nor a `direction`.
    #[error("frame has neither kind nor direction")]
    Untagged,

    /// The `kind` field names an unknown control frame.
    #[error("unknown frame kind: {0}")]
    UnknownKind(String),

    /// The `direction` field names an unknown direction.
    #[error("unknown direction: {0}")]
    UnknownDirection(String),

    /// The `type` field is missing or names an unknown message type.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The envelope carries no conversation key.
    #[error("envelope is missing a conversation key")]
    MissingConversationKey,

    /// A file envelope has no (decodable) attachments.
    #[error("file envelope has no attachments")]
    EmptyAttachments,

    /// A text envelope unexpectedly carries attachments.
    #[error("text envelope carries {0} attachments")]
    UnexpectedAttachments(usize),
}

/// Errors raised by the attachment transcoder.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The text is not valid base64.
    #[error("invalid base64 payload: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    /// The payload exceeds the configured size limit.
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },
}
