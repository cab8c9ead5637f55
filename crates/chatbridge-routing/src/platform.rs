//! The seam between the relay core and the target messaging platform.

use async_trait::async_trait;
use chatbridge_types::Attachment;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Identifier of a container (channel, thread) on the target platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors reported by a [`TargetPlatform`] implementation.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The request could not be sent or the response could not be read.
    #[error("platform request failed: {0}")]
    Request(String),

    /// The platform answered with a non-success status.
    #[error("platform rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The platform did not answer in time.
    #[error("platform request timed out after {0:?}")]
    Timeout(Duration),
}

/// Operations the relay needs from the target platform.
///
/// Implementors must be cheap to share: the relay keeps a single instance
/// behind an `Arc` and calls it from many tasks at once.
#[async_trait]
pub trait TargetPlatform: Send + Sync {
    /// Looks up a container by its exact name within the workspace.
    async fn find_container(&self, name: &str) -> Result<Option<ContainerId>, PlatformError>;

    /// Creates a text container with the given name.
    async fn create_container(&self, name: &str) -> Result<ContainerId, PlatformError>;

    /// Sends text and attachments to a container as a single message.
    ///
    /// Sending the caption together with its attachments keeps them
    /// associated on the target side.
    async fn send(
        &self,
        container: &ContainerId,
        content: &str,
        attachments: &[Attachment],
    ) -> Result<(), PlatformError>;
}
