//! Downloads attachments referenced by platform events.

use crate::event::AttachmentRef;
use async_trait::async_trait;
use chatbridge_types::{Attachment, TranscodeError, Transcoder};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MIME: &str = "application/octet-stream";

/// Errors raised while fetching a single attachment.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("attachment request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("attachment host answered with status {0}")]
    Status(u16),

    #[error("attachment rejected: {0}")]
    Size(#[from] TranscodeError),

    #[error("attachment download timed out after {0:?}")]
    Timeout(Duration),
}

/// Retrieves attachment bytes from wherever the target platform hosts them.
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    async fn fetch(&self, reference: &AttachmentRef) -> Result<Attachment, FetchError>;
}

/// Fetches attachments over HTTP(S).
pub struct HttpFetcher {
    client: reqwest::Client,
    limits: Transcoder,
}

impl HttpFetcher {
    /// Builds a fetcher whose requests time out after `timeout` and which
    /// refuses payloads larger than `max_bytes`.
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("chatbridge-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            limits: Transcoder::with_limit(max_bytes),
        })
    }
}

#[async_trait]
impl AttachmentFetcher for HttpFetcher {
    async fn fetch(&self, reference: &AttachmentRef) -> Result<Attachment, FetchError> {
        let response = self.client.get(&reference.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        if let Some(length) = response.content_length() {
            self.limits.check_size(length as usize)?;
        }

        let header_mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response.bytes().await?;
        self.limits.check_size(bytes.len())?;

        let mime = reference
            .content_type
            .clone()
            .or(header_mime)
            .unwrap_or_else(|| DEFAULT_MIME.to_string());

        Ok(Attachment::new(
            attachment_name(reference),
            mime,
            bytes.to_vec(),
        ))
    }
}

/// Picks a file name: the declared one, else the last URL path segment.
pub fn attachment_name(reference: &AttachmentRef) -> String {
    if let Some(name) = reference.name.as_deref().filter(|n| !n.trim().is_empty()) {
        return name.to_string();
    }
    url::Url::parse(&reference.url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|segment| !segment.is_empty())
        .unwrap_or_else(|| "attachment".to_string())
}
