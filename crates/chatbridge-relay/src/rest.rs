//! REST client for a Discord-style target platform.
//!
//! Containers are guild text channels. Messages with attachments are sent
//! as a single multipart request so the caption stays with its files.

use async_trait::async_trait;
use chatbridge_routing::{ContainerId, PlatformError, TargetPlatform};
use chatbridge_types::Attachment;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Channel type for plain text channels.
const TEXT_CHANNEL: u8 = 0;

#[derive(Debug, Deserialize)]
struct ChannelInfo {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type")]
    kind: u8,
}

#[derive(Serialize)]
struct CreateChannel<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: u8,
}

pub struct RestPlatform {
    client: reqwest::Client,
    api_base: String,
    workspace_id: String,
    timeout: Duration,
}

impl RestPlatform {
    pub fn new(
        api_base: &str,
        token: &str,
        workspace_id: &str,
        timeout: Duration,
    ) -> Result<Self, PlatformError> {
        let mut auth = HeaderValue::from_str(&format!("Bot {}", token))
            .map_err(|e| PlatformError::Request(format!("invalid token: {}", e)))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .user_agent(concat!("chatbridge-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PlatformError::Request(e.to_string()))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            workspace_id: workspace_id.to_string(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn map_error(&self, e: reqwest::Error) -> PlatformError {
        if e.is_timeout() {
            PlatformError::Timeout(self.timeout)
        } else {
            PlatformError::Request(e.to_string())
        }
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, PlatformError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(PlatformError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Builds the multipart form for a message with attachments.
fn message_form(content: &str, attachments: &[Attachment]) -> Result<Form, PlatformError> {
    let descriptors: Vec<_> = attachments
        .iter()
        .enumerate()
        .map(|(i, a)| json!({ "id": i, "filename": a.name }))
        .collect();
    let payload = json!({ "content": content, "attachments": descriptors });

    let mut form = Form::new().text("payload_json", payload.to_string());
    for (i, attachment) in attachments.iter().enumerate() {
        let part = Part::bytes(attachment.payload.to_vec())
            .file_name(attachment.name.clone())
            .mime_str(&attachment.mime_type)
            .or_else(|_| {
                Part::bytes(attachment.payload.to_vec())
                    .file_name(attachment.name.clone())
                    .mime_str("application/octet-stream")
            })
            .map_err(|e| PlatformError::Request(e.to_string()))?;
        form = form.part(format!("files[{}]", i), part);
    }
    Ok(form)
}

#[async_trait]
impl TargetPlatform for RestPlatform {
    async fn find_container(&self, name: &str) -> Result<Option<ContainerId>, PlatformError> {
        let response = self
            .client
            .get(self.url(&format!("/guilds/{}/channels", self.workspace_id)))
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        let channels: Vec<ChannelInfo> = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| self.map_error(e))?;

        Ok(channels
            .into_iter()
            .find(|c| c.kind == TEXT_CHANNEL && c.name.as_deref() == Some(name))
            .map(|c| ContainerId(c.id)))
    }

    async fn create_container(&self, name: &str) -> Result<ContainerId, PlatformError> {
        let response = self
            .client
            .post(self.url(&format!("/guilds/{}/channels", self.workspace_id)))
            .json(&CreateChannel {
                name,
                kind: TEXT_CHANNEL,
            })
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        let channel: ChannelInfo = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| self.map_error(e))?;
        Ok(ContainerId(channel.id))
    }

    async fn send(
        &self,
        container: &ContainerId,
        content: &str,
        attachments: &[Attachment],
    ) -> Result<(), PlatformError> {
        if content.is_empty() && attachments.is_empty() {
            tracing::debug!(container = %container, "nothing to send");
            return Ok(());
        }

        let request = self
            .client
            .post(self.url(&format!("/channels/{}/messages", container)));
        let request = if attachments.is_empty() {
            request.json(&json!({ "content": content }))
        } else {
            request.multipart(message_form(content, attachments)?)
        };

        let response = request.send().await.map_err(|e| self.map_error(e))?;
        self.check(response).await?;
        Ok(())
    }
}
