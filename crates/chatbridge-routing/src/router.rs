//! Conversation router: conversation key → target container.

use crate::canonical::canonicalize;
use crate::platform::{ContainerId, PlatformError, TargetPlatform};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};

/// Errors raised while resolving a conversation's container.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("failed to resolve container for {key}: {source}")]
    Resolve {
        key: String,
        #[source]
        source: PlatformError,
    },
}

/// A resolved conversation binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Canonical conversation key, also the container name.
    pub key: String,
    pub container: ContainerId,
}

/// Maps conversation keys to target containers, creating them on demand.
///
/// Bindings are cached for the lifetime of the router and never persisted.
/// Each canonical key owns a once-cell, so concurrent first messages for the
/// same key run a single lookup-or-create; the others wait for its result.
/// A failed resolution leaves the cell empty and the next message retries.
#[derive(Clone)]
pub struct ConversationRouter {
    platform: Arc<dyn TargetPlatform>,
    bindings: Arc<Mutex<HashMap<String, Arc<OnceCell<ContainerId>>>>>,
}

impl ConversationRouter {
    pub fn new(platform: Arc<dyn TargetPlatform>) -> Self {
        Self {
            platform,
            bindings: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The platform this router creates containers on.
    pub fn platform(&self) -> &Arc<dyn TargetPlatform> {
        &self.platform
    }

    /// Resolves the container for a conversation key, creating it if absent.
    pub async fn resolve_target(&self, conversation_key: &str) -> Result<Binding, RouteError> {
        let key = canonicalize(conversation_key);

        let cell = {
            let mut bindings = self.bindings.lock().await;
            bindings.entry(key.clone()).or_default().clone()
        };

        let container = cell
            .get_or_try_init(|| self.lookup_or_create(&key))
            .await
            .map_err(|source| RouteError::Resolve {
                key: key.clone(),
                source,
            })?
            .clone();

        Ok(Binding { key, container })
    }

    /// Returns the cached container for a key without touching the platform.
    pub async fn cached(&self, conversation_key: &str) -> Option<ContainerId> {
        let key = canonicalize(conversation_key);
        let bindings = self.bindings.lock().await;
        bindings.get(&key).and_then(|cell| cell.get().cloned())
    }

    /// Number of resolved bindings.
    pub async fn len(&self) -> usize {
        let bindings = self.bindings.lock().await;
        bindings.values().filter(|cell| cell.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn lookup_or_create(&self, key: &str) -> Result<ContainerId, PlatformError> {
        if let Some(existing) = self.platform.find_container(key).await? {
            tracing::debug!(key = %key, container = %existing, "bound existing container");
            return Ok(existing);
        }
        let created = self.platform.create_container(key).await?;
        tracing::info!(key = %key, container = %created, "created container for conversation");
        Ok(created)
    }
}
