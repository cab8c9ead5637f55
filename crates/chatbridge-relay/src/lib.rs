//! Chatbridge relay library logic.
//!
//! The relay accepts the agent's link on `/ws`, delivers its envelopes to
//! the target platform, and pushes platform messages posted to
//! `/platform/events` back over the link.

pub mod api;
pub mod config;
pub mod event;
pub mod fetch;
pub mod link;
pub mod pump;
pub mod rest;
pub mod serial;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use chatbridge_types::Transcoder;
use link::LinkManager;
use pump::DeliveryPump;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The current agent session.
    pub link: LinkManager,
    /// Delivery in both directions.
    pub pump: DeliveryPump,
    /// Applied to attachments decoded from inbound frames.
    pub transcoder: Transcoder,
    /// Largest frame accepted on the link.
    pub max_frame_bytes: usize,
    /// Outbound frames buffered per session.
    pub link_queue_depth: usize,
}

impl AppState {
    pub fn new(link: LinkManager, pump: DeliveryPump, config: &config::Config) -> Self {
        Self {
            link,
            pump,
            transcoder: Transcoder::with_limit(config.relay.max_attachment_bytes),
            max_frame_bytes: config.link.max_frame_bytes,
            link_queue_depth: config.link.queue_depth.max(1),
        }
    }
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/ws", get(link::ws_handler))
        .route("/platform/events", post(api::platform_event_handler))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
