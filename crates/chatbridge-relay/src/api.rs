//! HTTP handlers other than the link upgrade.

use crate::event::PlatformEvent;
use crate::pump::Submission;
use crate::AppState;
use axum::{http::StatusCode, response::IntoResponse, Extension, Json};
use serde_json::{json, Value};
use std::sync::Arc;

/// `GET /health`: liveness plus whether an agent is attached.
pub async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "agentConnected": state.link.is_connected().await,
    }))
}

/// `POST /platform/events`: ingests a message created on the target
/// platform.
///
/// Answers `202 Accepted` once the event is queued; delivery happens in the
/// background. Filtered events get `200 OK` with the reason.
pub async fn platform_event_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(event): Json<PlatformEvent>,
) -> impl IntoResponse {
    match state.pump.submit_from_platform(event) {
        Submission::Queued => (StatusCode::ACCEPTED, Json(json!({ "queued": true }))),
        ignored => {
            tracing::debug!(reason = ignored.as_str(), "ignoring platform event");
            (
                StatusCode::OK,
                Json(json!({ "queued": false, "reason": ignored.as_str() })),
            )
        }
    }
}
