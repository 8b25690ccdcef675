use axum::{Router, extract::State, http::StatusCode, response::Json, routing::post};
use serde_json::json;
use std::sync::Arc;

use crate::AppState;
use crate::error::{ApiResult, validation_error};
use crate::workflows::DomainEvent;

pub fn event_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", post(ingest_event))
}

/// Accept a domain event and fan it out to subscribed workflows. Matching
/// happens before the response, execution after, so the caller learns the
/// event was accepted, not whether workflows succeeded.
async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<DomainEvent>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    if event.event_type.trim().is_empty() {
        return Err(validation_error("event_type", "event_type is required"));
    }
    if event.event_source.trim().is_empty() {
        return Err(validation_error("event_source", "event_source is required"));
    }

    state.engine.clone().handle_event(event).await;
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))))
}
