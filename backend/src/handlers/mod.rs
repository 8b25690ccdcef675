use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;
use std::sync::Arc;

use crate::AppState;
use crate::database;

pub mod events;
pub mod workflows;

pub use events::event_routes;
pub use workflows::workflow_routes;

pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let database = database::health_check(&state.db_pool).await;
    let status = if database { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(json!({
            "status": if database { "healthy" } else { "degraded" },
            "service": "sellerdesk-api",
            "database": database,
        })),
    )
}
