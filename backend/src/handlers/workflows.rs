use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::AppState;
use crate::error::{ApiResult, AppError, validation_error};
use crate::workflows::{
    ExecutionSummary, TriggerType, WorkflowDraft, WorkflowExecution, WorkflowFilter,
    WorkflowSummary,
};

#[derive(Deserialize)]
pub struct WorkflowQuery {
    pub trigger_type: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize)]
pub struct ToggleRequest {
    /// Kept optional so an absent field is reported as a validation error
    /// rather than a deserialization failure.
    pub is_active: Option<bool>,
}

#[derive(Deserialize)]
pub struct ExecutionQuery {
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct WorkflowCreated {
    pub workflow_id: Uuid,
}

#[derive(Serialize)]
pub struct WorkflowListResponse {
    pub workflows: Vec<WorkflowSummary>,
    pub total: usize,
}

pub fn workflow_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_workflow).get(list_workflows))
        .route("/:id/active", patch(set_active))
        .route("/:id/invoke", post(invoke_workflow))
        .route("/:id/executions", get(list_executions))
}

async fn create_workflow(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<WorkflowDraft>,
) -> ApiResult<(StatusCode, Json<WorkflowCreated>)> {
    let workflow_id = state.engine.create_workflow(draft).await?;
    Ok((StatusCode::CREATED, Json(WorkflowCreated { workflow_id })))
}

async fn list_workflows(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WorkflowQuery>,
) -> ApiResult<Json<WorkflowListResponse>> {
    let trigger_type = match query.trigger_type.as_deref() {
        Some(raw) => Some(TriggerType::parse(raw).ok_or_else(|| {
            AppError::BadRequest(format!("unknown trigger_type '{}'", raw))
        })?),
        None => None,
    };

    let filter = WorkflowFilter {
        trigger_type,
        is_active: query.is_active,
    };
    let workflows = state.engine.list_workflows(filter).await?;
    let total = workflows.len();
    Ok(Json(WorkflowListResponse { workflows, total }))
}

async fn set_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ToggleRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let Some(is_active) = request.is_active else {
        return Err(validation_error("is_active", "is_active is required"));
    };

    state.engine.set_active(id, is_active).await?;
    let message = if is_active {
        "workflow activated"
    } else {
        "workflow deactivated"
    };
    Ok(Json(json!({ "id": id, "is_active": is_active, "message": message })))
}

async fn invoke_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ExecutionSummary>> {
    let summary = state.engine.invoke_manual(id).await?;
    Ok(Json(summary))
}

async fn list_executions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<ExecutionQuery>,
) -> ApiResult<Json<Vec<WorkflowExecution>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let executions = state.engine.list_executions(id, limit).await?;
    Ok(Json(executions))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_request_distinguishes_absent_from_false() {
        let absent: ToggleRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.is_active, None);

        let explicit: ToggleRequest = serde_json::from_str(r#"{"is_active": false}"#).unwrap();
        assert_eq!(explicit.is_active, Some(false));
    }

    #[test]
    fn create_response_carries_workflow_id_key() {
        let body = serde_json::to_value(WorkflowCreated {
            workflow_id: Uuid::nil(),
        })
        .unwrap();
        assert!(body.get("workflow_id").is_some());
        assert!(body.get("id").is_none());
    }

    #[test]
    fn workflow_query_accepts_partial_filters() {
        let query: WorkflowQuery =
            serde_json::from_str(r#"{"trigger_type": "schedule"}"#).unwrap();
        assert_eq!(query.trigger_type.as_deref(), Some("schedule"));
        assert_eq!(query.is_active, None);
    }
}
