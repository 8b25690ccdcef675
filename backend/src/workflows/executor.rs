// Action executor - side-effecting dispatch for matched rules

use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;
use uuid::Uuid;

use super::actions::{ActionKind, ActionOutcome};
use super::store::WorkflowStore;
use crate::services::NotificationService;

/// Per-invocation context handed to condition evaluation and actions.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub payload: Value,
}

/// A `workflow_trigger` action queued for manual invocation.
#[derive(Debug, Clone)]
pub struct QueuedInvocation {
    pub workflow_id: Uuid,
    pub requested_by: Uuid,
}

pub struct ActionExecutor {
    store: WorkflowStore,
    notifier: NotificationService,
    http: reqwest::Client,
    invocations: UnboundedSender<QueuedInvocation>,
}

impl ActionExecutor {
    pub fn new(
        store: WorkflowStore,
        notifier: NotificationService,
        action_timeout: Duration,
        invocations: UnboundedSender<QueuedInvocation>,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(action_timeout).build()?;
        Ok(Self {
            store,
            notifier,
            http,
            invocations,
        })
    }

    /// Perform one action. Failures come back in the outcome, never as an
    /// error, so the caller's chain keeps advancing.
    pub async fn execute(&self, action: &ActionKind, context: &ExecutionContext) -> ActionOutcome {
        info!(
            "executing {} action for workflow {}",
            action.kind(),
            context.workflow_id
        );

        match action {
            ActionKind::Notification { channel, template } => {
                match self
                    .notifier
                    .dispatch(*channel, template.as_deref(), &context.payload)
                    .await
                {
                    Ok(()) => ActionOutcome::succeeded(Some(json!({
                        "channel": channel.as_str(),
                        "template": template,
                    }))),
                    Err(e) => ActionOutcome::failed(e),
                }
            }
            ActionKind::ApiCall {
                endpoint,
                method,
                params,
            } => perform_api_call(&self.http, endpoint, method, params.as_ref()).await,
            ActionKind::DatabaseUpdate { table, set } => {
                let Some(record_id) = context
                    .payload
                    .get("record_id")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<Uuid>().ok())
                else {
                    return ActionOutcome::failed("context payload has no record_id");
                };
                match self.store.apply_update(table, set, record_id).await {
                    Ok(rows) => ActionOutcome::succeeded(Some(json!({
                        "table": table,
                        "rows_affected": rows,
                    }))),
                    Err(e) => ActionOutcome::failed(e),
                }
            }
            ActionKind::WorkflowTrigger { workflow_id } => {
                enqueue_workflow_trigger(&self.invocations, *workflow_id, context)
            }
        }
    }
}

/// Issue the HTTP call for an `api_call` action. Network errors, timeouts
/// and non-2xx statuses are all reported as action failure.
async fn perform_api_call(
    client: &reqwest::Client,
    endpoint: &str,
    method: &str,
    params: Option<&Value>,
) -> ActionOutcome {
    let request = match method.to_uppercase().as_str() {
        "GET" => client.get(endpoint),
        "POST" => client.post(endpoint),
        "PUT" => client.put(endpoint),
        "PATCH" => client.patch(endpoint),
        "DELETE" => client.delete(endpoint),
        other => return ActionOutcome::failed(format!("unsupported HTTP method '{}'", other)),
    };

    let request = match params {
        Some(body) => request.json(body),
        None => request,
    };

    match request.send().await {
        Ok(response) => {
            let status = response.status();
            if status.is_success() {
                ActionOutcome::succeeded(Some(json!({
                    "endpoint": endpoint,
                    "status_code": status.as_u16(),
                })))
            } else {
                ActionOutcome::failed(format!("endpoint returned status {}", status.as_u16()))
            }
        }
        Err(e) => ActionOutcome::failed(format!("request failed: {}", e)),
    }
}

/// Queue a manual invocation of another workflow. Direct self-reference is
/// rejected synchronously before dispatch; indirect cycles (A->B->A) are not
/// detected.
fn enqueue_workflow_trigger(
    queue: &UnboundedSender<QueuedInvocation>,
    target: Uuid,
    context: &ExecutionContext,
) -> ActionOutcome {
    if target == context.workflow_id {
        return ActionOutcome::failed("self-reference rejected");
    }
    match queue.send(QueuedInvocation {
        workflow_id: target,
        requested_by: context.workflow_id,
    }) {
        Ok(()) => ActionOutcome::succeeded(Some(json!({"queued_workflow_id": target}))),
        Err(_) => ActionOutcome::failed("invocation queue is closed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context(workflow_id: Uuid) -> ExecutionContext {
        ExecutionContext {
            execution_id: Uuid::new_v4(),
            workflow_id,
            payload: json!({}),
        }
    }

    #[test]
    fn self_reference_is_rejected_before_dispatch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        let outcome = enqueue_workflow_trigger(&tx, id, &context(id));
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("self-reference rejected"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn trigger_of_another_workflow_is_queued() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let current = Uuid::new_v4();
        let target = Uuid::new_v4();

        let outcome = enqueue_workflow_trigger(&tx, target, &context(current));
        assert!(outcome.success);

        let queued = rx.try_recv().unwrap();
        assert_eq!(queued.workflow_id, target);
        assert_eq!(queued.requested_by, current);
    }

    #[tokio::test]
    async fn api_call_posts_params_and_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/restock"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let outcome = perform_api_call(
            &client,
            &format!("{}/restock", server.uri()),
            "POST",
            Some(&json!({"sku": "A-100", "quantity": 50})),
        )
        .await;

        assert!(outcome.success);
        assert_eq!(outcome.output.unwrap()["status_code"], json!(200));
    }

    #[tokio::test]
    async fn api_call_failure_is_reported_not_thrown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let outcome =
            perform_api_call(&client, &format!("{}/status", server.uri()), "GET", None).await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn api_call_times_out_instead_of_hanging() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let outcome =
            perform_api_call(&client, &format!("{}/slow", server.uri()), "GET", None).await;

        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn unsupported_method_fails_cleanly() {
        let client = reqwest::Client::new();
        let outcome = perform_api_call(&client, "http://localhost:1/x", "TRACE", None).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("TRACE"));
    }
}
