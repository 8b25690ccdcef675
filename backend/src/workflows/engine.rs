// Workflow engine - orchestrator facade over store, registry and executor

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::actions::ActionKind;
use super::conditions::Condition;
use super::executor::{ActionExecutor, ExecutionContext, QueuedInvocation};
use super::model::{
    DomainEvent, ExecutionOutcome, NewWorkflow, RuleSpec, TriggerConfig, TriggerType,
    WorkflowExecution, WorkflowFilter, WorkflowSummary, normalize_cron,
};
use super::registry::TriggerRegistry;
use super::store::WorkflowStore;
use crate::error::{AppError, validation_error};
use crate::services::NotificationService;
use crate::validation;

/// Unvalidated creation payload as it arrives from the API.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowDraft {
    pub name: Option<String>,
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub config: TriggerConfig,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

/// What one invocation did, returned synchronously for manual invokes.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub outcome: ExecutionOutcome,
    pub rules_evaluated: usize,
    pub rules_fired: usize,
    pub rules_failed: usize,
    pub execution_time_ms: i64,
}

/// How a single rule fared within one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleDisposition {
    /// Condition was false (or undecodable) - trivially fine.
    Skipped,
    Succeeded,
    Failed,
}

fn classify_outcome(dispositions: &[RuleDisposition]) -> ExecutionOutcome {
    let failed = dispositions
        .iter()
        .filter(|d| **d == RuleDisposition::Failed)
        .count();
    let succeeded = dispositions
        .iter()
        .filter(|d| **d == RuleDisposition::Succeeded)
        .count();

    if failed == 0 {
        ExecutionOutcome::Success
    } else if succeeded > 0 {
        ExecutionOutcome::Partial
    } else {
        ExecutionOutcome::Failed
    }
}

pub struct WorkflowEngine {
    store: WorkflowStore,
    registry: TriggerRegistry,
    executor: ActionExecutor,
}

impl WorkflowEngine {
    /// Build the engine and the queue that `workflow_trigger` actions feed.
    /// The caller spawns `run_invocation_queue` with the returned receiver.
    pub fn new(
        store: WorkflowStore,
        notifier: NotificationService,
        action_timeout: Duration,
    ) -> Result<(Arc<Self>, UnboundedReceiver<QueuedInvocation>), reqwest::Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let executor = ActionExecutor::new(store.clone(), notifier, action_timeout, tx)?;
        let engine = Arc::new(Self {
            store,
            registry: TriggerRegistry::new(),
            executor,
        });
        Ok((engine, rx))
    }

    /// Warm the trigger registry from the store; called once at startup.
    pub async fn warm_up(&self) -> Result<(), sqlx::Error> {
        self.registry.rebuild(&self.store).await
    }

    /// Validate and atomically persist a workflow aggregate, then refresh
    /// the subscription index.
    pub async fn create_workflow(&self, draft: WorkflowDraft) -> Result<Uuid, AppError> {
        let name = validation::string::required(&draft.name, "name")?;
        let description = validation::string::max_length(&draft.description, "description", 2000)?;

        if draft.trigger_type == TriggerType::Schedule {
            let Some(cron) = draft.config.cron.as_deref() else {
                return Err(validation_error("config.cron", "cron is required for schedule workflows"));
            };
            if Schedule::from_str(&normalize_cron(cron)).is_err() {
                return Err(validation_error("config.cron", "cron expression is not valid"));
            }
        }

        let new = NewWorkflow {
            name,
            description,
            trigger_type: draft.trigger_type,
            config: draft.config,
            rules: draft.rules,
        };

        let id = self.store.create_workflow(&new).await?;
        self.registry.rebuild(&self.store).await?;
        Ok(id)
    }

    pub async fn list_workflows(
        &self,
        filter: WorkflowFilter,
    ) -> Result<Vec<WorkflowSummary>, AppError> {
        Ok(self.store.list_workflows(filter).await?)
    }

    /// Idempotent activation toggle. Zero rows affected means the workflow
    /// does not exist, reported distinctly from a confirmed state.
    pub async fn set_active(&self, id: Uuid, is_active: bool) -> Result<(), AppError> {
        let rows = self.store.set_active(id, is_active).await?;
        if rows == 0 {
            return Err(AppError::NotFound("Workflow".to_string()));
        }
        self.registry.rebuild(&self.store).await?;
        Ok(())
    }

    pub async fn list_executions(
        &self,
        workflow_id: Uuid,
        limit: i64,
    ) -> Result<Vec<WorkflowExecution>, AppError> {
        Ok(self.store.list_executions(workflow_id, limit).await?)
    }

    /// Fan an inbound domain event out to every subscribed workflow. Each
    /// invocation runs independently; failures surface only in the
    /// execution log.
    pub async fn handle_event(self: Arc<Self>, event: DomainEvent) {
        let matched = self
            .registry
            .resolve_event(&event.event_type, &event.event_source, &event.payload)
            .await;
        info!(
            "event {}/{} matched {} workflow(s)",
            event.event_type,
            event.event_source,
            matched.len()
        );

        for workflow_id in matched {
            let engine = Arc::clone(&self);
            let payload = event.payload.clone();
            let context = json!({
                "trigger": "event",
                "event_type": event.event_type,
                "event_source": event.event_source,
                "payload": payload,
            });
            tokio::spawn(async move {
                if let Err(e) = engine.run_workflow(workflow_id, payload, context).await {
                    error!("event-triggered workflow {} failed: {}", workflow_id, e);
                }
            });
        }
    }

    /// Fan a wall-clock tick out to every schedule workflow due at that
    /// instant.
    pub async fn handle_schedule_tick(self: Arc<Self>, instant: DateTime<Utc>) {
        let due = self.registry.due_at(instant).await;
        if due.is_empty() {
            return;
        }
        info!("schedule tick at {} matched {} workflow(s)", instant, due.len());

        for workflow_id in due {
            let engine = Arc::clone(&self);
            let payload = json!({"tick": instant.to_rfc3339()});
            let context = json!({"trigger": "schedule", "payload": payload});
            tokio::spawn(async move {
                if let Err(e) = engine.run_workflow(workflow_id, payload, context).await {
                    error!("scheduled workflow {} failed: {}", workflow_id, e);
                }
            });
        }
    }

    /// Direct invocation, bypassing the trigger registry entirely.
    pub async fn invoke_manual(&self, workflow_id: Uuid) -> Result<ExecutionSummary, AppError> {
        let context = json!({"trigger": "manual", "payload": {}});
        self.run_workflow(workflow_id, json!({}), context).await
    }

    /// Drain queued `workflow_trigger` invocations for the life of the
    /// process.
    pub fn run_invocation_queue(
        self: Arc<Self>,
        mut queue: UnboundedReceiver<QueuedInvocation>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(invocation) = queue.recv().await {
                info!(
                    "workflow {} queued by workflow {}",
                    invocation.workflow_id, invocation.requested_by
                );
                let context = json!({
                    "trigger": "workflow_trigger",
                    "requested_by": invocation.requested_by,
                    "payload": {},
                });
                if let Err(e) = self
                    .run_workflow(invocation.workflow_id, json!({}), context)
                    .await
                {
                    error!(
                        "queued workflow {} failed: {}",
                        invocation.workflow_id, e
                    );
                }
            }
        })
    }

    /// Run one workflow's rule chain against a context. Rules run in stored
    /// order with no short-circuiting: a false condition or failed action
    /// never stops later rules. One execution row is recorded per call.
    async fn run_workflow(
        &self,
        workflow_id: Uuid,
        payload: Value,
        triggering_context: Value,
    ) -> Result<ExecutionSummary, AppError> {
        let started_at = Utc::now();
        let Some((definition, rules)) = self.store.load_chain(workflow_id).await? else {
            return Err(AppError::NotFound("Workflow".to_string()));
        };

        let context = ExecutionContext {
            execution_id: Uuid::new_v4(),
            workflow_id,
            payload,
        };

        let mut dispositions = Vec::with_capacity(rules.len());
        for rule in &rules {
            let condition = match Condition::from_parts(&rule.condition_type, &rule.condition_config)
            {
                Ok(condition) => condition,
                Err(e) => {
                    warn!(
                        "workflow {} rule {}: undecodable condition, treating as no match: {}",
                        workflow_id, rule.rule_order, e
                    );
                    dispositions.push(RuleDisposition::Skipped);
                    continue;
                }
            };

            if !condition.evaluate(&context.payload) {
                dispositions.push(RuleDisposition::Skipped);
                continue;
            }

            let action = match ActionKind::from_parts(&rule.action_type, &rule.action_config) {
                Ok(action) => action,
                Err(e) => {
                    warn!(
                        "workflow {} rule {}: undecodable action: {}",
                        workflow_id, rule.rule_order, e
                    );
                    dispositions.push(RuleDisposition::Failed);
                    continue;
                }
            };

            let outcome = self.executor.execute(&action, &context).await;
            if outcome.success {
                dispositions.push(RuleDisposition::Succeeded);
            } else {
                warn!(
                    "workflow {} rule {}: action failed: {}",
                    workflow_id,
                    rule.rule_order,
                    outcome.error.as_deref().unwrap_or("unknown")
                );
                dispositions.push(RuleDisposition::Failed);
            }
        }

        let outcome = classify_outcome(&dispositions);
        let completed_at = Utc::now();
        let execution_time_ms = (completed_at - started_at).num_milliseconds();

        let execution = WorkflowExecution {
            id: context.execution_id,
            workflow_id,
            started_at,
            completed_at: Some(completed_at),
            execution_time_ms: Some(execution_time_ms),
            outcome,
            triggering_context,
        };
        if let Err(e) = self.store.record_execution(&execution).await {
            error!("failed to record execution for workflow {}: {}", workflow_id, e);
        }

        info!(
            "workflow '{}' finished: {} ({} ms)",
            definition.name,
            outcome.as_str(),
            execution_time_ms
        );

        Ok(ExecutionSummary {
            execution_id: execution.id,
            workflow_id,
            outcome,
            rules_evaluated: dispositions.len(),
            rules_fired: dispositions
                .iter()
                .filter(|d| **d != RuleDisposition::Skipped)
                .count(),
            rules_failed: dispositions
                .iter()
                .filter(|d| **d == RuleDisposition::Failed)
                .count(),
            execution_time_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RuleDisposition::{Failed, Skipped, Succeeded};

    #[test]
    fn empty_chain_is_trivially_successful() {
        assert_eq!(classify_outcome(&[]), ExecutionOutcome::Success);
    }

    #[test]
    fn all_conditions_false_counts_as_success() {
        assert_eq!(
            classify_outcome(&[Skipped, Skipped, Skipped]),
            ExecutionOutcome::Success
        );
    }

    #[test]
    fn all_fired_rules_succeeding_is_success() {
        assert_eq!(
            classify_outcome(&[Succeeded, Skipped, Succeeded]),
            ExecutionOutcome::Success
        );
    }

    #[test]
    fn mixed_results_are_partial() {
        assert_eq!(
            classify_outcome(&[Succeeded, Failed]),
            ExecutionOutcome::Partial
        );
    }

    #[test]
    fn only_failures_among_fired_rules_is_failed() {
        assert_eq!(classify_outcome(&[Failed]), ExecutionOutcome::Failed);
        assert_eq!(
            classify_outcome(&[Skipped, Failed, Skipped]),
            ExecutionOutcome::Failed
        );
    }

    #[test]
    fn draft_deserializes_with_defaults() {
        let draft: WorkflowDraft = serde_json::from_value(serde_json::json!({
            "name": "재고 부족 알림",
            "trigger_type": "event",
            "config": {"event_type": "inventory.low_stock", "event_source": "system"}
        }))
        .unwrap();
        assert_eq!(draft.trigger_type, TriggerType::Event);
        assert!(draft.rules.is_empty());
    }
}
