// Workflow data model - definitions, trigger configuration, execution log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::actions::ActionKind;
use super::conditions::Condition;

/// How a workflow gets invoked. Closed set; anything else is rejected at
/// the deserialization boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Event,
    Schedule,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Schedule => "schedule",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "event" => Some(Self::Event),
            "schedule" => Some(Self::Schedule),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Trigger-type-specific configuration. Kept permissive on purpose: an
/// event workflow missing `event_type`/`event_source` is accepted but never
/// subscribed (inert), so the fields stay optional rather than forming a
/// closed enum.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TriggerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_source: Option<String>,
    /// Optional predicate applied to the event payload before any rule runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
}

impl TriggerConfig {
    /// An event workflow only gets a subscription row when both halves of
    /// the signature are present.
    pub fn event_signature(&self) -> Option<(&str, &str)> {
        match (self.event_type.as_deref(), self.event_source.as_deref()) {
            (Some(t), Some(s)) => Some((t, s)),
            _ => None,
        }
    }
}

/// One condition->action pair as submitted on creation. Order within the
/// submitted list defines `rule_order`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleSpec {
    #[serde(flatten)]
    pub condition: Condition,
    #[serde(flatten)]
    pub action: ActionKind,
}

/// Creation request after boundary validation.
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    pub config: TriggerConfig,
    pub rules: Vec<RuleSpec>,
}

/// A stored workflow definition (rules are loaded separately, always fresh).
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    pub config: TriggerConfig,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// List item enriched with execution statistics.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSummary {
    #[serde(flatten)]
    pub definition: WorkflowDefinition,
    pub execution_count: i64,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub avg_execution_time_ms: Option<f64>,
}

/// Conjunctive list filters. `None` means "no constraint", which is distinct
/// from filtering on `is_active = false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowFilter {
    pub trigger_type: Option<TriggerType>,
    pub is_active: Option<bool>,
}

/// Terminal outcome of one invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success,
    Partial,
    Failed,
}

impl ExecutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One row of the append-only execution log. Never mutated after completion.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_ms: Option<i64>,
    pub outcome: ExecutionOutcome,
    pub triggering_context: serde_json::Value,
}

/// Inbound domain event, e.g. `inventory.low_stock` from the stock monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_type: String,
    pub event_source: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Normalize a user-supplied cron expression to the six-field form the
/// matcher expects. Five-field expressions get a zero seconds column.
pub fn normalize_cron(expr: &str) -> String {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trigger_type_round_trip() {
        for (t, s) in [
            (TriggerType::Event, "event"),
            (TriggerType::Schedule, "schedule"),
            (TriggerType::Manual, "manual"),
        ] {
            assert_eq!(t.as_str(), s);
            assert_eq!(TriggerType::parse(s), Some(t));
        }
        assert_eq!(TriggerType::parse("webhook"), None);
    }

    #[test]
    fn event_signature_requires_both_fields() {
        let mut config = TriggerConfig {
            event_type: Some("inventory.low_stock".into()),
            event_source: None,
            ..Default::default()
        };
        assert!(config.event_signature().is_none());

        config.event_source = Some("system".into());
        assert_eq!(
            config.event_signature(),
            Some(("inventory.low_stock", "system"))
        );
    }

    #[test]
    fn rule_spec_deserializes_flat_shape() {
        let rule: RuleSpec = serde_json::from_value(json!({
            "condition_type": "threshold",
            "condition_config": {"field": "stock_quantity", "operator": "<=", "value": 10},
            "action_type": "notification",
            "action_config": {"channel": "email"}
        }))
        .unwrap();

        assert!(matches!(rule.condition, Condition::Threshold { .. }));
        assert!(matches!(rule.action, ActionKind::Notification { .. }));
    }

    #[test]
    fn rule_spec_accepts_always_with_empty_config() {
        // Clients spell the empty config out rather than omitting it.
        let rule: RuleSpec = serde_json::from_value(json!({
            "condition_type": "always",
            "condition_config": {},
            "action_type": "notification",
            "action_config": {"channel": "email"}
        }))
        .unwrap();

        assert_eq!(rule.condition, Condition::Always);
        assert!(matches!(rule.action, ActionKind::Notification { .. }));
    }

    #[test]
    fn normalize_cron_pads_five_field_expressions() {
        assert_eq!(normalize_cron("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_cron("0 0 3 * * *"), "0 0 3 * * *");
    }

    #[test]
    fn execution_outcome_round_trip() {
        assert_eq!(ExecutionOutcome::parse("partial"), Some(ExecutionOutcome::Partial));
        assert_eq!(ExecutionOutcome::Failed.as_str(), "failed");
        assert_eq!(ExecutionOutcome::parse("running"), None);
    }
}
