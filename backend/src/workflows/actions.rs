// Rule actions - the side-effecting half of a workflow rule

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Delivery channel for notification actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Slack,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Slack => "slack",
        }
    }
}

/// Closed set of rule actions, validated once at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action_type", content = "action_config", rename_all = "snake_case")]
pub enum ActionKind {
    /// Dispatch a message to a channel using a named template.
    Notification {
        channel: Channel,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        template: Option<String>,
    },
    /// Issue an HTTP call to an external endpoint.
    ApiCall {
        endpoint: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    /// Scoped update of a domain record through the persistence gateway.
    /// This is the only action type allowed to mutate domain data directly.
    DatabaseUpdate {
        table: String,
        set: Map<String, Value>,
    },
    /// Enqueue a manual invocation of another workflow.
    WorkflowTrigger { workflow_id: Uuid },
}

fn default_method() -> String {
    "POST".to_string()
}

impl ActionKind {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Notification { .. } => "notification",
            Self::ApiCall { .. } => "api_call",
            Self::DatabaseUpdate { .. } => "database_update",
            Self::WorkflowTrigger { .. } => "workflow_trigger",
        }
    }

    pub fn config(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map
                .get("action_config")
                .cloned()
                .unwrap_or_else(|| json!({})),
            _ => json!({}),
        }
    }

    pub fn from_parts(kind: &str, config: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(json!({
            "action_type": kind,
            "action_config": config,
        }))
    }
}

/// Result of executing one action. Failures are carried here, never thrown,
/// so a failing action cannot abort sibling rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn succeeded(output: Option<Value>) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notification_config_shape() {
        let action = ActionKind::from_parts(
            "notification",
            &json!({"channel": "email", "template": "low_stock_alert"}),
        )
        .unwrap();
        assert_eq!(
            action,
            ActionKind::Notification {
                channel: Channel::Email,
                template: Some("low_stock_alert".into()),
            }
        );
    }

    #[test]
    fn api_call_defaults_to_post() {
        let action =
            ActionKind::from_parts("api_call", &json!({"endpoint": "https://api.example.com/restock"}))
                .unwrap();
        match action {
            ActionKind::ApiCall { method, params, .. } => {
                assert_eq!(method, "POST");
                assert!(params.is_none());
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn invalid_channel_rejected() {
        let result = ActionKind::from_parts("notification", &json!({"channel": "pigeon"}));
        assert!(result.is_err());
    }

    #[test]
    fn unknown_action_type_is_an_error() {
        assert!(ActionKind::from_parts("shell_exec", &json!({})).is_err());
    }

    #[test]
    fn stored_parts_round_trip() {
        let id = Uuid::new_v4();
        let action = ActionKind::WorkflowTrigger { workflow_id: id };
        let rebuilt = ActionKind::from_parts(action.kind(), &action.config()).unwrap();
        assert_eq!(rebuilt, action);
    }

    #[test]
    fn outcome_constructors() {
        let ok = ActionOutcome::succeeded(Some(json!({"sent": true})));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let bad = ActionOutcome::failed("channel unreachable");
        assert!(!bad.success);
        assert_eq!(bad.error.as_deref(), Some("channel unreachable"));
    }
}
