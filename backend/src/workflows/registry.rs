// Trigger registry - subscription index from event signatures and cron
// schedules to workflow ids. Pure lookup; execution is the engine's job.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use cron::Schedule;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use super::conditions::Condition;
use super::model::normalize_cron;
use super::store::{EventBindingRow, WorkflowStore};

/// One active subscription to an `(event_type, event_source)` signature.
#[derive(Debug, Clone)]
pub struct EventBinding {
    pub workflow_id: Uuid,
    pub filter: Option<Condition>,
}

struct ScheduleBinding {
    workflow_id: Uuid,
    schedule: Schedule,
}

#[derive(Default)]
struct RegistryIndex {
    events: HashMap<(String, String), Vec<EventBinding>>,
    schedules: Vec<ScheduleBinding>,
}

/// Explicit subscription table, rebuilt whenever a workflow is created or
/// toggled, instead of scanning all workflows per event.
pub struct TriggerRegistry {
    index: Arc<RwLock<RegistryIndex>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self {
            index: Arc::new(RwLock::new(RegistryIndex::default())),
        }
    }

    /// Rebuild the whole index from the store.
    pub async fn rebuild(&self, store: &WorkflowStore) -> Result<(), sqlx::Error> {
        let events = store.event_bindings().await?;
        let schedules = store.schedule_bindings().await?;
        let next = build_index(events, schedules);
        info!(
            "trigger registry rebuilt: {} event signatures, {} schedules",
            next.events.len(),
            next.schedules.len()
        );
        *self.index.write().await = next;
        Ok(())
    }

    /// Workflow ids subscribed to this exact event signature whose optional
    /// filter passes against the payload. No wildcard matching.
    pub async fn resolve_event(
        &self,
        event_type: &str,
        event_source: &str,
        payload: &Value,
    ) -> Vec<Uuid> {
        let index = self.index.read().await;
        index.resolve_event(event_type, event_source, payload)
    }

    /// Active schedule workflows whose cron expression matches this instant
    /// (minute resolution).
    pub async fn due_at(&self, instant: DateTime<Utc>) -> Vec<Uuid> {
        let index = self.index.read().await;
        index.due_at(instant)
    }
}

impl RegistryIndex {
    fn resolve_event(&self, event_type: &str, event_source: &str, payload: &Value) -> Vec<Uuid> {
        let key = (event_type.to_string(), event_source.to_string());
        let Some(bindings) = self.events.get(&key) else {
            return Vec::new();
        };
        bindings
            .iter()
            .filter(|b| b.filter.as_ref().map(|f| f.evaluate(payload)).unwrap_or(true))
            .map(|b| b.workflow_id)
            .collect()
    }

    fn due_at(&self, instant: DateTime<Utc>) -> Vec<Uuid> {
        let Some(minute) = instant.with_second(0).and_then(|t| t.with_nanosecond(0)) else {
            return Vec::new();
        };
        self.schedules
            .iter()
            .filter(|b| b.schedule.includes(minute))
            .map(|b| b.workflow_id)
            .collect()
    }
}

fn build_index(events: Vec<EventBindingRow>, schedules: Vec<(Uuid, String)>) -> RegistryIndex {
    let mut index = RegistryIndex::default();

    for row in events {
        let filter = row.filter_config.as_ref().and_then(|config| {
            match serde_json::from_value::<Condition>(config.clone()) {
                Ok(condition) => Some(condition),
                Err(e) => {
                    warn!(
                        "workflow {} has an undecodable event filter, subscribing unfiltered: {}",
                        row.workflow_id, e
                    );
                    None
                }
            }
        });
        index
            .events
            .entry((row.event_type, row.event_source))
            .or_default()
            .push(EventBinding {
                workflow_id: row.workflow_id,
                filter,
            });
    }

    for (workflow_id, expr) in schedules {
        match Schedule::from_str(&normalize_cron(&expr)) {
            Ok(schedule) => index.schedules.push(ScheduleBinding {
                workflow_id,
                schedule,
            }),
            Err(e) => warn!(
                "workflow {} has an unparseable cron expression '{}': {}",
                workflow_id, expr, e
            ),
        }
    }

    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn binding(workflow_id: Uuid, event_type: &str, source: &str, filter: Option<Value>) -> EventBindingRow {
        EventBindingRow {
            workflow_id,
            event_type: event_type.to_string(),
            event_source: source.to_string(),
            filter_config: filter,
        }
    }

    #[test]
    fn event_resolution_matches_both_fields_exactly() {
        let id = Uuid::new_v4();
        let index = build_index(
            vec![binding(id, "inventory.low_stock", "system", None)],
            vec![],
        );

        assert_eq!(
            index.resolve_event("inventory.low_stock", "system", &json!({})),
            vec![id]
        );
        assert!(index
            .resolve_event("inventory.low_stock", "coupang", &json!({}))
            .is_empty());
        assert!(index
            .resolve_event("order.created", "system", &json!({}))
            .is_empty());
    }

    #[test]
    fn event_filter_gates_resolution() {
        let id = Uuid::new_v4();
        let filter = json!({
            "condition_type": "field_check",
            "condition_config": {"field": "marketplace", "value": "coupang"}
        });
        let index = build_index(
            vec![binding(id, "order.created", "system", Some(filter))],
            vec![],
        );

        assert_eq!(
            index.resolve_event("order.created", "system", &json!({"marketplace": "coupang"})),
            vec![id]
        );
        assert!(index
            .resolve_event("order.created", "system", &json!({"marketplace": "gmarket"}))
            .is_empty());
    }

    #[test]
    fn undecodable_filter_falls_back_to_unfiltered() {
        let id = Uuid::new_v4();
        let index = build_index(
            vec![binding(id, "order.created", "system", Some(json!({"condition_type": "bogus"})))],
            vec![],
        );
        assert_eq!(
            index.resolve_event("order.created", "system", &json!({})),
            vec![id]
        );
    }

    #[test]
    fn due_at_matches_minute_instants() {
        let id = Uuid::new_v4();
        let index = build_index(vec![], vec![(id, "*/15 * * * *".to_string())]);

        let on_quarter = Utc.with_ymd_and_hms(2026, 3, 1, 8, 15, 42).unwrap();
        assert_eq!(index.due_at(on_quarter), vec![id]);

        let off_quarter = Utc.with_ymd_and_hms(2026, 3, 1, 8, 16, 0).unwrap();
        assert!(index.due_at(off_quarter).is_empty());
    }

    #[test]
    fn unparseable_cron_is_skipped() {
        let index = build_index(vec![], vec![(Uuid::new_v4(), "every full moon".to_string())]);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        assert!(index.due_at(now).is_empty());
    }
}
