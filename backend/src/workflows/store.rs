// Persistence gateway - transactional CRUD over the four workflow record types

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use tracing::info;
use uuid::Uuid;

use super::model::{
    ExecutionOutcome, NewWorkflow, TriggerConfig, TriggerType, WorkflowDefinition,
    WorkflowExecution, WorkflowFilter, WorkflowSummary,
};

/// All reads/writes for workflow definitions, rules, event triggers and the
/// execution log. No business logic lives here; the one invariant this type
/// owns is the atomicity of `create_workflow`.
#[derive(Clone)]
pub struct WorkflowStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct WorkflowRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    trigger_type: String,
    trigger_config: Value,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(FromRow)]
struct SummaryRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    trigger_type: String,
    trigger_config: Value,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    execution_count: i64,
    last_executed_at: Option<DateTime<Utc>>,
    avg_execution_time_ms: Option<f64>,
}

/// A stored rule, raw. Condition/action decoding happens per rule at
/// invocation time so one malformed row cannot abort the chain.
#[derive(Debug, Clone, FromRow)]
pub struct RuleRow {
    pub rule_order: i32,
    pub condition_type: String,
    pub condition_config: Value,
    pub action_type: String,
    pub action_config: Value,
}

/// Event subscription row joined to an active workflow, for registry rebuilds.
#[derive(Debug, Clone, FromRow)]
pub struct EventBindingRow {
    pub workflow_id: Uuid,
    pub event_type: String,
    pub event_source: String,
    pub filter_config: Option<Value>,
}

#[derive(FromRow)]
struct ExecutionRow {
    id: Uuid,
    workflow_id: Uuid,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    execution_time_ms: Option<i64>,
    outcome: String,
    triggering_context: Value,
}

impl WorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Atomically persist a workflow aggregate: the definition, its rules in
    /// submitted order (`rule_order = index + 1`), and - when the workflow is
    /// event-triggered with a complete signature - one event-trigger row.
    /// Any failure rolls the whole aggregate back.
    pub async fn create_workflow(&self, new: &NewWorkflow) -> Result<Uuid, sqlx::Error> {
        let id = Uuid::new_v4();
        let config = serde_json::to_value(&new.config).unwrap_or(Value::Null);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, description, trigger_type, trigger_config, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, true, NOW())
            "#,
        )
        .bind(id)
        .bind(&new.name)
        .bind(&new.description)
        .bind(new.trigger_type.as_str())
        .bind(&config)
        .execute(&mut *tx)
        .await?;

        for (index, rule) in new.rules.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO workflow_rules
                    (workflow_id, rule_order, condition_type, condition_config, action_type, action_config)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(id)
            .bind((index + 1) as i32)
            .bind(rule.condition.kind())
            .bind(rule.condition.config())
            .bind(rule.action.kind())
            .bind(rule.action.config())
            .execute(&mut *tx)
            .await?;
        }

        if new.trigger_type == TriggerType::Event {
            // A workflow with an incomplete event signature is accepted but
            // gets no subscription row - it exists, inert.
            if let Some((event_type, event_source)) = new.config.event_signature() {
                let filter = new
                    .config
                    .filter
                    .as_ref()
                    .map(|f| serde_json::to_value(f).unwrap_or(Value::Null));
                sqlx::query(
                    r#"
                    INSERT INTO workflow_event_triggers (workflow_id, event_type, event_source, filter_config)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(id)
                .bind(event_type)
                .bind(event_source)
                .bind(filter)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        info!("created workflow '{}' ({})", new.name, id);
        Ok(id)
    }

    /// List definitions matching the conjunctive filters, enriched with
    /// execution statistics, newest first.
    pub async fn list_workflows(
        &self,
        filter: WorkflowFilter,
    ) -> Result<Vec<WorkflowSummary>, sqlx::Error> {
        let mut sql = String::from(
            r#"
            SELECT w.id, w.name, w.description, w.trigger_type, w.trigger_config,
                   w.is_active, w.created_at, w.updated_at,
                   COUNT(e.id) AS execution_count,
                   MAX(e.started_at) AS last_executed_at,
                   AVG(e.execution_time_ms)::DOUBLE PRECISION AS avg_execution_time_ms
            FROM workflows w
            LEFT JOIN workflow_executions e ON e.workflow_id = w.id
            WHERE 1=1
            "#,
        );

        let mut param = 0;
        if filter.trigger_type.is_some() {
            param += 1;
            sql.push_str(&format!(" AND w.trigger_type = ${}", param));
        }
        if filter.is_active.is_some() {
            param += 1;
            sql.push_str(&format!(" AND w.is_active = ${}", param));
        }
        sql.push_str(" GROUP BY w.id ORDER BY w.created_at DESC");

        let mut query = sqlx::query_as::<_, SummaryRow>(&sql);
        if let Some(trigger_type) = filter.trigger_type {
            query = query.bind(trigger_type.as_str());
        }
        if let Some(is_active) = filter.is_active {
            query = query.bind(is_active);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(SummaryRow::into_summary).collect())
    }

    /// Single-field activation update. Returns the number of rows affected
    /// so callers can tell "nothing matched" from "state confirmed".
    pub async fn set_active(&self, id: Uuid, is_active: bool) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("UPDATE workflows SET is_active = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(is_active)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Re-read a workflow and its ordered rule chain. Called on every
    /// invocation; no in-process copy of the chain is trusted.
    pub async fn load_chain(
        &self,
        id: Uuid,
    ) -> Result<Option<(WorkflowDefinition, Vec<RuleRow>)>, sqlx::Error> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            SELECT id, name, description, trigger_type, trigger_config,
                   is_active, created_at, updated_at
            FROM workflows WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let rules = sqlx::query_as::<_, RuleRow>(
            r#"
            SELECT rule_order, condition_type, condition_config, action_type, action_config
            FROM workflow_rules
            WHERE workflow_id = $1
            ORDER BY rule_order ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some((row.into_definition(), rules)))
    }

    /// Append one row to the execution log.
    pub async fn record_execution(&self, execution: &WorkflowExecution) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, workflow_id, started_at, completed_at, execution_time_ms, outcome, triggering_context)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(execution.id)
        .bind(execution.workflow_id)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.execution_time_ms)
        .bind(execution.outcome.as_str())
        .bind(&execution.triggering_context)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Execution history for one workflow, most recent first.
    pub async fn list_executions(
        &self,
        workflow_id: Uuid,
        limit: i64,
    ) -> Result<Vec<WorkflowExecution>, sqlx::Error> {
        let rows = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT id, workflow_id, started_at, completed_at, execution_time_ms, outcome, triggering_context
            FROM workflow_executions
            WHERE workflow_id = $1
            ORDER BY started_at DESC
            LIMIT $2
            "#,
        )
        .bind(workflow_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ExecutionRow::into_execution).collect())
    }

    /// Event subscriptions of active workflows, for registry rebuilds.
    pub async fn event_bindings(&self) -> Result<Vec<EventBindingRow>, sqlx::Error> {
        sqlx::query_as::<_, EventBindingRow>(
            r#"
            SELECT t.workflow_id, t.event_type, t.event_source, t.filter_config
            FROM workflow_event_triggers t
            JOIN workflows w ON w.id = t.workflow_id
            WHERE w.is_active = true
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Cron expressions of active schedule workflows, for registry rebuilds.
    pub async fn schedule_bindings(&self) -> Result<Vec<(Uuid, String)>, sqlx::Error> {
        let rows = sqlx::query_as::<_, (Uuid, Value)>(
            r#"
            SELECT id, trigger_config
            FROM workflows
            WHERE is_active = true AND trigger_type = 'schedule'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, config)| {
                config
                    .get("cron")
                    .and_then(Value::as_str)
                    .map(|cron| (id, cron.to_string()))
            })
            .collect())
    }

    /// Scoped update for the `database_update` action. The target row is
    /// addressed by the `record_id` carried in the invocation context;
    /// identifiers are restricted to plain names since they cannot be bound
    /// as parameters.
    pub async fn apply_update(
        &self,
        table: &str,
        set: &serde_json::Map<String, Value>,
        record_id: Uuid,
    ) -> Result<u64, String> {
        if !valid_identifier(table) {
            return Err(format!("invalid table name '{}'", table));
        }
        if set.is_empty() {
            return Err("no fields to update".to_string());
        }
        for column in set.keys() {
            if !valid_identifier(column) {
                return Err(format!("invalid column name '{}'", column));
            }
        }

        let (sql, params) = build_update_sql(table, set);

        let mut query = sqlx::query(&sql).bind(record_id);
        for value in params {
            // Bind with the parameter type the column will expect: BIGINT /
            // DOUBLE PRECISION for numbers, BOOLEAN for bools, TEXT for
            // strings, JSONB for arrays and objects.
            query = match value {
                Value::String(s) => query.bind(s.clone()),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => query.bind(i),
                    None => query.bind(n.as_f64().unwrap_or(0.0)),
                },
                other => query.bind(other.clone()),
            };
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        Ok(result.rows_affected())
    }
}

/// Build the UPDATE statement plus the ordered values to bind after the
/// `$1` record id. JSON nulls become SQL NULL literals since a bound null
/// would carry a parameter type the column may reject.
fn build_update_sql<'a>(
    table: &str,
    set: &'a serde_json::Map<String, Value>,
) -> (String, Vec<&'a Value>) {
    let mut assignments = Vec::with_capacity(set.len());
    let mut params: Vec<&'a Value> = Vec::new();
    for (column, value) in set {
        if value.is_null() {
            assignments.push(format!("{} = NULL", column));
        } else {
            params.push(value);
            assignments.push(format!("{} = ${}", column, params.len() + 1));
        }
    }
    (
        format!(
            "UPDATE {} SET {} WHERE id = $1",
            table,
            assignments.join(", ")
        ),
        params,
    )
}

fn valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.chars().next().is_some_and(|c| c.is_ascii_digit())
}

impl WorkflowRow {
    fn into_definition(self) -> WorkflowDefinition {
        WorkflowDefinition {
            id: self.id,
            name: self.name,
            description: self.description,
            trigger_type: TriggerType::parse(&self.trigger_type).unwrap_or(TriggerType::Manual),
            config: serde_json::from_value::<TriggerConfig>(self.trigger_config)
                .unwrap_or_default(),
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl SummaryRow {
    fn into_summary(self) -> WorkflowSummary {
        WorkflowSummary {
            definition: WorkflowDefinition {
                id: self.id,
                name: self.name,
                description: self.description,
                trigger_type: TriggerType::parse(&self.trigger_type)
                    .unwrap_or(TriggerType::Manual),
                config: serde_json::from_value::<TriggerConfig>(self.trigger_config)
                    .unwrap_or_default(),
                is_active: self.is_active,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            execution_count: self.execution_count,
            last_executed_at: self.last_executed_at,
            avg_execution_time_ms: self.avg_execution_time_ms,
        }
    }
}

impl ExecutionRow {
    fn into_execution(self) -> WorkflowExecution {
        WorkflowExecution {
            id: self.id,
            workflow_id: self.workflow_id,
            started_at: self.started_at,
            completed_at: self.completed_at,
            execution_time_ms: self.execution_time_ms,
            outcome: ExecutionOutcome::parse(&self.outcome).unwrap_or(ExecutionOutcome::Failed),
            triggering_context: self.triggering_context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_sql_numbers_placeholders_and_inlines_nulls() {
        let mut set = serde_json::Map::new();
        set.insert("note".to_string(), Value::Null);
        set.insert("status".to_string(), serde_json::json!("restocking"));
        set.insert("stock_quantity".to_string(), serde_json::json!(0));

        let (sql, params) = build_update_sql("products", &set);
        assert_eq!(
            sql,
            "UPDATE products SET note = NULL, status = $2, stock_quantity = $3 WHERE id = $1"
        );
        assert_eq!(
            params,
            vec![&serde_json::json!("restocking"), &serde_json::json!(0)]
        );
    }

    #[test]
    fn identifier_validation() {
        assert!(valid_identifier("products"));
        assert!(valid_identifier("order_items"));
        assert!(!valid_identifier(""));
        assert!(!valid_identifier("products; DROP TABLE users"));
        assert!(!valid_identifier("1table"));
        assert!(!valid_identifier("pro-ducts"));
    }
}
