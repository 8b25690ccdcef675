// Rule conditions - state-free match decisions against an invocation context

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Comparison operator for numeric conditions, serialized with the literal
/// operator tokens stored in `condition_config`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CompareOp {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "=")]
    Eq,
}

impl CompareOp {
    pub fn compare(self, left: f64, right: f64) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Gt => left > right,
            Self::Ge => left >= right,
            Self::Eq => left == right,
        }
    }
}

/// Closed set of rule conditions. The discriminator and per-variant config
/// are validated once when a rule crosses the boundary, not re-parsed at
/// each evaluation site.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "condition_type", content = "condition_config", rename_all = "snake_case")]
pub enum Condition {
    /// Constant true; the rule's action always runs.
    Always,
    /// Numeric comparison of a context field against a fixed value.
    Threshold {
        field: String,
        operator: CompareOp,
        value: f64,
    },
    /// Exact type-and-value equality against a context field.
    FieldCheck { field: String, value: Value },
    /// Numeric comparison of two context fields, optionally scaling the
    /// right-hand side ("competitor price < our price x margin").
    Comparison {
        field: String,
        compare_field: String,
        operator: CompareOp,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        margin: Option<f64>,
    },
}

#[derive(Deserialize)]
struct ThresholdConfig {
    field: String,
    operator: CompareOp,
    value: f64,
}

#[derive(Deserialize)]
struct FieldCheckConfig {
    field: String,
    value: Value,
}

#[derive(Deserialize)]
struct ComparisonConfig {
    field: String,
    compare_field: String,
    operator: CompareOp,
    #[serde(default)]
    margin: Option<f64>,
}

#[derive(Deserialize)]
struct ConditionParts {
    condition_type: String,
    #[serde(default)]
    condition_config: Value,
}

/// API input and stored rows funnel through `from_parts`, so `always` with
/// an explicit `{}` (or absent) config is accepted in both places.
impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let parts = ConditionParts::deserialize(deserializer)?;
        Self::from_parts(&parts.condition_type, &parts.condition_config)
            .map_err(serde::de::Error::custom)
    }
}

impl Condition {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::Threshold { .. } => "threshold",
            Self::FieldCheck { .. } => "field_check",
            Self::Comparison { .. } => "comparison",
        }
    }

    /// The `condition_config` payload as stored alongside the discriminator.
    pub fn config(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map
                .get("condition_config")
                .cloned()
                .unwrap_or_else(|| json!({})),
            _ => json!({}),
        }
    }

    /// Rebuild a condition from its discriminator + config. An unknown
    /// discriminator or malformed config is an error here; callers treat
    /// that as the rule not matching, never as a chain abort. The config
    /// for `always` is empty, so whatever it carries is ignored.
    pub fn from_parts(kind: &str, config: &Value) -> Result<Self, serde_json::Error> {
        use serde::de::Error;
        match kind {
            "always" => Ok(Self::Always),
            "threshold" => serde_json::from_value(config.clone()).map(
                |ThresholdConfig {
                     field,
                     operator,
                     value,
                 }| Self::Threshold {
                    field,
                    operator,
                    value,
                },
            ),
            "field_check" => serde_json::from_value(config.clone())
                .map(|FieldCheckConfig { field, value }| Self::FieldCheck { field, value }),
            "comparison" => serde_json::from_value(config.clone()).map(
                |ComparisonConfig {
                     field,
                     compare_field,
                     operator,
                     margin,
                 }| Self::Comparison {
                    field,
                    compare_field,
                    operator,
                    margin,
                },
            ),
            other => Err(serde_json::Error::custom(format!(
                "unknown condition_type '{}'",
                other
            ))),
        }
    }

    /// Evaluate against an invocation context (event payload or schedule
    /// context). Missing or non-numeric fields fail the condition rather
    /// than erroring.
    pub fn evaluate(&self, context: &Value) -> bool {
        match self {
            Self::Always => true,
            Self::Threshold {
                field,
                operator,
                value,
            } => match numeric_field(context, field) {
                Some(actual) => operator.compare(actual, *value),
                None => false,
            },
            Self::FieldCheck { field, value } => {
                lookup_field(context, field).map(|v| v == value).unwrap_or(false)
            }
            Self::Comparison {
                field,
                compare_field,
                operator,
                margin,
            } => {
                let (Some(left), Some(right)) = (
                    numeric_field(context, field),
                    numeric_field(context, compare_field),
                ) else {
                    return false;
                };
                operator.compare(left, right * margin.unwrap_or(1.0))
            }
        }
    }
}

/// Resolve a field path against the context, supporting dot notation for
/// nested objects.
fn lookup_field<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn numeric_field(context: &Value, path: &str) -> Option<f64> {
    lookup_field(context, path).and_then(Value::as_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn always_matches_anything() {
        assert!(Condition::Always.evaluate(&json!({})));
        assert!(Condition::Always.evaluate(&json!({"x": 1})));
    }

    #[test]
    fn threshold_numeric_comparison() {
        let low_stock = Condition::Threshold {
            field: "stock_quantity".into(),
            operator: CompareOp::Le,
            value: 10.0,
        };
        assert!(low_stock.evaluate(&json!({"stock_quantity": 3})));
        assert!(low_stock.evaluate(&json!({"stock_quantity": 10})));
        assert!(!low_stock.evaluate(&json!({"stock_quantity": 50})));
    }

    #[test]
    fn threshold_fails_on_missing_or_non_numeric_field() {
        let cond = Condition::Threshold {
            field: "stock_quantity".into(),
            operator: CompareOp::Lt,
            value: 10.0,
        };
        assert!(!cond.evaluate(&json!({})));
        assert!(!cond.evaluate(&json!({"stock_quantity": "plenty"})));
    }

    #[test]
    fn field_check_requires_exact_type_and_value() {
        let cond = Condition::FieldCheck {
            field: "status".into(),
            value: json!("pending"),
        };
        assert!(cond.evaluate(&json!({"status": "pending"})));
        assert!(!cond.evaluate(&json!({"status": "shipped"})));

        // "10" (string) must not match 10 (number)
        let numeric = Condition::FieldCheck {
            field: "count".into(),
            value: json!(10),
        };
        assert!(numeric.evaluate(&json!({"count": 10})));
        assert!(!numeric.evaluate(&json!({"count": "10"})));
    }

    #[test]
    fn comparison_with_margin_multiplier() {
        // competitor price < our price x 0.95
        let undercut = Condition::Comparison {
            field: "competitor_price".into(),
            compare_field: "our_price".into(),
            operator: CompareOp::Lt,
            margin: Some(0.95),
        };
        assert!(undercut.evaluate(&json!({"competitor_price": 9.0, "our_price": 10.0})));
        assert!(!undercut.evaluate(&json!({"competitor_price": 9.6, "our_price": 10.0})));
    }

    #[test]
    fn comparison_without_margin() {
        let cond = Condition::Comparison {
            field: "a".into(),
            compare_field: "b".into(),
            operator: CompareOp::Ge,
            margin: None,
        };
        assert!(cond.evaluate(&json!({"a": 5, "b": 5})));
        assert!(!cond.evaluate(&json!({"a": 4, "b": 5})));
        assert!(!cond.evaluate(&json!({"a": 4})));
    }

    #[test]
    fn nested_field_lookup() {
        let cond = Condition::FieldCheck {
            field: "order.marketplace".into(),
            value: json!("coupang"),
        };
        assert!(cond.evaluate(&json!({"order": {"marketplace": "coupang"}})));
    }

    #[test]
    fn operator_tokens_serialize_literally() {
        let cond = Condition::Threshold {
            field: "qty".into(),
            operator: CompareOp::Le,
            value: 10.0,
        };
        let config = cond.config();
        assert_eq!(config["operator"], json!("<="));
    }

    #[test]
    fn stored_parts_round_trip() {
        let cond = Condition::Threshold {
            field: "stock_quantity".into(),
            operator: CompareOp::Le,
            value: 10.0,
        };
        let rebuilt = Condition::from_parts(cond.kind(), &cond.config()).unwrap();
        assert_eq!(rebuilt, cond);

        assert_eq!(
            Condition::from_parts("always", &json!({})).unwrap(),
            Condition::Always
        );
    }

    #[test]
    fn unknown_condition_type_is_an_error() {
        assert!(Condition::from_parts("fuzzy_match", &json!({})).is_err());
    }

    #[test]
    fn always_accepts_empty_or_absent_config() {
        let with_empty: Condition = serde_json::from_value(json!({
            "condition_type": "always",
            "condition_config": {}
        }))
        .unwrap();
        assert_eq!(with_empty, Condition::Always);

        let without: Condition =
            serde_json::from_value(json!({"condition_type": "always"})).unwrap();
        assert_eq!(without, Condition::Always);
    }

    #[test]
    fn non_unit_conditions_still_require_their_config() {
        assert!(
            serde_json::from_value::<Condition>(json!({"condition_type": "threshold"})).is_err()
        );
        assert!(
            serde_json::from_value::<Condition>(json!({
                "condition_type": "threshold",
                "condition_config": {"field": "qty"}
            }))
            .is_err()
        );
    }
}
