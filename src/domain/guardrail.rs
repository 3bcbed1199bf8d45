//! Guardrail rule and evaluation-result domain types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Comparison operator for a simple condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    In,
    Contains,
}

/// A single field-operator-value test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

/// Window unit for a temporal condition (days, the only unit decisions carry
/// enough resolution to compare against meaningfully).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalDirection {
    Within,
    After,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalCondition {
    pub direction: TemporalDirection,
    pub window_days: i64,
    pub min_count: u64,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatistic {
    SuccessRate,
    FailureRate,
    MeanConfidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateCondition {
    pub statistic: AggregateStatistic,
    pub category: Option<String>,
    pub operator: Operator,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticCondition {
    /// Reference decisions are whatever the restricting metadata (category,
    /// project) resolves to at evaluation time.
    pub category: Option<String>,
    pub similarity_threshold: f64,
    /// Only count a semantic match if the matched decision's outcome is
    /// this kind — per the spec, always "failure" in practice, but kept as
    /// a field rather than hardcoded so a rule file can be explicit.
    pub require_outcome: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompoundOp {
    And,
    Or,
}

/// A condition: a leaf test or a recursively-nested compound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    Field(FieldCondition),
    Temporal(TemporalCondition),
    Aggregate(AggregateCondition),
    Semantic(SemanticCondition),
    Compound {
        op: CompoundOp,
        conditions: Vec<Condition>,
    },
}

/// A named boolean field that must be true on the action context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub field: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailAction {
    Block,
    Warn,
}

/// A loaded policy rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guardrail {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    pub action: GuardrailAction,
    pub message: String,
}

/// Outcome severity of one evaluated guardrail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Block,
    Warn,
    Pass,
}

/// One rule's evaluation result against an `ActionContext`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailResult {
    pub guardrail_id: String,
    pub matched: bool,
    pub passed: bool,
    pub severity: Severity,
    pub message: String,
    pub suggestion: Option<String>,
}

/// Inputs to a guardrail check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionContext {
    pub description: String,
    pub category: Option<String>,
    #[serde(default = "default_stakes_value")]
    pub stakes: super::decision::Stakes,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub context: HashMap<String, Value>,
}

fn default_stakes_value() -> super::decision::Stakes {
    super::decision::Stakes::Medium
}

impl ActionContext {
    /// Resolve a field by name: reserved attributes first, then the
    /// free-form context map. Returns `None` for an unknown field, which
    /// callers treat as "missing".
    pub fn lookup(&self, field: &str) -> Option<Value> {
        match field {
            "description" => Some(Value::String(self.description.clone())),
            "category" => self.category.clone().map(Value::String),
            "stakes" => Some(Value::String(self.stakes.as_str().to_string())),
            "confidence" => self.confidence.map(|c| {
                serde_json::Number::from_f64(c)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }),
            other => self.context.get(other).cloned(),
        }
    }
}

/// Aggregate result of evaluating every loaded rule against one context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailCheckReport {
    pub allowed: bool,
    pub violations: Vec<GuardrailResult>,
    pub evaluated: usize,
    pub evaluated_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_prefers_reserved_fields_over_context_map() {
        let mut context = HashMap::new();
        context.insert("category".to_string(), Value::String("shadowed".into()));
        let ctx = ActionContext {
            description: "do the thing".into(),
            category: Some("architecture".into()),
            stakes: super::super::decision::Stakes::High,
            confidence: Some(0.5),
            context,
        };
        assert_eq!(
            ctx.lookup("category"),
            Some(Value::String("architecture".into()))
        );
        assert_eq!(ctx.lookup("nonexistent"), None);
    }
}
