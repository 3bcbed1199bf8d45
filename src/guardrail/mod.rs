//! Guardrail rule loading and evaluation.

pub mod rules;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::guardrail::{
    ActionContext, AggregateCondition, AggregateStatistic, Condition, CompoundOp, FieldCondition,
    Guardrail, GuardrailAction, GuardrailCheckReport, GuardrailResult, Operator, SemanticCondition,
    Severity, TemporalCondition, TemporalDirection,
};
use crate::error::Result;

const RELOAD_INTERVAL: i64 = 300;

#[derive(Clone)]
struct RuleSet {
    rules: Vec<Guardrail>,
    loaded_at: chrono::DateTime<Utc>,
}

/// Supplies the aggregate/temporal/semantic evaluators with whatever they
/// need from the decision corpus without coupling the guardrail engine to
/// a concrete storage or retrieval implementation.
#[async_trait]
pub trait GuardrailDataSource: Send + Sync {
    /// Count of decisions in `category` (or any category if `None`) created
    /// within the last `window_days`.
    async fn recent_count(&self, category: Option<&str>, window_days: i64) -> u64;

    /// One of success-rate / failure-rate / mean-confidence for `category`.
    async fn aggregate_statistic(&self, category: Option<&str>, statistic: AggregateStatistic) -> Option<f64>;

    /// True if `text` is similar (cosine similarity >= threshold) to any
    /// decision in `category` whose outcome matches `require_outcome`.
    async fn semantic_match(
        &self,
        text: &str,
        category: Option<&str>,
        threshold: f64,
        require_outcome: &str,
    ) -> bool;
}

/// A data source with nothing to report — used when no extended
/// conditions are loaded, or in tests that only exercise plain conditions.
pub struct NullDataSource;

#[async_trait]
impl GuardrailDataSource for NullDataSource {
    async fn recent_count(&self, _category: Option<&str>, _window_days: i64) -> u64 {
        0
    }

    async fn aggregate_statistic(&self, _category: Option<&str>, _statistic: AggregateStatistic) -> Option<f64> {
        None
    }

    async fn semantic_match(&self, _text: &str, _category: Option<&str>, _threshold: f64, _require_outcome: &str) -> bool {
        false
    }
}

/// `GuardrailDataSource` backed by the real `DecisionStore`/`VectorStore`/
/// `EmbeddingProvider` trio, used outside of unit tests.
pub struct StoreDataSource {
    pub decisions: Arc<dyn crate::storage::DecisionStore>,
    pub vectors: Arc<dyn crate::storage::VectorStore>,
    pub embeddings: Arc<dyn crate::storage::EmbeddingProvider>,
}

#[async_trait]
impl GuardrailDataSource for StoreDataSource {
    async fn recent_count(&self, category: Option<&str>, window_days: i64) -> u64 {
        let filters = crate::storage::DecisionFilters {
            category: category.map(str::to_string),
            date_after: Some(Utc::now() - Duration::days(window_days)),
            ..Default::default()
        };
        self.decisions.count(filters).await.unwrap_or(0) as u64
    }

    async fn aggregate_statistic(&self, category: Option<&str>, statistic: AggregateStatistic) -> Option<f64> {
        let filters = crate::storage::DecisionFilters {
            category: category.map(str::to_string),
            ..Default::default()
        };
        let list = self
            .decisions
            .list(crate::storage::ListQuery { offset: 0, limit: usize::MAX, filters, sort: crate::storage::SortDirection::Desc })
            .await
            .ok()?;
        let reviewed: Vec<_> = list.items.iter().filter(|d| d.is_reviewed()).collect();
        if reviewed.is_empty() {
            return None;
        }
        match statistic {
            AggregateStatistic::SuccessRate => {
                let successes = reviewed
                    .iter()
                    .filter(|d| matches!(d.outcome.as_ref().map(|o| o.outcome), Some(crate::domain::decision::OutcomeKind::Success)))
                    .count();
                Some(successes as f64 / reviewed.len() as f64)
            }
            AggregateStatistic::FailureRate => {
                let failures = reviewed
                    .iter()
                    .filter(|d| matches!(d.outcome.as_ref().map(|o| o.outcome), Some(crate::domain::decision::OutcomeKind::Failure)))
                    .count();
                Some(failures as f64 / reviewed.len() as f64)
            }
            AggregateStatistic::MeanConfidence => {
                let sum: f64 = reviewed.iter().map(|d| d.confidence).sum();
                Some(sum / reviewed.len() as f64)
            }
        }
    }

    async fn semantic_match(&self, text: &str, category: Option<&str>, threshold: f64, require_outcome: &str) -> bool {
        let Ok(mut embeddings) = self.embeddings.embed(&[text.to_string()]).await else {
            return false;
        };
        let Some(embedding) = embeddings.pop() else {
            return false;
        };
        let mut where_clause = std::collections::HashMap::new();
        if let Some(category) = category {
            where_clause.insert("category".to_string(), serde_json::json!(category));
        }
        let Ok(hits) = self.vectors.query(&embedding, 10, &where_clause).await else {
            return false;
        };
        for hit in hits {
            let similarity = 1.0 - hit.distance;
            if similarity < threshold {
                continue;
            }
            let outcome = hit.metadata.get("outcome").and_then(|v| v.as_str());
            if outcome == Some(require_outcome) {
                return true;
            }
        }
        false
    }
}

pub struct GuardrailEngine {
    rules_dirs: Vec<PathBuf>,
    snapshot: RwLock<Arc<RuleSet>>,
}

impl GuardrailEngine {
    pub fn new() -> Self {
        Self {
            rules_dirs: Vec::new(),
            snapshot: RwLock::new(Arc::new(RuleSet {
                rules: Vec::new(),
                loaded_at: Utc::now(),
            })),
        }
    }

    pub fn with_rules_dirs(dirs: Vec<PathBuf>) -> Result<Self> {
        let engine = Self {
            rules_dirs: dirs,
            snapshot: RwLock::new(Arc::new(RuleSet {
                rules: Vec::new(),
                loaded_at: Utc::now() - Duration::seconds(RELOAD_INTERVAL + 1),
            })),
        };
        engine.reload()?;
        Ok(engine)
    }

    /// Reparses every configured directory and swaps the rule table
    /// atomically; evaluations in flight keep using their already-cloned
    /// `Arc<RuleSet>` and never block on this.
    pub fn reload(&self) -> Result<()> {
        let mut rules = Vec::new();
        for dir in &self.rules_dirs {
            if !dir.exists() {
                tracing::warn!(?dir, "guardrails directory does not exist, skipping");
                continue;
            }
            rules.extend(rules::load_dir(dir)?);
        }
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        let mut snapshot = self.snapshot.write();
        *snapshot = Arc::new(RuleSet {
            rules,
            loaded_at: Utc::now(),
        });
        Ok(())
    }

    /// Triggers a reload if the soft TTL has passed. Call sites (e.g.
    /// `listGuardrails`) invoke this before reading; evaluation never
    /// blocks on it.
    pub fn maybe_reload(&self) {
        let stale = {
            let snapshot = self.snapshot.read();
            Utc::now() - snapshot.loaded_at > Duration::seconds(RELOAD_INTERVAL)
        };
        if stale && !self.rules_dirs.is_empty() {
            let _ = self.reload();
        }
    }

    pub fn list_rules(&self) -> Vec<Guardrail> {
        self.snapshot.read().rules.clone()
    }

    pub async fn check(&self, ctx: &ActionContext, data: &dyn GuardrailDataSource) -> GuardrailCheckReport {
        let rules = self.snapshot.read().rules.clone();
        let mut violations = Vec::new();
        let mut evaluated = 0usize;

        for rule in &rules {
            if !rule.scope.is_empty() {
                let in_scope = ctx
                    .context
                    .get("project")
                    .and_then(|v| v.as_str())
                    .map(|project| rule.scope.iter().any(|s| s == project))
                    .unwrap_or(false);
                if !in_scope {
                    continue;
                }
            }

            evaluated += 1;
            let result = evaluate_rule(rule, ctx, data).await;
            if matches!(result.severity, Severity::Block | Severity::Warn) {
                violations.push(result);
            }
        }

        let allowed = !violations.iter().any(|v| v.severity == Severity::Block);
        GuardrailCheckReport {
            allowed,
            violations,
            evaluated,
            evaluated_at: Utc::now(),
        }
    }
}

impl Default for GuardrailEngine {
    fn default() -> Self {
        Self::new()
    }
}

async fn evaluate_rule(rule: &Guardrail, ctx: &ActionContext, data: &dyn GuardrailDataSource) -> GuardrailResult {
    let matched = evaluate_conditions(&rule.conditions, ctx, data).await;

    if !matched {
        return GuardrailResult {
            guardrail_id: rule.id.clone(),
            matched: false,
            passed: true,
            severity: Severity::Pass,
            message: rule.message.clone(),
            suggestion: None,
        };
    }

    // A matched rule with no requirements has no bypass path: the action
    // applies unconditionally. Requirements are the rule's "unless" clause.
    let passed = !rule.requirements.is_empty()
        && rule
            .requirements
            .iter()
            .all(|req| ctx.lookup(&req.field).and_then(|v| v.as_bool()).unwrap_or(false));

    let severity = if passed {
        Severity::Pass
    } else {
        match rule.action {
            GuardrailAction::Block => Severity::Block,
            GuardrailAction::Warn => Severity::Warn,
        }
    };

    GuardrailResult {
        guardrail_id: rule.id.clone(),
        matched: true,
        passed,
        severity,
        message: rule.message.clone(),
        suggestion: if passed { None } else { Some(format!("satisfy: {}", rule.message)) },
    }
}

fn evaluate_conditions<'a>(
    conditions: &'a [Condition],
    ctx: &'a ActionContext,
    data: &'a dyn GuardrailDataSource,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + 'a>> {
    Box::pin(async move {
        // Plain conditions at the top level of a rule are AND-combined.
        for condition in conditions {
            if !evaluate_condition(condition, ctx, data).await {
                return false;
            }
        }
        true
    })
}

fn evaluate_condition<'a>(
    condition: &'a Condition,
    ctx: &'a ActionContext,
    data: &'a dyn GuardrailDataSource,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + 'a>> {
    Box::pin(async move {
        match condition {
            Condition::Field(field) => evaluate_field(field, ctx),
            Condition::Temporal(temporal) => evaluate_temporal(temporal, data).await,
            Condition::Aggregate(aggregate) => evaluate_aggregate(aggregate, data).await,
            Condition::Semantic(semantic) => evaluate_semantic(semantic, ctx, data).await,
            Condition::Compound { op, conditions } => match op {
                CompoundOp::And => {
                    for c in conditions {
                        if !evaluate_condition(c, ctx, data).await {
                            return false;
                        }
                    }
                    true
                }
                CompoundOp::Or => {
                    for c in conditions {
                        if evaluate_condition(c, ctx, data).await {
                            return true;
                        }
                    }
                    false
                }
            },
        }
    })
}

fn evaluate_field(field: &FieldCondition, ctx: &ActionContext) -> bool {
    let Some(actual) = ctx.lookup(&field.field) else {
        return false;
    };
    compare(&actual, field.operator, &field.value)
}

fn compare(actual: &serde_json::Value, operator: Operator, expected: &serde_json::Value) -> bool {
    use serde_json::Value;
    match operator {
        Operator::Eq => actual == expected,
        Operator::Ne => actual != expected,
        Operator::In => expected.as_array().map(|arr| arr.contains(actual)).unwrap_or(false),
        Operator::Contains => match (actual, expected) {
            (Value::String(a), Value::String(b)) => a.contains(b.as_str()),
            (Value::Array(a), b) => a.contains(b),
            _ => false,
        },
        Operator::Lt | Operator::Gt | Operator::Le | Operator::Ge => {
            let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) else {
                return false;
            };
            match operator {
                Operator::Lt => a < b,
                Operator::Gt => a > b,
                Operator::Le => a <= b,
                Operator::Ge => a >= b,
                _ => unreachable!(),
            }
        }
    }
}

async fn evaluate_temporal(condition: &TemporalCondition, data: &dyn GuardrailDataSource) -> bool {
    let count = data.recent_count(condition.category.as_deref(), condition.window_days).await;
    match condition.direction {
        TemporalDirection::Within => count >= condition.min_count,
        TemporalDirection::After => count < condition.min_count,
    }
}

async fn evaluate_aggregate(condition: &AggregateCondition, data: &dyn GuardrailDataSource) -> bool {
    let Some(value) = data
        .aggregate_statistic(condition.category.as_deref(), condition.statistic)
        .await
    else {
        return false;
    };
    compare(
        &serde_json::json!(value),
        condition.operator,
        &serde_json::json!(condition.threshold),
    )
}

async fn evaluate_semantic(condition: &SemanticCondition, ctx: &ActionContext, data: &dyn GuardrailDataSource) -> bool {
    data.semantic_match(
        &ctx.description,
        condition.category.as_deref(),
        condition.similarity_threshold,
        &condition.require_outcome,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::Stakes;
    use std::collections::HashMap;

    fn block_rule_on_stakes(stakes: &str) -> Guardrail {
        Guardrail {
            id: "block-high-stakes-without-review".into(),
            description: "high stakes actions require review".into(),
            scope: vec![],
            conditions: vec![Condition::Field(FieldCondition {
                field: "stakes".into(),
                operator: Operator::Eq,
                value: serde_json::json!(stakes),
            })],
            requirements: vec![crate::domain::guardrail::Requirement { field: "reviewed".into() }],
            action: GuardrailAction::Block,
            message: "high-stakes actions need review=true".into(),
        }
    }

    fn ctx(stakes: Stakes, reviewed: Option<bool>) -> ActionContext {
        let mut context = HashMap::new();
        if let Some(r) = reviewed {
            context.insert("reviewed".to_string(), serde_json::json!(r));
        }
        ActionContext {
            description: "deploy to production".into(),
            category: Some("infra".into()),
            stakes,
            confidence: Some(0.8),
            context,
        }
    }

    #[tokio::test]
    async fn unmatched_rule_passes() {
        let engine = GuardrailEngine::new();
        Arc::make_mut(&mut engine.snapshot.write()).rules.push(block_rule_on_stakes("critical"));
        let report = engine.check(&ctx(Stakes::Low, None), &NullDataSource).await;
        assert!(report.allowed);
        assert!(report.violations.is_empty());
    }

    #[tokio::test]
    async fn matched_rule_with_failed_requirement_blocks() {
        let engine = GuardrailEngine::new();
        Arc::make_mut(&mut engine.snapshot.write()).rules.push(block_rule_on_stakes("critical"));
        let report = engine.check(&ctx(Stakes::Critical, None), &NullDataSource).await;
        assert!(!report.allowed);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].severity, Severity::Block);
    }

    #[tokio::test]
    async fn matched_rule_with_satisfied_requirement_passes() {
        let engine = GuardrailEngine::new();
        Arc::make_mut(&mut engine.snapshot.write()).rules.push(block_rule_on_stakes("critical"));
        let report = engine.check(&ctx(Stakes::Critical, Some(true)), &NullDataSource).await;
        assert!(report.allowed);
        assert!(report.violations.is_empty());
    }

    #[tokio::test]
    async fn compound_or_matches_if_either_side_matches() {
        let rule = Guardrail {
            id: "compound".into(),
            description: "or of two stakes".into(),
            scope: vec![],
            conditions: vec![Condition::Compound {
                op: CompoundOp::Or,
                conditions: vec![
                    Condition::Field(FieldCondition { field: "stakes".into(), operator: Operator::Eq, value: serde_json::json!("low") }),
                    Condition::Field(FieldCondition { field: "stakes".into(), operator: Operator::Eq, value: serde_json::json!("critical") }),
                ],
            }],
            requirements: vec![crate::domain::guardrail::Requirement { field: "reviewed".into() }],
            action: GuardrailAction::Warn,
            message: "needs review".into(),
        };
        let engine = GuardrailEngine::new();
        Arc::make_mut(&mut engine.snapshot.write()).rules.push(rule);
        let report = engine.check(&ctx(Stakes::Low, None), &NullDataSource).await;
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].severity, Severity::Warn);
    }

    #[tokio::test]
    async fn matched_rule_with_no_requirements_blocks_unconditionally() {
        let rule = Guardrail {
            id: "no-high-stakes-low-conf".into(),
            description: "high stakes with low confidence".into(),
            scope: vec![],
            conditions: vec![Condition::Compound {
                op: CompoundOp::And,
                conditions: vec![
                    Condition::Field(FieldCondition { field: "stakes".into(), operator: Operator::Eq, value: serde_json::json!("high") }),
                    Condition::Field(FieldCondition { field: "confidence".into(), operator: Operator::Lt, value: serde_json::json!(0.5) }),
                ],
            }],
            requirements: vec![],
            action: GuardrailAction::Block,
            message: "high stakes actions need higher confidence".into(),
        };
        let engine = GuardrailEngine::new();
        Arc::make_mut(&mut engine.snapshot.write()).rules.push(rule);
        let ctx = ActionContext {
            description: "deploy to prod".into(),
            category: None,
            stakes: Stakes::High,
            confidence: Some(0.3),
            context: HashMap::new(),
        };
        let report = engine.check(&ctx, &NullDataSource).await;
        assert!(!report.allowed);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].severity, Severity::Block);
        assert!(report.evaluated >= 1);
    }

    #[tokio::test]
    async fn scoped_rule_skipped_outside_scope() {
        let mut rule = block_rule_on_stakes("critical");
        rule.scope = vec!["other-project".into()];
        let engine = GuardrailEngine::new();
        Arc::make_mut(&mut engine.snapshot.write()).rules.push(rule);
        let mut action = ctx(Stakes::Critical, None);
        action.context.insert("project".into(), serde_json::json!("this-project"));
        let report = engine.check(&action, &NullDataSource).await;
        assert!(report.allowed);
        assert_eq!(report.evaluated, 0);
    }
}
