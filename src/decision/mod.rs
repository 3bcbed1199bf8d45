//! Decision lifecycle: record, update, review, and fetch.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::domain::decision::{
    content_addressed_decision_id, Bridge, Decision, OutcomeKind, Quality, Reason, RelatedDecision, Stakes,
};
use crate::domain::guardrail::{ActionContext, GuardrailResult};
use crate::domain::graph::{EdgeType, GraphEdge};
use crate::domain::tracker::{DeliberationTrace, TrackedInputType};
use crate::error::{Error, Result};
use crate::guardrail::{GuardrailEngine, StoreDataSource};
use crate::storage::{DecisionStore, EmbeddingProvider, GraphStore, VectorStore};
use crate::tracker::DeliberationTracker;

#[derive(Debug, Clone, Default)]
pub struct RecordDecisionInput {
    pub decision_text: String,
    pub context: String,
    pub category: String,
    pub stakes: Stakes,
    pub confidence: f64,
    pub agent_id: String,
    pub project: Option<String>,
    pub feature: Option<String>,
    pub pr: Option<i64>,
    pub file: Option<String>,
    pub line: Option<i64>,
    pub commit: Option<String>,
    pub reasons: Vec<Reason>,
    pub tags: HashSet<String>,
    pub pattern: Option<String>,
    pub bridge: Option<Bridge>,
    pub deliberation: Option<DeliberationTrace>,
    pub related_to: Vec<RelatedDecision>,
    pub review_by: Option<chrono::DateTime<Utc>>,
    pub session_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReasonTypeStat {
    pub count: usize,
    pub mean_strength: f64,
    pub success_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReasonStats {
    pub by_type: std::collections::HashMap<String, ReasonTypeStat>,
    pub total_reasons: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReindexReport {
    pub considered: usize,
    pub reindexed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct AttributionItem {
    pub id: String,
    pub outcome: OutcomeKind,
    pub actual_result: String,
    pub lessons: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttributionResult {
    pub id: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AttributionReport {
    pub results: Vec<AttributionResult>,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordDecisionResponse {
    pub success: bool,
    pub id: Option<String>,
    pub indexed: bool,
    pub deliberation_auto: bool,
    pub deliberation_inputs_count: usize,
    pub related_count: usize,
    pub quality: Option<Quality>,
    pub allowed: bool,
    pub block_reasons: Vec<GuardrailResult>,
}

pub struct DecisionService {
    decisions: Arc<dyn DecisionStore>,
    vectors: Arc<dyn VectorStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    graph: Arc<dyn GraphStore>,
    tracker: Arc<DeliberationTracker>,
    guardrails: Arc<GuardrailEngine>,
}

impl DecisionService {
    pub fn new(
        decisions: Arc<dyn DecisionStore>,
        vectors: Arc<dyn VectorStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
        graph: Arc<dyn GraphStore>,
        tracker: Arc<DeliberationTracker>,
        guardrails: Arc<GuardrailEngine>,
    ) -> Self {
        Self { decisions, vectors, embeddings, graph, tracker, guardrails }
    }

    /// Exposes the underlying store for composites (pre-action, session
    /// context) that need raw access without going through the service's
    /// own validated operations.
    pub fn store_handle(&self) -> Arc<dyn DecisionStore> {
        self.decisions.clone()
    }

    pub fn vector_handle(&self) -> Arc<dyn VectorStore> {
        self.vectors.clone()
    }

    pub fn embedding_handle(&self) -> Arc<dyn EmbeddingProvider> {
        self.embeddings.clone()
    }

    fn data_source(&self) -> StoreDataSource {
        StoreDataSource {
            decisions: self.decisions.clone(),
            vectors: self.vectors.clone(),
            embeddings: self.embeddings.clone(),
        }
    }

    pub async fn record(&self, input: RecordDecisionInput) -> Result<RecordDecisionResponse> {
        if input.decision_text.trim().is_empty() {
            return Err(Error::InvalidParams("decision_text must not be empty".into()));
        }
        if input.category.trim().is_empty() {
            return Err(Error::InvalidParams("category must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&input.confidence) {
            return Err(Error::InvalidParams("confidence must be in [0, 1]".into()));
        }

        let ctx = ActionContext {
            description: input.decision_text.clone(),
            category: Some(input.category.clone()),
            stakes: input.stakes,
            confidence: Some(input.confidence),
            context: input
                .project
                .clone()
                .map(|p| ("project".to_string(), serde_json::json!(p)))
                .into_iter()
                .collect(),
        };
        let report = self.guardrails.check(&ctx, &self.data_source()).await;
        if !report.allowed {
            let block_reasons: Vec<GuardrailResult> = report
                .violations
                .into_iter()
                .filter(|v| v.severity == crate::domain::guardrail::Severity::Block)
                .collect();
            return Ok(RecordDecisionResponse {
                success: false,
                id: None,
                indexed: false,
                deliberation_auto: false,
                deliberation_inputs_count: 0,
                related_count: 0,
                quality: None,
                allowed: false,
                block_reasons,
            });
        }

        let id = content_addressed_decision_id(&input.agent_id, Utc::now(), &input.decision_text);
        let created_at = Utc::now();

        let key = input
            .session_key
            .clone()
            .unwrap_or_else(|| crate::tracker::session_key("internal", &input.agent_id, None));
        let tracked = self.tracker.peek(&key).await;
        let last_query_top_ids: Vec<(String, f64)> = tracked
            .iter()
            .rev()
            .find(|i| i.input_type == TrackedInputType::Query)
            .and_then(|i| i.raw_data.get("top_ids").and_then(|v| v.as_array()).cloned())
            .map(|ids| {
                ids.iter()
                    .filter_map(|v| {
                        let id = v.get("id")?.as_str()?.to_string();
                        let distance = v.get("distance").and_then(|d| d.as_f64()).unwrap_or(1.0);
                        Some((id, distance))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let tracked_related: Vec<RelatedDecision> = last_query_top_ids
            .iter()
            .map(|(id, distance)| RelatedDecision { id: id.clone(), summary: String::new(), distance: *distance })
            .collect();

        let consumed = self.tracker.consume(&key).await;
        let deliberation_auto = consumed.is_some();
        let deliberation = match (input.deliberation.clone(), consumed) {
            (Some(explicit), Some(tracked_trace)) => Some(explicit.merge(tracked_trace)),
            (Some(explicit), None) => Some(explicit),
            (None, Some(tracked_trace)) => Some(tracked_trace),
            (None, None) => None,
        };
        let deliberation_inputs_count = deliberation.as_ref().map(|d| d.inputs.len()).unwrap_or(0);

        let mut related_to = input.related_to.clone();
        for candidate in tracked_related {
            if !related_to.iter().any(|r| r.id == candidate.id) {
                related_to.push(candidate);
            }
        }

        let mut deliberation = deliberation;
        if let Some(trace) = deliberation.as_mut() {
            trace.convergence = !last_query_top_ids.is_empty()
                && last_query_top_ids.iter().any(|(id, _)| related_to.iter().any(|r| &r.id == id));
        }

        let mut decision = Decision {
            id: id.clone(),
            decision_text: input.decision_text.clone(),
            context: input.context.clone(),
            category: input.category.clone(),
            stakes: input.stakes,
            confidence: input.confidence,
            agent_id: input.agent_id.clone(),
            created_at,
            updated_at: None,
            project: input.project.clone(),
            feature: input.feature.clone(),
            pr: input.pr,
            file: input.file.clone(),
            line: input.line,
            commit: input.commit.clone(),
            reasons: input.reasons.clone(),
            tags: input.tags.clone(),
            pattern: input.pattern.clone(),
            bridge: input.bridge.clone(),
            deliberation,
            outcome: None,
            review_by: input.review_by,
            related_to: related_to.clone(),
            quality: None,
        };
        decision.quality = Some(compute_quality(&decision));

        let saved = self.decisions.save(decision).await.map_err(|e| Error::RecordFailed(e.to_string()))?;

        let mut indexed = true;
        let text = saved.searchable_text();
        match self.embeddings.embed(&[text.clone()]).await {
            Ok(mut embeddings) => {
                if let Some(embedding) = embeddings.pop() {
                    let mut metadata = std::collections::HashMap::new();
                    metadata.insert("category".to_string(), serde_json::json!(saved.category));
                    if let Some(outcome) = &saved.outcome {
                        metadata.insert("outcome".to_string(), serde_json::json!(outcome.outcome.as_str()));
                    }
                    if self.vectors.upsert(&saved.id, &text, embedding, metadata).await.is_err() {
                        indexed = false;
                    }
                } else {
                    indexed = false;
                }
            }
            Err(_) => indexed = false,
        }

        let mut related_count = 0;
        for related in &related_to {
            let edge = GraphEdge::new(&saved.id, &related.id, EdgeType::RelatesTo, 1.0 - related.distance);
            if self.graph.add_edge(edge).await.is_ok() {
                related_count += 1;
            }
        }

        Ok(RecordDecisionResponse {
            success: true,
            id: Some(saved.id.clone()),
            indexed,
            deliberation_auto,
            deliberation_inputs_count,
            related_count,
            quality: saved.quality.clone(),
            allowed: true,
            block_reasons: Vec::new(),
        })
    }

    pub async fn update(
        &self,
        id: &str,
        agent_id: &str,
        decision_text: Option<String>,
        context: Option<String>,
        pattern: Option<String>,
        tags: Option<HashSet<String>>,
        bridge: Option<Bridge>,
        reasons: Option<Vec<Reason>>,
    ) -> Result<Decision> {
        let mut decision = self.decisions.get(id).await.map_err(|e| Error::DecisionNotFound(e.to_string()))?;
        if decision.agent_id != agent_id {
            return Err(Error::InvalidRequest("only the authoring agent may update this decision".into()));
        }
        if decision.is_reviewed() {
            return Err(Error::InvalidRequest("cannot update a reviewed decision".into()));
        }

        if let Some(text) = decision_text {
            decision.decision_text = text;
        }
        if let Some(context) = context {
            decision.context = context;
        }
        if let Some(pattern) = pattern {
            decision.pattern = Some(pattern);
        }
        if let Some(tags) = tags {
            decision.tags = tags;
        }
        if let Some(bridge) = bridge {
            decision.bridge = Some(bridge);
        }
        if let Some(reasons) = reasons {
            decision.reasons = reasons;
        }
        decision.updated_at = Some(Utc::now());
        decision.quality = Some(compute_quality(&decision));

        let saved = self.decisions.save(decision).await.map_err(|e| Error::RecordFailed(e.to_string()))?;

        if let Ok(mut embeddings) = self.embeddings.embed(&[saved.searchable_text()]).await {
            if let Some(embedding) = embeddings.pop() {
                let mut metadata = std::collections::HashMap::new();
                metadata.insert("category".to_string(), serde_json::json!(saved.category));
                let _ = self.vectors.upsert(&saved.id, &saved.searchable_text(), embedding, metadata).await;
            }
        }

        Ok(saved)
    }

    pub async fn review(
        &self,
        id: &str,
        outcome: OutcomeKind,
        actual_result: String,
        lessons: Option<String>,
    ) -> Result<Decision> {
        let existing = self.decisions.get(id).await.map_err(|e| Error::DecisionNotFound(e.to_string()))?;
        if existing.is_reviewed() {
            return Err(Error::ReviewFailed("already reviewed".into()));
        }
        self.decisions
            .update_outcome(id, outcome, actual_result, lessons)
            .await
            .map_err(|e| Error::ReviewFailed(e.to_string()))
    }

    pub async fn get(&self, id: &str) -> Result<(Decision, Vec<GraphEdge>)> {
        let decision = self.decisions.get(id).await.map_err(|e| Error::DecisionNotFound(e.to_string()))?;
        let neighbors = self.graph.neighbors(id, None, 1).await.unwrap_or_default();
        Ok((decision, neighbors))
    }

    /// Raw listing, used by the session-context bundle and other read-only
    /// composites that need more than a single decision.
    pub async fn list(&self, query: crate::storage::ListQuery) -> Result<crate::storage::ListResult> {
        self.decisions.list(query).await.map_err(|e| Error::Internal(e.to_string()))
    }

    /// Aggregates reason usage and (for reviewed decisions) success rate
    /// per reason type, across the filtered corpus.
    pub async fn reason_stats(&self, filters: crate::storage::DecisionFilters) -> Result<ReasonStats> {
        let decisions = self
            .decisions
            .list(crate::storage::ListQuery { offset: 0, limit: usize::MAX, filters, sort: crate::storage::SortDirection::Desc })
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
            .items;

        struct Acc {
            count: usize,
            strength_sum: f64,
            reviewed: usize,
            successes: usize,
        }

        let mut by_type: std::collections::HashMap<String, Acc> = std::collections::HashMap::new();
        let mut total_reasons = 0usize;

        for decision in &decisions {
            for reason in &decision.reasons {
                total_reasons += 1;
                let acc = by_type.entry(reason.reason_type.clone()).or_insert(Acc {
                    count: 0,
                    strength_sum: 0.0,
                    reviewed: 0,
                    successes: 0,
                });
                acc.count += 1;
                acc.strength_sum += reason.strength;
                if let Some(outcome) = &decision.outcome {
                    acc.reviewed += 1;
                    if outcome.outcome == OutcomeKind::Success {
                        acc.successes += 1;
                    }
                }
            }
        }

        let by_type = by_type
            .into_iter()
            .map(|(reason_type, acc)| {
                let mean_strength = acc.strength_sum / acc.count as f64;
                let success_rate = if acc.reviewed > 0 { Some(acc.successes as f64 / acc.reviewed as f64) } else { None };
                (reason_type, ReasonTypeStat { count: acc.count, mean_strength, success_rate })
            })
            .collect();

        Ok(ReasonStats { by_type, total_reasons })
    }

    /// Rebuilds the vector index from the decision store, the authoritative
    /// source of truth. Recovers from a cancelled `record` that persisted
    /// the decision but never reached the vector upsert.
    pub async fn reindex(&self) -> Result<ReindexReport> {
        let decisions = self
            .decisions
            .list(crate::storage::ListQuery { offset: 0, limit: usize::MAX, ..Default::default() })
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
            .items;

        let mut report = ReindexReport { considered: decisions.len(), reindexed: 0, failed: 0 };

        for decision in &decisions {
            let text = decision.searchable_text();
            match self.embeddings.embed(&[text.clone()]).await {
                Ok(mut embeddings) => match embeddings.pop() {
                    Some(embedding) => {
                        let mut metadata = std::collections::HashMap::new();
                        metadata.insert("category".to_string(), serde_json::json!(decision.category));
                        if let Some(outcome) = &decision.outcome {
                            metadata.insert("outcome".to_string(), serde_json::json!(outcome.outcome.as_str()));
                        }
                        match self.vectors.upsert(&decision.id, &text, embedding, metadata).await {
                            Ok(()) => report.reindexed += 1,
                            Err(_) => report.failed += 1,
                        }
                    }
                    None => report.failed += 1,
                },
                Err(_) => report.failed += 1,
            }
        }

        Ok(report)
    }

    /// Bulk outcome attribution: reviews each item independently so a
    /// single malformed entry doesn't abort the batch.
    pub async fn attribute_outcomes(&self, items: Vec<AttributionItem>) -> Result<AttributionReport> {
        let mut report = AttributionReport::default();
        for item in items {
            match self.review(&item.id, item.outcome, item.actual_result, item.lessons).await {
                Ok(_) => {
                    report.succeeded += 1;
                    report.results.push(AttributionResult { id: item.id, success: true, error: None });
                }
                Err(e) => {
                    report.failed += 1;
                    report.results.push(AttributionResult { id: item.id, success: false, error: Some(e.to_string()) });
                }
            }
        }
        Ok(report)
    }
}

/// Each component adds to a base of 0.1; clamped to [0, 1].
fn compute_quality(decision: &Decision) -> Quality {
    let mut score: f64 = 0.1;
    let mut suggestions = Vec::new();

    if decision.pattern.is_some() {
        score += 0.20;
    } else {
        suggestions.push("add a pattern summarizing the reusable insight".to_string());
    }

    if !decision.tags.is_empty() {
        score += 0.15;
    } else {
        suggestions.push("add at least one tag".to_string());
    }

    let distinct_reason_types: HashSet<&str> = decision.reasons.iter().map(|r| r.reason_type.as_str()).collect();
    if distinct_reason_types.len() >= 2 {
        score += 0.15;
    } else {
        suggestions.push("record at least two distinct reason types".to_string());
    }

    if decision.bridge.as_ref().map(|b| !b.is_empty()).unwrap_or(false) {
        score += 0.15;
    } else {
        suggestions.push("add a bridge (structure/function) for future retrieval".to_string());
    }

    if decision.decision_text.len() >= 20 {
        score += 0.10;
    } else {
        suggestions.push("expand the decision text (at least 20 characters)".to_string());
    }

    if !decision.context.is_empty() {
        score += 0.10;
    } else {
        suggestions.push("add context describing the situation".to_string());
    }

    if decision.project.is_some() {
        score += 0.10;
    } else {
        suggestions.push("attach a project".to_string());
    }

    if decision.deliberation.as_ref().map(|d| !d.inputs.is_empty()).unwrap_or(false) {
        score += 0.05;
    } else {
        suggestions.push("query before recording to capture deliberation".to_string());
    }

    Quality { score: score.clamp(0.0, 1.0), suggestions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardrail::GuardrailEngine;
    use crate::storage::http_embedding::EmbeddingClientConfig;
    use crate::storage::{HttpEmbeddingProvider, InMemoryDecisionStore, InMemoryGraphStore, InMemoryVectorStore};

    fn service() -> DecisionService {
        DecisionService::new(
            Arc::new(InMemoryDecisionStore::new()),
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(HttpEmbeddingProvider::new(EmbeddingClientConfig::new("http://localhost:0", "test", 8))),
            Arc::new(InMemoryGraphStore::new()),
            Arc::new(DeliberationTracker::new(300)),
            Arc::new(GuardrailEngine::new()),
        )
    }

    #[tokio::test]
    async fn rejects_empty_decision_text() {
        let svc = service();
        let result = svc
            .record(RecordDecisionInput { category: "architecture".into(), confidence: 0.5, ..Default::default() })
            .await;
        assert!(matches!(result, Err(Error::InvalidParams(_))));
    }

    #[tokio::test]
    async fn rejects_out_of_range_confidence() {
        let svc = service();
        let result = svc
            .record(RecordDecisionInput {
                decision_text: "use postgres".into(),
                category: "architecture".into(),
                confidence: 1.5,
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(Error::InvalidParams(_))));
    }

    #[tokio::test]
    async fn records_successfully_with_no_guardrails_loaded() {
        let svc = service();
        let response = svc
            .record(RecordDecisionInput {
                decision_text: "use sqlite for the embedded store".into(),
                category: "architecture".into(),
                confidence: 0.8,
                agent_id: "agent-1".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(response.success);
        assert!(response.id.is_some());
        assert!(response.quality.is_some());
    }

    #[test]
    fn quality_score_rewards_completeness() {
        let minimal = Decision {
            id: "a".into(),
            decision_text: "short".into(),
            context: String::new(),
            category: "x".into(),
            stakes: Stakes::Medium,
            confidence: 0.5,
            agent_id: "agent".into(),
            created_at: Utc::now(),
            updated_at: None,
            project: None,
            feature: None,
            pr: None,
            file: None,
            line: None,
            commit: None,
            reasons: vec![],
            tags: HashSet::new(),
            pattern: None,
            bridge: None,
            deliberation: None,
            outcome: None,
            review_by: None,
            related_to: vec![],
            quality: None,
        };
        let minimal_quality = compute_quality(&minimal);
        assert!((minimal_quality.score - 0.1).abs() < 1e-9);
        assert!(!minimal_quality.suggestions.is_empty());
    }
}
