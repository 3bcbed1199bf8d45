//! The pre-action composite (`preAction`) and the session-context bundle
//! (`getSessionContext`).

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::calibration::CalibrationService;
use crate::decision::{DecisionService, RecordDecisionInput, RecordDecisionResponse};
use crate::domain::calibration::CalibrationContext;
use crate::domain::decision::Decision;
use crate::domain::guardrail::{ActionContext, GuardrailResult};
use crate::domain::ready::ReadyAction;
use crate::error::Result;
use crate::guardrail::{GuardrailEngine, StoreDataSource};
use crate::query::{QueryHit, QueryRequest, QueryService};
use crate::ready::review_outcome_and_stale_pending_actions;
use crate::storage::{DecisionFilters, ListQuery, SortDirection};

const DEFAULT_QUERY_LIMIT: usize = 5;

#[derive(Debug, Clone)]
pub struct PreActionOptions {
    pub query_limit: usize,
    pub auto_record: bool,
    pub include_patterns: bool,
}

impl Default for PreActionOptions {
    fn default() -> Self {
        Self { query_limit: DEFAULT_QUERY_LIMIT, auto_record: true, include_patterns: true }
    }
}

#[derive(Debug, Clone)]
pub struct PreActionRequest {
    pub action: ActionContext,
    pub options: PreActionOptions,
    pub record: RecordDecisionInput,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternSummary {
    pub pattern: String,
    pub confirmations: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreActionResponse {
    pub allowed: bool,
    pub decision_id: Option<String>,
    pub block_reasons: Vec<GuardrailResult>,
    pub relevant_decisions: Vec<QueryHit>,
    pub guardrail_results: Vec<GuardrailResult>,
    pub calibration_context: CalibrationContext,
    pub patterns_summary: Vec<PatternSummary>,
    pub record: Option<RecordDecisionResponse>,
}

pub struct PreActionService {
    query: Arc<QueryService>,
    guardrails: Arc<GuardrailEngine>,
    calibration: Arc<CalibrationService>,
    decisions: Arc<DecisionService>,
}

impl PreActionService {
    pub fn new(
        query: Arc<QueryService>,
        guardrails: Arc<GuardrailEngine>,
        calibration: Arc<CalibrationService>,
        decisions: Arc<DecisionService>,
    ) -> Self {
        Self { query, guardrails, calibration, decisions }
    }

    pub async fn pre_action(&self, request: PreActionRequest) -> Result<PreActionResponse> {
        let query_response = self
            .query
            .query(QueryRequest {
                query: request.action.description.clone(),
                limit: request.options.query_limit,
                include_reasons: false,
                ..Default::default()
            })
            .await?;

        let data_source = StoreDataSource {
            decisions: self.decisions_store(),
            vectors: self.vectors_store(),
            embeddings: self.embeddings_provider(),
        };
        let report = self.guardrails.check(&request.action, &data_source).await;

        let calibration_context = self
            .calibration
            .context_for_category(request.action.category.as_deref())
            .await;

        let patterns_summary = if request.options.include_patterns {
            summarize_patterns(&query_response.hits)
        } else {
            Vec::new()
        };

        if !report.allowed {
            let block_reasons: Vec<GuardrailResult> = report
                .violations
                .iter()
                .filter(|v| v.severity == crate::domain::guardrail::Severity::Block)
                .cloned()
                .collect();
            return Ok(PreActionResponse {
                allowed: false,
                decision_id: None,
                block_reasons,
                guardrail_results: report.violations,
                relevant_decisions: query_response.hits,
                calibration_context,
                patterns_summary,
                record: None,
            });
        }

        if !request.options.auto_record {
            return Ok(PreActionResponse {
                allowed: true,
                decision_id: None,
                block_reasons: Vec::new(),
                guardrail_results: report.violations,
                relevant_decisions: query_response.hits,
                calibration_context,
                patterns_summary,
                record: None,
            });
        }

        let mut record_input = request.record.clone();
        for hit in &query_response.hits {
            if !record_input.related_to.iter().any(|r| r.id == hit.decision.id) {
                record_input.related_to.push(crate::domain::decision::RelatedDecision {
                    id: hit.decision.id.clone(),
                    summary: hit.decision.decision_text.clone(),
                    distance: hit.distance,
                });
            }
        }

        let record_response = self.decisions.record(record_input).await?;
        let decision_id = record_response.id.clone();

        Ok(PreActionResponse {
            allowed: true,
            decision_id,
            block_reasons: Vec::new(),
            guardrail_results: report.violations,
            relevant_decisions: query_response.hits,
            calibration_context,
            patterns_summary,
            record: Some(record_response),
        })
    }

    pub async fn session_context(&self, agent_id: &str, project: Option<&str>, limit: usize) -> Result<SessionContext> {
        let filters = DecisionFilters { agent: Some(agent_id.to_string()), project: project.map(str::to_string), ..Default::default() };
        let recent = self
            .decisions
            .list(ListQuery { offset: 0, limit, filters, sort: SortDirection::Desc })
            .await?
            .items;

        let active_guardrails = self.guardrails.list_rules();

        let categories: std::collections::HashSet<String> = recent.iter().map(|d| d.category.clone()).collect();
        let mut calibration_by_category = HashMap::new();
        for category in categories {
            let ctx = self.calibration.context_for_category(Some(&category)).await;
            calibration_by_category.insert(category, ctx);
        }

        let top_patterns = top_confirmed_patterns(&recent);
        let ready_actions = review_outcome_and_stale_pending_actions(&recent);

        Ok(SessionContext {
            recent_decisions: recent,
            active_guardrails,
            calibration_by_category,
            top_patterns,
            ready_actions,
        })
    }

    fn decisions_store(&self) -> Arc<dyn crate::storage::DecisionStore> {
        self.decisions.store_handle()
    }

    fn vectors_store(&self) -> Arc<dyn crate::storage::VectorStore> {
        self.decisions.vector_handle()
    }

    fn embeddings_provider(&self) -> Arc<dyn crate::storage::EmbeddingProvider> {
        self.decisions.embedding_handle()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionContext {
    pub recent_decisions: Vec<Decision>,
    pub active_guardrails: Vec<crate::domain::guardrail::Guardrail>,
    pub calibration_by_category: HashMap<String, CalibrationContext>,
    pub top_patterns: Vec<PatternSummary>,
    pub ready_actions: Vec<ReadyAction>,
}

fn summarize_patterns(hits: &[QueryHit]) -> Vec<PatternSummary> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for hit in hits {
        if let Some(pattern) = &hit.decision.pattern {
            *counts.entry(pattern.clone()).or_insert(0) += 1;
        }
    }
    let mut summaries: Vec<PatternSummary> = counts
        .into_iter()
        .map(|(pattern, confirmations)| PatternSummary { pattern, confirmations })
        .collect();
    summaries.sort_by(|a, b| b.confirmations.cmp(&a.confirmations).then_with(|| a.pattern.cmp(&b.pattern)));
    summaries
}

fn top_confirmed_patterns(decisions: &[Decision]) -> Vec<PatternSummary> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for decision in decisions {
        if let Some(pattern) = &decision.pattern {
            *counts.entry(pattern.clone()).or_insert(0) += 1;
        }
    }
    let mut summaries: Vec<PatternSummary> = counts
        .into_iter()
        .map(|(pattern, confirmations)| PatternSummary { pattern, confirmations })
        .collect();
    summaries.sort_by(|a, b| b.confirmations.cmp(&a.confirmations).then_with(|| a.pattern.cmp(&b.pattern)));
    summaries.truncate(10);
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::Stakes;
    use crate::guardrail::GuardrailEngine;
    use crate::storage::http_embedding::EmbeddingClientConfig;
    use crate::storage::{HttpEmbeddingProvider, InMemoryDecisionStore, InMemoryGraphStore, InMemoryVectorStore};
    use crate::tracker::DeliberationTracker;

    fn service() -> PreActionService {
        let decision_store: Arc<dyn crate::storage::DecisionStore> = Arc::new(InMemoryDecisionStore::new());
        let vector_store: Arc<dyn crate::storage::VectorStore> = Arc::new(InMemoryVectorStore::new());
        let embeddings: Arc<dyn crate::storage::EmbeddingProvider> =
            Arc::new(HttpEmbeddingProvider::new(EmbeddingClientConfig::new("http://localhost:0", "test", 8)));
        let graph: Arc<dyn crate::storage::GraphStore> = Arc::new(InMemoryGraphStore::new());
        let tracker = Arc::new(DeliberationTracker::new(300));
        let guardrails = Arc::new(GuardrailEngine::new());

        let query = Arc::new(QueryService::new(decision_store.clone(), vector_store.clone(), embeddings.clone(), tracker.clone()));
        let decisions = Arc::new(DecisionService::new(
            decision_store.clone(),
            vector_store.clone(),
            embeddings.clone(),
            graph.clone(),
            tracker.clone(),
            guardrails.clone(),
        ));
        let calibration = Arc::new(CalibrationService::new(decision_store.clone()));

        PreActionService::new(query, guardrails, calibration, decisions)
    }

    #[tokio::test]
    async fn allowed_action_with_auto_record_creates_a_decision() {
        let svc = service();
        let request = PreActionRequest {
            action: ActionContext {
                description: "switch retry backoff to exponential with jitter".into(),
                category: Some("reliability".into()),
                stakes: Stakes::Medium,
                confidence: Some(0.75),
                context: HashMap::new(),
            },
            options: PreActionOptions { query_limit: 5, auto_record: true, include_patterns: true },
            record: RecordDecisionInput {
                decision_text: "switch retry backoff to exponential with jitter".into(),
                category: "reliability".into(),
                confidence: 0.75,
                agent_id: "agent-1".into(),
                ..Default::default()
            },
        };
        let response = svc.pre_action(request).await.unwrap();
        assert!(response.allowed);
        assert!(response.decision_id.is_some());
    }

    #[tokio::test]
    async fn allowed_without_auto_record_does_not_create_a_decision() {
        let svc = service();
        let request = PreActionRequest {
            action: ActionContext {
                description: "evaluate a new caching layer".into(),
                category: Some("performance".into()),
                stakes: Stakes::Low,
                confidence: Some(0.6),
                context: HashMap::new(),
            },
            options: PreActionOptions { query_limit: 5, auto_record: false, include_patterns: true },
            record: RecordDecisionInput::default(),
        };
        let response = svc.pre_action(request).await.unwrap();
        assert!(response.allowed);
        assert!(response.decision_id.is_none());
    }
}
