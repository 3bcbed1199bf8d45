//! `queryDecisions`: hybrid retrieval over the decision corpus.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bm25::{Bm25Index, Document};
use crate::domain::decision::Decision;
use crate::domain::tracker::{TrackedInput, TrackedInputType};
use crate::error::{Error, Result};
use crate::storage::{DecisionFilters, DecisionStatus, DecisionStore, EmbeddingProvider, ListQuery, VectorStore};
use crate::tracker::DeliberationTracker;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 50;
const DEFAULT_HYBRID_WEIGHT: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    Semantic,
    Keyword,
    Hybrid,
}

impl Default for RetrievalMode {
    fn default() -> Self {
        RetrievalMode::Hybrid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeSide {
    Structure,
    Function,
    Both,
}

impl Default for BridgeSide {
    fn default() -> Self {
        BridgeSide::Both
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryFilters {
    pub category: Option<String>,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    pub stakes: Option<Vec<String>>,
    pub status: Option<String>,
    pub project: Option<String>,
    pub feature: Option<String>,
    pub pr: Option<i64>,
    pub has_outcome: Option<bool>,
    pub date_after: Option<chrono::DateTime<chrono::Utc>>,
    pub date_before: Option<chrono::DateTime<chrono::Utc>>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub limit: usize,
    pub include_reasons: bool,
    pub retrieval_mode: RetrievalMode,
    pub hybrid_weight: f64,
    pub bridge_side: BridgeSide,
    pub filters: QueryFilters,
    /// Present when the caller is an authenticated agent; used for tracker
    /// integration and omitted for anonymous/unauthenticated callers.
    pub session_key: Option<String>,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            limit: DEFAULT_LIMIT,
            include_reasons: false,
            retrieval_mode: RetrievalMode::default(),
            hybrid_weight: DEFAULT_HYBRID_WEIGHT,
            bridge_side: BridgeSide::default(),
            filters: QueryFilters::default(),
            session_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryHit {
    pub decision: Decision,
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub hits: Vec<QueryHit>,
    pub total_candidates: usize,
}

pub struct QueryService {
    decisions: Arc<dyn DecisionStore>,
    vectors: Arc<dyn VectorStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    tracker: Arc<DeliberationTracker>,
}

impl QueryService {
    pub fn new(
        decisions: Arc<dyn DecisionStore>,
        vectors: Arc<dyn VectorStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
        tracker: Arc<DeliberationTracker>,
    ) -> Self {
        Self { decisions, vectors, embeddings, tracker }
    }

    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse> {
        if request.query.trim().is_empty() {
            return Err(Error::InvalidParams("query must not be empty".into()));
        }
        if request.limit > MAX_LIMIT {
            return Err(Error::InvalidParams(format!("limit {} exceeds maximum of {MAX_LIMIT}", request.limit)));
        }
        if !(0.0..=1.0).contains(&request.hybrid_weight) {
            return Err(Error::InvalidParams("hybrid_weight must be in [0, 1]".into()));
        }

        let where_clause = translate_filters(&request.filters);
        let decision_filters = to_decision_filters(&request.filters);

        let candidates = self
            .decisions
            .list(ListQuery { offset: 0, limit: usize::MAX, filters: decision_filters, sort: crate::storage::SortDirection::Desc })
            .await
            .map_err(|e| Error::QueryFailed(e.to_string()))?
            .items;

        let ranked: Vec<(String, f64)> = match request.retrieval_mode {
            RetrievalMode::Semantic => self.semantic_rank(&request, &where_clause).await?,
            RetrievalMode::Keyword => keyword_rank(&request.query, &candidates),
            RetrievalMode::Hybrid => self.hybrid_rank(&request, &where_clause, &candidates).await?,
        };

        let by_id: HashMap<&str, &Decision> = candidates.iter().map(|d| (d.id.as_str(), d)).collect();
        let mut hits: Vec<QueryHit> = ranked
            .into_iter()
            .filter_map(|(id, combined)| {
                by_id.get(id.as_str()).map(|decision| {
                    let mut decision = (*decision).clone();
                    if !request.include_reasons {
                        decision.reasons.clear();
                    }
                    QueryHit { decision, distance: 1.0 - combined }
                })
            })
            .take(request.limit)
            .collect();
        hits.truncate(MAX_LIMIT);

        if let Some(key) = &request.session_key {
            let top_hits: Vec<Value> = hits
                .iter()
                .take(5)
                .map(|h| serde_json::json!({ "id": h.decision.id, "distance": h.distance }))
                .collect();
            let raw_data = serde_json::json!({ "result_count": hits.len(), "top_ids": top_hits });
            let input = TrackedInput::new(
                crate::domain::decision::new_decision_id(),
                TrackedInputType::Query,
                request.query.clone(),
                "queryDecisions",
                raw_data,
            );
            self.tracker.track(key, input).await;
        }

        Ok(QueryResponse { total_candidates: candidates.len(), hits })
    }

    async fn embed_query(&self, request: &QueryRequest) -> Result<Vec<f32>> {
        let prefixed = match request.bridge_side {
            BridgeSide::Structure => format!("Structure: {}", request.query),
            BridgeSide::Function => format!("Function: {}", request.query),
            BridgeSide::Both => request.query.clone(),
        };
        let mut embeddings = self
            .embeddings
            .embed(&[prefixed])
            .await
            .map_err(|e| Error::QueryFailed(e.to_string()))?;
        embeddings.pop().ok_or_else(|| Error::QueryFailed("embedding provider returned no vectors".into()))
    }

    async fn semantic_rank(&self, request: &QueryRequest, where_clause: &HashMap<String, Value>) -> Result<Vec<(String, f64)>> {
        let embedding = self.embed_query(request).await?;
        let hits = self
            .vectors
            .query(&embedding, request.limit.max(MAX_LIMIT), where_clause)
            .await
            .map_err(|e| Error::QueryFailed(e.to_string()))?;
        Ok(hits.into_iter().map(|h| (h.id, 1.0 - h.distance)).collect())
    }

    async fn hybrid_rank(
        &self,
        request: &QueryRequest,
        where_clause: &HashMap<String, Value>,
        candidates: &[Decision],
    ) -> Result<Vec<(String, f64)>> {
        let keyword = keyword_rank(&request.query, candidates);

        let embedding = match self.embed_query(request).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(error = %e, "embedding provider unavailable, falling back to keyword-only ranking");
                return Ok(keyword);
            }
        };

        if let Some(native) = self
            .vectors
            .hybrid_query(&request.query, &embedding, request.limit.max(MAX_LIMIT), where_clause, request.hybrid_weight)
            .await
            .map_err(|e| Error::QueryFailed(e.to_string()))?
        {
            return Ok(native.into_iter().map(|h| (h.id, 1.0 - h.distance)).collect());
        }

        let semantic = self.semantic_rank(request, where_clause).await?;

        let semantic_scores: HashMap<&str, f64> = semantic.iter().map(|(id, s)| (id.as_str(), *s)).collect();
        let keyword_scores: HashMap<&str, f64> = keyword.iter().map(|(id, s)| (id.as_str(), *s)).collect();

        let mut ids: Vec<&str> = semantic_scores.keys().chain(keyword_scores.keys()).copied().collect();
        ids.sort_unstable();
        ids.dedup();

        let mut combined: Vec<(String, f64)> = ids
            .into_iter()
            .map(|id| {
                let s = *semantic_scores.get(id).unwrap_or(&0.0);
                let k = *keyword_scores.get(id).unwrap_or(&0.0);
                (id.to_string(), request.hybrid_weight * s + (1.0 - request.hybrid_weight) * k)
            })
            .collect();

        combined.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let da = semantic_scores.get(a.0.as_str()).copied().unwrap_or(0.0);
                    let db = semantic_scores.get(b.0.as_str()).copied().unwrap_or(0.0);
                    db.partial_cmp(&da).unwrap_or(std::cmp::Ordering::Equal)
                })
        });

        Ok(combined)
    }
}

fn keyword_rank(query: &str, candidates: &[Decision]) -> Vec<(String, f64)> {
    let documents: Vec<Document> = candidates
        .iter()
        .map(|d| Document { id: d.id.clone(), text: d.searchable_text() })
        .collect();
    let index = Bm25Index::build(&documents);
    index.search(query).into_iter().map(|h| (h.id, h.score)).collect()
}

fn translate_filters(filters: &QueryFilters) -> HashMap<String, Value> {
    let mut where_clause = HashMap::new();
    if let Some(category) = &filters.category {
        where_clause.insert("category".to_string(), Value::String(category.clone()));
    }
    if let Some(project) = &filters.project {
        where_clause.insert("project".to_string(), Value::String(project.clone()));
    }
    if let Some(feature) = &filters.feature {
        where_clause.insert("feature".to_string(), Value::String(feature.clone()));
    }
    where_clause
}

fn to_decision_filters(filters: &QueryFilters) -> DecisionFilters {
    DecisionFilters {
        category: filters.category.clone(),
        stakes: filters
            .stakes
            .as_ref()
            .map(|list| list.iter().filter_map(|s| crate::domain::decision::Stakes::parse(s)).collect()),
        status: filters.status.as_deref().and_then(|s| match s {
            "pending" => Some(DecisionStatus::Pending),
            "reviewed" => Some(DecisionStatus::Reviewed),
            _ => None,
        }),
        agent: None,
        tags: filters.tags.clone(),
        project: filters.project.clone(),
        feature: filters.feature.clone(),
        pr: filters.pr,
        date_after: filters.date_after,
        date_before: filters.date_before,
        search: None,
    }
}
