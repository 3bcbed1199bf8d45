//! Pluggable storage abstractions: decision, vector, embedding, and graph
//! backends, each a narrow `async_trait` with an in-memory reference
//! implementation plus at least one persistent one.

pub mod graph_memory;
pub mod graph_jsonl;
pub mod http_embedding;
pub mod memory_decision;
pub mod memory_embedding;
pub mod memory_vector;
pub mod sqlite_decision;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::decision::{Decision, OutcomeKind, Stakes};
use crate::domain::graph::{EdgeType, GraphEdge};

pub use graph_jsonl::JsonlGraphStore;
pub use graph_memory::InMemoryGraphStore;
pub use http_embedding::HttpEmbeddingProvider;
pub use memory_decision::InMemoryDecisionStore;
pub use memory_embedding::InMemoryEmbeddingProvider;
pub use memory_vector::InMemoryVectorStore;
pub use sqlite_decision::SqliteDecisionStore;

/// Errors a storage backend can surface. Every variant is explicit about
/// whether a retry is sensible.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("operation timed out after {0}ms")]
    Timeout(u64),
}

impl StorageError {
    pub fn code(&self) -> i64 {
        match self {
            StorageError::NotFound(_) => -32010,
            StorageError::Conflict(_) => -32011,
            StorageError::Unavailable(_) => -32012,
            StorageError::Validation(_) => -32013,
            StorageError::Timeout(_) => -32014,
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::Timeout(_))
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Decision status filter used by `list`/`count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    Pending,
    Reviewed,
}

/// Sort direction for `list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Backend-independent filter set shared by `list`, `count`, and `stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionFilters {
    pub category: Option<String>,
    pub stakes: Option<Vec<Stakes>>,
    pub status: Option<DecisionStatus>,
    pub agent: Option<String>,
    pub tags: Option<Vec<String>>,
    pub project: Option<String>,
    pub feature: Option<String>,
    pub pr: Option<i64>,
    pub date_after: Option<DateTime<Utc>>,
    pub date_before: Option<DateTime<Utc>>,
    pub search: Option<String>,
}

impl DecisionFilters {
    pub fn matches(&self, decision: &Decision) -> bool {
        if let Some(category) = &self.category {
            if &decision.category != category {
                return false;
            }
        }
        if let Some(stakes) = &self.stakes {
            if !stakes.contains(&decision.stakes) {
                return false;
            }
        }
        if let Some(status) = self.status {
            let reviewed = decision.is_reviewed();
            if (status == DecisionStatus::Reviewed) != reviewed {
                return false;
            }
        }
        if let Some(agent) = &self.agent {
            if &decision.agent_id != agent {
                return false;
            }
        }
        if let Some(tags) = &self.tags {
            if !tags.iter().all(|t| decision.tags.contains(t)) {
                return false;
            }
        }
        if let Some(project) = &self.project {
            if decision.project.as_deref() != Some(project.as_str()) {
                return false;
            }
        }
        if let Some(feature) = &self.feature {
            if decision.feature.as_deref() != Some(feature.as_str()) {
                return false;
            }
        }
        if let Some(pr) = self.pr {
            if decision.pr != Some(pr) {
                return false;
            }
        }
        if let Some(after) = self.date_after {
            if decision.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.date_before {
            if decision.created_at > before {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let haystack = decision.searchable_text().to_lowercase();
            if !haystack.contains(&search.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct ListQuery {
    pub offset: usize,
    pub limit: usize,
    pub filters: DecisionFilters,
    pub sort: SortDirection,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
            filters: DecisionFilters::default(),
            sort: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResult {
    pub items: Vec<Decision>,
    pub total_matching: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionStats {
    pub by_category: HashMap<String, usize>,
    pub by_stakes: HashMap<String, usize>,
    pub by_status: HashMap<String, usize>,
    pub by_agent: HashMap<String, usize>,
    pub top_tags: Vec<(String, usize)>,
    pub activity_24h: usize,
    pub activity_7d: usize,
    pub activity_30d: usize,
}

/// The sole writer/reader of authoritative decision records.
#[async_trait]
pub trait DecisionStore: Send + Sync {
    async fn save(&self, decision: Decision) -> StorageResult<Decision>;
    async fn get(&self, id: &str) -> StorageResult<Decision>;
    async fn list(&self, query: ListQuery) -> StorageResult<ListResult>;
    async fn stats(&self, filters: DecisionFilters) -> StorageResult<DecisionStats>;
    async fn update_outcome(
        &self,
        id: &str,
        outcome: OutcomeKind,
        actual_result: String,
        lessons: Option<String>,
    ) -> StorageResult<Decision>;
    async fn count(&self, filters: DecisionFilters) -> StorageResult<usize>;
}

/// One scored hit from a vector or hybrid query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub document: String,
    pub metadata: HashMap<String, Value>,
    pub distance: f64,
}

/// Secondary, derived search index over decision embeddings.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(
        &self,
        id: &str,
        document: &str,
        embedding: Vec<f32>,
        metadata: HashMap<String, Value>,
    ) -> StorageResult<()>;

    async fn query(
        &self,
        embedding: &[f32],
        n: usize,
        where_clause: &HashMap<String, Value>,
    ) -> StorageResult<Vec<VectorHit>>;

    /// `None` means the backend has no native hybrid support; the caller
    /// falls back to merging a vector query with a keyword query itself.
    async fn hybrid_query(
        &self,
        _text: &str,
        _embedding: &[f32],
        _n: usize,
        _where_clause: &HashMap<String, Value>,
        _semantic_weight: f64,
    ) -> StorageResult<Option<Vec<VectorHit>>> {
        Ok(None)
    }

    async fn delete(&self, ids: &[String]) -> StorageResult<()>;
    async fn count(&self) -> StorageResult<usize>;
    async fn reset(&self) -> StorageResult<()>;
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Turns text into vectors. Implementations must preserve input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> StorageResult<Vec<Vec<f32>>>;
    fn dimensions(&self) -> usize;
    fn model_name(&self) -> &str;
}

/// Append-only link store between decisions.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn add_edge(&self, edge: GraphEdge) -> StorageResult<()>;
    async fn neighbors(
        &self,
        id: &str,
        types: Option<&[EdgeType]>,
        depth: usize,
    ) -> StorageResult<Vec<GraphEdge>>;
    async fn subgraph(
        &self,
        root_id: &str,
        depth: usize,
        types: Option<&[EdgeType]>,
    ) -> StorageResult<(Vec<String>, Vec<GraphEdge>)>;
    async fn remove_edge(
        &self,
        from: &str,
        to: &str,
        edge_type: Option<EdgeType>,
    ) -> StorageResult<()>;
}
