//! # cstp-server
//!
//! A decision-intelligence service for autonomous agents: a JSON-RPC
//! dispatcher that records structured decisions, evaluates guardrail
//! policy against proposed actions, retrieves semantically similar past
//! decisions through hybrid search, and tracks predicted-vs-actual
//! outcomes to compute calibration.
//!
//! ## Core components
//!
//! - **domain**: wire-independent value types (`Decision`, `Guardrail`,
//!   `GraphEdge`, ...)
//! - **storage**: pluggable `DecisionStore`/`VectorStore`/`EmbeddingProvider`/
//!   `GraphStore` traits with in-memory and persistent implementations
//! - **tracker**: the deliberation tracker that passively reconstructs an
//!   agent's reasoning trace
//! - **guardrail**: the policy rule loader and evaluator
//! - **bm25**: the keyword ranking index backing hybrid retrieval
//! - **query**: the hybrid retrieval service
//! - **decision**: record/update/review/get operations on decisions
//! - **calibration**: Brier score, drift, and calibration reporting
//! - **preaction**: the pre-action and session-context composites
//! - **ready**: work-discovery (review/drift/stale-pending) surfacing
//! - **dispatch**: JSON-RPC + tool-call transport, auth, and wiring

pub mod bm25;
pub mod calibration;
pub mod config;
pub mod decision;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod guardrail;
pub mod metrics;
pub mod preaction;
pub mod query;
pub mod ready;
pub mod storage;
pub mod tracker;

pub use config::Config;
pub use error::{Error, Result};
pub use metrics::Metrics;

use std::sync::Arc;

use crate::calibration::CalibrationService;
use crate::decision::DecisionService;
use crate::dispatch::toolcall::ToolRegistry;
use crate::guardrail::GuardrailEngine;
use crate::preaction::PreActionService;
use crate::query::QueryService;
use crate::ready::ReadyService;
use crate::storage::{DecisionStore, EmbeddingProvider, GraphStore, VectorStore};
use crate::tracker::DeliberationTracker;

/// Everything a request handler needs, composed once in `main` and shared
/// behind reference counting across every connection.
pub struct AppState {
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub tracker: Arc<DeliberationTracker>,
    pub guardrails: Arc<GuardrailEngine>,
    pub decisions: Arc<DecisionService>,
    pub query: Arc<QueryService>,
    pub calibration: Arc<CalibrationService>,
    pub preaction: Arc<PreActionService>,
    pub ready: Arc<ReadyService>,
    pub graph: Arc<dyn GraphStore>,
    pub tools: Arc<ToolRegistry>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        decision_store: Arc<dyn DecisionStore>,
        vector_store: Arc<dyn VectorStore>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        graph_store: Arc<dyn GraphStore>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let tracker = Arc::new(DeliberationTracker::new(config.tracker_ttl_seconds));
        let guardrails = Arc::new(
            GuardrailEngine::with_rules_dirs(config.guardrails_paths.clone())
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "failed to load guardrails at startup, starting with no rules");
                    GuardrailEngine::new()
                }),
        );

        let query = Arc::new(QueryService::new(
            decision_store.clone(),
            vector_store.clone(),
            embedding_provider.clone(),
            tracker.clone(),
        ));

        let decisions = Arc::new(DecisionService::new(
            decision_store.clone(),
            vector_store.clone(),
            embedding_provider.clone(),
            graph_store.clone(),
            tracker.clone(),
            guardrails.clone(),
        ));

        let calibration = Arc::new(CalibrationService::new(decision_store.clone()));

        let preaction = Arc::new(PreActionService::new(
            query.clone(),
            guardrails.clone(),
            calibration.clone(),
            decisions.clone(),
        ));

        let ready = Arc::new(ReadyService::new(decision_store.clone(), calibration.clone()));
        let tools = Arc::new(ToolRegistry::with_defaults());

        Self {
            config,
            metrics,
            tracker,
            guardrails,
            decisions,
            query,
            calibration,
            preaction,
            ready,
            graph: graph_store,
            tools,
        }
    }
}
