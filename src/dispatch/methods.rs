//! Method registration table and per-method param/result mapping. Each
//! JSON-RPC method name maps to exactly one handler here; the tool-call
//! surface in `toolcall.rs` calls the same handlers.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::decision::{Bridge, OutcomeKind, Reason, RelatedDecision, Stakes};
use crate::domain::graph::{EdgeType, GraphEdge};
use crate::domain::guardrail::ActionContext;
use crate::domain::tracker::{TrackedInput, TrackedInputType};
use crate::error::{Error, Result};
use crate::preaction::{PreActionOptions, PreActionRequest};
use crate::query::{BridgeSide, QueryFilters, QueryRequest, RetrievalMode};
use crate::ready::ReadyFilters;
use crate::storage::DecisionFilters;
use crate::tracker::session_key;
use crate::AppState;

/// The closed set of method names this server registers, in the order
/// they're listed for the self-description document.
pub const REGISTERED_METHODS: &[&str] = &[
    "queryDecisions",
    "checkGuardrails",
    "listGuardrails",
    "recordDecision",
    "updateDecision",
    "reviewDecision",
    "getDecision",
    "getReasonStats",
    "recordThought",
    "preAction",
    "getSessionContext",
    "ready",
    "linkDecisions",
    "getGraph",
    "getNeighbors",
    "debugTracker",
    "checkDrift",
    "reindex",
    "attributeOutcomes",
    "getCalibration",
];

fn params<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))
}

/// Routes one already-authenticated call to its handler and returns a JSON
/// result. `agent_id` is `None` for unauthenticated calls; only methods
/// that don't require auth should be reachable without one (enforced by
/// the caller in `http.rs`/`toolcall.rs`).
pub async fn dispatch(state: &AppState, method: &str, params_value: Value, agent_id: Option<&str>) -> Result<Value> {
    match method {
        "queryDecisions" => query_decisions(state, params_value, agent_id).await,
        "checkGuardrails" => check_guardrails(state, params_value, agent_id).await,
        "listGuardrails" => list_guardrails(state).await,
        "recordDecision" => record_decision(state, params_value, agent_id).await,
        "updateDecision" => update_decision(state, params_value, agent_id).await,
        "reviewDecision" => review_decision(state, params_value).await,
        "getDecision" => get_decision(state, params_value).await,
        "getReasonStats" => get_reason_stats(state, params_value).await,
        "recordThought" => record_thought(state, params_value, agent_id).await,
        "preAction" => pre_action(state, params_value, agent_id).await,
        "getSessionContext" => get_session_context(state, params_value, agent_id).await,
        "ready" => ready(state, params_value).await,
        "linkDecisions" => link_decisions(state, params_value).await,
        "getGraph" => get_graph(state, params_value).await,
        "getNeighbors" => get_neighbors(state, params_value).await,
        "debugTracker" => debug_tracker(state, params_value, agent_id).await,
        "checkDrift" => check_drift(state, params_value).await,
        "reindex" => reindex(state).await,
        "attributeOutcomes" => attribute_outcomes(state, params_value).await,
        "getCalibration" => get_calibration(state, params_value).await,
        other => Err(Error::MethodNotFound(other.to_string())),
    }
}

fn require_agent(agent_id: Option<&str>) -> Result<&str> {
    agent_id.ok_or(Error::AuthRequired)
}

#[derive(Debug, Deserialize, Default)]
struct QueryDecisionsParams {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    include_reasons: bool,
    #[serde(default)]
    retrieval_mode: Option<RetrievalMode>,
    #[serde(default)]
    hybrid_weight: Option<f64>,
    #[serde(default)]
    bridge_side: Option<BridgeSide>,
    #[serde(default)]
    filters: QueryFilters,
}

async fn query_decisions(state: &AppState, value: Value, agent_id: Option<&str>) -> Result<Value> {
    let p: QueryDecisionsParams = params(value)?;
    let defaults = QueryRequest::default();
    let request = QueryRequest {
        query: p.query,
        limit: p.limit.unwrap_or(defaults.limit),
        include_reasons: p.include_reasons,
        retrieval_mode: p.retrieval_mode.unwrap_or(defaults.retrieval_mode),
        hybrid_weight: p.hybrid_weight.unwrap_or(defaults.hybrid_weight),
        bridge_side: p.bridge_side.unwrap_or(defaults.bridge_side),
        filters: p.filters,
        session_key: agent_id.map(|a| session_key("http", a, None)),
    };
    let response = state.query.query(request).await?;
    Ok(serde_json::to_value(response)?)
}

#[derive(Debug, Deserialize)]
struct ActionContextParams {
    description: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    stakes: Option<Stakes>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    context: std::collections::HashMap<String, Value>,
}

impl From<ActionContextParams> for ActionContext {
    fn from(p: ActionContextParams) -> Self {
        ActionContext {
            description: p.description,
            category: p.category,
            stakes: p.stakes.unwrap_or_default(),
            confidence: p.confidence,
            context: p.context,
        }
    }
}

async fn check_guardrails(state: &AppState, value: Value, agent_id: Option<&str>) -> Result<Value> {
    let p: ActionContextParams = params(value)?;
    let ctx: ActionContext = p.into();
    let data_source = crate::guardrail::StoreDataSource {
        decisions: state.decisions.store_handle(),
        vectors: state.decisions.vector_handle(),
        embeddings: state.decisions.embedding_handle(),
    };
    let report = state.guardrails.check(&ctx, &data_source).await;

    if let Some(agent_id) = agent_id {
        let key = session_key("http", agent_id, None);
        let raw_data = json!({ "allowed": report.allowed, "violations": report.violations.len() });
        let input = TrackedInput::new(
            crate::domain::decision::new_decision_id(),
            TrackedInputType::Guardrail,
            ctx.description.clone(),
            "checkGuardrails",
            raw_data,
        );
        state.tracker.track(&key, input).await;
    }

    Ok(serde_json::to_value(report)?)
}

async fn list_guardrails(state: &AppState) -> Result<Value> {
    state.guardrails.maybe_reload();
    Ok(serde_json::to_value(state.guardrails.list_rules())?)
}

#[derive(Debug, Deserialize, Default)]
struct RecordDecisionParams {
    decision_text: String,
    #[serde(default)]
    context: String,
    category: String,
    #[serde(default)]
    stakes: Stakes,
    confidence: f64,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    feature: Option<String>,
    #[serde(default)]
    pr: Option<i64>,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    line: Option<i64>,
    #[serde(default)]
    commit: Option<String>,
    #[serde(default)]
    reasons: Vec<Reason>,
    #[serde(default)]
    tags: HashSet<String>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    bridge: Option<Bridge>,
    #[serde(default)]
    related_to: Vec<RelatedDecision>,
    #[serde(default)]
    review_by: Option<DateTime<Utc>>,
}

async fn record_decision(state: &AppState, value: Value, agent_id: Option<&str>) -> Result<Value> {
    let agent_id = require_agent(agent_id)?;
    let p: RecordDecisionParams = params(value)?;
    let input = crate::decision::RecordDecisionInput {
        decision_text: p.decision_text,
        context: p.context,
        category: p.category,
        stakes: p.stakes,
        confidence: p.confidence,
        agent_id: agent_id.to_string(),
        project: p.project,
        feature: p.feature,
        pr: p.pr,
        file: p.file,
        line: p.line,
        commit: p.commit,
        reasons: p.reasons,
        tags: p.tags,
        pattern: p.pattern,
        bridge: p.bridge,
        deliberation: None,
        related_to: p.related_to,
        review_by: p.review_by,
        session_key: Some(session_key("http", agent_id, None)),
    };
    let response = state.decisions.record(input).await?;
    Ok(serde_json::to_value(response)?)
}

#[derive(Debug, Deserialize)]
struct UpdateDecisionParams {
    id: String,
    #[serde(default)]
    decision_text: Option<String>,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    tags: Option<HashSet<String>>,
    #[serde(default)]
    bridge: Option<Bridge>,
    #[serde(default)]
    reasons: Option<Vec<Reason>>,
}

async fn update_decision(state: &AppState, value: Value, agent_id: Option<&str>) -> Result<Value> {
    let agent_id = require_agent(agent_id)?;
    let p: UpdateDecisionParams = params(value)?;
    let decision = state
        .decisions
        .update(&p.id, agent_id, p.decision_text, p.context, p.pattern, p.tags, p.bridge, p.reasons)
        .await?;
    Ok(serde_json::to_value(decision)?)
}

#[derive(Debug, Deserialize)]
struct ReviewDecisionParams {
    id: String,
    outcome: OutcomeKind,
    actual_result: String,
    #[serde(default)]
    lessons: Option<String>,
}

async fn review_decision(state: &AppState, value: Value) -> Result<Value> {
    let p: ReviewDecisionParams = params(value)?;
    let decision = state.decisions.review(&p.id, p.outcome, p.actual_result, p.lessons).await?;
    Ok(serde_json::to_value(decision)?)
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

async fn get_decision(state: &AppState, value: Value) -> Result<Value> {
    let p: IdParams = params(value)?;
    let (decision, neighbors) = state.decisions.get(&p.id).await?;
    Ok(json!({ "decision": decision, "neighbors": neighbors }))
}

#[derive(Debug, Deserialize, Default)]
struct ReasonStatsParams {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    project: Option<String>,
}

async fn get_reason_stats(state: &AppState, value: Value) -> Result<Value> {
    let p: ReasonStatsParams = params(value)?;
    let filters = DecisionFilters { category: p.category, project: p.project, ..Default::default() };
    let stats = state.decisions.reason_stats(filters).await?;
    Ok(serde_json::to_value(stats)?)
}

#[derive(Debug, Deserialize)]
struct RecordThoughtParams {
    text: String,
    #[serde(default)]
    decision_id: Option<String>,
}

async fn record_thought(state: &AppState, value: Value, agent_id: Option<&str>) -> Result<Value> {
    let agent_id = require_agent(agent_id)?;
    let p: RecordThoughtParams = params(value)?;
    let key = session_key("http", agent_id, p.decision_id.as_deref());
    let input = TrackedInput::new(
        crate::domain::decision::new_decision_id(),
        TrackedInputType::Reasoning,
        p.text,
        "recordThought",
        Value::Null,
    );
    state.tracker.track(&key, input).await;
    Ok(json!({ "tracked": true }))
}

#[derive(Debug, Deserialize)]
struct PreActionParams {
    action: ActionContextParams,
    #[serde(default)]
    options: Option<PreActionOptionsParams>,
    #[serde(default)]
    record: PreActionRecordParams,
}

/// The `recordDecision` fields accepted alongside `preAction`'s `action`.
/// Every field is optional here: whatever is omitted falls back to the
/// matching field on `action` when the action is auto-recorded.
#[derive(Debug, Deserialize, Default)]
struct PreActionRecordParams {
    #[serde(default)]
    decision_text: Option<String>,
    #[serde(default)]
    context: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    stakes: Option<Stakes>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    feature: Option<String>,
    #[serde(default)]
    pr: Option<i64>,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    line: Option<i64>,
    #[serde(default)]
    commit: Option<String>,
    #[serde(default)]
    reasons: Vec<Reason>,
    #[serde(default)]
    tags: HashSet<String>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    bridge: Option<Bridge>,
    #[serde(default)]
    related_to: Vec<RelatedDecision>,
    #[serde(default)]
    review_by: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Default)]
struct PreActionOptionsParams {
    #[serde(default)]
    query_limit: Option<usize>,
    #[serde(default)]
    auto_record: Option<bool>,
    #[serde(default)]
    include_patterns: Option<bool>,
}

async fn pre_action(state: &AppState, value: Value, agent_id: Option<&str>) -> Result<Value> {
    let agent_id = require_agent(agent_id)?;
    let p: PreActionParams = params(value)?;
    let defaults = PreActionOptions::default();
    let options = p.options.unwrap_or_default();
    let record = p.record;
    let action = p.action;

    let decision_text = record.decision_text.unwrap_or_else(|| action.description.clone());
    let category = record.category.or_else(|| action.category.clone()).unwrap_or_default();
    let stakes = record.stakes.or(action.stakes).unwrap_or_default();
    let confidence = record.confidence.or(action.confidence).unwrap_or(0.5);

    let request = PreActionRequest {
        action: action.into(),
        options: PreActionOptions {
            query_limit: options.query_limit.unwrap_or(defaults.query_limit),
            auto_record: options.auto_record.unwrap_or(defaults.auto_record),
            include_patterns: options.include_patterns.unwrap_or(defaults.include_patterns),
        },
        record: crate::decision::RecordDecisionInput {
            decision_text,
            context: record.context,
            category,
            stakes,
            confidence,
            agent_id: agent_id.to_string(),
            project: record.project,
            feature: record.feature,
            pr: record.pr,
            file: record.file,
            line: record.line,
            commit: record.commit,
            reasons: record.reasons,
            tags: record.tags,
            pattern: record.pattern,
            bridge: record.bridge,
            deliberation: None,
            related_to: record.related_to,
            review_by: record.review_by,
            session_key: Some(session_key("http", agent_id, None)),
        },
    };
    let response = state.preaction.pre_action(request).await?;
    Ok(serde_json::to_value(response)?)
}

#[derive(Debug, Deserialize, Default)]
struct SessionContextParams {
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn get_session_context(state: &AppState, value: Value, agent_id: Option<&str>) -> Result<Value> {
    let agent_id = require_agent(agent_id)?;
    let p: SessionContextParams = params(value)?;
    let context = state.preaction.session_context(agent_id, p.project.as_deref(), p.limit.unwrap_or(20)).await?;
    Ok(serde_json::to_value(context)?)
}

#[derive(Debug, Deserialize, Default)]
struct ReadyParams {
    #[serde(default)]
    min_priority: Option<crate::domain::ready::Priority>,
    #[serde(default)]
    action_types: Option<Vec<crate::domain::ready::ReadyActionType>>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    category: Option<String>,
}

async fn ready(state: &AppState, value: Value) -> Result<Value> {
    let p: ReadyParams = params(value)?;
    let filters = ReadyFilters {
        min_priority: p.min_priority,
        action_types: p.action_types,
        limit: p.limit.unwrap_or(20),
        category: p.category,
    };
    let response = state.ready.ready(filters).await?;
    Ok(serde_json::to_value(response)?)
}

#[derive(Debug, Deserialize)]
struct LinkDecisionsParams {
    from: String,
    to: String,
    #[serde(rename = "type")]
    edge_type: EdgeType,
    #[serde(default)]
    weight: Option<f64>,
}

async fn link_decisions(state: &AppState, value: Value) -> Result<Value> {
    let p: LinkDecisionsParams = params(value)?;
    if p.from.is_empty() || p.to.is_empty() {
        return Err(Error::InvalidParams("from and to are required".into()));
    }
    let edge = GraphEdge::new(p.from, p.to, p.edge_type, p.weight.unwrap_or(1.0));
    state.graph.add_edge(edge.clone()).await.map_err(Error::Storage)?;
    Ok(serde_json::to_value(edge)?)
}

#[derive(Debug, Deserialize)]
struct GetGraphParams {
    root_id: String,
    #[serde(default)]
    depth: Option<usize>,
    #[serde(default)]
    types: Option<Vec<EdgeType>>,
}

async fn get_graph(state: &AppState, value: Value) -> Result<Value> {
    let p: GetGraphParams = params(value)?;
    let depth = p.depth.unwrap_or(1).min(3);
    let (nodes, edges) = state
        .graph
        .subgraph(&p.root_id, depth, p.types.as_deref())
        .await
        .map_err(Error::Storage)?;
    Ok(json!({ "nodes": nodes, "edges": edges }))
}

#[derive(Debug, Deserialize)]
struct GetNeighborsParams {
    id: String,
    #[serde(default)]
    types: Option<Vec<EdgeType>>,
}

async fn get_neighbors(state: &AppState, value: Value) -> Result<Value> {
    let p: GetNeighborsParams = params(value)?;
    let edges = state.graph.neighbors(&p.id, p.types.as_deref(), 1).await.map_err(Error::Storage)?;
    Ok(serde_json::to_value(edges)?)
}

#[derive(Debug, Deserialize, Default)]
struct DebugTrackerParams {
    #[serde(default)]
    decision_id: Option<String>,
}

async fn debug_tracker(state: &AppState, value: Value, agent_id: Option<&str>) -> Result<Value> {
    let agent_id = require_agent(agent_id)?;
    let p: DebugTrackerParams = params(value)?;
    let key = session_key("http", agent_id, p.decision_id.as_deref());
    let inputs = state.tracker.peek(&key).await;
    let active_sessions = state.tracker.active_session_count().await;
    state.metrics.set_active_tracker_sessions(active_sessions as u64);
    Ok(json!({ "session_key": key, "inputs": inputs, "active_sessions": active_sessions }))
}

#[derive(Debug, Deserialize, Default)]
struct CheckDriftParams {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    window_days: Option<i64>,
}

async fn check_drift(state: &AppState, value: Value) -> Result<Value> {
    let p: CheckDriftParams = params(value)?;
    let report = state.calibration.check_drift(p.category.as_deref(), p.window_days).await?;
    Ok(serde_json::to_value(report)?)
}

async fn reindex(state: &AppState) -> Result<Value> {
    let report = state.decisions.reindex().await?;
    Ok(serde_json::to_value(report)?)
}

#[derive(Debug, Deserialize)]
struct AttributeOutcomesParams {
    items: Vec<AttributionItemParams>,
}

#[derive(Debug, Deserialize)]
struct AttributionItemParams {
    id: String,
    outcome: OutcomeKind,
    actual_result: String,
    #[serde(default)]
    lessons: Option<String>,
}

async fn attribute_outcomes(state: &AppState, value: Value) -> Result<Value> {
    let p: AttributeOutcomesParams = params(value)?;
    let items = p
        .items
        .into_iter()
        .map(|i| crate::decision::AttributionItem { id: i.id, outcome: i.outcome, actual_result: i.actual_result, lessons: i.lessons })
        .collect();
    let report = state.decisions.attribute_outcomes(items).await?;
    Ok(serde_json::to_value(report)?)
}

#[derive(Debug, Deserialize, Default)]
struct GetCalibrationParams {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    project: Option<String>,
}

async fn get_calibration(state: &AppState, value: Value) -> Result<Value> {
    let p: GetCalibrationParams = params(value)?;
    let filters = DecisionFilters { category: p.category, project: p.project, ..Default::default() };
    let report = state.calibration.get_calibration(filters).await?;
    Ok(serde_json::to_value(report)?)
}
