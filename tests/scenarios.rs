//! End-to-end seed scenarios driven through the JSON-RPC dispatcher, the
//! same entry point the HTTP and tool-call transports use. Each test
//! builds its own `AppState` over in-memory backends.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use cstp_server::config::Config;
use cstp_server::dispatch::methods::dispatch;
use cstp_server::domain::decision::{Decision, Outcome, OutcomeKind, Stakes};
use cstp_server::storage::{DecisionStore, InMemoryDecisionStore, InMemoryEmbeddingProvider, InMemoryGraphStore, InMemoryVectorStore};
use cstp_server::AppState;

fn test_config(guardrails_paths: Vec<std::path::PathBuf>) -> Arc<Config> {
    let mut config = Config::default();
    config.guardrails_paths = guardrails_paths;
    config.auth_tokens.insert("agent-a".to_string(), "secret-a".to_string());
    Arc::new(config)
}

fn fresh_state(guardrails_paths: Vec<std::path::PathBuf>) -> Arc<AppState> {
    let config = test_config(guardrails_paths);
    Arc::new(AppState::new(
        config,
        Arc::new(InMemoryDecisionStore::new()),
        Arc::new(InMemoryVectorStore::new()),
        Arc::new(InMemoryEmbeddingProvider::new(32)),
        Arc::new(InMemoryGraphStore::new()),
    ))
}

// S1 — record, query, review, and reject a second review of the same
// decision.
#[tokio::test]
async fn record_query_and_review_roundtrip() {
    let state = fresh_state(vec![]);

    let recorded = dispatch(
        &state,
        "recordDecision",
        json!({
            "decision_text": "use a connection pool with a hard cap of 20 for the payments service",
            "context": "payments service was exhausting database connections under load",
            "category": "architecture",
            "stakes": "high",
            "confidence": 0.75,
        }),
        Some("agent-a"),
    )
    .await
    .expect("recordDecision should succeed");

    assert_eq!(recorded["success"], json!(true));
    assert_eq!(recorded["indexed"], json!(true));
    let id = recorded["id"].as_str().expect("id present").to_string();

    let queried = dispatch(&state, "queryDecisions", json!({ "query": "connection pool payments" }), Some("agent-a"))
        .await
        .expect("queryDecisions should succeed");
    let hits = queried["hits"].as_array().expect("hits array");
    assert!(!hits.is_empty());
    assert!(hits.iter().any(|h| h["decision"]["id"] == json!(id)));

    let reviewed = dispatch(
        &state,
        "reviewDecision",
        json!({ "id": id, "outcome": "success", "actual_result": "connection exhaustion stopped" }),
        None,
    )
    .await
    .expect("reviewDecision should succeed");
    assert_eq!(reviewed["outcome"]["outcome"], json!("success"));

    let second_review = dispatch(
        &state,
        "reviewDecision",
        json!({ "id": id, "outcome": "failure", "actual_result": "changed my mind" }),
        None,
    )
    .await;
    assert!(second_review.is_err(), "reviewing an already-reviewed decision must fail");
}

// S2 — a rule with conditions but no requirements blocks unconditionally
// once matched, loaded from an on-disk guardrail file exactly as the
// dispatcher would load it at startup.
#[tokio::test]
async fn guardrail_rule_with_no_requirements_blocks_unconditionally() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("high-stakes.yaml"),
        r#"
id: no-high-stakes-low-conf
description: high stakes with low confidence
conditions:
  - kind: compound
    op: and
    conditions:
      - kind: field
        field: stakes
        operator: eq
        value: high
      - kind: field
        field: confidence
        operator: lt
        value: 0.5
action: block
message: high stakes actions need higher confidence
"#,
    )
    .unwrap();

    let state = fresh_state(vec![dir.path().to_path_buf()]);

    let report = dispatch(
        &state,
        "checkGuardrails",
        json!({ "action": { "description": "deploy to prod", "stakes": "high", "confidence": 0.3 } }),
        None,
    )
    .await
    .expect("checkGuardrails should succeed");

    assert_eq!(report["allowed"], json!(false));
    let violations = report["violations"].as_array().unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0]["severity"], json!("block"));
}

// S3 — queryDecisions and checkGuardrails passively accumulate into the
// deliberation tracker; the next recordDecision from the same agent
// auto-captures both.
#[tokio::test]
async fn deliberation_tracker_auto_captures_prior_query_and_check() {
    let state = fresh_state(vec![]);

    dispatch(&state, "queryDecisions", json!({ "query": "rate limiting" }), Some("agent-a"))
        .await
        .expect("queryDecisions should succeed");

    let check = dispatch(
        &state,
        "checkGuardrails",
        json!({ "action": { "description": "add a token bucket rate limiter", "stakes": "medium", "confidence": 0.8 } }),
        Some("agent-a"),
    )
    .await
    .expect("checkGuardrails should succeed");
    assert_eq!(check["allowed"], json!(true));

    let recorded = dispatch(
        &state,
        "recordDecision",
        json!({
            "decision_text": "add a token bucket rate limiter to the public API",
            "context": "inbound traffic spikes were starving shared infrastructure",
            "category": "reliability",
            "stakes": "medium",
            "confidence": 0.8,
        }),
        Some("agent-a"),
    )
    .await
    .expect("recordDecision should succeed");

    assert_eq!(recorded["deliberation_auto"], json!(true));
    assert!(recorded["deliberation_inputs_count"].as_u64().unwrap() >= 2);

    let id = recorded["id"].as_str().unwrap();
    let fetched = dispatch(&state, "getDecision", json!({ "id": id }), None).await.unwrap();
    let inputs = fetched["decision"]["deliberation"]["inputs"].as_array().unwrap();
    let sources: Vec<&str> = inputs.iter().map(|i| i["source"].as_str().unwrap()).collect();
    assert!(sources.contains(&"queryDecisions"));
    assert!(sources.contains(&"checkGuardrails"));
}

// S4 — preAction surfaces a relevant prior decision, auto-records the new
// one, and links it with a `relates_to` edge without the caller supplying
// a separate `record` block.
#[tokio::test]
async fn pre_action_auto_links_relevant_prior_decision() {
    let state = fresh_state(vec![]);

    let prior = dispatch(
        &state,
        "recordDecision",
        json!({
            "decision_text": "cache database query results for the product catalog endpoint",
            "context": "catalog reads dominate traffic and rarely change",
            "category": "performance",
            "stakes": "medium",
            "confidence": 0.7,
        }),
        Some("agent-a"),
    )
    .await
    .unwrap();
    let prior_id = prior["id"].as_str().unwrap().to_string();

    let pre_action = dispatch(
        &state,
        "preAction",
        json!({
            "action": {
                "description": "cache database query results for the product catalog endpoint again",
                "category": "performance",
                "stakes": "medium",
                "confidence": 0.7,
            }
        }),
        Some("agent-a"),
    )
    .await
    .expect("preAction should succeed");

    assert_eq!(pre_action["allowed"], json!(true));
    let decision_id = pre_action["decision_id"].as_str().expect("auto-recorded decision id").to_string();
    assert!(pre_action["record"]["deliberation_auto"].is_boolean());

    let neighbors = dispatch(&state, "getNeighbors", json!({ "id": decision_id }), None).await.unwrap();
    let edges = neighbors.as_array().unwrap();
    assert!(edges
        .iter()
        .any(|e| e["type"] == json!("relates_to") && e["to_id"] == json!(prior_id)));
}

// S5 — calibration drift: a recent window with materially worse Brier
// score than the historical baseline is flagged.
#[tokio::test]
async fn check_drift_flags_recent_brier_degradation() {
    let state = fresh_state(vec![]);
    let now = Utc::now();

    let well_calibrated = |created_at: chrono::DateTime<Utc>| Decision {
        id: cstp_server::domain::decision::new_decision_id(),
        decision_text: "use retries with backoff".into(),
        context: "flaky downstream dependency".into(),
        category: "reliability".into(),
        stakes: Stakes::Medium,
        confidence: 0.9,
        agent_id: "agent-a".into(),
        created_at,
        updated_at: None,
        project: None,
        feature: None,
        pr: None,
        file: None,
        line: None,
        commit: None,
        reasons: vec![],
        tags: Default::default(),
        pattern: None,
        bridge: None,
        deliberation: None,
        outcome: Some(Outcome { outcome: OutcomeKind::Success, actual_result: "worked".into(), lessons: None, reviewed_at: created_at }),
        review_by: None,
        related_to: vec![],
        quality: None,
    };

    let miscalibrated = |created_at: chrono::DateTime<Utc>| Decision {
        outcome: Some(Outcome { outcome: OutcomeKind::Failure, actual_result: "did not work".into(), lessons: None, reviewed_at: created_at }),
        ..well_calibrated(created_at)
    };

    for i in 0..6 {
        state.decisions.store_handle().save(well_calibrated(now - Duration::days(60 + i))).await.unwrap();
    }
    for i in 0..6 {
        state.decisions.store_handle().save(miscalibrated(now - Duration::days(i))).await.unwrap();
    }

    let report = dispatch(&state, "checkDrift", json!({ "window_days": 30 }), None).await.unwrap();
    assert_eq!(report["drift_detected"], json!(true));
    assert!(report["severity"].is_string());
}

// S6 — bridge-side retrieval is directional: querying the structure facet
// ranks the decision whose structure matches above the one whose function
// happens to share the same words.
#[tokio::test]
async fn bridge_search_is_directional() {
    let state = fresh_state(vec![]);

    dispatch(
        &state,
        "recordDecision",
        json!({
            "decision_text": "isolate tenant workloads with per-tenant connection pools",
            "context": "noisy neighbor tenants starved shared pool capacity",
            "category": "architecture",
            "stakes": "high",
            "confidence": 0.8,
            "bridge": {
                "structure": "connection pool exhaustion under concurrent tenant load",
                "function": "requests across tenants queue and eventually time out",
            },
        }),
        Some("agent-a"),
    )
    .await
    .unwrap();

    dispatch(
        &state,
        "recordDecision",
        json!({
            "decision_text": "add a circuit breaker around the recommendation service call",
            "context": "slow downstream calls queued up and timed out under load",
            "category": "reliability",
            "stakes": "high",
            "confidence": 0.8,
            "bridge": {
                "structure": "requests across tenants queue and eventually time out",
                "function": "connection pool exhaustion under concurrent tenant load",
            },
        }),
        Some("agent-a"),
    )
    .await
    .unwrap();

    let structure_query = dispatch(
        &state,
        "queryDecisions",
        json!({
            "query": "connection pool exhaustion under concurrent tenant load",
            "retrieval_mode": "semantic",
            "bridge_side": "structure",
        }),
        None,
    )
    .await
    .unwrap();
    let top_structure = structure_query["hits"][0]["decision"]["decision_text"].as_str().unwrap();
    assert!(top_structure.contains("isolate tenant workloads"));

    let function_query = dispatch(
        &state,
        "queryDecisions",
        json!({
            "query": "connection pool exhaustion under concurrent tenant load",
            "retrieval_mode": "semantic",
            "bridge_side": "function",
        }),
        None,
    )
    .await
    .unwrap();
    let top_function = function_query["hits"][0]["decision"]["decision_text"].as_str().unwrap();
    assert!(top_function.contains("circuit breaker"));
}
