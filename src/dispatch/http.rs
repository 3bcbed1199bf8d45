//! The axum router: `POST /cstp` (JSON-RPC), `GET /health`, and
//! `GET /.well-known/agent.json` (self-description for capability
//! discovery).

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::error_handling::HandleErrorLayer;
use axum::routing::{get, post};
use axum::{BoxError, Router};
use serde_json::json;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::dispatch::methods;
use crate::dispatch::wire::{normalize_keys, RpcRequest, RpcResponse};
use crate::error::Error;
use crate::AppState;

static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

pub fn router(state: Arc<AppState>) -> Router {
    START.get_or_init(Instant::now);
    let request_timeout = Duration::from_secs(state.config.request_timeout_seconds);
    Router::new()
        .route("/cstp", post(handle_rpc))
        .route("/health", get(handle_health))
        .route("/.well-known/agent.json", get(handle_agent_card))
        .route("/tools", get(handle_list_tools))
        .route("/tools/call", post(handle_call_tool))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout_error))
                .layer(TimeoutLayer::new(request_timeout))
                .layer(TraceLayer::new_for_http()),
        )
        .with_state(state)
}

async fn handle_timeout_error(error: BoxError) -> Response {
    if error.is::<tower::timeout::error::Elapsed>() {
        rpc_error_response(StatusCode::OK, serde_json::Value::Null, &Error::Timeout(0))
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("unhandled middleware error: {error}")).into_response()
    }
}

async fn handle_rpc(State(state): State<Arc<AppState>>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return rpc_error_response(StatusCode::OK, serde_json::Value::Null, &Error::Parse(e.to_string())),
    };

    let id = request.id.clone();

    let auth_header = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    let agent_id = match crate::dispatch::auth::authenticate(auth_header, &state.config.auth_tokens) {
        Ok(agent_id) => agent_id,
        Err(e) => return rpc_error_response(StatusCode::OK, id, &e),
    };

    state.metrics.record_request(&request.method);

    let params = normalize_keys(request.params);
    let budget = Duration::from_secs(state.config.handler_budget_seconds);
    let result = tokio::time::timeout(budget, methods::dispatch(&state, &request.method, params, Some(&agent_id))).await;

    match result {
        Ok(Ok(value)) => Json(RpcResponse::success(id, value)).into_response(),
        Ok(Err(e)) => {
            state.metrics.record_error(e.code());
            rpc_error_response(StatusCode::OK, id, &e)
        }
        Err(_) => {
            let e = Error::Timeout(budget.as_millis() as u64);
            state.metrics.record_error(e.code());
            rpc_error_response(StatusCode::OK, id, &e)
        }
    }
}

fn rpc_error_response(status: StatusCode, id: serde_json::Value, error: &Error) -> Response {
    (status, Json(RpcResponse::failure(id, error))).into_response()
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime_seconds = START.get().map(|s| s.elapsed().as_secs()).unwrap_or(0);
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime_seconds,
        "timestamp": chrono::Utc::now(),
        "metrics": state.metrics.snapshot(),
    }))
}

async fn handle_agent_card() -> impl IntoResponse {
    Json(json!({
        "name": "cstp-server",
        "description": "decision-intelligence service for autonomous agents",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "cstp",
        "protocolVersion": "1.0",
        "capabilities": methods::REGISTERED_METHODS,
    }))
}

async fn handle_list_tools(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "tools": state.tools.list_tools() }))
}

#[derive(serde::Deserialize)]
struct ToolCallRequest {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

async fn handle_call_tool(State(state): State<Arc<AppState>>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    let request: ToolCallRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response(),
    };

    let auth_header = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    let agent_id = match crate::dispatch::auth::authenticate(auth_header, &state.config.auth_tokens) {
        Ok(agent_id) => agent_id,
        Err(e) => {
            state.metrics.record_error(e.code());
            return (StatusCode::OK, Json(json!({ "content": [{ "type": "text", "text": e.public_message() }], "is_error": true })))
                .into_response();
        }
    };

    state.metrics.record_request(&request.name);
    let budget = Duration::from_secs(state.config.handler_budget_seconds);
    let result = tokio::time::timeout(
        budget,
        state.tools.call_tool(&state, &request.name, request.arguments, Some(&agent_id)),
    )
    .await;

    match result {
        Ok(tool_result) => {
            if tool_result.is_error {
                state.metrics.record_error(-32601);
            }
            Json(tool_result).into_response()
        }
        Err(_) => {
            let e = Error::Timeout(budget.as_millis() as u64);
            state.metrics.record_error(e.code());
            (StatusCode::OK, Json(json!({ "content": [{ "type": "text", "text": e.public_message() }], "is_error": true }))).into_response()
        }
    }
}
