//! The tool-call surface: one tool per JSON-RPC method, for agent runtimes
//! that prefer a tool-calling interface over raw JSON-RPC. Tool output is
//! the method's JSON result serialized as a text content block.
//!
//! Structured as a name-keyed registry, the same shape as an MCP tool
//! registry: a `Tool` definition built once per dispatch method, looked
//! up by name, and executed against the same dispatch table `http.rs`
//! uses for the JSON-RPC transport.

use serde::Serialize;
use serde_json::{json, Value};

use crate::dispatch::methods::{self, REGISTERED_METHODS};
use crate::error::Error;
use crate::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub category: &'static str,
}

impl Tool {
    fn new(name: &str, description: &'static str, category: &'static str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: json!({ "type": "object", "additionalProperties": true }),
            category,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub content_type: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolContent>,
    pub is_error: bool,
}

/// Registry of dispatch-backed tools, one per registered JSON-RPC method.
pub struct ToolRegistry {
    tools: Vec<Tool>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ToolRegistry {
    pub fn with_defaults() -> Self {
        let tools = REGISTERED_METHODS
            .iter()
            .map(|&name| Tool::new(name, describe(name), category_of(name)))
            .collect();
        Self { tools }
    }

    pub fn get_tool(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn tools_by_category(&self, category: &str) -> Vec<&Tool> {
        self.tools.iter().filter(|t| t.category == category).collect()
    }

    /// Every registered method exposed as a tool, with a loose object
    /// schema. The dispatcher, not this schema, is the source of truth
    /// on required fields — it rejects malformed params with
    /// `invalid_params`.
    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools.clone()
    }

    /// Execute a tool by name, delegating to the same dispatch table
    /// `http.rs` uses, wrapping the result (or error) as a tool-call
    /// content block instead of a JSON-RPC envelope.
    pub async fn call_tool(&self, state: &AppState, name: &str, args: Value, agent_id: Option<&str>) -> ToolCallResult {
        if self.get_tool(name).is_none() {
            return error_result(&Error::MethodNotFound(name.to_string()));
        }

        let params = crate::dispatch::wire::normalize_keys(args);
        match methods::dispatch(state, name, params, agent_id).await {
            Ok(value) => ToolCallResult { content: vec![text_content(&value)], is_error: false },
            Err(e) => error_result(&e),
        }
    }

    pub fn export_schema(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|t| json!({ "name": t.name, "description": t.description, "inputSchema": t.input_schema }))
            .collect();
        json!({ "tools": tools })
    }
}

fn category_of(method: &str) -> &'static str {
    match method {
        "queryDecisions" | "preAction" | "getSessionContext" => "retrieval",
        "checkGuardrails" | "listGuardrails" => "guardrail",
        "recordDecision" | "updateDecision" | "reviewDecision" | "getDecision" | "getReasonStats" | "reindex"
        | "attributeOutcomes" => "decision",
        "recordThought" | "debugTracker" => "tracker",
        "ready" => "workflow",
        "linkDecisions" | "getGraph" | "getNeighbors" => "graph",
        "checkDrift" | "getCalibration" => "calibration",
        _ => "other",
    }
}

fn describe(method: &str) -> &'static str {
    match method {
        "queryDecisions" => "Retrieve past decisions relevant to a query via hybrid semantic/keyword search.",
        "checkGuardrails" => "Evaluate a proposed action against loaded guardrail policy.",
        "listGuardrails" => "List the currently loaded guardrail rules.",
        "recordDecision" => "Record a new decision with its reasoning and context.",
        "updateDecision" => "Update a not-yet-reviewed decision's text, context, or reasons.",
        "reviewDecision" => "Attach an observed outcome to a previously recorded decision.",
        "getDecision" => "Fetch a single decision by id, with its linked neighbors.",
        "getReasonStats" => "Aggregate reasoning usage and success rate by reason type.",
        "recordThought" => "Passively record a reasoning step for the current deliberation session.",
        "preAction" => "Query, guardrail-check, and optionally record a decision in one call.",
        "getSessionContext" => "Fetch a bundle of recent decisions, guardrails, calibration, and ready actions for an agent.",
        "ready" => "List surfaced follow-up work: overdue reviews, calibration drift, stale pending decisions.",
        "linkDecisions" => "Create a directed edge between two decisions.",
        "getGraph" => "Fetch the subgraph of linked decisions rooted at a decision.",
        "getNeighbors" => "Fetch a decision's immediate graph neighbors.",
        "debugTracker" => "Inspect the current deliberation tracker session for an agent.",
        "checkDrift" => "Compare recent calibration against the historical baseline for a category.",
        "reindex" => "Rebuild the vector index from the authoritative decision store.",
        "attributeOutcomes" => "Review outcomes for a batch of decisions in one call.",
        "getCalibration" => "Compute a Brier-score calibration report over a filtered decision set.",
        _ => "",
    }
}

fn text_content(value: &Value) -> ToolContent {
    ToolContent {
        content_type: "text",
        text: serde_json::to_string(value).unwrap_or_else(|_| "null".to_string()),
    }
}

fn error_result(error: &Error) -> ToolCallResult {
    ToolCallResult {
        content: vec![ToolContent {
            content_type: "text",
            text: json!({ "code": error.code(), "message": error.public_message() }).to_string(),
        }],
        is_error: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_one_tool_per_method() {
        let registry = ToolRegistry::with_defaults();
        assert_eq!(registry.list_tools().len(), REGISTERED_METHODS.len());
    }

    #[test]
    fn unknown_tool_is_absent() {
        let registry = ToolRegistry::with_defaults();
        assert!(registry.get_tool("not_a_real_method").is_none());
    }

    #[test]
    fn tools_grouped_by_category() {
        let registry = ToolRegistry::with_defaults();
        let guardrail_tools = registry.tools_by_category("guardrail");
        assert_eq!(guardrail_tools.len(), 2);
    }

    #[test]
    fn export_schema_wraps_tools() {
        let registry = ToolRegistry::with_defaults();
        let schema = registry.export_schema();
        assert!(schema.get("tools").is_some());
    }
}
