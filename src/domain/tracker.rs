//! Deliberation tracker domain types — the events the tracker accumulates
//! and the trace built from them at `consume` time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of event a passive observation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackedInputType {
    Query,
    Guardrail,
    Lookup,
    Stats,
    Reasoning,
}

impl TrackedInputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackedInputType::Query => "query",
            TrackedInputType::Guardrail => "guardrail",
            TrackedInputType::Lookup => "lookup",
            TrackedInputType::Stats => "stats",
            TrackedInputType::Reasoning => "reasoning",
        }
    }
}

/// One observed event in an agent's deliberation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedInput {
    pub id: String,
    #[serde(rename = "type")]
    pub input_type: TrackedInputType,
    pub text: String,
    /// Canonical method name that produced this input (e.g. `queryDecisions`).
    pub source: String,
    pub timestamp: DateTime<Utc>,
    /// Method-specific payload (result ids, counts) kept untyped since each
    /// source shapes it differently and only `consume`'s caller reads it.
    #[serde(default)]
    pub raw_data: Value,
}

impl TrackedInput {
    pub fn new(
        id: impl Into<String>,
        input_type: TrackedInputType,
        text: impl Into<String>,
        source: impl Into<String>,
        raw_data: Value,
    ) -> Self {
        Self {
            id: id.into(),
            input_type,
            text: text.into(),
            source: source.into(),
            timestamp: Utc::now(),
            raw_data,
        }
    }
}

/// One grouped step of a deliberation trace: a run of consecutive
/// same-type inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub input_ids: Vec<String>,
    #[serde(rename = "type")]
    pub step_type: TrackedInputType,
    pub conclusion: Option<bool>,
}

/// The structured artifact built from a session's `TrackedInput`s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliberationTrace {
    pub inputs: Vec<TrackedInput>,
    pub steps: Vec<TraceStep>,
    pub total_duration_ms: i64,
    /// Whether the last query's top results overlapped the decision's
    /// eventual `related_to` set; computed by the caller at consume time,
    /// never inside the tracker itself.
    pub convergence: bool,
}

impl DeliberationTrace {
    /// Group a flat list of inputs into consecutive same-type steps and
    /// compute `total_duration_ms`. `convergence` defaults to `false` —
    /// the caller fills it in once `related_to` is known.
    pub fn from_inputs(inputs: Vec<TrackedInput>) -> Self {
        let total_duration_ms = match (inputs.first(), inputs.last()) {
            (Some(first), Some(last)) => {
                (last.timestamp - first.timestamp).num_milliseconds().max(0)
            }
            _ => 0,
        };

        let mut steps: Vec<TraceStep> = Vec::new();
        for input in &inputs {
            match steps.last_mut() {
                Some(step) if step.step_type == input.input_type => {
                    step.input_ids.push(input.id.clone());
                }
                _ => steps.push(TraceStep {
                    input_ids: vec![input.id.clone()],
                    step_type: input.input_type,
                    conclusion: None,
                }),
            }
        }

        Self {
            inputs,
            steps,
            total_duration_ms,
            convergence: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Merge another trace's inputs into this one, deduplicating by input id
    /// and re-grouping steps; used when a caller supplies an explicit
    /// `deliberation` alongside a tracked session.
    pub fn merge(mut self, other: DeliberationTrace) -> Self {
        let existing: std::collections::HashSet<String> =
            self.inputs.iter().map(|i| i.id.clone()).collect();
        for input in other.inputs {
            if !existing.contains(&input.id) {
                self.inputs.push(input);
            }
        }
        self.inputs.sort_by_key(|i| i.timestamp);
        Self::from_inputs(self.inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(id: &str, t: TrackedInputType, offset_ms: i64) -> TrackedInput {
        TrackedInput {
            id: id.into(),
            input_type: t,
            text: "x".into(),
            source: "queryDecisions".into(),
            timestamp: Utc::now() + chrono::Duration::milliseconds(offset_ms),
            raw_data: Value::Null,
        }
    }

    #[test]
    fn groups_consecutive_same_type_inputs() {
        let inputs = vec![
            input("1", TrackedInputType::Query, 0),
            input("2", TrackedInputType::Query, 10),
            input("3", TrackedInputType::Guardrail, 20),
            input("4", TrackedInputType::Query, 30),
        ];
        let trace = DeliberationTrace::from_inputs(inputs);
        assert_eq!(trace.steps.len(), 3);
        assert_eq!(trace.steps[0].input_ids, vec!["1", "2"]);
        assert_eq!(trace.steps[1].input_ids, vec!["3"]);
        assert_eq!(trace.steps[2].input_ids, vec!["4"]);
    }

    #[test]
    fn merge_dedupes_by_id() {
        let a = DeliberationTrace::from_inputs(vec![input("1", TrackedInputType::Query, 0)]);
        let b = DeliberationTrace::from_inputs(vec![
            input("1", TrackedInputType::Query, 0),
            input("2", TrackedInputType::Reasoning, 5),
        ]);
        let merged = a.merge(b);
        assert_eq!(merged.inputs.len(), 2);
    }
}
