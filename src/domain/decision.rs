//! The `Decision` entity and its nested value types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use uuid::Uuid;

use super::tracker::DeliberationTrace;

/// Stakes level — a closed set, modeled as a tagged variant per the design
/// notes even though storage accepts an unknown value at the wire boundary
/// (closed-set-as-documentation-convention, not a storage constraint).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stakes {
    Low,
    Medium,
    High,
    Critical,
}

impl Stakes {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stakes::Low => "low",
            Stakes::Medium => "medium",
            Stakes::High => "high",
            Stakes::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Some(Stakes::Low),
            "medium" => Some(Stakes::Medium),
            "high" => Some(Stakes::High),
            "critical" => Some(Stakes::Critical),
            _ => None,
        }
    }
}

impl Default for Stakes {
    fn default() -> Self {
        Stakes::Medium
    }
}

impl std::fmt::Display for Stakes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a reviewed decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Success,
    Partial,
    Failure,
    Abandoned,
}

impl OutcomeKind {
    /// Binary outcome used by the Brier score: partial counts as 0.5,
    /// abandoned decisions are excluded upstream before this is ever called.
    pub fn binary(&self) -> f64 {
        match self {
            OutcomeKind::Success => 1.0,
            OutcomeKind::Partial => 0.5,
            OutcomeKind::Failure => 0.0,
            OutcomeKind::Abandoned => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::Partial => "partial",
            OutcomeKind::Failure => "failure",
            OutcomeKind::Abandoned => "abandoned",
        }
    }
}

/// One step of reasoning behind a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    /// Open-ended reason kind (analysis, pattern, authority, intuition,
    /// empirical, analogy, elimination, constraint, or any other label an
    /// agent supplies) — deliberately not a closed enum.
    #[serde(rename = "type")]
    pub reason_type: String,
    pub text: String,
    pub strength: f64,
}

impl Reason {
    pub fn new(reason_type: impl Into<String>, text: impl Into<String>, strength: f64) -> Self {
        Self {
            reason_type: reason_type.into(),
            text: text.into(),
            strength: strength.clamp(0.0, 1.0),
        }
    }
}

/// Dual structure/function description of a decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bridge {
    pub structure: Option<String>,
    pub function: Option<String>,
    #[serde(default)]
    pub tolerance: Vec<String>,
    #[serde(default)]
    pub enforcement: Vec<String>,
    #[serde(default)]
    pub prevention: Vec<String>,
}

impl Bridge {
    pub fn is_empty(&self) -> bool {
        self.structure.is_none() && self.function.is_none()
    }
}

/// The late-bound outcome of a decision, attached by `reviewDecision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub outcome: OutcomeKind,
    pub actual_result: String,
    pub lessons: Option<String>,
    pub reviewed_at: DateTime<Utc>,
}

/// A prior decision surfaced as related, with its retrieval distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedDecision {
    pub id: String,
    pub summary: String,
    pub distance: f64,
}

/// Derived (non-authoritative) quality assessment of a decision record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quality {
    pub score: f64,
    pub suggestions: Vec<String>,
}

/// The central decision record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub decision_text: String,
    pub context: String,
    pub category: String,
    pub stakes: Stakes,
    pub confidence: f64,

    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,

    pub project: Option<String>,
    pub feature: Option<String>,
    pub pr: Option<i64>,
    pub file: Option<String>,
    pub line: Option<i64>,
    pub commit: Option<String>,

    #[serde(default)]
    pub reasons: Vec<Reason>,
    #[serde(default)]
    pub tags: HashSet<String>,
    pub pattern: Option<String>,
    pub bridge: Option<Bridge>,
    pub deliberation: Option<DeliberationTrace>,
    pub outcome: Option<Outcome>,
    pub review_by: Option<DateTime<Utc>>,
    #[serde(default)]
    pub related_to: Vec<RelatedDecision>,
    pub quality: Option<Quality>,
}

impl Decision {
    /// Assemble the searchable text used for both embedding and the BM25
    /// keyword index: decision text, pattern, context, reason texts, and
    /// the bridge facets, each tagged so retrieval can weight them.
    pub fn searchable_text(&self) -> String {
        let mut parts = vec![self.decision_text.clone()];
        if let Some(pattern) = &self.pattern {
            parts.push(format!("Pattern: {pattern}"));
        }
        if !self.context.is_empty() {
            parts.push(self.context.clone());
        }
        for reason in &self.reasons {
            parts.push(reason.text.clone());
        }
        if let Some(bridge) = &self.bridge {
            if let Some(structure) = &bridge.structure {
                parts.push(format!("Structure: {structure}"));
            }
            if let Some(function) = &bridge.function {
                parts.push(format!("Function: {function}"));
            }
        }
        parts.join("\n")
    }

    pub fn is_reviewed(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Generate a new opaque decision id: an 8+ hex-char, process-wide-unique
/// token. We use a random UUIDv4 truncated to its first 16 hex characters
/// rather than a content hash, since two decisions can legitimately share
/// identical text.
pub fn new_decision_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

/// Content-addressable id variant (agent + timestamp + text), usable when a
/// caller wants reproducible ids for idempotent replays.
pub fn content_addressed_decision_id(agent_id: &str, created_at: DateTime<Utc>, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(agent_id.as_bytes());
    hasher.update(created_at.to_rfc3339().as_bytes());
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stakes_round_trip() {
        for s in [Stakes::Low, Stakes::Medium, Stakes::High, Stakes::Critical] {
            assert_eq!(Stakes::parse(s.as_str()), Some(s));
        }
        assert_eq!(Stakes::parse("nonsense"), None);
    }

    #[test]
    fn searchable_text_includes_pattern_and_bridge() {
        let d = Decision {
            id: "abc".into(),
            decision_text: "use sqlite".into(),
            context: "small deployment".into(),
            category: "architecture".into(),
            stakes: Stakes::Medium,
            confidence: 0.8,
            agent_id: "agent-1".into(),
            created_at: Utc::now(),
            updated_at: None,
            project: None,
            feature: None,
            pr: None,
            file: None,
            line: None,
            commit: None,
            reasons: vec![Reason::new("empirical", "works well at this scale", 0.9)],
            tags: HashSet::new(),
            pattern: Some("prefer embedded stores for small deployments".into()),
            bridge: Some(Bridge {
                structure: Some("embedded file-backed store".into()),
                function: Some("avoid operating a separate database service".into()),
                ..Default::default()
            }),
            deliberation: None,
            outcome: None,
            review_by: None,
            related_to: vec![],
            quality: None,
        };
        let text = d.searchable_text();
        assert!(text.contains("Pattern: prefer embedded"));
        assert!(text.contains("Structure: embedded"));
        assert!(text.contains("Function: avoid"));
    }

    #[test]
    fn decision_ids_are_unique_and_long_enough() {
        let a = new_decision_id();
        let b = new_decision_id();
        assert_ne!(a, b);
        assert!(a.len() >= 8);
    }
}
