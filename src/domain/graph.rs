//! Graph edge domain types linking decisions to one another.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The relationship a directed edge expresses between two decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    RelatesTo,
    Supersedes,
    DependsOn,
    Contradicts,
    Blocks,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::RelatesTo => "relates_to",
            EdgeType::Supersedes => "supersedes",
            EdgeType::DependsOn => "depends_on",
            EdgeType::Contradicts => "contradicts",
            EdgeType::Blocks => "blocks",
        }
    }

    /// `relates_to` is symmetric by convention: stored once, but neighbor
    /// queries must treat both directions as adjacency.
    pub fn is_symmetric(&self) -> bool {
        matches!(self, EdgeType::RelatesTo)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "relates_to" => Some(EdgeType::RelatesTo),
            "supersedes" => Some(EdgeType::Supersedes),
            "depends_on" => Some(EdgeType::DependsOn),
            "contradicts" => Some(EdgeType::Contradicts),
            "blocks" => Some(EdgeType::Blocks),
            _ => None,
        }
    }
}

/// A directed edge between two decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from_id: String,
    pub to_id: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub weight: f64,
    pub created_at: DateTime<Utc>,
}

impl GraphEdge {
    pub fn new(from_id: impl Into<String>, to_id: impl Into<String>, edge_type: EdgeType, weight: f64) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            edge_type,
            weight: weight.clamp(0.0, 1.0),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relates_to_is_symmetric_others_are_not() {
        assert!(EdgeType::RelatesTo.is_symmetric());
        assert!(!EdgeType::Supersedes.is_symmetric());
        assert!(!EdgeType::Blocks.is_symmetric());
    }

    #[test]
    fn weight_clamped_to_unit_interval() {
        let edge = GraphEdge::new("a", "b", EdgeType::RelatesTo, 1.5);
        assert_eq!(edge.weight, 1.0);
    }
}
