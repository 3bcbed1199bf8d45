//! Work-discovery domain types returned by the `ready` service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of follow-up work surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyActionType {
    ReviewOutcome,
    CalibrationDrift,
    StalePending,
}

impl ReadyActionType {
    /// Fixed tie-break order used as the secondary sort key after priority.
    pub fn sort_rank(&self) -> u8 {
        match self {
            ReadyActionType::ReviewOutcome => 0,
            ReadyActionType::CalibrationDrift => 1,
            ReadyActionType::StalePending => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadyActionType::ReviewOutcome => "review_outcome",
            ReadyActionType::CalibrationDrift => "calibration_drift",
            ReadyActionType::StalePending => "stale_pending",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// One piece of surfaced follow-up work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyAction {
    #[serde(rename = "type")]
    pub action_type: ReadyActionType,
    pub priority: Priority,
    pub decision_id: Option<String>,
    pub category: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub reason: String,
    pub suggestion: String,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_is_low_to_high() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
    }

    #[test]
    fn type_sort_rank_matches_fixed_order() {
        assert!(ReadyActionType::ReviewOutcome.sort_rank() < ReadyActionType::CalibrationDrift.sort_rank());
        assert!(ReadyActionType::CalibrationDrift.sort_rank() < ReadyActionType::StalePending.sort_rank());
    }
}
