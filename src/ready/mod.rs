//! The `ready` work-discovery surface: review-outcome, calibration-drift,
//! and stale-pending follow-ups, merged and sorted by priority.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::calibration::CalibrationService;
use crate::domain::decision::{Decision, Stakes};
use crate::domain::ready::{Priority, ReadyAction, ReadyActionType};
use crate::error::Result;
use crate::storage::{DecisionFilters, DecisionStore, ListQuery, SortDirection};
use serde::Serialize;

const STALE_PENDING_MEDIUM_DAYS: i64 = 30;
const STALE_PENDING_HIGH_DAYS: i64 = 60;
const DRIFT_HIGH_PRIORITY_PCT: f64 = 40.0;

#[derive(Debug, Clone, Default)]
pub struct ReadyFilters {
    pub min_priority: Option<Priority>,
    pub action_types: Option<Vec<ReadyActionType>>,
    pub limit: usize,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadyResponse {
    pub actions: Vec<ReadyAction>,
    pub total: usize,
    pub filtered: usize,
    pub warnings: Vec<String>,
}

/// Decisions whose `review_by` has passed with no outcome yet, and
/// decisions pending with no `review_by` for longer than the stale window.
/// Shared with the pre-action session-context bundle, which surfaces the
/// same two action types without a full `ready` call.
pub fn review_outcome_and_stale_pending_actions(decisions: &[Decision]) -> Vec<ReadyAction> {
    let now = Utc::now();
    let mut actions = Vec::new();

    for decision in decisions {
        if decision.outcome.is_some() {
            continue;
        }

        if let Some(review_by) = decision.review_by {
            if review_by <= now {
                actions.push(ReadyAction {
                    action_type: ReadyActionType::ReviewOutcome,
                    priority: priority_for_stakes(decision.stakes),
                    decision_id: Some(decision.id.clone()),
                    category: Some(decision.category.clone()),
                    date: Some(review_by),
                    title: Some(decision.decision_text.clone()),
                    reason: "review date has passed with no recorded outcome".to_string(),
                    suggestion: "call reviewDecision with the actual outcome".to_string(),
                    detail: None,
                });
                continue;
            }
        }

        if decision.review_by.is_none() {
            let age = now - decision.created_at;
            if age >= Duration::days(STALE_PENDING_HIGH_DAYS) {
                actions.push(stale_pending_action(decision, Priority::High, age.num_days()));
            } else if age >= Duration::days(STALE_PENDING_MEDIUM_DAYS) {
                actions.push(stale_pending_action(decision, Priority::Medium, age.num_days()));
            }
        }
    }

    actions
}

fn stale_pending_action(decision: &Decision, priority: Priority, age_days: i64) -> ReadyAction {
    ReadyAction {
        action_type: ReadyActionType::StalePending,
        priority,
        decision_id: Some(decision.id.clone()),
        category: Some(decision.category.clone()),
        date: Some(decision.created_at),
        title: Some(decision.decision_text.clone()),
        reason: format!("pending {age_days} days with no review date set"),
        suggestion: "set a review_by date or record the outcome".to_string(),
        detail: None,
    }
}

fn priority_for_stakes(stakes: Stakes) -> Priority {
    match stakes {
        Stakes::Critical | Stakes::High => Priority::High,
        Stakes::Medium => Priority::Medium,
        Stakes::Low => Priority::Low,
    }
}

pub struct ReadyService {
    decisions: Arc<dyn DecisionStore>,
    calibration: Arc<CalibrationService>,
}

impl ReadyService {
    pub fn new(decisions: Arc<dyn DecisionStore>, calibration: Arc<CalibrationService>) -> Self {
        Self { decisions, calibration }
    }

    pub async fn ready(&self, filters: ReadyFilters) -> Result<ReadyResponse> {
        let limit = filters.limit.min(50).max(1);
        let mut warnings = Vec::new();

        let all = self
            .decisions
            .list(ListQuery {
                offset: 0,
                limit: usize::MAX,
                filters: DecisionFilters { category: filters.category.clone(), ..Default::default() },
                sort: SortDirection::Desc,
            })
            .await
            .map_err(|e| crate::error::Error::Internal(e.to_string()))?
            .items;

        let mut actions = review_outcome_and_stale_pending_actions(&all);

        let categories: std::collections::HashSet<String> = all.iter().map(|d| d.category.clone()).collect();
        for category in categories {
            match self.calibration.check_drift(Some(&category), None).await {
                Ok(drift) if drift.drift_detected => {
                    let priority = match drift.brier_degradation_pct {
                        Some(pct) if pct > DRIFT_HIGH_PRIORITY_PCT => Priority::High,
                        _ => Priority::Medium,
                    };
                    actions.push(ReadyAction {
                        action_type: ReadyActionType::CalibrationDrift,
                        priority,
                        decision_id: None,
                        category: Some(category.clone()),
                        date: None,
                        title: Some(format!("calibration drift in {category}")),
                        reason: drift.note.clone().unwrap_or_default(),
                        suggestion: "review recent decisions in this category for miscalibration".to_string(),
                        detail: drift.brier_degradation_pct.map(|pct| format!("brier degraded {pct:.1}%")),
                    });
                }
                Ok(_) => {}
                Err(e) => warnings.push(format!("drift detection failed for category {category}: {e}")),
            }
        }

        if let Some(min_priority) = filters.min_priority {
            actions.retain(|a| a.priority >= min_priority);
        }
        if let Some(types) = &filters.action_types {
            actions.retain(|a| types.contains(&a.action_type));
        }

        actions.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.action_type.sort_rank().cmp(&b.action_type.sort_rank()))
                .then_with(|| a.date.cmp(&b.date))
        });

        let total = actions.len();
        actions.truncate(limit);
        let filtered = actions.len();

        Ok(ReadyResponse { actions, total, filtered, warnings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryDecisionStore;
    use std::collections::HashSet;

    fn pending_decision(age_days: i64, review_by: Option<chrono::DateTime<Utc>>) -> Decision {
        Decision {
            id: crate::domain::decision::new_decision_id(),
            decision_text: "adopt new retry policy".into(),
            context: "timeouts under load".into(),
            category: "reliability".into(),
            stakes: Stakes::High,
            confidence: 0.7,
            agent_id: "agent-1".into(),
            created_at: Utc::now() - Duration::days(age_days),
            updated_at: None,
            project: None,
            feature: None,
            pr: None,
            file: None,
            line: None,
            commit: None,
            reasons: vec![],
            tags: HashSet::new(),
            pattern: None,
            bridge: None,
            deliberation: None,
            outcome: None,
            review_by,
            related_to: vec![],
            quality: None,
        }
    }

    #[tokio::test]
    async fn surfaces_stale_pending_decisions() {
        let store = InMemoryDecisionStore::new();
        store.save(pending_decision(45, None)).await.unwrap();
        let calibration = Arc::new(CalibrationService::new(Arc::new(InMemoryDecisionStore::new())));
        let svc = ReadyService::new(Arc::new(store), calibration);
        let response = svc.ready(ReadyFilters { limit: 50, ..Default::default() }).await.unwrap();
        assert!(response.actions.iter().any(|a| a.action_type == ReadyActionType::StalePending));
    }

    #[tokio::test]
    async fn surfaces_overdue_review() {
        let store = InMemoryDecisionStore::new();
        store.save(pending_decision(5, Some(Utc::now() - Duration::days(1)))).await.unwrap();
        let calibration = Arc::new(CalibrationService::new(Arc::new(InMemoryDecisionStore::new())));
        let svc = ReadyService::new(Arc::new(store), calibration);
        let response = svc.ready(ReadyFilters { limit: 50, ..Default::default() }).await.unwrap();
        assert!(response.actions.iter().any(|a| a.action_type == ReadyActionType::ReviewOutcome));
        assert!(response.actions[0].priority == Priority::High);
    }

    #[tokio::test]
    async fn respects_limit() {
        let store = InMemoryDecisionStore::new();
        for i in 0..5 {
            store.save(pending_decision(31 + i, None)).await.unwrap();
        }
        let calibration = Arc::new(CalibrationService::new(Arc::new(InMemoryDecisionStore::new())));
        let svc = ReadyService::new(Arc::new(store), calibration);
        let response = svc.ready(ReadyFilters { limit: 2, ..Default::default() }).await.unwrap();
        assert_eq!(response.filtered, 2);
        assert_eq!(response.total, 5);
    }
}
