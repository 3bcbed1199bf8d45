//! In-memory reference `DecisionStore`, used by tests and as the default
//! when no persistent backend is configured.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::decision::{Decision, Outcome, OutcomeKind};

use super::{
    DecisionFilters, DecisionStats, DecisionStatus, DecisionStore, ListQuery, ListResult,
    SortDirection, StorageError, StorageResult,
};

#[derive(Default)]
pub struct InMemoryDecisionStore {
    decisions: RwLock<HashMap<String, Decision>>,
}

impl InMemoryDecisionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DecisionStore for InMemoryDecisionStore {
    async fn save(&self, mut decision: Decision) -> StorageResult<Decision> {
        let mut decisions = self
            .decisions
            .write()
            .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {e}")))?;

        if let Some(existing) = decisions.get(&decision.id) {
            decision.created_at = existing.created_at;
            if existing.is_reviewed() {
                // A reviewed decision is immutable except for `lessons`.
                let lessons = decision.outcome.as_ref().and_then(|o| o.lessons.clone());
                let mut kept = existing.clone();
                if let Some(outcome) = kept.outcome.as_mut() {
                    outcome.lessons = lessons;
                }
                decisions.insert(kept.id.clone(), kept.clone());
                return Ok(kept);
            }
            decision.updated_at = Some(Utc::now());
        }

        decisions.insert(decision.id.clone(), decision.clone());
        Ok(decision)
    }

    async fn get(&self, id: &str) -> StorageResult<Decision> {
        let decisions = self
            .decisions
            .read()
            .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {e}")))?;
        decisions
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("decision {id} not found")))
    }

    async fn list(&self, query: ListQuery) -> StorageResult<ListResult> {
        let decisions = self
            .decisions
            .read()
            .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {e}")))?;

        let mut matching: Vec<Decision> = decisions
            .values()
            .filter(|d| query.filters.matches(d))
            .cloned()
            .collect();

        match query.sort {
            SortDirection::Asc => matching.sort_by_key(|d| d.created_at),
            SortDirection::Desc => matching.sort_by_key(|d| std::cmp::Reverse(d.created_at)),
        }

        let total_matching = matching.len();
        let items = matching.into_iter().skip(query.offset).take(query.limit).collect();
        Ok(ListResult { items, total_matching })
    }

    async fn stats(&self, filters: DecisionFilters) -> StorageResult<DecisionStats> {
        let result = self
            .list(ListQuery {
                offset: 0,
                limit: usize::MAX,
                filters,
                sort: SortDirection::Desc,
            })
            .await?;
        Ok(compute_stats(&result.items))
    }

    async fn update_outcome(
        &self,
        id: &str,
        outcome: OutcomeKind,
        actual_result: String,
        lessons: Option<String>,
    ) -> StorageResult<Decision> {
        let mut decisions = self
            .decisions
            .write()
            .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {e}")))?;
        let decision = decisions
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("decision {id} not found")))?;
        if decision.is_reviewed() {
            return Err(StorageError::Conflict(format!("decision {id} already reviewed")));
        }
        decision.outcome = Some(Outcome {
            outcome,
            actual_result,
            lessons,
            reviewed_at: Utc::now(),
        });
        Ok(decision.clone())
    }

    async fn count(&self, filters: DecisionFilters) -> StorageResult<usize> {
        let decisions = self
            .decisions
            .read()
            .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {e}")))?;
        Ok(decisions.values().filter(|d| filters.matches(d)).count())
    }
}

/// Shared by both the in-memory and SQLite stores since `stats` is defined
/// purely in terms of an already-filtered decision list.
pub fn compute_stats(decisions: &[Decision]) -> DecisionStats {
    let mut by_category = HashMap::new();
    let mut by_stakes = HashMap::new();
    let mut by_status = HashMap::new();
    let mut by_agent = HashMap::new();
    let mut tag_counts: HashMap<String, usize> = HashMap::new();

    let now = Utc::now();
    let mut activity_24h = 0;
    let mut activity_7d = 0;
    let mut activity_30d = 0;

    for decision in decisions {
        *by_category.entry(decision.category.clone()).or_insert(0) += 1;
        *by_stakes.entry(decision.stakes.as_str().to_string()).or_insert(0) += 1;
        let status = if decision.is_reviewed() {
            DecisionStatus::Reviewed
        } else {
            DecisionStatus::Pending
        };
        let status_key = match status {
            DecisionStatus::Pending => "pending",
            DecisionStatus::Reviewed => "reviewed",
        };
        *by_status.entry(status_key.to_string()).or_insert(0) += 1;
        *by_agent.entry(decision.agent_id.clone()).or_insert(0) += 1;
        for tag in &decision.tags {
            *tag_counts.entry(tag.clone()).or_insert(0) += 1;
        }

        let age = now - decision.created_at;
        if age <= chrono::Duration::hours(24) {
            activity_24h += 1;
        }
        if age <= chrono::Duration::days(7) {
            activity_7d += 1;
        }
        if age <= chrono::Duration::days(30) {
            activity_30d += 1;
        }
    }

    let mut top_tags: Vec<(String, usize)> = tag_counts.into_iter().collect();
    top_tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_tags.truncate(10);

    DecisionStats {
        by_category,
        by_stakes,
        by_status,
        by_agent,
        top_tags,
        activity_24h,
        activity_7d,
        activity_30d,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::{new_decision_id, Stakes};
    use std::collections::HashSet;

    fn sample(agent: &str, category: &str) -> Decision {
        Decision {
            id: new_decision_id(),
            decision_text: "use postgres for the primary store".into(),
            context: "needs transactions across services".into(),
            category: category.into(),
            stakes: Stakes::High,
            confidence: 0.6,
            agent_id: agent.into(),
            created_at: Utc::now(),
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
            review_by: None,
            related_to: vec![],
            quality: None,
        }
    }

    #[tokio::test]
    async fn list_is_deterministic_under_fixed_inputs() {
        let store = InMemoryDecisionStore::new();
        for i in 0..5 {
            store.save(sample(&format!("agent-{i}"), "architecture")).await.unwrap();
        }
        let query = ListQuery {
            offset: 0,
            limit: 3,
            filters: DecisionFilters::default(),
            sort: SortDirection::Desc,
        };
        let a = store.list(query.clone()).await.unwrap();
        let b = store.list(query.clone()).await.unwrap();
        assert_eq!(a.items.iter().map(|d| d.id.clone()).collect::<Vec<_>>(),
                   b.items.iter().map(|d| d.id.clone()).collect::<Vec<_>>());
        assert_eq!(a.total_matching, 5);
    }

    #[tokio::test]
    async fn save_of_reviewed_decision_rejects_field_changes_except_lessons() {
        let store = InMemoryDecisionStore::new();
        let saved = store.save(sample("agent-1", "architecture")).await.unwrap();
        let reviewed = store
            .update_outcome(&saved.id, OutcomeKind::Success, "it worked".into(), None)
            .await
            .unwrap();

        let mut tampered = reviewed.clone();
        tampered.decision_text = "should not apply".into();
        tampered.outcome.as_mut().unwrap().lessons = Some("learned something".into());
        let result = store.save(tampered).await.unwrap();

        assert_eq!(result.decision_text, reviewed.decision_text);
        assert_eq!(result.outcome.unwrap().lessons, Some("learned something".into()));
    }
}
