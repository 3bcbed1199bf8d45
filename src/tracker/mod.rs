//! The deliberation tracker: a process-wide in-memory map from session key
//! to the list of inputs an agent has passively accumulated, consumed
//! atomically by the next `recordDecision` from that agent.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::tracker::{DeliberationTrace, TrackedInput};

/// `transport-prefix:agent-identifier[:decision-id]` — the optional
/// decision-id scopes a thought stream to one in-progress decision so
/// thoughts from parallel agents don't collide.
pub type SessionKey = String;

pub fn session_key(transport_prefix: &str, agent_id: &str, decision_id: Option<&str>) -> SessionKey {
    match decision_id {
        Some(id) => format!("{transport_prefix}:{agent_id}:{id}"),
        None => format!("{transport_prefix}:{agent_id}"),
    }
}

struct Session {
    inputs: Vec<TrackedInput>,
    last_activity: DateTime<Utc>,
}

/// Tracks deliberation sessions with TTL-based expiry and probabilistic
/// cleanup, matching the shape of the teacher's TTL-keyed prompt cache.
pub struct DeliberationTracker {
    sessions: Arc<RwLock<HashMap<SessionKey, Session>>>,
    ttl: Duration,
}

impl DeliberationTracker {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::seconds(ttl_seconds as i64),
        }
    }

    /// Appends `input` to the session, updates its last-activity timestamp,
    /// and triggers probabilistic cleanup of expired sessions (1% sampling)
    /// so garbage collection is amortized rather than run on every call.
    pub async fn track(&self, key: &SessionKey, input: TrackedInput) {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(key.clone()).or_insert_with(|| Session {
            inputs: Vec::new(),
            last_activity: Utc::now(),
        });
        session.inputs.push(input);
        session.last_activity = Utc::now();

        if sample_one_percent() {
            let ttl = self.ttl;
            let now = Utc::now();
            sessions.retain(|_, s| now - s.last_activity <= ttl);
        }
    }

    /// Removes the session and returns its reconstructed trace, or `None`
    /// if the session had no inputs (or never existed).
    pub async fn consume(&self, key: &SessionKey) -> Option<DeliberationTrace> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.remove(key)?;
        if session.inputs.is_empty() {
            return None;
        }
        Some(DeliberationTrace::from_inputs(session.inputs))
    }

    /// Returns the session's current inputs without clearing it.
    pub async fn peek(&self, key: &SessionKey) -> Vec<TrackedInput> {
        let sessions = self.sessions.read().await;
        sessions
            .get(key)
            .map(|s| s.inputs.clone())
            .unwrap_or_default()
    }

    /// Removes every session whose last activity is older than the TTL.
    pub async fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let ttl = self.ttl;
        let now = Utc::now();
        let before = sessions.len();
        sessions.retain(|_, s| now - s.last_activity <= ttl);
        before - sessions.len()
    }

    pub async fn active_session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn sample_one_percent() -> bool {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    // A counter-based modulus is deterministic and allocation-free, unlike
    // pulling in a random number generator for a 1% sampling decision.
    COUNTER.fetch_add(1, Ordering::Relaxed) % 100 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tracker::TrackedInputType;
    use serde_json::Value;

    fn input(id: &str, input_type: TrackedInputType) -> TrackedInput {
        TrackedInput::new(id, input_type, "some text", "queryDecisions", Value::Null)
    }

    #[tokio::test]
    async fn track_then_consume_returns_trace_and_clears() {
        let tracker = DeliberationTracker::new(300);
        let key = session_key("http", "agent-1", None);
        tracker.track(&key, input("1", TrackedInputType::Query)).await;
        tracker.track(&key, input("2", TrackedInputType::Guardrail)).await;

        let trace = tracker.consume(&key).await.unwrap();
        assert_eq!(trace.inputs.len(), 2);
        assert!(tracker.consume(&key).await.is_none());
    }

    #[tokio::test]
    async fn peek_does_not_clear() {
        let tracker = DeliberationTracker::new(300);
        let key = session_key("http", "agent-1", None);
        tracker.track(&key, input("1", TrackedInputType::Query)).await;

        let peeked = tracker.peek(&key).await;
        assert_eq!(peeked.len(), 1);
        assert_eq!(tracker.peek(&key).await.len(), 1);
    }

    #[tokio::test]
    async fn cleanup_expired_removes_stale_sessions() {
        let tracker = DeliberationTracker::new(0);
        let key = session_key("http", "agent-1", None);
        tracker.track(&key, input("1", TrackedInputType::Query)).await;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let removed = tracker.cleanup_expired().await;
        assert_eq!(removed, 1);
        assert!(tracker.peek(&key).await.is_empty());
    }

    #[tokio::test]
    async fn decision_scoped_key_isolates_parallel_agents() {
        let tracker = DeliberationTracker::new(300);
        let key_a = session_key("http", "agent-1", Some("decision-a"));
        let key_b = session_key("http", "agent-1", Some("decision-b"));
        tracker.track(&key_a, input("1", TrackedInputType::Query)).await;
        tracker.track(&key_b, input("2", TrackedInputType::Query)).await;

        assert_eq!(tracker.peek(&key_a).await.len(), 1);
        assert_eq!(tracker.peek(&key_b).await.len(), 1);
    }
}
