//! Process-local counters surfaced on `/health`. No external metrics sink:
//! the spec's Non-goals exclude a metrics export surface, so this stays a
//! plain in-process snapshot rather than a Prometheus-style registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

#[derive(Debug, Default, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub errors_total: u64,
    pub requests_by_method: HashMap<String, u64>,
    pub errors_by_code: HashMap<i64, u64>,
    pub active_tracker_sessions: u64,
}

/// Atomic counters updated from the dispatch layer on every call. Cheap
/// enough to touch on the hot path: one fetch_add per request, one per
/// error, no locking except for the per-key maps.
pub struct Metrics {
    requests_total: AtomicU64,
    errors_total: AtomicU64,
    requests_by_method: RwLock<HashMap<String, u64>>,
    errors_by_code: RwLock<HashMap<i64, u64>>,
    active_tracker_sessions: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            requests_by_method: RwLock::new(HashMap::new()),
            errors_by_code: RwLock::new(HashMap::new()),
            active_tracker_sessions: AtomicU64::new(0),
        }
    }

    pub fn record_request(&self, method: &str) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        *self.requests_by_method.write().entry(method.to_string()).or_insert(0) += 1;
    }

    pub fn record_error(&self, code: i64) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
        *self.errors_by_code.write().entry(code).or_insert(0) += 1;
    }

    pub fn set_active_tracker_sessions(&self, count: u64) {
        self.active_tracker_sessions.store(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            requests_by_method: self.requests_by_method.read().clone(),
            errors_by_code: self.errors_by_code.read().clone(),
            active_tracker_sessions: self.active_tracker_sessions.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_requests_and_errors_by_key() {
        let metrics = Metrics::new();
        metrics.record_request("queryDecisions");
        metrics.record_request("queryDecisions");
        metrics.record_error(-32007);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.requests_by_method.get("queryDecisions"), Some(&2));
        assert_eq!(snapshot.errors_total, 1);
        assert_eq!(snapshot.errors_by_code.get(&-32007), Some(&1));
    }
}
