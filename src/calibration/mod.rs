//! Calibration and drift reporting: pure read-only functions over the
//! decision corpus at call time.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::domain::calibration::{
    CalibrationContext, CalibrationReport, CalibrationTendency, ConfidenceBucket, ConfidenceDistribution,
    DriftReport, DriftSeverity, Recommendation, RecommendationSeverity,
};
use crate::domain::decision::{Decision, OutcomeKind};
use crate::error::{Error, Result};
use crate::storage::{DecisionFilters, DecisionStore, ListQuery, SortDirection};

const MIN_BRIER_SAMPLE: usize = 5;
const MIN_CATEGORY_SAMPLE: usize = 5;
const BRIER_DEGRADATION_THRESHOLD: f64 = 0.20;
const ACCURACY_DROP_THRESHOLD: f64 = 0.15;
const DEFAULT_RECENT_WINDOW_DAYS: i64 = 30;

pub struct CalibrationService {
    decisions: Arc<dyn DecisionStore>,
}

impl CalibrationService {
    pub fn new(decisions: Arc<dyn DecisionStore>) -> Self {
        Self { decisions }
    }

    pub async fn get_calibration(&self, filters: DecisionFilters) -> Result<CalibrationReport> {
        let reviewed = self.reviewed_decisions(filters).await?;
        Ok(build_calibration_report(&reviewed))
    }

    pub async fn check_drift(&self, category: Option<&str>, window_days: Option<i64>) -> Result<DriftReport> {
        let window_days = window_days.unwrap_or(DEFAULT_RECENT_WINDOW_DAYS);
        let filters = DecisionFilters { category: category.map(str::to_string), ..Default::default() };
        let reviewed = self.reviewed_decisions(filters).await?;

        let cutoff = Utc::now() - Duration::days(window_days);
        let recent: Vec<&Decision> = reviewed.iter().filter(|d| d.created_at >= cutoff).collect();
        let historical: Vec<&Decision> = reviewed.iter().filter(|d| d.created_at < cutoff).collect();

        Ok(build_drift_report(&recent, &historical))
    }

    pub async fn context_for_category(&self, category: Option<&str>) -> CalibrationContext {
        let filters = DecisionFilters { category: category.map(str::to_string), ..Default::default() };
        let reviewed = match self.reviewed_decisions(filters).await {
            Ok(r) => r,
            Err(_) => Vec::new(),
        };

        if reviewed.len() < MIN_BRIER_SAMPLE {
            return CalibrationContext {
                category: category.map(str::to_string),
                recent_brier: None,
                recent_accuracy: None,
                tendency: CalibrationTendency::InsufficientData,
            };
        }

        let brier = brier_score(&reviewed);
        let accuracy = accuracy(&reviewed);
        let mean_confidence = mean(reviewed.iter().map(|d| d.confidence));
        let mean_outcome = mean(reviewed.iter().map(|d| outcome_binary(d)));

        let tendency = if mean_confidence - mean_outcome > 0.1 {
            CalibrationTendency::Overconfident
        } else if mean_outcome - mean_confidence > 0.1 {
            CalibrationTendency::Underconfident
        } else {
            CalibrationTendency::WellCalibrated
        };

        CalibrationContext {
            category: category.map(str::to_string),
            recent_brier: Some(brier),
            recent_accuracy: Some(accuracy),
            tendency,
        }
    }

    async fn reviewed_decisions(&self, filters: DecisionFilters) -> Result<Vec<Decision>> {
        let result = self
            .decisions
            .list(ListQuery { offset: 0, limit: usize::MAX, filters, sort: SortDirection::Desc })
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(result.items.into_iter().filter(|d| d.is_reviewed()).collect())
    }
}

fn outcome_binary(decision: &Decision) -> f64 {
    decision.outcome.as_ref().map(|o| o.outcome.binary()).unwrap_or(0.0)
}

fn is_countable_for_brier(decision: &Decision) -> bool {
    !matches!(decision.outcome.as_ref().map(|o| o.outcome), Some(OutcomeKind::Abandoned))
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn brier_score(decisions: &[Decision]) -> f64 {
    let countable: Vec<&Decision> = decisions.iter().filter(|d| is_countable_for_brier(d)).collect();
    mean(countable.iter().map(|d| (d.confidence - outcome_binary(d)).powi(2)))
}

fn accuracy(decisions: &[Decision]) -> f64 {
    if decisions.is_empty() {
        return 0.0;
    }
    let successes = decisions
        .iter()
        .filter(|d| matches!(d.outcome.as_ref().map(|o| o.outcome), Some(OutcomeKind::Success)))
        .count();
    successes as f64 / decisions.len() as f64
}

fn build_calibration_report(decisions: &[Decision]) -> CalibrationReport {
    if decisions.len() < MIN_BRIER_SAMPLE {
        return CalibrationReport {
            sample_size: decisions.len(),
            brier_score: None,
            accuracy: None,
            calibration_gap: None,
            buckets: Vec::new(),
            distribution: Some(confidence_distribution(decisions)),
            recommendations: Vec::new(),
            insufficient_data: true,
        };
    }

    let brier = brier_score(decisions);
    let acc = accuracy(decisions);
    let mean_confidence = mean(decisions.iter().map(|d| d.confidence));
    let mean_outcome = mean(decisions.iter().map(outcome_binary));
    let gap = (mean_confidence - mean_outcome).abs();

    let buckets = confidence_buckets(decisions);
    let distribution = confidence_distribution(decisions);
    let recommendations = build_recommendations(gap, &distribution);

    CalibrationReport {
        sample_size: decisions.len(),
        brier_score: Some(brier),
        accuracy: Some(acc),
        calibration_gap: Some(gap),
        buckets,
        distribution: Some(distribution),
        recommendations,
        insufficient_data: false,
    }
}

fn confidence_buckets(decisions: &[Decision]) -> Vec<ConfidenceBucket> {
    let mut buckets = Vec::with_capacity(5);
    for i in 0..5 {
        let low = i as f64 * 0.2;
        let high = low + 0.2;
        let in_bucket: Vec<&Decision> = decisions
            .iter()
            .filter(|d| d.confidence >= low && (d.confidence < high || (i == 4 && d.confidence <= high)))
            .collect();
        let count = in_bucket.len();
        let mean_predicted = mean(in_bucket.iter().map(|d| d.confidence));
        let actual_success_rate = if count > 0 { accuracy(&in_bucket.iter().map(|d| (*d).clone()).collect::<Vec<_>>()) } else { 0.0 };
        let brier = if count >= MIN_CATEGORY_SAMPLE {
            Some(brier_score(&in_bucket.iter().map(|d| (*d).clone()).collect::<Vec<_>>()))
        } else {
            None
        };
        buckets.push(ConfidenceBucket {
            range_low: low,
            range_high: high,
            count,
            mean_predicted,
            actual_success_rate,
            brier,
        });
    }
    buckets
}

fn confidence_distribution(decisions: &[Decision]) -> ConfidenceDistribution {
    if decisions.is_empty() {
        return ConfidenceDistribution {
            mean: 0.0,
            std_dev: 0.0,
            min: 0.0,
            max: 0.0,
            count: 0,
            bucket_counts: [0; 5],
            habituation: false,
        };
    }

    let confidences: Vec<f64> = decisions.iter().map(|d| d.confidence).collect();
    let mean_value = mean(confidences.iter().copied());
    let variance = mean(confidences.iter().map(|c| (c - mean_value).powi(2)));
    let std_dev = variance.sqrt();
    let min = confidences.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = confidences.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let mut bucket_counts = [0usize; 5];
    for c in &confidences {
        let idx = ((c * 5.0) as usize).min(4);
        bucket_counts[idx] += 1;
    }

    let max_bucket_share = *bucket_counts.iter().max().unwrap_or(&0) as f64 / decisions.len() as f64;
    let habituation = (std_dev < 0.05 && max_bucket_share > 0.70) || (mean_value > 0.85 && min > 0.75);

    ConfidenceDistribution {
        mean: mean_value,
        std_dev,
        min,
        max,
        count: decisions.len(),
        bucket_counts,
        habituation,
    }
}

fn build_recommendations(gap: f64, distribution: &ConfidenceDistribution) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();
    if gap > 0.2 {
        recommendations.push(Recommendation {
            message: "confidence and outcomes diverge substantially; recalibrate stated confidence against actual results".to_string(),
            severity: RecommendationSeverity::Warning,
        });
    } else if gap > 0.1 {
        recommendations.push(Recommendation {
            message: "confidence is mildly miscalibrated against observed outcomes".to_string(),
            severity: RecommendationSeverity::Info,
        });
    }
    if distribution.habituation {
        recommendations.push(Recommendation {
            message: "confidence values cluster narrowly; vary stated confidence to reflect actual uncertainty".to_string(),
            severity: RecommendationSeverity::Warning,
        });
    }
    recommendations
}

fn build_drift_report(recent: &[&Decision], historical: &[&Decision]) -> DriftReport {
    if recent.len() < MIN_BRIER_SAMPLE || historical.len() < MIN_BRIER_SAMPLE {
        return DriftReport {
            drift_detected: false,
            recent_sample_size: recent.len(),
            historical_sample_size: historical.len(),
            brier_degradation_pct: None,
            accuracy_drop_pct: None,
            severity: None,
            note: Some("insufficient data in one or both windows to assess drift".to_string()),
        };
    }

    let recent_owned: Vec<Decision> = recent.iter().map(|d| (*d).clone()).collect();
    let historical_owned: Vec<Decision> = historical.iter().map(|d| (*d).clone()).collect();

    let recent_brier = brier_score(&recent_owned);
    let historical_brier = brier_score(&historical_owned);
    let recent_accuracy = accuracy(&recent_owned);
    let historical_accuracy = accuracy(&historical_owned);

    let brier_degradation = if historical_brier > 0.0 {
        (recent_brier - historical_brier) / historical_brier
    } else {
        0.0
    };
    let accuracy_drop = if historical_accuracy > 0.0 {
        (historical_accuracy - recent_accuracy) / historical_accuracy
    } else {
        0.0
    };

    let brier_drifted = brier_degradation > BRIER_DEGRADATION_THRESHOLD;
    let accuracy_drifted = accuracy_drop > ACCURACY_DROP_THRESHOLD;
    let drift_detected = brier_drifted || accuracy_drifted;

    let severity = if !drift_detected {
        None
    } else if brier_degradation >= 0.50 || accuracy_drop >= 0.50 {
        Some(DriftSeverity::Error)
    } else {
        Some(DriftSeverity::Warning)
    };

    DriftReport {
        drift_detected,
        recent_sample_size: recent.len(),
        historical_sample_size: historical.len(),
        brier_degradation_pct: Some(brier_degradation * 100.0),
        accuracy_drop_pct: Some(accuracy_drop * 100.0),
        severity,
        note: Some(if drift_detected {
            "recent performance has degraded relative to the historical baseline".to_string()
        } else {
            "no significant drift detected".to_string()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::{Outcome, Stakes};
    use crate::storage::InMemoryDecisionStore;
    use std::collections::HashSet;

    fn reviewed(confidence: f64, outcome: OutcomeKind, created_at: chrono::DateTime<Utc>) -> Decision {
        Decision {
            id: crate::domain::decision::new_decision_id(),
            decision_text: "use caching".into(),
            context: "high read load".into(),
            category: "performance".into(),
            stakes: Stakes::Medium,
            confidence,
            agent_id: "agent-1".into(),
            created_at,
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
            outcome: Some(Outcome { outcome, actual_result: "worked".into(), lessons: None, reviewed_at: created_at }),
            review_by: None,
            related_to: vec![],
            quality: None,
        }
    }

    #[tokio::test]
    async fn insufficient_sample_reports_insufficient_data() {
        let store = InMemoryDecisionStore::new();
        store.save(reviewed(0.8, OutcomeKind::Success, Utc::now())).await.unwrap();
        let svc = CalibrationService::new(Arc::new(store));
        let report = svc.get_calibration(DecisionFilters::default()).await.unwrap();
        assert!(report.insufficient_data);
    }

    #[tokio::test]
    async fn brier_score_is_zero_for_perfectly_calibrated_decisions() {
        let store = InMemoryDecisionStore::new();
        for _ in 0..5 {
            store.save(reviewed(1.0, OutcomeKind::Success, Utc::now())).await.unwrap();
        }
        let svc = CalibrationService::new(Arc::new(store));
        let report = svc.get_calibration(DecisionFilters::default()).await.unwrap();
        assert!(!report.insufficient_data);
        assert!(report.brier_score.unwrap() < 1e-9);
        assert_eq!(report.accuracy, Some(1.0));
    }

    #[tokio::test]
    async fn drift_requires_minimum_sample_in_both_windows() {
        let store = InMemoryDecisionStore::new();
        for _ in 0..3 {
            store.save(reviewed(0.9, OutcomeKind::Success, Utc::now())).await.unwrap();
        }
        let svc = CalibrationService::new(Arc::new(store));
        let report = svc.check_drift(None, Some(30)).await.unwrap();
        assert!(!report.drift_detected);
        assert!(report.severity.is_none());
    }
}
