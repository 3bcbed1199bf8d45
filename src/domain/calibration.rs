//! Calibration and drift report domain types.

use serde::{Deserialize, Serialize};

/// One of the five equal-width confidence ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBucket {
    pub range_low: f64,
    pub range_high: f64,
    pub count: usize,
    pub mean_predicted: f64,
    pub actual_success_rate: f64,
    pub brier: Option<f64>,
}

/// Summary statistics of the confidence values in the filtered set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceDistribution {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
    pub bucket_counts: [usize; 5],
    pub habituation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationSeverity {
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub severity: RecommendationSeverity,
    pub message: String,
}

/// Result of `getCalibration` for a category with enough reviewed
/// decisions to compute a score, or a note explaining why not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub sample_size: usize,
    pub brier_score: Option<f64>,
    pub accuracy: Option<f64>,
    pub calibration_gap: Option<f64>,
    pub buckets: Vec<ConfidenceBucket>,
    pub distribution: Option<ConfidenceDistribution>,
    pub recommendations: Vec<Recommendation>,
    pub insufficient_data: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftSeverity {
    Warning,
    Error,
}

/// Result of `checkDrift`: recent window vs. historical baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub drift_detected: bool,
    pub recent_sample_size: usize,
    pub historical_sample_size: usize,
    pub brier_degradation_pct: Option<f64>,
    pub accuracy_drop_pct: Option<f64>,
    pub severity: Option<DriftSeverity>,
    pub note: Option<String>,
}

/// Per-category calibration tendency used by the pre-action composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationTendency {
    Overconfident,
    Underconfident,
    WellCalibrated,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationContext {
    pub category: Option<String>,
    pub recent_brier: Option<f64>,
    pub recent_accuracy: Option<f64>,
    pub tendency: CalibrationTendency,
}
