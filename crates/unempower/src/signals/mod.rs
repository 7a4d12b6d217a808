//! Risk signals computed over a worker's history: income forecast, fraud anomaly,
//! work-proof integrity and the early-warning blend.

pub mod early_warning;
pub mod forecast;
pub mod fraud;
pub mod integrity;

pub use early_warning::{compute_early_warning, EarlyWarning};
pub use forecast::{forecast_income, IncomeForecast};
pub use fraud::{detect_anomaly, FraudSignal};
pub use integrity::{check_integrity, IntegrityReport};

use crate::events::WorkerHistory;
use crate::features::{extract_features, FeatureVector};
use serde::{Deserialize, Serialize};

/// Score band shared by the capped 0..=100 signals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
    /// No history to judge.
    Unknown,
}

impl RiskLevel {
    /// Fraud and integrity bands: CRITICAL >= 85, HIGH >= 60, MEDIUM >= 30.
    pub fn from_flag_score(score: u32) -> Self {
        match score {
            85.. => RiskLevel::Critical,
            60.. => RiskLevel::High,
            30.. => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }

    /// Early-warning bands: CRITICAL >= 75, HIGH >= 50, MEDIUM >= 25.
    pub fn from_warning_score(score: u32) -> Self {
        match score {
            75.. => RiskLevel::Critical,
            50.. => RiskLevel::High,
            25.. => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
            RiskLevel::Unknown => "UNKNOWN",
        }
    }
}

/// One triggered rule: its name, the observed value, the threshold it crossed
/// and the points it added.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalContribution {
    pub signal: String,
    pub observed: f64,
    pub threshold: f64,
    pub contribution: u32,
}

impl SignalContribution {
    pub(crate) fn new(signal: &str, observed: f64, threshold: f64, contribution: u32) -> Self {
        Self {
            signal: signal.to_string(),
            observed,
            threshold,
            contribution,
        }
    }
}

/// Features plus every signal for one worker at one instant.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerAnalysis {
    pub features: FeatureVector,
    pub forecast: IncomeForecast,
    pub fraud: FraudSignal,
    pub integrity: IntegrityReport,
    pub early_warning: EarlyWarning,
}

pub fn analyze_worker(history: &WorkerHistory, as_of: i64) -> WorkerAnalysis {
    let features = extract_features(history, as_of);
    let forecast = forecast_income(history, &features, as_of);
    let fraud = detect_anomaly(history, &features, as_of);
    let integrity = check_integrity(history, as_of);
    let early_warning = compute_early_warning(&features, &forecast, &fraud);
    WorkerAnalysis {
        features,
        forecast,
        fraud,
        integrity,
        early_warning,
    }
}
