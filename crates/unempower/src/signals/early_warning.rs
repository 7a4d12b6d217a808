//! Default-risk blend of features, the income forecast and the fraud score.
//!
//! The 7- and 14-day probabilities are linear rescalings of the risk score
//! (`score / 120` and `score / 150`, capped at 0.99), not a calibrated model.
//! Consumers depend on these exact numbers.

use super::{FraudSignal, IncomeForecast, RiskLevel, SignalContribution};
use crate::features::FeatureVector;
use serde::{Deserialize, Serialize};

pub const INACTIVITY_HOURS: f64 = 168.0;
pub const HIGH_ANOMALY: u32 = 60;
pub const LOW_FORECAST_14D: f64 = 10.0;
const MAX_PROBABILITY: f64 = 0.99;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarlyWarning {
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub default_risk_next_7d: f64,
    pub default_risk_next_14d: f64,
    pub reasons: Vec<String>,
    pub signals: Vec<SignalContribution>,
}

pub fn default_probabilities(risk_score: u32) -> (f64, f64) {
    let s = f64::from(risk_score);
    ((s / 120.0).min(MAX_PROBABILITY), (s / 150.0).min(MAX_PROBABILITY))
}

pub fn compute_early_warning(
    features: &FeatureVector,
    forecast: &IncomeForecast,
    fraud: &FraudSignal,
) -> EarlyWarning {
    let mut score = 0u32;
    let mut reasons = Vec::new();
    let mut signals = Vec::new();
    let mut hit = |name: &str, observed: f64, threshold: f64, points: u32, reason: String| {
        score += points;
        signals.push(SignalContribution::new(name, observed, threshold, points));
        reasons.push(reason);
    };

    let expected_7d = f64::from(features.shift_count_30d) / 30.0 * 7.0;
    let shifts_7d = f64::from(features.shift_count_7d);
    if expected_7d > 0.0 && shifts_7d < expected_7d * 0.5 {
        let decline_pct = ((1.0 - shifts_7d / expected_7d) * 100.0) as u32;
        let points = ((f64::from(decline_pct) * 0.3) as u32).min(25);
        hit(
            "activityDecline",
            shifts_7d,
            expected_7d,
            points,
            format!("Work activity down {}% vs expected", decline_pct),
        );
    }

    let anomaly = fraud.anomaly_score;
    if anomaly >= HIGH_ANOMALY {
        let points = ((f64::from(anomaly) * 0.3) as u32).min(25);
        hit(
            "anomalyRisk",
            f64::from(anomaly),
            f64::from(HIGH_ANOMALY),
            points,
            format!("High anomaly score: {}", anomaly),
        );
    }

    let repay = features.repay_ratio_30d;
    if features.loan_count_30d >= 1 && repay < 0.7 {
        let points = (((1.0 - repay) * 40.0) as u32).min(30);
        hit(
            "repaymentRisk",
            repay,
            0.7,
            points,
            format!("Low repayment history: {:.0}%", repay * 100.0),
        );
    }

    let volatility = forecast.volatility;
    if volatility > 0.5 {
        let points = ((volatility * 20.0) as u32).min(15);
        hit(
            "volatilityRisk",
            volatility,
            0.5,
            points,
            format!("High income volatility: {:.0}%", volatility * 100.0),
        );
    }

    let f14 = forecast.expected_income_14d;
    if f14 < LOW_FORECAST_14D && features.total_work_proofs > 5 {
        let points = (((LOW_FORECAST_14D - f14) * 1.5) as u32).min(15);
        hit(
            "lowForecast",
            f14,
            LOW_FORECAST_14D,
            points,
            format!("Low income forecast: ${:.2} next 14d", f14),
        );
    }

    let recency = features.recency_hours;
    if recency > INACTIVITY_HOURS && features.total_work_proofs > 3 {
        let points = (((recency - INACTIVITY_HOURS) / 24.0 * 2.0) as u32).min(10);
        hit(
            "recencyRisk",
            recency,
            INACTIVITY_HOURS,
            points,
            format!("Inactive for {} days", (recency / 24.0) as u64),
        );
    }

    let risk_score = score.min(100);
    let (p7, p14) = default_probabilities(risk_score);
    if reasons.is_empty() {
        reasons.push("No significant risk signals detected".to_string());
    }
    EarlyWarning {
        risk_score,
        risk_level: RiskLevel::from_warning_score(risk_score),
        default_risk_next_7d: p7,
        default_risk_next_14d: p14,
        reasons,
        signals,
    }
}
