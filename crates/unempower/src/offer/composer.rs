//! Fuses the base offer with the four signals into the final attested terms.
//!
//! Each signal applies at most one tier (its highest match). Limit factors
//! multiply across signals; APR and tenure deltas add. The result is clamped.

use super::flags::FraudFlags;
use crate::scoring::BaseOffer;
use crate::signals::{EarlyWarning, FraudSignal, IncomeForecast, IntegrityReport};
use serde::{Deserialize, Serialize};

pub const MIN_APR_BPS: i32 = 500;
pub const MAX_APR_BPS: i32 = 3600;
pub const MIN_TENURE_DAYS: i32 = 7;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Adjustment {
    pub signal: String,
    pub reason: String,
    pub limit_factor: f64,
    pub apr_delta_bps: i32,
    pub tenure_delta_days: i32,
}

impl Adjustment {
    fn new(signal: &str, reason: String, limit_factor: f64, apr: i32, tenure: i32) -> Self {
        Self {
            signal: signal.to_string(),
            reason,
            limit_factor,
            apr_delta_bps: apr,
            tenure_delta_days: tenure,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedOffer {
    pub base: BaseOffer,
    pub trust_score: u32,
    pub pd: u32,
    pub credit_limit: u64,
    pub apr_bps: u16,
    pub tenure_days: u16,
    pub fraud_flags: FraudFlags,
    pub limit_factor: f64,
    pub adjustments: Vec<Adjustment>,
}

/// Append-only fairness audit row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferAuditRecord {
    pub worker: String,
    pub trust_score: u32,
    pub pd: u32,
    pub credit_limit: u64,
    pub apr_bps: u16,
    pub tenure_days: u16,
    pub fraud_flags: u32,
    pub anomaly_score: u32,
    pub integrity_score: u32,
    pub risk_score: u32,
    pub forecast_14d: f64,
    pub forecast_confidence: f64,
    pub created_at: i64,
}

impl OfferAuditRecord {
    pub fn flags(&self) -> FraudFlags {
        FraudFlags::from_bits(self.fraud_flags)
    }
}

fn forecast_adjustment(forecast: &IncomeForecast) -> Option<Adjustment> {
    let c = forecast.confidence;
    if c >= 0.7 {
        Some(Adjustment::new(
            "forecast",
            format!("High forecast confidence ({:.2})", c),
            1.10,
            0,
            0,
        ))
    } else if c < 0.4 {
        Some(Adjustment::new(
            "forecast",
            format!("Low forecast confidence ({:.2})", c),
            0.90,
            0,
            0,
        ))
    } else {
        None
    }
}

fn anomaly_adjustment(fraud: &FraudSignal) -> Option<Adjustment> {
    let s = fraud.anomaly_score;
    if s >= 60 {
        Some(Adjustment::new("anomaly", format!("Anomaly score {}", s), 0.70, 300, 0))
    } else if s >= 30 {
        Some(Adjustment::new("anomaly", format!("Anomaly score {}", s), 0.85, 150, 0))
    } else {
        None
    }
}

fn integrity_adjustment(integrity: &IntegrityReport) -> Option<Adjustment> {
    let s = integrity.flag_score;
    if s >= 60 {
        Some(Adjustment::new("integrity", format!("Integrity score {}", s), 0.70, 0, 0))
    } else if s >= 30 {
        Some(Adjustment::new("integrity", format!("Integrity score {}", s), 0.85, 0, 0))
    } else {
        None
    }
}

fn warning_adjustment(warning: &EarlyWarning) -> Option<Adjustment> {
    let s = warning.risk_score;
    if s >= 60 {
        Some(Adjustment::new("earlyWarning", format!("Early-warning risk {}", s), 0.60, 200, -7))
    } else if s >= 30 {
        Some(Adjustment::new("earlyWarning", format!("Early-warning risk {}", s), 0.80, 100, 0))
    } else {
        None
    }
}

pub fn compose_offer(
    base: &BaseOffer,
    forecast: &IncomeForecast,
    fraud: &FraudSignal,
    integrity: &IntegrityReport,
    warning: &EarlyWarning,
) -> ComposedOffer {
    let adjustments: Vec<Adjustment> = [
        forecast_adjustment(forecast),
        anomaly_adjustment(fraud),
        integrity_adjustment(integrity),
        warning_adjustment(warning),
    ]
    .into_iter()
    .flatten()
    .collect();

    let limit_factor: f64 = adjustments.iter().map(|a| a.limit_factor).product();
    let apr: i32 = i32::from(base.apr_bps) + adjustments.iter().map(|a| a.apr_delta_bps).sum::<i32>();
    let tenure: i32 =
        i32::from(base.tenure_days) + adjustments.iter().map(|a| a.tenure_delta_days).sum::<i32>();
    let limit = (base.credit_limit as f64 * limit_factor).floor().max(0.0) as u64;

    ComposedOffer {
        base: *base,
        trust_score: base.trust_score,
        pd: base.pd,
        credit_limit: limit,
        apr_bps: apr.clamp(MIN_APR_BPS, MAX_APR_BPS) as u16,
        tenure_days: tenure.max(MIN_TENURE_DAYS) as u16,
        fraud_flags: FraudFlags::from_scores(
            fraud.anomaly_score,
            integrity.flag_score,
            warning.risk_score,
        ),
        limit_factor,
        adjustments,
    }
}

impl ComposedOffer {
    pub fn audit_record(
        &self,
        worker: &str,
        forecast: &IncomeForecast,
        fraud: &FraudSignal,
        integrity: &IntegrityReport,
        warning: &EarlyWarning,
        created_at: i64,
    ) -> OfferAuditRecord {
        OfferAuditRecord {
            worker: worker.to_ascii_lowercase(),
            trust_score: self.trust_score,
            pd: self.pd,
            credit_limit: self.credit_limit,
            apr_bps: self.apr_bps,
            tenure_days: self.tenure_days,
            fraud_flags: self.fraud_flags.bits(),
            anomaly_score: fraud.anomaly_score,
            integrity_score: integrity.flag_score,
            risk_score: warning.risk_score,
            forecast_14d: forecast.expected_income_14d,
            forecast_confidence: forecast.confidence,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::forecast::{ConfidenceLabel, ForecastMethod, VolatilityLabel};
    use crate::signals::RiskLevel;

    fn base() -> BaseOffer {
        BaseOffer {
            pd: 120_000,
            trust_score: 5500,
            credit_limit: 500_000_000,
            apr_bps: 1800,
            tenure_days: 21,
        }
    }

    fn forecast(confidence: f64) -> IncomeForecast {
        IncomeForecast {
            expected_income_14d: 100.0,
            expected_income_30d: 214.0,
            avg_daily_income: 7.0,
            volatility: 0.1,
            volatility_label: VolatilityLabel::Low,
            confidence,
            confidence_label: ConfidenceLabel::Medium,
            method: ForecastMethod::ExpSmoothingWma,
            data_points: 10,
            series_length: 10,
        }
    }

    fn fraud(score: u32) -> FraudSignal {
        FraudSignal {
            anomaly_score: score,
            risk_level: RiskLevel::from_flag_score(score),
            reasons: vec![],
            signals: vec![],
        }
    }

    fn integrity(score: u32) -> IntegrityReport {
        IntegrityReport {
            flag_score: score,
            risk_level: RiskLevel::from_flag_score(score),
            flags: vec![],
            flagged_event_ids: vec![],
            signals: vec![],
            proof_count: 1,
        }
    }

    fn warning(score: u32) -> EarlyWarning {
        EarlyWarning {
            risk_score: score,
            risk_level: RiskLevel::from_warning_score(score),
            default_risk_next_7d: 0.0,
            default_risk_next_14d: 0.0,
            reasons: vec![],
            signals: vec![],
        }
    }

    #[test]
    fn neutral_signals_keep_base_terms() {
        let o = compose_offer(&base(), &forecast(0.5), &fraud(0), &integrity(0), &warning(0));
        assert!(o.adjustments.is_empty());
        assert_eq!(o.credit_limit, 500_000_000);
        assert_eq!(o.apr_bps, 1800);
        assert_eq!(o.tenure_days, 21);
        assert!(o.fraud_flags.is_empty());
    }

    #[test]
    fn only_highest_tier_applies_and_factors_multiply() {
        let o = compose_offer(&base(), &forecast(0.8), &fraud(65), &integrity(35), &warning(70));
        assert_eq!(o.adjustments.len(), 4);
        let expected = 1.10 * 0.70 * 0.85 * 0.60;
        assert!((o.limit_factor - expected).abs() < 1e-12);
        assert_eq!(o.credit_limit, (500_000_000f64 * expected).floor() as u64);
        assert_eq!(o.apr_bps, 1800 + 300 + 200);
        assert_eq!(o.tenure_days, 14);
    }

    #[test]
    fn clamps_apr_and_tenure() {
        let mut b = base();
        b.apr_bps = 3600;
        b.tenure_days = 7;
        let o = compose_offer(&b, &forecast(0.1), &fraud(99), &integrity(99), &warning(99));
        assert_eq!(o.apr_bps, 3600);
        assert_eq!(o.tenure_days, 7);

        b.apr_bps = 100;
        let o = compose_offer(&b, &forecast(0.5), &fraud(0), &integrity(0), &warning(0));
        assert_eq!(o.apr_bps, 500);
    }

    #[test]
    fn bitmask_follows_scores() {
        let o = compose_offer(&base(), &forecast(0.5), &fraud(90), &integrity(40), &warning(0));
        assert!(o.fraud_flags.contains(FraudFlags::HARD_BLOCK));
        assert!(o.fraud_flags.contains(FraudFlags::ANOMALY_SUSPECT));
        assert!(!o.fraud_flags.contains(FraudFlags::WORKPROOF_SUSPECT));
    }
}
