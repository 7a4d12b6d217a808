//! Rule-based anomaly score (0..=100) from six additive, individually capped signals.

use super::{RiskLevel, SignalContribution};
use crate::events::WorkerHistory;
use crate::features::{rating_band, FeatureVector, DAY};
use serde::{Deserialize, Serialize};

pub const INACTIVITY_HOURS: f64 = 72.0;
pub const PROOF_BURST_24H: u32 = 10;
pub const LOAN_BURST_30D: u32 = 3;
pub const RATING_JUMP: u8 = 2;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudSignal {
    pub anomaly_score: u32,
    pub risk_level: RiskLevel,
    pub reasons: Vec<String>,
    pub signals: Vec<SignalContribution>,
}

/// Rating jumps larger than `RATING_JUMP` between consecutive proofs, in timestamp order.
pub(crate) fn rating_jumps(ratings: &[u8]) -> usize {
    ratings
        .windows(2)
        .filter(|w| w[0].abs_diff(w[1]) > RATING_JUMP)
        .count()
}

pub fn detect_anomaly(history: &WorkerHistory, features: &FeatureVector, as_of: i64) -> FraudSignal {
    let mut score = 0u32;
    let mut reasons = Vec::new();
    let mut signals = Vec::new();
    let mut hit = |name: &str, observed: f64, threshold: f64, points: u32, reason: String| {
        score += points;
        signals.push(SignalContribution::new(name, observed, threshold, points));
        reasons.push(reason);
    };

    let recency = features.recency_hours;
    if recency > INACTIVITY_HOURS && features.total_work_proofs > 5 {
        let points = (((recency - INACTIVITY_HOURS) / 24.0 * 5.0) as u32).min(25);
        hit(
            "inactivity",
            recency,
            INACTIVITY_HOURS,
            points,
            format!("Sudden inactivity: {}h since last proof", recency as u64),
        );
    }

    let burst = features.proofs_in_last_24h;
    if burst > PROOF_BURST_24H {
        let points = ((burst - PROOF_BURST_24H) * 5).min(30);
        hit(
            "proofBurst",
            f64::from(burst),
            f64::from(PROOF_BURST_24H),
            points,
            format!("Proof burst: {} proofs in 24h", burst),
        );
    }

    let rate = features.workproof_rate_per_day_7d;
    let rate_threshold = f64::from(PROOF_BURST_24H) * 0.7;
    if rate > rate_threshold {
        let points = (((rate - f64::from(PROOF_BURST_24H) * 0.5) * 5.0) as u32).min(20);
        hit(
            "unnaturalRate",
            rate,
            rate_threshold,
            points,
            format!("High proof rate: {:.1}/day", rate),
        );
    }

    let recent = history.work_since_chronological(as_of - 30 * DAY);
    if recent.len() >= 3 {
        let ratings: Vec<u8> = recent.iter().map(|e| rating_band(e.work_units)).collect();
        let jumps = rating_jumps(&ratings) as u32;
        if jumps >= 2 {
            let points = (jumps * 7).min(20);
            hit(
                "ratingJumps",
                f64::from(jumps),
                2.0,
                points,
                format!("Suspicious rating jumps: {} occurrences", jumps),
            );
        }
    }

    let loans = features.loan_count_30d;
    if loans > LOAN_BURST_30D {
        let points = ((loans - LOAN_BURST_30D) * 5).min(15);
        hit(
            "loanBurst",
            f64::from(loans),
            f64::from(LOAN_BURST_30D),
            points,
            format!("High loan frequency: {} in 30d", loans),
        );
    }

    let repay = features.repay_ratio_30d;
    if loans >= 2 && repay < 0.5 {
        let points = (((1.0 - repay) * 30.0) as u32).min(25);
        hit(
            "lowRepay",
            repay,
            0.5,
            points,
            format!("Low repayment ratio: {:.0}%", repay * 100.0),
        );
    }

    let anomaly_score = score.min(100);
    if reasons.is_empty() {
        reasons.push("No anomalies detected".to_string());
    }
    FraudSignal {
        anomaly_score,
        risk_level: RiskLevel::from_flag_score(anomaly_score),
        reasons,
        signals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{LoanEvent, WorkEvent};
    use crate::features::{extract_features, HOUR};

    const NOW: i64 = 1_700_000_000;

    fn proof(i: u64, ts: i64, units: u64) -> WorkEvent {
        WorkEvent {
            proof_id: i.to_string(),
            worker: "0xw".into(),
            proof_hash: format!("0x{:064x}", i),
            work_units: units,
            earned_amount: "10000000".into(),
            event_timestamp: ts,
            block_number: i,
            tx_hash: format!("0x{:064x}", i),
            log_index: 0,
        }
    }

    fn run(h: &WorkerHistory) -> FraudSignal {
        detect_anomaly(h, &extract_features(h, NOW), NOW)
    }

    #[test]
    fn quiet_worker_has_single_reason() {
        let mut h = WorkerHistory::empty("0xw");
        h.work.push(proof(1, NOW - DAY, 4));
        let s = run(&h);
        assert_eq!(s.anomaly_score, 0);
        assert_eq!(s.risk_level, RiskLevel::Low);
        assert_eq!(s.reasons, vec!["No anomalies detected".to_string()]);
        assert!(s.signals.is_empty());
    }

    #[test]
    fn burst_and_rate_stack() {
        let mut h = WorkerHistory::empty("0xw");
        for i in 0..60u64 {
            h.work.push(proof(i, NOW - 10 * 60 - i as i64 * 10 * 60, 4));
        }
        let s = run(&h);
        // 60 proofs within ~10h: burst capped at 30, rate 60/7 > 7 gives 17
        assert_eq!(s.signals[0].signal, "proofBurst");
        assert_eq!(s.signals[0].contribution, 30);
        assert_eq!(s.signals[1].signal, "unnaturalRate");
        assert_eq!(s.signals[1].contribution, 17);
        assert_eq!(s.anomaly_score, 47);
        assert_eq!(s.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn inactivity_after_activity() {
        let mut h = WorkerHistory::empty("0xw");
        for i in 0..6u64 {
            h.work.push(proof(i, NOW - 10 * DAY - i as i64 * HOUR, 4));
        }
        let s = run(&h);
        assert_eq!(s.signals[0].signal, "inactivity");
        assert_eq!(s.signals[0].contribution, 25);
    }

    #[test]
    fn loans_without_repayment() {
        let mut h = WorkerHistory::empty("0xw");
        for i in 0..5u64 {
            h.loans.push(LoanEvent {
                borrower: "0xw".into(),
                principal: "1".into(),
                interest_amount: "0".into(),
                due_date: 0,
                nonce: i,
                block_number: i,
                block_timestamp: NOW - DAY,
                tx_hash: format!("0x{i}"),
                log_index: 0,
            });
        }
        let s = run(&h);
        let names: Vec<&str> = s.signals.iter().map(|c| c.signal.as_str()).collect();
        assert_eq!(names, vec!["loanBurst", "lowRepay"]);
        assert_eq!(s.anomaly_score, 10 + 25);
    }

    #[test]
    fn rating_jump_count() {
        assert_eq!(rating_jumps(&[1, 5, 1, 5]), 3);
        assert_eq!(rating_jumps(&[1, 3, 5]), 0);
    }
}
