//! Per-worker behavioural features over 24h / 7d / 14d / 30d windows.
//!
//! Windows compare each proof's embedded `eventTimestamp` (or a loan's block
//! timestamp) against `as_of`, never ingestion time. The result is a pure
//! function of the history and `as_of`.

use crate::events::{WorkEvent, WorkerHistory};
use serde::{Deserialize, Serialize};

pub const HOUR: i64 = 3_600;
pub const DAY: i64 = 86_400;

/// Recency reported for a worker with no proofs.
pub const RECENCY_SENTINEL_HOURS: f64 = 720.0;
pub const RECENCY_SENTINEL_DAYS: u32 = 30;

pub const DEFAULT_RATING: f64 = 3.0;
pub const DEFAULT_CONSISTENCY: f64 = 0.5;

/// USDC carries six decimals on chain.
pub const USDC_UNIT: f64 = 1_000_000.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub worker: String,
    #[serde(rename = "asOf")]
    pub as_of: i64,
    #[serde(rename = "shiftCount_7d")]
    pub shift_count_7d: u32,
    #[serde(rename = "shiftCount_14d")]
    pub shift_count_14d: u32,
    #[serde(rename = "shiftCount_30d")]
    pub shift_count_30d: u32,
    #[serde(rename = "avgRatingBand_30d")]
    pub avg_rating_band_30d: f64,
    #[serde(rename = "ratingTrend_30d")]
    pub rating_trend_30d: f64,
    #[serde(rename = "earningsBandMean_30d")]
    pub earnings_band_mean_30d: f64,
    #[serde(rename = "earningsBandVol_30d")]
    pub earnings_band_vol_30d: f64,
    #[serde(rename = "earningsConsistency_30d")]
    pub earnings_consistency_30d: f64,
    #[serde(rename = "recencyHours")]
    pub recency_hours: f64,
    #[serde(rename = "recencyDays")]
    pub recency_days: u32,
    #[serde(rename = "loanCount_30d")]
    pub loan_count_30d: u32,
    #[serde(rename = "repayCount_30d")]
    pub repay_count_30d: u32,
    #[serde(rename = "repayRatio_30d")]
    pub repay_ratio_30d: f64,
    #[serde(rename = "workproofRatePerDay_7d")]
    pub workproof_rate_per_day_7d: f64,
    #[serde(rename = "proofsInLast24h")]
    pub proofs_in_last_24h: u32,
    #[serde(rename = "totalWorkProofs")]
    pub total_work_proofs: u32,
    #[serde(rename = "totalLoans")]
    pub total_loans: u32,
    #[serde(rename = "totalRepays")]
    pub total_repays: u32,
}

/// Rating proxy carried in the low decimal digit of `workUnits`, clamped to 1..=5.
/// Zero work units rate as 3.
pub fn rating_band(work_units: u64) -> u8 {
    if work_units == 0 {
        return 3;
    }
    (work_units % 10).clamp(1, 5) as u8
}

/// Earned amount in whole USDC. `None` if the stored string is not a number.
pub fn earned_usdc(ev: &WorkEvent) -> Option<f64> {
    ev.earned_amount
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v / USDC_UNIT)
}

/// Earnings band in 0..=10: one band per 10 USDC. Unparseable amounts count as band 1.
pub fn earnings_band(ev: &WorkEvent) -> f64 {
    earned_usdc(ev).map_or(1.0, |usdc| (usdc / 10.0).min(10.0))
}

pub(crate) fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

/// Population standard deviation.
pub(crate) fn std_dev(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let m = mean(xs);
    (xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64).sqrt()
}

/// Population coefficient of variation; 0 when the mean is not positive.
pub(crate) fn coefficient_of_variation(xs: &[f64]) -> f64 {
    let m = mean(xs);
    if m > 0.0 {
        std_dev(xs) / m
    } else {
        0.0
    }
}

pub fn extract_features(history: &WorkerHistory, as_of: i64) -> FeatureVector {
    let since_7d = as_of - 7 * DAY;
    let since_14d = as_of - 14 * DAY;
    let since_30d = as_of - 30 * DAY;
    let since_24h = as_of - 24 * HOUR;

    // newest first, matching how trends are read
    let mut recent: Vec<&WorkEvent> = history.work_since(since_30d).collect();
    recent.sort_by(|a, b| {
        (b.event_timestamp, b.block_number, b.log_index)
            .cmp(&(a.event_timestamp, a.block_number, a.log_index))
    });

    let count_since = |since: i64| history.work_since(since).count() as u32;
    let shift_count_7d = count_since(since_7d);
    let shift_count_14d = count_since(since_14d);
    let shift_count_30d = recent.len() as u32;
    let proofs_in_last_24h = count_since(since_24h);

    let ratings: Vec<f64> = recent
        .iter()
        .map(|e| f64::from(rating_band(e.work_units)))
        .collect();
    let (avg_rating_band_30d, rating_trend_30d) = if ratings.is_empty() {
        (DEFAULT_RATING, 0.0)
    } else {
        let mid = ratings.len() / 2;
        let trend = if mid > 0 {
            mean(&ratings[..mid]) - mean(&ratings[mid..])
        } else {
            0.0
        };
        (mean(&ratings), trend)
    };

    let bands: Vec<f64> = recent.iter().map(|e| earnings_band(e)).collect();
    let earnings_band_mean_30d = mean(&bands);
    let earnings_band_vol_30d = if bands.len() > 1 {
        coefficient_of_variation(&bands)
    } else {
        0.0
    };

    let raw_earned: Vec<f64> = recent.iter().filter_map(|e| earned_usdc(e)).collect();
    let earnings_consistency_30d = if raw_earned.len() >= 2 && mean(&raw_earned) > 0.0 {
        (1.0 - coefficient_of_variation(&raw_earned).min(1.0)).max(0.0)
    } else {
        DEFAULT_CONSISTENCY
    };

    let (recency_hours, recency_days) = match history.latest_work_timestamp() {
        Some(last) => {
            let secs = (as_of - last).max(0);
            (secs as f64 / HOUR as f64, (secs / DAY) as u32)
        }
        None => (RECENCY_SENTINEL_HOURS, RECENCY_SENTINEL_DAYS),
    };

    let loan_count_30d = history
        .loans
        .iter()
        .filter(|l| l.block_timestamp >= since_30d)
        .count() as u32;
    let repay_count_30d = history
        .repays
        .iter()
        .filter(|r| r.block_timestamp >= since_30d)
        .count() as u32;
    let repay_ratio_30d = if loan_count_30d > 0 {
        (f64::from(repay_count_30d) / f64::from(loan_count_30d)).min(1.0)
    } else {
        1.0
    };

    FeatureVector {
        worker: history.worker.clone(),
        as_of,
        shift_count_7d,
        shift_count_14d,
        shift_count_30d,
        avg_rating_band_30d,
        rating_trend_30d,
        earnings_band_mean_30d,
        earnings_band_vol_30d,
        earnings_consistency_30d,
        recency_hours,
        recency_days,
        loan_count_30d,
        repay_count_30d,
        repay_ratio_30d,
        workproof_rate_per_day_7d: f64::from(shift_count_7d) / 7.0,
        proofs_in_last_24h,
        total_work_proofs: history.work.len() as u32,
        total_loans: history.loans.len() as u32,
        total_repays: history.repays.len() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{LoanEvent, RepayEvent};

    const NOW: i64 = 1_700_000_000;

    fn proof(i: u64, ts: i64, units: u64, earned: &str) -> WorkEvent {
        WorkEvent {
            proof_id: i.to_string(),
            worker: "0xw".into(),
            proof_hash: format!("0x{:064x}", i),
            work_units: units,
            earned_amount: earned.into(),
            event_timestamp: ts,
            block_number: i,
            tx_hash: format!("0x{:064x}", i),
            log_index: 0,
        }
    }

    #[test]
    fn zero_history_has_documented_defaults() {
        let f = extract_features(&WorkerHistory::empty("0xw"), NOW);
        assert_eq!(f.shift_count_30d, 0);
        assert_eq!(f.avg_rating_band_30d, 3.0);
        assert_eq!(f.earnings_consistency_30d, 0.5);
        assert_eq!(f.recency_hours, 720.0);
        assert_eq!(f.recency_days, 30);
        assert_eq!(f.repay_ratio_30d, 1.0);
        assert_eq!(f.workproof_rate_per_day_7d, 0.0);
    }

    #[test]
    fn five_proofs_two_days_apart() {
        let mut h = WorkerHistory::empty("0xw");
        for i in 0..5u64 {
            let ts = NOW - 3_600 - (i as i64) * 2 * DAY;
            h.work.push(proof(i, ts, 1, "100000000"));
        }
        let f = extract_features(&h, NOW);
        assert_eq!(f.shift_count_7d, 4);
        assert_eq!(f.shift_count_30d, 5);
        assert!(f.recency_hours < 48.0);
        assert_eq!(f.avg_rating_band_30d, 1.0);
        assert_eq!(f.earnings_consistency_30d, 1.0);
        assert_eq!(f.earnings_band_mean_30d, 10.0);
        assert_eq!(f.recency_days, 0);
    }

    #[test]
    fn rating_band_clamps() {
        assert_eq!(rating_band(0), 3);
        assert_eq!(rating_band(10), 1);
        assert_eq!(rating_band(4), 4);
        assert_eq!(rating_band(19), 5);
    }

    #[test]
    fn rating_trend_is_newer_minus_older() {
        let mut h = WorkerHistory::empty("0xw");
        h.work.push(proof(1, NOW - 4 * DAY, 2, "1000000"));
        h.work.push(proof(2, NOW - 3 * DAY, 2, "1000000"));
        h.work.push(proof(3, NOW - 2 * DAY, 5, "1000000"));
        h.work.push(proof(4, NOW - DAY, 5, "1000000"));
        let f = extract_features(&h, NOW);
        assert_eq!(f.rating_trend_30d, 3.0);
    }

    #[test]
    fn loans_use_block_time_window() {
        let mut h = WorkerHistory::empty("0xw");
        for (i, ts) in [NOW - DAY, NOW - 2 * DAY, NOW - 40 * DAY].iter().enumerate() {
            h.loans.push(LoanEvent {
                borrower: "0xw".into(),
                principal: "1".into(),
                interest_amount: "0".into(),
                due_date: 0,
                nonce: i as u64,
                block_number: i as u64,
                block_timestamp: *ts,
                tx_hash: format!("0x{i}"),
                log_index: 0,
            });
        }
        h.repays.push(RepayEvent {
            borrower: "0xw".into(),
            amount: "1".into(),
            remaining: "0".into(),
            block_number: 9,
            block_timestamp: NOW - DAY,
            tx_hash: "0xr".into(),
            log_index: 0,
        });
        let f = extract_features(&h, NOW);
        assert_eq!(f.loan_count_30d, 2);
        assert_eq!(f.repay_ratio_30d, 0.5);
        assert_eq!(f.total_loans, 3);
    }
}
