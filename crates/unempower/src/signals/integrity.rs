//! Tamper heuristics over a worker's last 30 days of work proofs.

use super::{RiskLevel, SignalContribution};
use crate::events::{WorkEvent, WorkerHistory};
use crate::features::{rating_band, DAY, HOUR};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

pub const MAX_PROOFS_PER_DAY: u32 = 20;
pub const MAX_PROOFS_PER_HOUR: u32 = 5;
pub const MIN_PROOF_INTERVAL_SECS: i64 = 60;
pub const RATING_JUMP: u8 = 2;
pub const MIN_RATING_JUMPS: usize = 3;
pub const INTEGRITY_WINDOW_DAYS: i64 = 30;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub flag_score: u32,
    pub risk_level: RiskLevel,
    pub flags: Vec<String>,
    /// Proof ids implicated by duplicate hashes or rating manipulation.
    #[serde(rename = "eventIds")]
    pub flagged_event_ids: Vec<String>,
    pub signals: Vec<SignalContribution>,
    pub proof_count: u32,
}

fn bucket_overflows(proofs: &[&WorkEvent], bucket_secs: i64, max: u32) -> Vec<u32> {
    let mut counts: BTreeMap<i64, u32> = BTreeMap::new();
    for p in proofs {
        *counts.entry(p.event_timestamp.div_euclid(bucket_secs)).or_insert(0) += 1;
    }
    counts.into_values().filter(|c| *c > max).collect()
}

pub fn check_integrity(history: &WorkerHistory, as_of: i64) -> IntegrityReport {
    let since = as_of - INTEGRITY_WINDOW_DAYS * DAY;
    let stored: Vec<&WorkEvent> = history.work_since(since).collect();
    if stored.is_empty() {
        return IntegrityReport {
            flag_score: 0,
            risk_level: RiskLevel::Unknown,
            flags: vec!["No workproofs to analyze".to_string()],
            flagged_event_ids: Vec::new(),
            signals: Vec::new(),
            proof_count: 0,
        };
    }
    let chrono = history.work_since_chronological(since);

    let mut score = 0u32;
    let mut flags = Vec::new();
    let mut signals = Vec::new();
    let mut flagged: HashSet<&str> = HashSet::new();

    let dense_days = bucket_overflows(&chrono, DAY, MAX_PROOFS_PER_DAY);
    if !dense_days.is_empty() {
        let excess: u32 = dense_days.iter().map(|c| c - MAX_PROOFS_PER_DAY).sum();
        let points = (dense_days.len() as u32 * 10 + excess).min(30);
        score += points;
        signals.push(SignalContribution::new(
            "highDensityDays",
            dense_days.len() as f64,
            f64::from(MAX_PROOFS_PER_DAY),
            points,
        ));
        flags.push(format!(
            "Impossible density: {} days with >{} proofs",
            dense_days.len(),
            MAX_PROOFS_PER_DAY
        ));
    }

    let burst_hours = bucket_overflows(&chrono, HOUR, MAX_PROOFS_PER_HOUR);
    if !burst_hours.is_empty() {
        let points = (burst_hours.len() as u32 * 5).min(20);
        score += points;
        signals.push(SignalContribution::new(
            "burstHours",
            burst_hours.len() as f64,
            f64::from(MAX_PROOFS_PER_HOUR),
            points,
        ));
        flags.push(format!(
            "Hourly bursts: {} hours with >{} proofs",
            burst_hours.len(),
            MAX_PROOFS_PER_HOUR
        ));
    }

    // store order is (block, log index); timestamps should never run backwards along it
    let out_of_order = stored
        .windows(2)
        .any(|w| w[1].event_timestamp < w[0].event_timestamp);
    if out_of_order {
        score += 15;
        signals.push(SignalContribution::new("orderingAnomaly", 1.0, 0.0, 15));
        flags.push("Timestamp ordering anomaly detected".to_string());
    }

    let fast = chrono
        .windows(2)
        .filter(|w| {
            let gap = w[1].event_timestamp - w[0].event_timestamp;
            gap > 0 && gap < MIN_PROOF_INTERVAL_SECS
        })
        .count() as u32;
    if fast > 0 {
        let points = (fast * 5).min(25);
        score += points;
        signals.push(SignalContribution::new(
            "fastSubmissions",
            f64::from(fast),
            MIN_PROOF_INTERVAL_SECS as f64,
            points,
        ));
        flags.push(format!(
            "Fast submissions: {} proofs within {}s of each other",
            fast, MIN_PROOF_INTERVAL_SECS
        ));
    }

    let mut hash_counts: HashMap<&str, u32> = HashMap::new();
    for p in &chrono {
        *hash_counts.entry(p.proof_hash.as_str()).or_insert(0) += 1;
    }
    let duplicated: BTreeSet<&str> = hash_counts
        .iter()
        .filter(|(_, c)| **c > 1)
        .map(|(h, _)| *h)
        .collect();
    if !duplicated.is_empty() {
        let points = (duplicated.len() as u32 * 10).min(30);
        score += points;
        signals.push(SignalContribution::new(
            "duplicateHashes",
            duplicated.len() as f64,
            1.0,
            points,
        ));
        flags.push(format!(
            "Duplicate proof hashes: {} hashes used multiple times",
            duplicated.len()
        ));
        flagged.extend(
            chrono
                .iter()
                .filter(|p| duplicated.contains(p.proof_hash.as_str()))
                .map(|p| p.proof_id.as_str()),
        );
    }

    let jump_ids: Vec<&str> = chrono
        .windows(2)
        .filter(|w| rating_band(w[0].work_units).abs_diff(rating_band(w[1].work_units)) > RATING_JUMP)
        .map(|w| w[1].proof_id.as_str())
        .collect();
    if jump_ids.len() >= MIN_RATING_JUMPS {
        let points = (jump_ids.len() as u32 * 4).min(20);
        score += points;
        signals.push(SignalContribution::new(
            "ratingJumps",
            jump_ids.len() as f64,
            MIN_RATING_JUMPS as f64,
            points,
        ));
        flags.push(format!(
            "Rating manipulation: {} large rating jumps detected",
            jump_ids.len()
        ));
        flagged.extend(jump_ids.iter().copied());
    }

    // report flagged proofs in proof order, once each
    let mut seen = HashSet::new();
    let flagged_event_ids = chrono
        .iter()
        .map(|p| p.proof_id.as_str())
        .filter(|id| flagged.contains(id) && seen.insert(*id))
        .map(str::to_string)
        .collect();

    let flag_score = score.min(100);
    if flags.is_empty() {
        flags.push("No integrity issues detected".to_string());
    }
    IntegrityReport {
        flag_score,
        risk_level: RiskLevel::from_flag_score(flag_score),
        flags,
        flagged_event_ids,
        signals,
        proof_count: stored.len() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_006_400;

    fn proof(id: u64, ts: i64, hash: u64, units: u64) -> WorkEvent {
        WorkEvent {
            proof_id: id.to_string(),
            worker: "0xw".into(),
            proof_hash: format!("0x{:064x}", hash),
            work_units: units,
            earned_amount: "1000000".into(),
            event_timestamp: ts,
            block_number: id,
            tx_hash: format!("0x{:064x}", id),
            log_index: 0,
        }
    }

    #[test]
    fn empty_history_is_unknown() {
        let r = check_integrity(&WorkerHistory::empty("0xw"), NOW);
        assert_eq!(r.flag_score, 0);
        assert_eq!(r.risk_level, RiskLevel::Unknown);
        assert_eq!(r.flags, vec!["No workproofs to analyze".to_string()]);
    }

    #[test]
    fn clean_history_passes() {
        let mut h = WorkerHistory::empty("0xw");
        for i in 0..5u64 {
            h.work.push(proof(i, NOW - DAY * (5 - i as i64), i, 3));
        }
        let r = check_integrity(&h, NOW);
        assert_eq!(r.flag_score, 0);
        assert_eq!(r.risk_level, RiskLevel::Low);
        assert_eq!(r.flags, vec!["No integrity issues detected".to_string()]);
    }

    #[test]
    fn duplicate_hashes_flag_every_copy() {
        let mut h = WorkerHistory::empty("0xw");
        h.work.push(proof(1, NOW - 3 * DAY, 77, 3));
        h.work.push(proof(2, NOW - 2 * DAY, 77, 3));
        h.work.push(proof(3, NOW - DAY, 78, 3));
        let r = check_integrity(&h, NOW);
        assert_eq!(r.flag_score, 10);
        assert_eq!(r.flagged_event_ids, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn flagged_ids_follow_proof_order_not_string_order() {
        let mut h = WorkerHistory::empty("0xw");
        h.work.push(proof(2, NOW - 3 * DAY, 77, 3));
        h.work.push(proof(9, NOW - 2 * DAY, 78, 3));
        h.work.push(proof(10, NOW - DAY, 77, 3));
        let r = check_integrity(&h, NOW);
        assert_eq!(r.flagged_event_ids, vec!["2".to_string(), "10".to_string()]);
    }

    #[test]
    fn store_order_disagreeing_with_time_is_flagged() {
        let mut h = WorkerHistory::empty("0xw");
        h.work.push(proof(1, NOW - DAY, 1, 3));
        h.work.push(proof(2, NOW - 2 * DAY, 2, 3));
        let r = check_integrity(&h, NOW);
        assert_eq!(r.flag_score, 15);
        assert!(r.flags[0].contains("ordering"));
    }

    #[test]
    fn hourly_burst_with_fast_intervals() {
        let mut h = WorkerHistory::empty("0xw");
        let start = NOW - 2 * DAY;
        for i in 0..6u64 {
            h.work.push(proof(i, start + i as i64 * 30, 100 + i, 3));
        }
        let r = check_integrity(&h, NOW);
        // one burst hour (5) + five 30s gaps (25)
        assert_eq!(r.flag_score, 30);
        assert_eq!(r.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn three_rating_jumps_mark_the_jumping_proofs() {
        let mut h = WorkerHistory::empty("0xw");
        for (i, units) in [1u64, 5, 1, 5].iter().enumerate() {
            h.work.push(proof(i as u64, NOW - DAY * (4 - i as i64), i as u64, *units));
        }
        let r = check_integrity(&h, NOW);
        assert_eq!(r.flag_score, 12);
        assert_eq!(
            r.flagged_event_ids,
            vec!["1".to_string(), "2".to_string(), "3".to_string()]
        );
    }
}
