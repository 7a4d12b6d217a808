//! Disparity audit of recent offers across behavioural cohorts (no demographics).

use super::composer::OfferAuditRecord;
use serde::Serialize;
use std::collections::BTreeMap;

pub const MIN_OFFERS: usize = 5;
pub const APR_GAP_BPS: f64 = 500.0;
pub const LIMIT_RATIO_FLOOR: f64 = 0.5;
const HIGH_LIMIT_RATIO: f64 = 0.3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Assessment {
    Pass,
    Monitor,
    ReviewRequired,
    InsufficientData,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisparityKind {
    Apr,
    CreditLimit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortStats {
    pub count: usize,
    pub avg_apr_bps: f64,
    pub avg_credit_limit: f64,
    pub min_apr: u16,
    pub max_apr: u16,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Disparity {
    #[serde(rename = "type")]
    pub kind: DisparityKind,
    pub cohort_type: &'static str,
    pub cohort1: String,
    pub cohort2: String,
    pub value1: f64,
    pub value2: f64,
    /// APR gap in bps, or the min/max credit-limit ratio.
    pub measure: f64,
    pub severity: Severity,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FairnessReport {
    pub overall_assessment: Assessment,
    pub offer_count: usize,
    pub window_days: u32,
    pub disparities: Vec<Disparity>,
    pub cohort_stats: BTreeMap<&'static str, BTreeMap<&'static str, CohortStats>>,
    pub notes: Vec<String>,
}

/// Activity cohort from trust score (0..=10000) in fifths.
fn activity_cohort(o: &OfferAuditRecord) -> &'static str {
    match o.trust_score {
        0..=2000 => "low_activity",
        2001..=4000 => "below_avg",
        4001..=6000 => "average",
        6001..=8000 => "above_avg",
        _ => "high_activity",
    }
}

fn rating_cohort(o: &OfferAuditRecord) -> &'static str {
    match o.trust_score {
        0..=2999 => "poor",
        3000..=4999 => "fair",
        5000..=7499 => "good",
        _ => "excellent",
    }
}

fn risk_cohort(o: &OfferAuditRecord) -> &'static str {
    match o.risk_score {
        0..=25 => "low_risk",
        26..=50 => "medium_risk",
        51..=75 => "high_risk",
        _ => "critical_risk",
    }
}

fn cohort_stats(
    offers: &[OfferAuditRecord],
    key: fn(&OfferAuditRecord) -> &'static str,
) -> BTreeMap<&'static str, CohortStats> {
    let mut groups: BTreeMap<&'static str, Vec<&OfferAuditRecord>> = BTreeMap::new();
    for o in offers {
        groups.entry(key(o)).or_default().push(o);
    }
    groups
        .into_iter()
        .map(|(name, members)| {
            let n = members.len() as f64;
            let aprs = members.iter().map(|o| o.apr_bps);
            let stats = CohortStats {
                count: members.len(),
                avg_apr_bps: (members.iter().map(|o| f64::from(o.apr_bps)).sum::<f64>() / n).round(),
                avg_credit_limit: (members.iter().map(|o| o.credit_limit as f64).sum::<f64>() / n)
                    .round(),
                min_apr: aprs.clone().min().unwrap_or(0),
                max_apr: aprs.max().unwrap_or(0),
            };
            (name, stats)
        })
        .collect()
}

fn disparities(
    stats: &BTreeMap<&'static str, CohortStats>,
    cohort_type: &'static str,
) -> Vec<Disparity> {
    let names: Vec<&&'static str> = stats.keys().collect();
    let mut found = Vec::new();
    for (i, a) in names.iter().enumerate() {
        for b in &names[i + 1..] {
            let (s1, s2) = (&stats[**a], &stats[**b]);
            let gap = (s1.avg_apr_bps - s2.avg_apr_bps).abs();
            if gap > APR_GAP_BPS {
                found.push(Disparity {
                    kind: DisparityKind::Apr,
                    cohort_type,
                    cohort1: a.to_string(),
                    cohort2: b.to_string(),
                    value1: s1.avg_apr_bps,
                    value2: s2.avg_apr_bps,
                    measure: gap,
                    severity: if gap > APR_GAP_BPS * 2.0 {
                        Severity::High
                    } else {
                        Severity::Medium
                    },
                });
            }
            if s1.avg_credit_limit > 0.0 && s2.avg_credit_limit > 0.0 {
                let ratio = s1.avg_credit_limit.min(s2.avg_credit_limit)
                    / s1.avg_credit_limit.max(s2.avg_credit_limit);
                if ratio < LIMIT_RATIO_FLOOR {
                    found.push(Disparity {
                        kind: DisparityKind::CreditLimit,
                        cohort_type,
                        cohort1: a.to_string(),
                        cohort2: b.to_string(),
                        value1: s1.avg_credit_limit,
                        value2: s2.avg_credit_limit,
                        measure: ratio,
                        severity: if ratio < HIGH_LIMIT_RATIO {
                            Severity::High
                        } else {
                            Severity::Medium
                        },
                    });
                }
            }
        }
    }
    found
}

pub fn run_fairness_audit(offers: &[OfferAuditRecord], window_days: u32) -> FairnessReport {
    if offers.len() < MIN_OFFERS {
        return FairnessReport {
            overall_assessment: Assessment::InsufficientData,
            offer_count: offers.len(),
            window_days,
            disparities: Vec::new(),
            cohort_stats: BTreeMap::new(),
            notes: vec![format!(
                "Need at least {} offers for audit, found {}",
                MIN_OFFERS,
                offers.len()
            )],
        };
    }

    let families: [(&'static str, &'static str, fn(&OfferAuditRecord) -> &'static str); 3] = [
        ("activityLevel", "activity_level", activity_cohort),
        ("ratingBand", "rating_band", rating_cohort),
        ("riskLevel", "risk_level", risk_cohort),
    ];
    let mut cohort_map = BTreeMap::new();
    let mut found = Vec::new();
    for (family, cohort_type, key) in families {
        let stats = cohort_stats(offers, key);
        found.extend(disparities(&stats, cohort_type));
        cohort_map.insert(family, stats);
    }

    let mut notes = Vec::new();
    let high = found.iter().filter(|d| d.severity == Severity::High).count();
    let overall = if found.is_empty() {
        notes.push("No significant disparities detected across cohorts".to_string());
        Assessment::Pass
    } else if high > 0 {
        notes.push(format!("Found {} high-severity disparities", high));
        Assessment::ReviewRequired
    } else {
        notes.push(format!(
            "Found {} moderate disparities; monitor for trends",
            found.len()
        ));
        Assessment::Monitor
    };
    notes.push(format!(
        "Analyzed {} offers from last {} days",
        offers.len(),
        window_days
    ));
    notes.push("Cohorts based on behavioral factors only (no demographics)".to_string());
    if !found.is_empty() {
        notes.push("Mitigation: consider adjusting scoring weights or adding regularization".to_string());
    }

    FairnessReport {
        overall_assessment: overall,
        offer_count: offers.len(),
        window_days,
        disparities: found,
        cohort_stats: cohort_map,
        notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(trust: u32, risk: u32, apr: u16, limit: u64) -> OfferAuditRecord {
        OfferAuditRecord {
            worker: "0xw".into(),
            trust_score: trust,
            pd: 0,
            credit_limit: limit,
            apr_bps: apr,
            tenure_days: 14,
            fraud_flags: 0,
            anomaly_score: 0,
            integrity_score: 0,
            risk_score: risk,
            forecast_14d: 0.0,
            forecast_confidence: 0.5,
            created_at: 0,
        }
    }

    #[test]
    fn too_few_offers() {
        let r = run_fairness_audit(&[offer(5000, 0, 1200, 1)], 30);
        assert_eq!(r.overall_assessment, Assessment::InsufficientData);
        assert_eq!(r.offer_count, 1);
    }

    #[test]
    fn uniform_terms_pass() {
        let offers: Vec<_> = (0..6).map(|i| offer(1000 + i * 1500, 10, 1200, 250_000_000)).collect();
        let r = run_fairness_audit(&offers, 30);
        assert_eq!(r.overall_assessment, Assessment::Pass);
        assert!(r.disparities.is_empty());
        assert_eq!(r.cohort_stats.len(), 3);
    }

    #[test]
    fn wide_gaps_require_review() {
        let offers = vec![
            offer(9000, 0, 800, 1_500_000_000),
            offer(9000, 0, 800, 1_500_000_000),
            offer(9000, 0, 800, 1_500_000_000),
            offer(1000, 90, 3600, 50_000_000),
            offer(1000, 90, 3600, 50_000_000),
        ];
        let r = run_fairness_audit(&offers, 7);
        assert_eq!(r.overall_assessment, Assessment::ReviewRequired);
        assert!(r
            .disparities
            .iter()
            .any(|d| d.kind == DisparityKind::Apr && d.severity == Severity::High));
        assert!(r
            .disparities
            .iter()
            .any(|d| d.kind == DisparityKind::CreditLimit && d.cohort_type == "risk_level"));
    }

    #[test]
    fn moderate_gap_is_monitored() {
        let offers = vec![
            offer(9000, 0, 1200, 500_000_000),
            offer(9000, 0, 1200, 500_000_000),
            offer(9000, 0, 1200, 500_000_000),
            offer(9000, 90, 1800, 500_000_000),
            offer(9000, 90, 1800, 500_000_000),
        ];
        let r = run_fairness_audit(&offers, 30);
        assert_eq!(r.overall_assessment, Assessment::Monitor);
        assert_eq!(r.disparities.len(), 1);
    }
}
