//! PD, trust score and base credit terms for a feature vector.

pub mod model;
pub mod terms;

pub use model::{CreditModel, ModelError};

use crate::features::FeatureVector;
use serde::{Deserialize, Serialize};
use terms::{PD_SCALE, TRUST_SCALE};

/// The five model inputs, in model order.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringFeatures {
    pub shift_count_7d: u32,
    pub shift_count_30d: u32,
    pub avg_rating_band: f64,
    pub earnings_consistency: f64,
    pub recency_days: u32,
}

impl ScoringFeatures {
    pub fn as_array(&self) -> [f64; model::FEATURE_COUNT] {
        [
            f64::from(self.shift_count_7d),
            f64::from(self.shift_count_30d),
            self.avg_rating_band,
            self.earnings_consistency,
            f64::from(self.recency_days),
        ]
    }
}

impl From<&FeatureVector> for ScoringFeatures {
    fn from(f: &FeatureVector) -> Self {
        Self {
            shift_count_7d: f.shift_count_7d,
            shift_count_30d: f.shift_count_30d,
            avg_rating_band: f.avg_rating_band_30d,
            earnings_consistency: f.earnings_consistency_30d,
            recency_days: f.recency_days,
        }
    }
}

/// Terms before any signal adjustment. `credit_limit` is 6-decimal fixed point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseOffer {
    pub pd: u32,
    pub trust_score: u32,
    pub credit_limit: u64,
    pub apr_bps: u16,
    pub tenure_days: u16,
}

pub fn probability_of_default(model: &CreditModel, f: &ScoringFeatures) -> u32 {
    let p = model.predict(&f.as_array());
    ((p * f64::from(PD_SCALE)) as u32).min(PD_SCALE)
}

/// `0.40·(1−PD) + 0.25·activity + 0.20·rating + 0.15·recency`, scaled to 0..=10000.
pub fn trust_score(f: &ScoringFeatures, pd: u32) -> u32 {
    let pd_score = 1.0 - f64::from(pd) / f64::from(PD_SCALE);
    let activity = (f64::from(f.shift_count_30d) / 20.0).min(1.0);
    let rating = ((f.avg_rating_band - 1.0) / 4.0).clamp(0.0, 1.0);
    let recency = (1.0 - f64::from(f.recency_days) / 30.0).max(0.0);
    let blended = 0.40 * pd_score + 0.25 * activity + 0.20 * rating + 0.15 * recency;
    ((blended * f64::from(TRUST_SCALE)) as u32).min(TRUST_SCALE)
}

/// Pure scoring of one worker. Same model and features give identical output.
pub fn score(model: &CreditModel, features: &FeatureVector) -> BaseOffer {
    let f = ScoringFeatures::from(features);
    let pd = probability_of_default(model, &f);
    let trust = trust_score(&f, pd);
    BaseOffer {
        pd,
        trust_score: trust,
        credit_limit: terms::credit_limit(trust, f.shift_count_30d),
        apr_bps: terms::apr_bps(pd),
        tenure_days: terms::tenure_days(trust),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::WorkerHistory;
    use crate::features::extract_features;

    #[test]
    fn trust_blend_weights() {
        let f = ScoringFeatures {
            shift_count_7d: 5,
            shift_count_30d: 20,
            avg_rating_band: 5.0,
            earnings_consistency: 1.0,
            recency_days: 0,
        };
        assert_eq!(trust_score(&f, 0), 10_000);
        assert_eq!(trust_score(&f, PD_SCALE), 6_000);
    }

    #[test]
    fn zero_history_scores_without_error() {
        let model = CreditModel::train(model::TRAINING_SEED).unwrap();
        let f = extract_features(&WorkerHistory::empty("0xw"), 1_700_000_000);
        let a = score(&model, &f);
        let b = score(&model, &f);
        assert_eq!(a, b);
        assert!(a.pd <= PD_SCALE);
        assert!(a.trust_score <= TRUST_SCALE);
        assert!(a.tenure_days >= 7);
    }
}
