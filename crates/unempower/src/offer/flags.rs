//! Fraud bitmask carried in the attestation's `fraudFlags` field.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const HARD_BLOCK_SCORE: u32 = 85;
pub const SUSPECT_SCORE: u32 = 50;
pub const EARLY_WARNING_HIGH_SCORE: u32 = 60;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FraudFlags(u32);

impl FraudFlags {
    pub const NONE: FraudFlags = FraudFlags(0);
    pub const HARD_BLOCK: FraudFlags = FraudFlags(1);
    pub const ANOMALY_SUSPECT: FraudFlags = FraudFlags(1 << 1);
    pub const WORKPROOF_SUSPECT: FraudFlags = FraudFlags(1 << 2);
    pub const EARLY_WARNING_HIGH: FraudFlags = FraudFlags(1 << 3);
    /// Reserved for an external fairness reviewer; this pipeline never sets it.
    pub const FAIRNESS_REVIEW: FraudFlags = FraudFlags(1 << 4);

    const NAMES: [(FraudFlags, &'static str); 5] = [
        (FraudFlags::HARD_BLOCK, "HARD_BLOCK"),
        (FraudFlags::ANOMALY_SUSPECT, "ANOMALY_SUSPECT"),
        (FraudFlags::WORKPROOF_SUSPECT, "WORKPROOF_SUSPECT"),
        (FraudFlags::EARLY_WARNING_HIGH, "EARLY_WARNING_HIGH"),
        (FraudFlags::FAIRNESS_REVIEW, "FAIRNESS_REVIEW"),
    ];

    /// Wrap a stored or wire mask. Unknown bits are kept as-is.
    pub fn from_bits(bits: u32) -> Self {
        FraudFlags(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: FraudFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: FraudFlags) {
        self.0 |= other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Derive the mask from the three signal scores.
    pub fn from_scores(anomaly: u32, integrity: u32, warning: u32) -> Self {
        let mut f = FraudFlags::NONE;
        if anomaly >= HARD_BLOCK_SCORE || integrity >= HARD_BLOCK_SCORE {
            f.insert(FraudFlags::HARD_BLOCK);
        }
        if anomaly >= SUSPECT_SCORE {
            f.insert(FraudFlags::ANOMALY_SUSPECT);
        }
        if integrity >= SUSPECT_SCORE {
            f.insert(FraudFlags::WORKPROOF_SUSPECT);
        }
        if warning >= EARLY_WARNING_HIGH_SCORE {
            f.insert(FraudFlags::EARLY_WARNING_HIGH);
        }
        f
    }

    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl fmt::Display for FraudFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        f.write_str(&self.names().join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anomaly_ninety_integrity_forty() {
        let f = FraudFlags::from_scores(90, 40, 0);
        assert!(f.contains(FraudFlags::HARD_BLOCK));
        assert!(f.contains(FraudFlags::ANOMALY_SUSPECT));
        assert!(!f.contains(FraudFlags::WORKPROOF_SUSPECT));
        assert_eq!(f.bits(), 0b11);
        assert_eq!(f.to_string(), "HARD_BLOCK|ANOMALY_SUSPECT");
    }

    #[test]
    fn integrity_alone_can_hard_block() {
        let f = FraudFlags::from_scores(0, 85, 60);
        assert_eq!(f.names(), vec!["HARD_BLOCK", "WORKPROOF_SUSPECT", "EARLY_WARNING_HIGH"]);
        assert!(!f.contains(FraudFlags::FAIRNESS_REVIEW));
    }

    #[test]
    fn stored_mask_reads_back_names() {
        let f = FraudFlags::from_bits(0b1_0110);
        assert_eq!(
            f.names(),
            vec!["ANOMALY_SUSPECT", "WORKPROOF_SUSPECT", "FAIRNESS_REVIEW"]
        );
        assert_eq!(FraudFlags::from_bits(f.bits()), f);
    }

    #[test]
    fn clean_scores_are_empty() {
        assert!(FraudFlags::from_scores(49, 49, 59).is_empty());
        assert_eq!(FraudFlags::NONE.to_string(), "NONE");
    }
}
