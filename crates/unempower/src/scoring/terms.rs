//! Step tables mapping trust score and PD to credit terms.

use crate::features::USDC_UNIT;

pub const PD_SCALE: u32 = 1_000_000;
pub const TRUST_SCALE: u32 = 10_000;

/// Base limit in whole USDC by trust-score tier.
pub fn base_limit_usdc(trust_score: u32) -> u64 {
    match trust_score {
        8000.. => 1000,
        6000.. => 500,
        4000.. => 250,
        2000.. => 100,
        _ => 50,
    }
}

/// Activity multiplier on the base limit, capped at 1.5x.
pub fn activity_multiplier(shift_count_30d: u32) -> f64 {
    (1.0 + f64::from(shift_count_30d) / 40.0).min(1.5)
}

/// Credit limit in 6-decimal fixed point.
pub fn credit_limit(trust_score: u32, shift_count_30d: u32) -> u64 {
    let usdc = base_limit_usdc(trust_score) as f64 * activity_multiplier(shift_count_30d);
    (usdc * USDC_UNIT) as u64
}

/// APR by PD percentage tier.
pub fn apr_bps(pd: u32) -> u16 {
    let pd_pct = f64::from(pd) / 10_000.0;
    if pd_pct < 5.0 {
        800
    } else if pd_pct < 10.0 {
        1200
    } else if pd_pct < 20.0 {
        1800
    } else if pd_pct < 40.0 {
        2400
    } else {
        3600
    }
}

pub fn tenure_days(trust_score: u32) -> u16 {
    match trust_score {
        7000.. => 30,
        5000.. => 21,
        3000.. => 14,
        _ => 7,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_edges() {
        assert_eq!(base_limit_usdc(8000), 1000);
        assert_eq!(base_limit_usdc(7999), 500);
        assert_eq!(base_limit_usdc(1999), 50);
        assert_eq!(apr_bps(49_999), 800);
        assert_eq!(apr_bps(50_000), 1200);
        assert_eq!(apr_bps(400_000), 3600);
        assert_eq!(tenure_days(2999), 7);
        assert_eq!(tenure_days(7000), 30);
    }

    #[test]
    fn activity_multiplier_caps() {
        assert_eq!(credit_limit(4000, 0), 250_000_000);
        assert_eq!(credit_limit(4000, 10), 312_500_000);
        assert_eq!(credit_limit(8000, 100), 1_500_000_000);
    }
}
