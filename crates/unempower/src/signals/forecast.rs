//! 14- and 30-day income projection from the daily earnings series.

use crate::events::WorkerHistory;
use crate::features::{coefficient_of_variation, earned_usdc, FeatureVector, DAY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const FORECAST_HISTORY_DAYS: i64 = 60;
pub const SMOOTHING_ALPHA: f64 = 0.3;
pub const WMA_WINDOW: usize = 7;
const SERIES_WEIGHT: f64 = 0.7;
const FEATURE_WEIGHT: f64 = 0.3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityLabel {
    Low,
    Medium,
    High,
    Unknown,
}

impl VolatilityLabel {
    fn from_volatility(v: f64) -> Self {
        if v < 0.3 {
            VolatilityLabel::Low
        } else if v < 0.6 {
            VolatilityLabel::Medium
        } else {
            VolatilityLabel::High
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceLabel {
    Low,
    Medium,
    High,
    NoData,
}

impl ConfidenceLabel {
    fn from_confidence(c: f64) -> Self {
        if c >= 0.7 {
            ConfidenceLabel::High
        } else if c >= 0.4 {
            ConfidenceLabel::Medium
        } else {
            ConfidenceLabel::Low
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    NoData,
    NoEarnings,
    ExpSmoothingWma,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IncomeForecast {
    #[serde(rename = "expectedIncome_14d")]
    pub expected_income_14d: f64,
    #[serde(rename = "expectedIncome_30d")]
    pub expected_income_30d: f64,
    #[serde(rename = "avgDailyIncome")]
    pub avg_daily_income: f64,
    #[serde(rename = "incomeVolatility")]
    pub volatility: f64,
    #[serde(rename = "incomeVolatilityLabel")]
    pub volatility_label: VolatilityLabel,
    pub confidence: f64,
    #[serde(rename = "confidenceLabel")]
    pub confidence_label: ConfidenceLabel,
    pub method: ForecastMethod,
    #[serde(rename = "dataPoints")]
    pub data_points: u32,
    #[serde(rename = "seriesLength")]
    pub series_length: u32,
}

impl IncomeForecast {
    fn empty(method: ForecastMethod) -> Self {
        Self {
            expected_income_14d: 0.0,
            expected_income_30d: 0.0,
            avg_daily_income: 0.0,
            volatility: 0.0,
            volatility_label: VolatilityLabel::Unknown,
            confidence: 0.0,
            confidence_label: ConfidenceLabel::NoData,
            method,
            data_points: 0,
            series_length: 0,
        }
    }
}

pub fn exponential_smoothing(data: &[f64], alpha: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(data.len());
    for &x in data {
        let next = match out.last() {
            Some(prev) => alpha * x + (1.0 - alpha) * prev,
            None => x,
        };
        out.push(next);
    }
    out
}

/// Linearly weighted average of the last `window` values (weights 1..=n, newest heaviest).
pub fn weighted_moving_average(data: &[f64], window: usize) -> f64 {
    let recent = &data[data.len().saturating_sub(window)..];
    let weight_sum: f64 = (1..=recent.len()).map(|w| w as f64).sum();
    if weight_sum == 0.0 {
        return 0.0;
    }
    recent
        .iter()
        .enumerate()
        .map(|(i, v)| v * (i + 1) as f64)
        .sum::<f64>()
        / weight_sum
}

/// Daily USDC totals from the first to the last day with earnings, gaps as zero.
pub fn daily_series(history: &WorkerHistory, since: i64) -> Vec<f64> {
    let mut by_day: BTreeMap<i64, f64> = BTreeMap::new();
    for ev in history.work_since(since) {
        if let Some(usdc) = earned_usdc(ev) {
            *by_day.entry(ev.event_timestamp.div_euclid(DAY)).or_insert(0.0) += usdc;
        }
    }
    let (Some(first), Some(last)) = (
        by_day.keys().next().copied(),
        by_day.keys().next_back().copied(),
    ) else {
        return Vec::new();
    };
    (first..=last)
        .map(|d| by_day.get(&d).copied().unwrap_or(0.0))
        .collect()
}

pub fn forecast_income(history: &WorkerHistory, features: &FeatureVector, as_of: i64) -> IncomeForecast {
    let since = as_of - FORECAST_HISTORY_DAYS * DAY;
    if history.work_since(since).next().is_none() {
        return IncomeForecast::empty(ForecastMethod::NoData);
    }
    let series = daily_series(history, since);
    if series.is_empty() {
        return IncomeForecast::empty(ForecastMethod::NoEarnings);
    }

    let data_points = series.iter().filter(|d| **d > 0.0).count() as u32;
    let smoothed = exponential_smoothing(&series, SMOOTHING_ALPHA);
    let series_daily = if smoothed.len() >= WMA_WINDOW {
        weighted_moving_average(&smoothed, WMA_WINDOW)
    } else {
        smoothed.iter().sum::<f64>() / smoothed.len() as f64
    };
    let feature_daily = features.workproof_rate_per_day_7d * features.earnings_band_mean_30d * 10.0;
    let blended = SERIES_WEIGHT * series_daily + FEATURE_WEIGHT * feature_daily;

    let volatility = if series.len() > 1 {
        coefficient_of_variation(&series).min(1.0)
    } else {
        0.0
    };

    let mut confidence = match data_points {
        20.. => 0.4,
        10.. => 0.3,
        5.. => 0.2,
        _ => 0.1,
    };
    confidence += 0.3 * (1.0 - volatility);
    if features.recency_hours < 24.0 {
        confidence += 0.2;
    } else if features.recency_hours < 72.0 {
        confidence += 0.1;
    }
    if features.rating_trend_30d.abs() < 0.3 {
        confidence += 0.1;
    }
    let confidence = confidence.min(1.0);

    IncomeForecast {
        expected_income_14d: blended * 14.0,
        expected_income_30d: blended * 30.0,
        avg_daily_income: blended,
        volatility,
        volatility_label: VolatilityLabel::from_volatility(volatility),
        confidence,
        confidence_label: ConfidenceLabel::from_confidence(confidence),
        method: ForecastMethod::ExpSmoothingWma,
        data_points,
        series_length: series.len() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::WorkEvent;
    use crate::features::extract_features;

    const NOW: i64 = 1_700_006_400; // midnight UTC

    fn proof(i: u64, ts: i64, earned: &str) -> WorkEvent {
        WorkEvent {
            proof_id: i.to_string(),
            worker: "0xw".into(),
            proof_hash: format!("0x{:064x}", i),
            work_units: 3,
            earned_amount: earned.into(),
            event_timestamp: ts,
            block_number: i,
            tx_hash: format!("0x{:064x}", i),
            log_index: 0,
        }
    }

    #[test]
    fn smoothing_and_wma() {
        let s = exponential_smoothing(&[10.0, 0.0, 10.0], 0.3);
        assert_eq!(s[0], 10.0);
        assert!((s[1] - 7.0).abs() < 1e-12);
        assert!((s[2] - 7.9).abs() < 1e-12);
        assert_eq!(weighted_moving_average(&[1.0, 2.0, 3.0], 7), 14.0 / 6.0);
        assert_eq!(weighted_moving_average(&[], 7), 0.0);
    }

    #[test]
    fn series_fills_gaps_with_zero() {
        let mut h = WorkerHistory::empty("0xw");
        h.work.push(proof(1, NOW - 3 * DAY, "5000000"));
        h.work.push(proof(2, NOW - 3 * DAY + 60, "5000000"));
        h.work.push(proof(3, NOW - DAY, "20000000"));
        let s = daily_series(&h, NOW - 60 * DAY);
        assert_eq!(s, vec![10.0, 0.0, 20.0]);
    }

    #[test]
    fn zero_history_is_no_data() {
        let h = WorkerHistory::empty("0xw");
        let f = extract_features(&h, NOW);
        let fc = forecast_income(&h, &f, NOW);
        assert_eq!(fc.method, ForecastMethod::NoData);
        assert_eq!(fc.confidence_label, ConfidenceLabel::NoData);
        assert_eq!(fc.volatility_label, VolatilityLabel::Unknown);
        assert_eq!(fc.expected_income_30d, 0.0);
    }

    #[test]
    fn steady_daily_income_is_confident() {
        let mut h = WorkerHistory::empty("0xw");
        for d in 0..25u64 {
            h.work.push(proof(d, NOW - 3_600 - d as i64 * DAY, "50000000"));
        }
        let f = extract_features(&h, NOW);
        let fc = forecast_income(&h, &f, NOW);
        assert_eq!(fc.volatility, 0.0);
        assert_eq!(fc.data_points, 25);
        assert_eq!(fc.confidence_label, ConfidenceLabel::High);
        assert!(fc.expected_income_14d > 0.0);
        assert!((fc.expected_income_30d / fc.expected_income_14d - 30.0 / 14.0).abs() < 1e-9);
    }
}
