// =============================================================================
// Bollinger Bands of weekly closes
// =============================================================================
//
// middle = SMA_n(close)
// sigma  = population standard deviation of the same n closes
// upper  = middle + k * sigma
// lower  = middle - k * sigma
//
// Like the moving averages there is no recurrence, so extending a series only
// evaluates the windows that end on new candles.
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::WeeklyCandle;

pub const DEFAULT_PERIOD: usize = 20;
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBand {
    pub week_start: NaiveDate,
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bands for every candle with a full `period` window behind it.
pub fn compute_bollinger(weekly: &[WeeklyCandle], period: usize, multiplier: f64) -> Vec<BollingerBand> {
    bollinger_after(weekly, period, multiplier, None)
}

/// Like [`compute_bollinger`] but only emits bands for candles strictly
/// after `after`.
pub fn bollinger_after(
    weekly: &[WeeklyCandle],
    period: usize,
    multiplier: f64,
    after: Option<NaiveDate>,
) -> Vec<BollingerBand> {
    if period == 0 || weekly.len() < period {
        return Vec::new();
    }
    let first_new = after.map_or(0, |d| weekly.partition_point(|c| c.week_start <= d));
    let start = first_new.max(period - 1);

    (start..weekly.len())
        .map(|i| band(&weekly[i + 1 - period..=i], multiplier))
        .collect()
}

fn band(window: &[WeeklyCandle], multiplier: f64) -> BollingerBand {
    let n = window.len() as f64;
    let middle = window.iter().map(|c| c.close).sum::<f64>() / n;
    // Two passes: the sum-of-squares shortcut loses precision on price levels.
    let variance = window.iter().map(|c| (c.close - middle).powi(2)).sum::<f64>() / n;
    let width = multiplier * variance.sqrt();

    BollingerBand {
        week_start: window[window.len() - 1].week_start,
        upper: middle + width,
        middle,
        lower: middle - width,
    }
}
