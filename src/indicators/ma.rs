// =============================================================================
// Simple Moving Averages of weekly closes
// =============================================================================
//
// MA_n(i) = mean(close_{i-n+1} ..= close_i)
//
// No recurrence: every value depends only on its own window, so extension just
// computes the windows ending on the new candles.
// =============================================================================

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::WeeklyCandle;

/// Default MA periods shown on the weekly chart.
pub const DEFAULT_PERIODS: [usize; 3] = [5, 10, 20];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaValue {
    pub week_start: NaiveDate,
    pub value: f64,
}

/// Compute every requested moving average over the full candle sequence.
///
/// Periods of zero are ignored; a period longer than the input yields an
/// empty series for that period.
pub fn compute_moving_averages(weekly: &[WeeklyCandle], periods: &[usize]) -> BTreeMap<usize, Vec<MaValue>> {
    moving_averages_after(weekly, periods, None)
}

/// Like [`compute_moving_averages`] but only emits values for candles strictly
/// after `after`.
pub fn moving_averages_after(
    weekly: &[WeeklyCandle],
    periods: &[usize],
    after: Option<NaiveDate>,
) -> BTreeMap<usize, Vec<MaValue>> {
    let first_new = after.map_or(0, |d| weekly.partition_point(|c| c.week_start <= d));

    periods
        .iter()
        .copied()
        .filter(|&p| p > 0)
        .map(|period| (period, window_means(weekly, period, first_new)))
        .collect()
}

fn window_means(weekly: &[WeeklyCandle], period: usize, first_new: usize) -> Vec<MaValue> {
    if weekly.len() < period {
        return Vec::new();
    }
    let start = first_new.max(period - 1);
    if start >= weekly.len() {
        return Vec::new();
    }

    let period_f = period as f64;
    let mut sum: f64 = weekly[start + 1 - period..=start].iter().map(|c| c.close).sum();
    let mut out = Vec::with_capacity(weekly.len() - start);
    out.push(MaValue {
        week_start: weekly[start].week_start,
        value: sum / period_f,
    });

    for i in start + 1..weekly.len() {
        sum += weekly[i].close - weekly[i - period].close;
        out.push(MaValue {
            week_start: weekly[i].week_start,
            value: sum / period_f,
        });
    }
    out
}
