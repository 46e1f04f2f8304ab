// =============================================================================
// Stochastic KDJ
// =============================================================================
//
// For each candle i with a full look-back window of `period` candles:
//   RSV_i = (close_i - lowest_low) / (highest_high - lowest_low) * 100
//           (50 when the window range is zero, i.e. a flat market)
//   K_i   = 2/3 * K_{i-1} + 1/3 * RSV_i
//   D_i   = 2/3 * D_{i-1} + 1/3 * K_i
//   J_i   = 3 * K_i - 2 * D_i
//
// Cold start seeds K_{-1} = D_{-1} = 50; the first value lands on candle
// index `period - 1`.
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::WeeklyCandle;

/// Default KDJ look-back in weeks.
pub const DEFAULT_PERIOD: usize = 9;

const SEED: f64 = 50.0;

/// Recurrence carry-over for KDJ: the last K and D, and the week they were
/// computed for (`None` on a cold start).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KdjState {
    pub k: f64,
    pub d: f64,
    pub as_of: Option<NaiveDate>,
}

impl KdjState {
    pub const fn cold() -> Self {
        Self {
            k: SEED,
            d: SEED,
            as_of: None,
        }
    }
}

impl Default for KdjState {
    fn default() -> Self {
        Self::cold()
    }
}

/// One KDJ value aligned with a weekly candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KdjPoint {
    pub week_start: NaiveDate,
    pub k: f64,
    pub d: f64,
    pub j: f64,
}

impl KdjPoint {
    /// The state that continues the recurrence after this point.
    pub fn state(&self) -> KdjState {
        KdjState {
            k: self.k,
            d: self.d,
            as_of: Some(self.week_start),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KdjOutput {
    /// Newly produced points only (all points on a cold start).
    pub series: Vec<KdjPoint>,
    /// State after the last produced point, or the prior state unchanged.
    pub state: KdjState,
}

/// Compute KDJ over `weekly`.
///
/// With `prior`, only candles strictly after `prior.as_of` are emitted; the
/// earlier candles still serve as look-back for the RSV window.
///
/// # Edge cases
/// - `period == 0` or fewer than `period` candles => empty series, not an error.
/// - A zero high/low range yields RSV = 50 (no division by zero).
pub fn compute_kdj(weekly: &[WeeklyCandle], period: usize, prior: Option<KdjState>) -> KdjOutput {
    let mut state = prior.unwrap_or_default();

    if period == 0 || weekly.len() < period {
        return KdjOutput {
            series: Vec::new(),
            state,
        };
    }

    let first_new = match state.as_of {
        Some(as_of) => weekly.partition_point(|c| c.week_start <= as_of),
        None => 0,
    };
    let start = first_new.max(period - 1);

    let mut series = Vec::with_capacity(weekly.len().saturating_sub(start));
    for i in start..weekly.len() {
        let window = &weekly[i + 1 - period..=i];
        let high = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
        let low = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        let range = high - low;

        let rsv = if range == 0.0 {
            SEED
        } else {
            (weekly[i].close - low) / range * 100.0
        };

        let k = (2.0 / 3.0) * state.k + (1.0 / 3.0) * rsv;
        let d = (2.0 / 3.0) * state.d + (1.0 / 3.0) * k;
        let j = 3.0 * k - 2.0 * d;

        let point = KdjPoint {
            week_start: weekly[i].week_start,
            k,
            d,
            j,
        };
        state = point.state();
        series.push(point);
    }

    KdjOutput { series, state }
}
