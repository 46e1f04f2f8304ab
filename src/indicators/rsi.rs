// =============================================================================
// Relative Strength Index (RSI) — Wilder's Smoothing
// =============================================================================
//
// Step 1 — Price changes between consecutive weekly closes.
// Step 2 — Seed average gain / average loss with the simple mean of the first
//          `period` gains / losses (candles 1..=period).
// Step 3 — Wilder's exponential smoothing for every later candle:
//            avg_gain = (prev_avg_gain * (period - 1) + gain) / period
//            avg_loss = (prev_avg_loss * (period - 1) + loss) / period
// Step 4 — RSI = 100 - 100 / (1 + avg_gain / avg_loss), or 100 when
//          avg_loss is zero.
//
// Candles 0..period are warm-up and emit nothing; the first RSI value lands on
// candle index `period`.
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::WeeklyCandle;

/// Default weekly RSI look-back.
pub const DEFAULT_PERIOD: usize = 5;

/// Running Wilder averages after the candle of week `as_of`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RsiState {
    pub avg_gain: f64,
    pub avg_loss: f64,
    pub as_of: NaiveDate,
}

/// One RSI value plus the averages it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RsiPoint {
    pub week_start: NaiveDate,
    pub rsi: f64,
    pub avg_gain: f64,
    pub avg_loss: f64,
}

impl RsiPoint {
    pub fn state(&self) -> RsiState {
        RsiState {
            avg_gain: self.avg_gain,
            avg_loss: self.avg_loss,
            as_of: self.week_start,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RsiOutput {
    pub series: Vec<RsiPoint>,
    /// `None` while still inside the warm-up window.
    pub state: Option<RsiState>,
}

/// Compute RSI over `weekly`.
///
/// With `prior`, only candles strictly after `prior.as_of` are emitted. If the
/// candle preceding the first new one is missing (state not anchored in
/// `weekly`), the series is recomputed from scratch and then filtered to the
/// candles after `as_of`.
///
/// # Edge cases
/// - `period == 0` => empty series
/// - fewer than `period + 1` candles on a cold start => empty series
/// - average loss of zero => RSI 100, never NaN / infinity
pub fn compute_rsi(weekly: &[WeeklyCandle], period: usize, prior: Option<RsiState>) -> RsiOutput {
    if period == 0 {
        return RsiOutput {
            series: Vec::new(),
            state: prior,
        };
    }

    match prior {
        Some(state) => {
            let start = weekly.partition_point(|c| c.week_start <= state.as_of);
            if start == 0 {
                let cold = compute_rsi(weekly, period, None);
                let series: Vec<RsiPoint> = cold
                    .series
                    .into_iter()
                    .filter(|p| p.week_start > state.as_of)
                    .collect();
                let state = series.last().map(RsiPoint::state).or(Some(state));
                return RsiOutput { series, state };
            }
            smooth_from(weekly, period, start, state.avg_gain, state.avg_loss, Some(state))
        }
        None => {
            if weekly.len() < period + 1 {
                return RsiOutput {
                    series: Vec::new(),
                    state: None,
                };
            }

            let (sum_gain, sum_loss) = (1..=period).fold((0.0_f64, 0.0_f64), |(g, l), i| {
                let (gain, loss) = change(weekly, i);
                (g + gain, l + loss)
            });
            let period_f = period as f64;
            let avg_gain = sum_gain / period_f;
            let avg_loss = sum_loss / period_f;

            let Some(first) = rsi_from_averages(avg_gain, avg_loss) else {
                return RsiOutput {
                    series: Vec::new(),
                    state: None,
                };
            };
            let seed = RsiPoint {
                week_start: weekly[period].week_start,
                rsi: first,
                avg_gain,
                avg_loss,
            };

            let mut out = smooth_from(weekly, period, period + 1, avg_gain, avg_loss, Some(seed.state()));
            out.series.insert(0, seed);
            out
        }
    }
}

/// Apply Wilder smoothing from candle `start` onward.
fn smooth_from(
    weekly: &[WeeklyCandle],
    period: usize,
    start: usize,
    mut avg_gain: f64,
    mut avg_loss: f64,
    mut state: Option<RsiState>,
) -> RsiOutput {
    let period_f = period as f64;
    let mut series = Vec::with_capacity(weekly.len().saturating_sub(start));

    for i in start..weekly.len() {
        let (gain, loss) = change(weekly, i);
        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;

        match rsi_from_averages(avg_gain, avg_loss) {
            Some(rsi) => {
                let point = RsiPoint {
                    week_start: weekly[i].week_start,
                    rsi,
                    avg_gain,
                    avg_loss,
                };
                state = Some(point.state());
                series.push(point);
            }
            None => break, // Non-finite: stop producing values.
        }
    }

    RsiOutput { series, state }
}

/// Gain and loss (both non-negative) from candle `i - 1` to candle `i`.
fn change(weekly: &[WeeklyCandle], i: usize) -> (f64, f64) {
    let delta = weekly[i].close - weekly[i - 1].close;
    (delta.max(0.0), (-delta).max(0.0))
}

/// Convert average gain / average loss into an RSI value in [0, 100].
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    };

    rsi.is_finite().then_some(rsi)
}
