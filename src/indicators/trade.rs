// =============================================================================
// Buy-and-hold summary over the daily series
// =============================================================================
//
// Enters at the first close, exits at the last close:
//   profit      = exit - entry
//   profit_rate = profit / entry * 100   (0 when entry is 0)
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::DailyBar;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeSummary {
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub entry_price: f64,
    pub exit_price: f64,
    /// Trading days held, inclusive of both ends.
    pub bars: usize,
    pub profit: f64,
    /// Percent.
    pub profit_rate: f64,
}

/// `None` for an empty series.
pub fn summarize_trade(bars: &[DailyBar]) -> Option<TradeSummary> {
    let first = bars.first()?;
    let last = bars.last()?;

    let profit = last.close - first.close;
    let profit_rate = if first.close == 0.0 {
        0.0
    } else {
        profit / first.close * 100.0
    };

    Some(TradeSummary {
        entry_date: first.date,
        exit_date: last.date,
        entry_price: first.close,
        exit_price: last.close,
        bars: bars.len(),
        profit,
        profit_rate,
    })
}
