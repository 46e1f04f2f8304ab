// =============================================================================
// Indicator Engine
// =============================================================================
//
// Pure, side-effect-free indicator computations over weekly candles. Each
// streaming indicator returns the newly produced series slice together with
// an explicit recurrence state value; passing that state back in extends the
// series without replaying history. Recomputing from the full candle sequence
// with no prior state always reproduces the complete series.

pub mod bollinger;
pub mod kdj;
pub mod ma;
pub mod rsi;
pub mod trade;

pub use bollinger::{bollinger_after, compute_bollinger, BollingerBand};
pub use kdj::{compute_kdj, KdjOutput, KdjPoint, KdjState};
pub use ma::{compute_moving_averages, moving_averages_after, MaValue};
pub use rsi::{compute_rsi, RsiOutput, RsiPoint, RsiState};
pub use trade::{summarize_trade, TradeSummary};
