// =============================================================================
// SecurityRecord — the cached unit per security
// =============================================================================
//
// Holds the daily series, the weekly candles derived from it, and every
// indicator series derived from the candles. A record is replaced as a whole
// by the orchestrator; readers share it through `Arc` and never see a
// half-merged state.
//
// Indicator series are aligned to candles by `week_start`. When aggregation
// rebuilds candles from some week onward, `carry_before` cuts every series
// back to the weeks strictly before that boundary and recovers the
// recurrence state from the last surviving point.
// =============================================================================

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::indicators::{BollingerBand, KdjPoint, KdjState, MaValue, RsiPoint, RsiState, TradeSummary};
use crate::runtime_config::IndicatorParams;
use crate::types::{DailyBar, WeeklyCandle};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityRecord {
    pub id: String,
    pub daily_bars: Vec<DailyBar>,
    pub weekly_candles: Vec<WeeklyCandle>,
    pub kdj: Vec<KdjPoint>,
    pub rsi: Vec<RsiPoint>,
    /// Moving averages keyed by period (in weeks).
    #[serde(default)]
    pub ma: BTreeMap<usize, Vec<MaValue>>,
    #[serde(default)]
    pub bollinger: Vec<BollingerBand>,
    /// Buy-and-hold result over `daily_bars`.
    #[serde(default)]
    pub trade: Option<TradeSummary>,
    /// Parameters the indicator series were computed with.
    #[serde(default)]
    pub params: IndicatorParams,
    pub last_updated: DateTime<Utc>,
}

/// Indicator prefixes still valid after a rebuild, plus the state needed to
/// extend them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorCarry {
    pub kdj: Vec<KdjPoint>,
    pub kdj_state: Option<KdjState>,
    pub rsi: Vec<RsiPoint>,
    pub rsi_state: Option<RsiState>,
    pub ma: BTreeMap<usize, Vec<MaValue>>,
    /// `None` when the band parameters changed and the series must be rebuilt.
    pub bollinger: Option<Vec<BollingerBand>>,
}

impl SecurityRecord {
    pub fn new(id: impl Into<String>, params: IndicatorParams) -> Self {
        Self {
            id: id.into(),
            daily_bars: Vec::new(),
            weekly_candles: Vec::new(),
            kdj: Vec::new(),
            rsi: Vec::new(),
            ma: BTreeMap::new(),
            bollinger: Vec::new(),
            trade: None,
            params,
            last_updated: Utc::now(),
        }
    }

    pub fn last_bar_date(&self) -> Option<NaiveDate> {
        self.daily_bars.last().map(|b| b.date)
    }

    /// Whether the record is younger than `ttl` at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_updated) <= ttl
    }

    /// Cut every indicator series back to weeks strictly before `boundary`
    /// (`None` keeps everything). Series computed with different parameters
    /// than `params` are dropped entirely.
    pub fn carry_before(&self, boundary: Option<NaiveDate>, params: &IndicatorParams) -> IndicatorCarry {
        let keep = |week: NaiveDate| boundary.map_or(true, |b| week < b);

        let kdj: Vec<KdjPoint> = if self.params.kdj_period == params.kdj_period {
            self.kdj.iter().copied().filter(|p| keep(p.week_start)).collect()
        } else {
            Vec::new()
        };
        let rsi: Vec<RsiPoint> = if self.params.rsi_period == params.rsi_period {
            self.rsi.iter().copied().filter(|p| keep(p.week_start)).collect()
        } else {
            Vec::new()
        };
        let ma = params
            .ma_periods
            .iter()
            .filter_map(|period| {
                let values = self.ma.get(period)?;
                Some((*period, values.iter().copied().filter(|v| keep(v.week_start)).collect()))
            })
            .collect();
        let bollinger = (self.params.bollinger_period == params.bollinger_period
            && self.params.bollinger_multiplier == params.bollinger_multiplier)
            .then(|| self.bollinger.iter().copied().filter(|b| keep(b.week_start)).collect());

        IndicatorCarry {
            kdj_state: kdj.last().map(KdjPoint::state),
            rsi_state: rsi.last().map(RsiPoint::state),
            kdj,
            rsi,
            ma,
            bollinger,
        }
    }

    /// Trailing `weeks` of candles and the indicator points aligned with them.
    pub fn view(&self, weeks: usize) -> SecurityView {
        let start = self.weekly_candles.len().saturating_sub(weeks);
        let weekly_candles = self.weekly_candles[start..].to_vec();
        let from = weekly_candles.first().map(|c| c.week_start);
        let shown = |week: NaiveDate| from.is_some_and(|f| week >= f);

        SecurityView {
            id: self.id.clone(),
            quote: Quote::from_bars(&self.daily_bars),
            kdj: self.kdj.iter().copied().filter(|p| shown(p.week_start)).collect(),
            rsi: self.rsi.iter().copied().filter(|p| shown(p.week_start)).collect(),
            ma: self
                .ma
                .iter()
                .map(|(period, values)| {
                    (*period, values.iter().copied().filter(|v| shown(v.week_start)).collect())
                })
                .collect(),
            bollinger: self.bollinger.iter().copied().filter(|b| shown(b.week_start)).collect(),
            trade: self.trade,
            weekly_candles,
            last_updated: self.last_updated,
        }
    }
}

/// Latest daily close and its change against the previous close.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Quote {
    pub date: NaiveDate,
    pub close: f64,
    pub change: f64,
    pub change_pct: f64,
}

impl Quote {
    pub fn from_bars(bars: &[DailyBar]) -> Option<Self> {
        let last = bars.last()?;
        let prev_close = match bars.len() {
            0 | 1 => last.open,
            n => bars[n - 2].close,
        };
        let change = last.close - prev_close;
        let change_pct = if prev_close == 0.0 { 0.0 } else { change / prev_close * 100.0 };
        Some(Self {
            date: last.date,
            close: last.close,
            change,
            change_pct,
        })
    }
}

/// Read-only projection of a record for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityView {
    pub id: String,
    pub quote: Option<Quote>,
    pub weekly_candles: Vec<WeeklyCandle>,
    pub kdj: Vec<KdjPoint>,
    pub rsi: Vec<RsiPoint>,
    pub ma: BTreeMap<usize, Vec<MaValue>>,
    pub bollinger: Vec<BollingerBand>,
    pub trade: Option<TradeSummary>,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::aggregate;
    use crate::indicators::{compute_bollinger, compute_kdj, compute_moving_averages, compute_rsi, summarize_trade};
    use chrono::Duration;

    fn record_with_weeks(n: usize) -> SecurityRecord {
        let monday = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let bars: Vec<DailyBar> = (0..n)
            .map(|i| {
                let c = 100.0 + (i as f64 * 1.7).sin() * 5.0;
                DailyBar::new(monday + Duration::weeks(i as i64), c, c + 2.0, c - 2.0, c + 0.5, 10.0)
            })
            .collect();
        let weekly = aggregate(&bars).unwrap();
        let params = IndicatorParams::default();
        SecurityRecord {
            id: "2330".into(),
            kdj: compute_kdj(&weekly, params.kdj_period, None).series,
            rsi: compute_rsi(&weekly, params.rsi_period, None).series,
            ma: compute_moving_averages(&weekly, &params.ma_periods),
            bollinger: compute_bollinger(&weekly, params.bollinger_period, params.bollinger_multiplier),
            trade: summarize_trade(&bars),
            daily_bars: bars,
            weekly_candles: weekly,
            params,
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn carry_before_cuts_at_boundary() {
        let record = record_with_weeks(30);
        let boundary = record.weekly_candles[20].week_start;
        let carry = record.carry_before(Some(boundary), &record.params);

        assert!(carry.kdj.iter().all(|p| p.week_start < boundary));
        assert_eq!(carry.kdj.last().map(|p| p.week_start), Some(record.weekly_candles[19].week_start));
        assert_eq!(carry.kdj_state, carry.kdj.last().map(KdjPoint::state));
        assert_eq!(carry.rsi_state.map(|s| s.as_of), Some(record.weekly_candles[19].week_start));
        assert_eq!(carry.ma[&5].len(), 20 - 4);
        let bands = carry.bollinger.unwrap();
        assert_eq!(bands.len(), 1);
        assert_eq!(bands[0].week_start, record.weekly_candles[19].week_start);
    }

    #[test]
    fn carry_without_boundary_keeps_everything() {
        let record = record_with_weeks(12);
        let carry = record.carry_before(None, &record.params);
        assert_eq!(carry.kdj, record.kdj);
        assert_eq!(carry.rsi, record.rsi);
        assert_eq!(carry.ma, record.ma);
    }

    #[test]
    fn changed_params_drop_series() {
        let record = record_with_weeks(30);
        let params = IndicatorParams {
            kdj_period: 5,
            rsi_period: record.params.rsi_period,
            ma_periods: vec![5, 60],
            bollinger_multiplier: 2.5,
            ..record.params.clone()
        };
        let carry = record.carry_before(None, &params);
        assert!(carry.kdj.is_empty());
        assert!(carry.kdj_state.is_none());
        assert_eq!(carry.rsi, record.rsi);
        assert!(carry.ma.contains_key(&5));
        assert!(!carry.ma.contains_key(&60));
        assert!(!carry.ma.contains_key(&10));
        assert!(carry.bollinger.is_none());
    }

    #[test]
    fn view_trims_to_trailing_weeks() {
        let record = record_with_weeks(40);
        let view = record.view(26);
        assert_eq!(view.weekly_candles.len(), 26);
        let first = view.weekly_candles[0].week_start;
        assert!(view.kdj.iter().all(|p| p.week_start >= first));
        assert_eq!(view.kdj.len(), 26);
        assert_eq!(view.ma[&5].len(), 26);
        // MA20 only starts at candle 19.
        assert_eq!(view.ma[&20].len(), 21);
        assert_eq!(view.bollinger.len(), 21);
        assert_eq!(view.trade, record.trade);

        let quote = view.quote.unwrap();
        let bars = &record.daily_bars;
        let expected = bars[39].close - bars[38].close;
        assert!((quote.change - expected).abs() < 1e-9);
    }

    #[test]
    fn view_of_empty_record() {
        let record = SecurityRecord::new("2330", IndicatorParams::default());
        let view = record.view(26);
        assert!(view.quote.is_none());
        assert!(view.weekly_candles.is_empty());
        assert!(view.kdj.is_empty());
    }

    #[test]
    fn freshness_window() {
        let mut record = SecurityRecord::new("2330", IndicatorParams::default());
        let now = Utc::now();
        record.last_updated = now - Duration::minutes(10);
        assert!(record.is_fresh(now, Duration::minutes(30)));
        record.last_updated = now - Duration::minutes(31);
        assert!(!record.is_fresh(now, Duration::minutes(30)));
    }

    #[test]
    fn record_survives_json() {
        let record = record_with_weeks(12);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], "2330");
        let back: SecurityRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.weekly_candles.len(), record.weekly_candles.len());
        assert_eq!(back.kdj.len(), record.kdj.len());
        assert_eq!(back.ma.keys().collect::<Vec<_>>(), vec![&5, &10, &20]);
        assert_eq!(back.params, record.params);
        let (a, b) = (back.kdj[0], record.kdj[0]);
        assert_eq!(a.week_start, b.week_start);
        assert!((a.k - b.k).abs() < 1e-9);
    }
}
