// =============================================================================
// Weekly Aggregator — daily bars → ISO-week OHLCV candles
// =============================================================================
//
// Full mode scans the daily series oldest-first and opens a new candle every
// time the ISO week (Monday start) changes:
//   open   = open of the first bar in the week
//   close  = close of the last bar in the week
//   high   = max(high), low = min(low), volume = sum(volume)
// Weeks without bars produce no candle.
//
// Incremental mode reuses every existing candle strictly before the week of
// the first new bar and rebuilds the rest from the full daily series, so the
// cost is bounded by the number of weeks touched.
// =============================================================================

use crate::error::AggregationError;
use crate::types::{DailyBar, WeeklyCandle};

/// Result of an incremental aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct WeeklyMerge {
    /// Complete candle sequence after the merge.
    pub candles: Vec<WeeklyCandle>,
    /// Index of the first candle that was (re)built; candles before it are
    /// identical to the input's.
    pub rebuilt_from: usize,
}

/// Check that every bar is well-formed and dates strictly increase.
pub fn validate_bars(bars: &[DailyBar]) -> Result<(), AggregationError> {
    for (index, bar) in bars.iter().enumerate() {
        let prices = [bar.open, bar.high, bar.low, bar.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(AggregationError::Malformed {
                index,
                reason: "non-finite price".into(),
            });
        }
        if !bar.volume.is_finite() || bar.volume < 0.0 {
            return Err(AggregationError::Malformed {
                index,
                reason: format!("invalid volume {}", bar.volume),
            });
        }
        if bar.high < bar.low {
            return Err(AggregationError::Malformed {
                index,
                reason: format!("high {} below low {}", bar.high, bar.low),
            });
        }
        if index > 0 && bar.date <= bars[index - 1].date {
            return Err(AggregationError::NonMonotonic {
                index,
                date: bar.date,
            });
        }
    }
    Ok(())
}

/// Aggregate a full daily series into weekly candles (ascending by week).
///
/// Empty input yields an empty vec. Malformed input yields an error carrying
/// the offending index; nothing is silently dropped.
pub fn aggregate(daily: &[DailyBar]) -> Result<Vec<WeeklyCandle>, AggregationError> {
    validate_bars(daily)?;
    Ok(fold_weeks(daily))
}

/// Extend `existing` weekly candles with `new_daily` bars.
///
/// `all_daily` is the complete daily series *including* `new_daily`. The
/// last existing candle may be incomplete, so when the first new bar falls in
/// that week (or earlier) every candle from that week onward is rebuilt from
/// `all_daily`. Otherwise candles for the new bars are appended.
pub fn aggregate_incremental(
    existing: &[WeeklyCandle],
    all_daily: &[DailyBar],
    new_daily: &[DailyBar],
) -> Result<WeeklyMerge, AggregationError> {
    validate_bars(all_daily)?;
    validate_bars(new_daily)?;

    let (Some(last), Some(first_new)) = (existing.last(), new_daily.first()) else {
        if existing.is_empty() {
            return Ok(WeeklyMerge {
                candles: fold_weeks(all_daily),
                rebuilt_from: 0,
            });
        }
        // Nothing new: existing candles stand as they are.
        return Ok(WeeklyMerge {
            candles: existing.to_vec(),
            rebuilt_from: existing.len(),
        });
    };

    let boundary = first_new.week_start();

    if boundary <= last.week_start {
        let retained = existing.partition_point(|c| c.week_start < boundary);
        let from = all_daily.partition_point(|b| b.week_start() < boundary);

        let mut candles = existing[..retained].to_vec();
        candles.extend(fold_weeks(&all_daily[from..]));
        Ok(WeeklyMerge {
            candles,
            rebuilt_from: retained,
        })
    } else {
        let mut candles = existing.to_vec();
        candles.extend(fold_weeks(new_daily));
        Ok(WeeklyMerge {
            candles,
            rebuilt_from: existing.len(),
        })
    }
}

/// Partition an already-validated series by ISO week.
fn fold_weeks(daily: &[DailyBar]) -> Vec<WeeklyCandle> {
    let mut out: Vec<WeeklyCandle> = Vec::new();
    for bar in daily {
        match out.last_mut() {
            Some(candle) if candle.week_start == bar.week_start() => candle.absorb(bar),
            _ => out.push(WeeklyCandle::open_with(bar)),
        }
    }
    out
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn date(s: &str) -> NaiveDate {
        crate::types::parse_date(s).unwrap()
    }

    fn bar(s: &str, o: f64, h: f64, l: f64, c: f64, v: f64) -> DailyBar {
        DailyBar::new(date(s), o, h, l, c, v)
    }

    /// Weekday bars over `days` calendar days with a deterministic zig-zag.
    fn series(days: i64) -> Vec<DailyBar> {
        let start = date("20231002");
        (0..days)
            .map(|i| start + Duration::days(i))
            .filter(|d| chrono::Datelike::weekday(d).num_days_from_monday() < 5)
            .enumerate()
            .map(|(i, d)| {
                let base = 100.0 + (i as f64 * 0.7).sin() * 10.0;
                DailyBar::new(d, base, base + 2.0, base - 1.5, base + 0.5, 1000.0 + i as f64)
            })
            .collect()
    }

    #[test]
    fn two_week_scenario() {
        let daily = vec![
            bar("20240101", 100.0, 105.0, 99.0, 104.0, 1000.0),
            bar("20240102", 104.0, 107.0, 103.0, 106.0, 1200.0),
            bar("20240108", 106.0, 110.0, 105.0, 109.0, 900.0),
        ];
        let weekly = aggregate(&daily).unwrap();
        assert_eq!(weekly.len(), 2);

        assert_eq!(weekly[0].week_start, date("20240101"));
        assert_eq!(weekly[0].open, 100.0);
        assert_eq!(weekly[0].high, 107.0);
        assert_eq!(weekly[0].low, 99.0);
        assert_eq!(weekly[0].close, 106.0);
        assert_eq!(weekly[0].volume, 2200.0);

        assert_eq!(weekly[1].week_start, date("20240108"));
        assert_eq!(weekly[1].open, 106.0);
        assert_eq!(weekly[1].high, 110.0);
        assert_eq!(weekly[1].low, 105.0);
        assert_eq!(weekly[1].close, 109.0);
        assert_eq!(weekly[1].volume, 900.0);
    }

    #[test]
    fn empty_input_gives_no_candles() {
        assert!(aggregate(&[]).unwrap().is_empty());
    }

    #[test]
    fn single_bar_week() {
        let weekly = aggregate(&[bar("20240103", 10.0, 10.0, 10.0, 10.0, 5.0)]).unwrap();
        assert_eq!(weekly.len(), 1);
        let c = weekly[0];
        assert_eq!(c.week_start, date("20240101"));
        assert_eq!((c.open, c.high, c.low, c.close), (10.0, 10.0, 10.0, 10.0));
    }

    #[test]
    fn gap_weeks_are_not_filled() {
        let daily = vec![
            bar("20240102", 1.0, 2.0, 0.5, 1.5, 1.0),
            bar("20240123", 2.0, 3.0, 1.5, 2.5, 1.0),
        ];
        let weekly = aggregate(&daily).unwrap();
        let weeks: Vec<_> = weekly.iter().map(|c| c.week_start).collect();
        assert_eq!(weeks, vec![date("20240101"), date("20240122")]);
    }

    #[test]
    fn weeks_partition_the_daily_series() {
        let daily = series(120);
        let weekly = aggregate(&daily).unwrap();

        let mut expected: Vec<NaiveDate> = daily.iter().map(|b| b.week_start()).collect();
        expected.dedup();
        let got: Vec<NaiveDate> = weekly.iter().map(|c| c.week_start).collect();
        assert_eq!(got, expected);

        let total_daily: f64 = daily.iter().map(|b| b.volume).sum();
        let total_weekly: f64 = weekly.iter().map(|c| c.volume).sum();
        assert!((total_daily - total_weekly).abs() < 1e-6);
    }

    #[test]
    fn non_monotonic_dates_report_index() {
        let daily = vec![
            bar("20240102", 1.0, 2.0, 0.5, 1.5, 1.0),
            bar("20240103", 1.0, 2.0, 0.5, 1.5, 1.0),
            bar("20240103", 1.0, 2.0, 0.5, 1.5, 1.0),
        ];
        let err = aggregate(&daily).unwrap_err();
        assert!(matches!(err, AggregationError::NonMonotonic { index: 2, .. }));
    }

    #[test]
    fn malformed_bar_reports_index() {
        let daily = vec![
            bar("20240102", 1.0, 2.0, 0.5, 1.5, 1.0),
            bar("20240103", 1.0, f64::NAN, 0.5, 1.5, 1.0),
        ];
        assert_eq!(aggregate(&daily).unwrap_err().index(), 1);

        let inverted = vec![bar("20240102", 1.0, 0.5, 2.0, 1.5, 1.0)];
        assert_eq!(aggregate(&inverted).unwrap_err().index(), 0);
    }

    #[test]
    fn incremental_matches_full_at_every_split() {
        let daily = series(90);
        let full = aggregate(&daily).unwrap();

        for k in 0..=daily.len() {
            let existing = aggregate(&daily[..k]).unwrap();
            let merged = aggregate_incremental(&existing, &daily, &daily[k..]).unwrap();
            assert_eq!(merged.candles, full, "split at {k} diverged");
            assert!(merged.candles[..merged.rebuilt_from] == existing[..merged.rebuilt_from]);
        }
    }

    #[test]
    fn incremental_same_week_rebuilds_last_candle_only() {
        let daily = vec![
            bar("20240101", 100.0, 105.0, 99.0, 104.0, 1000.0),
            bar("20240108", 106.0, 110.0, 105.0, 109.0, 900.0),
            bar("20240109", 109.0, 112.0, 108.0, 111.0, 800.0),
        ];
        let existing = aggregate(&daily[..2]).unwrap();
        let merged = aggregate_incremental(&existing, &daily, &daily[2..]).unwrap();
        assert_eq!(merged.rebuilt_from, 1);
        assert_eq!(merged.candles.len(), 2);
        assert_eq!(merged.candles[1].close, 111.0);
        assert_eq!(merged.candles[1].volume, 1700.0);
    }

    #[test]
    fn incremental_later_week_appends() {
        let daily = vec![
            bar("20240101", 100.0, 105.0, 99.0, 104.0, 1000.0),
            bar("20240115", 106.0, 110.0, 105.0, 109.0, 900.0),
        ];
        let existing = aggregate(&daily[..1]).unwrap();
        let merged = aggregate_incremental(&existing, &daily, &daily[1..]).unwrap();
        assert_eq!(merged.rebuilt_from, 1);
        assert_eq!(merged.candles[0], existing[0]);
        assert_eq!(merged.candles[1].week_start, date("20240115"));
    }

    #[test]
    fn incremental_without_new_bars_is_identity() {
        let daily = series(30);
        let existing = aggregate(&daily).unwrap();
        let merged = aggregate_incremental(&existing, &daily, &[]).unwrap();
        assert_eq!(merged.candles, existing);
        assert_eq!(merged.rebuilt_from, existing.len());
    }

    #[test]
    fn incremental_rejects_malformed_new_bars() {
        let mut daily = series(20);
        let existing = aggregate(&daily).unwrap();
        let last = *daily.last().unwrap();
        let bad = DailyBar::new(last.date + Duration::days(1), 1.0, 2.0, 1.0, f64::INFINITY, 1.0);
        daily.push(bad);
        let err = aggregate_incremental(&existing, &daily, &[bad]).unwrap_err();
        assert_eq!(err.index(), daily.len() - 1);
    }
}
