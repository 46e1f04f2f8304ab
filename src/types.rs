// =============================================================================
// Shared market-data types used across the watchlist engine
// =============================================================================
//
// Daily bars arrive from the price-bar source as JSON rows:
//   ["20240102", 104, 107, 103, 106, 1200]
// Numbers may also be sent as strings, and the trailing volume column is
// optional. Weekly candles are keyed by the Monday of their ISO week.
// =============================================================================

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Monday of the ISO week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Parse a calendar date in either `YYYYMMDD` or `YYYY-MM-DD` form.
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    let fmt = if raw.contains('-') { "%Y-%m-%d" } else { "%Y%m%d" };
    NaiveDate::parse_from_str(raw, fmt).with_context(|| format!("invalid date: {raw}"))
}

// ---------------------------------------------------------------------------
// DailyBar
// ---------------------------------------------------------------------------

/// One trading day of OHLCV data for a single security.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl DailyBar {
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Monday of the ISO week this bar belongs to.
    pub fn week_start(&self) -> NaiveDate {
        week_start(self.date)
    }

    /// Parse a source row `[date, open, high, low, close, volume?]`.
    pub fn from_row(row: &serde_json::Value) -> Result<Self> {
        let cols = row.as_array().context("bar row is not an array")?;
        if cols.len() < 5 {
            anyhow::bail!("bar row has {} columns, expected at least 5", cols.len());
        }

        let date = match &cols[0] {
            serde_json::Value::String(s) => parse_date(s)?,
            serde_json::Value::Number(n) => parse_date(&n.to_string())?,
            _ => anyhow::bail!("bar date has unexpected JSON type"),
        };

        let volume = match cols.get(5) {
            Some(v) => parse_number(v, "volume")?,
            None => 0.0,
        };

        Ok(Self {
            date,
            open: parse_number(&cols[1], "open")?,
            high: parse_number(&cols[2], "high")?,
            low: parse_number(&cols[3], "low")?,
            close: parse_number(&cols[4], "close")?,
            volume,
        })
    }
}

/// The source sends numbers either as JSON numbers or as numeric strings.
fn parse_number(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

// ---------------------------------------------------------------------------
// WeeklyCandle
// ---------------------------------------------------------------------------

/// OHLCV candle covering every daily bar of one ISO week.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeeklyCandle {
    /// Monday of the ISO week.
    pub week_start: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl WeeklyCandle {
    /// Start a candle from the first daily bar of its week.
    pub fn open_with(bar: &DailyBar) -> Self {
        Self {
            week_start: bar.week_start(),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        }
    }

    /// Fold a later bar of the same week into the candle.
    pub fn absorb(&mut self, bar: &DailyBar) {
        debug_assert_eq!(bar.week_start(), self.week_start);
        self.high = self.high.max(bar.high);
        self.low = self.low.min(bar.low);
        self.close = bar.close;
        self.volume += bar.volume;
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn week_start_is_monday() {
        // 2024-01-01 is a Monday.
        assert_eq!(week_start(d(2024, 1, 1)), d(2024, 1, 1));
        assert_eq!(week_start(d(2024, 1, 5)), d(2024, 1, 1));
        assert_eq!(week_start(d(2024, 1, 7)), d(2024, 1, 1));
        assert_eq!(week_start(d(2024, 1, 8)), d(2024, 1, 8));
    }

    #[test]
    fn week_start_crosses_year_boundary() {
        // 2021-01-01 (Friday) belongs to the ISO week starting 2020-12-28.
        assert_eq!(week_start(d(2021, 1, 1)), d(2020, 12, 28));
    }

    #[test]
    fn parse_both_date_forms() {
        assert_eq!(parse_date("20240102").unwrap(), d(2024, 1, 2));
        assert_eq!(parse_date("2024-01-02").unwrap(), d(2024, 1, 2));
        assert!(parse_date("2024/01/02").is_err());
    }

    #[test]
    fn from_row_numeric() {
        let row = serde_json::json!(["20240102", 104, 107, 103, 106, 1200]);
        let bar = DailyBar::from_row(&row).unwrap();
        assert_eq!(bar.date, d(2024, 1, 2));
        assert!((bar.high - 107.0).abs() < 1e-9);
        assert!((bar.volume - 1200.0).abs() < 1e-9);
    }

    #[test]
    fn from_row_string_numbers_and_missing_volume() {
        let row = serde_json::json!([20240102, "104.5", "107", "103", "106.25"]);
        let bar = DailyBar::from_row(&row).unwrap();
        assert!((bar.open - 104.5).abs() < 1e-9);
        assert!((bar.close - 106.25).abs() < 1e-9);
        assert_eq!(bar.volume, 0.0);
    }

    #[test]
    fn from_row_rejects_short_rows() {
        let row = serde_json::json!(["20240102", 1, 2]);
        assert!(DailyBar::from_row(&row).is_err());
        assert!(DailyBar::from_row(&serde_json::json!({"date": "20240102"})).is_err());
    }

    #[test]
    fn candle_absorbs_bars() {
        let mut c = WeeklyCandle::open_with(&DailyBar::new(d(2024, 1, 1), 100.0, 105.0, 99.0, 104.0, 1000.0));
        c.absorb(&DailyBar::new(d(2024, 1, 2), 104.0, 107.0, 103.0, 106.0, 1200.0));
        assert_eq!(c.week_start, d(2024, 1, 1));
        assert_eq!(c.open, 100.0);
        assert_eq!(c.high, 107.0);
        assert_eq!(c.low, 99.0);
        assert_eq!(c.close, 106.0);
        assert_eq!(c.volume, 2200.0);
    }
}
