// =============================================================================
// Task definitions — what a worker can be asked to compute
// =============================================================================
//
// Every request is a variant of `Task`; `execute` matches exhaustively so a
// new kind of work cannot be submitted without a handler. Payloads are owned
// (or shared immutably via `Arc`) so workers never touch caller state.
// =============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use crate::aggregator::{self, WeeklyMerge};
use crate::error::{AggregationError, TaskError};
use crate::indicators::{self, BollingerBand, KdjOutput, KdjState, MaValue, RsiOutput, RsiState, TradeSummary};
use crate::types::{DailyBar, WeeklyCandle};

/// A unit of CPU-bound work for a worker pool.
#[derive(Debug, Clone)]
pub enum Task {
    /// Incremental weekly aggregation (full when `existing` is empty).
    AggregateWeekly {
        existing: Arc<[WeeklyCandle]>,
        all_daily: Arc<[DailyBar]>,
        new_daily: Arc<[DailyBar]>,
    },
    ComputeKdj {
        weekly: Arc<[WeeklyCandle]>,
        period: usize,
        prior: Option<KdjState>,
    },
    ComputeRsi {
        weekly: Arc<[WeeklyCandle]>,
        period: usize,
        prior: Option<RsiState>,
    },
    ComputeMovingAverages {
        weekly: Arc<[WeeklyCandle]>,
        periods: Vec<usize>,
        after: Option<NaiveDate>,
    },
    ComputeBollinger {
        weekly: Arc<[WeeklyCandle]>,
        period: usize,
        multiplier: f64,
        after: Option<NaiveDate>,
    },
    /// Buy-and-hold summary over the daily series.
    SummarizeTrade { daily: Arc<[DailyBar]> },
    /// Health check.
    Ping,
}

/// Discriminant of [`Task`], used for logging and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    AggregateWeekly,
    ComputeKdj,
    ComputeRsi,
    ComputeMovingAverages,
    ComputeBollinger,
    SummarizeTrade,
    Ping,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AggregateWeekly => "aggregate_weekly",
            Self::ComputeKdj => "compute_kdj",
            Self::ComputeRsi => "compute_rsi",
            Self::ComputeMovingAverages => "compute_moving_averages",
            Self::ComputeBollinger => "compute_bollinger",
            Self::SummarizeTrade => "summarize_trade",
            Self::Ping => "ping",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::AggregateWeekly { .. } => TaskKind::AggregateWeekly,
            Self::ComputeKdj { .. } => TaskKind::ComputeKdj,
            Self::ComputeRsi { .. } => TaskKind::ComputeRsi,
            Self::ComputeMovingAverages { .. } => TaskKind::ComputeMovingAverages,
            Self::ComputeBollinger { .. } => TaskKind::ComputeBollinger,
            Self::SummarizeTrade { .. } => TaskKind::SummarizeTrade,
            Self::Ping => TaskKind::Ping,
        }
    }
}

/// Result of a completed task.
#[derive(Debug, Clone)]
pub enum TaskOutput {
    Weekly(Result<WeeklyMerge, AggregationError>),
    Kdj(KdjOutput),
    Rsi(RsiOutput),
    MovingAverages(BTreeMap<usize, Vec<MaValue>>),
    Bollinger(Vec<BollingerBand>),
    Trade(Option<TradeSummary>),
    Pong(String),
}

impl TaskOutput {
    pub fn into_weekly(self) -> Result<Result<WeeklyMerge, AggregationError>, TaskError> {
        match self {
            Self::Weekly(merge) => Ok(merge),
            _ => Err(TaskError::UnexpectedOutput {
                kind: TaskKind::AggregateWeekly.as_str(),
            }),
        }
    }

    pub fn into_kdj(self) -> Result<KdjOutput, TaskError> {
        match self {
            Self::Kdj(out) => Ok(out),
            _ => Err(TaskError::UnexpectedOutput {
                kind: TaskKind::ComputeKdj.as_str(),
            }),
        }
    }

    pub fn into_rsi(self) -> Result<RsiOutput, TaskError> {
        match self {
            Self::Rsi(out) => Ok(out),
            _ => Err(TaskError::UnexpectedOutput {
                kind: TaskKind::ComputeRsi.as_str(),
            }),
        }
    }

    pub fn into_moving_averages(self) -> Result<BTreeMap<usize, Vec<MaValue>>, TaskError> {
        match self {
            Self::MovingAverages(out) => Ok(out),
            _ => Err(TaskError::UnexpectedOutput {
                kind: TaskKind::ComputeMovingAverages.as_str(),
            }),
        }
    }

    pub fn into_bollinger(self) -> Result<Vec<BollingerBand>, TaskError> {
        match self {
            Self::Bollinger(out) => Ok(out),
            _ => Err(TaskError::UnexpectedOutput {
                kind: TaskKind::ComputeBollinger.as_str(),
            }),
        }
    }

    pub fn into_trade(self) -> Result<Option<TradeSummary>, TaskError> {
        match self {
            Self::Trade(out) => Ok(out),
            _ => Err(TaskError::UnexpectedOutput {
                kind: TaskKind::SummarizeTrade.as_str(),
            }),
        }
    }
}

/// Signature of the function a worker thread runs for every task.
pub type TaskHandler = Arc<dyn Fn(Task) -> TaskOutput + Send + Sync>;

/// The production handler.
pub fn default_handler() -> TaskHandler {
    Arc::new(execute)
}

/// Run `task` to completion on the calling thread.
pub fn execute(task: Task) -> TaskOutput {
    match task {
        Task::AggregateWeekly {
            existing,
            all_daily,
            new_daily,
        } => TaskOutput::Weekly(aggregator::aggregate_incremental(&existing, &all_daily, &new_daily)),
        Task::ComputeKdj { weekly, period, prior } => {
            TaskOutput::Kdj(indicators::compute_kdj(&weekly, period, prior))
        }
        Task::ComputeRsi { weekly, period, prior } => {
            TaskOutput::Rsi(indicators::compute_rsi(&weekly, period, prior))
        }
        Task::ComputeMovingAverages { weekly, periods, after } => {
            TaskOutput::MovingAverages(indicators::moving_averages_after(&weekly, &periods, after))
        }
        Task::ComputeBollinger {
            weekly,
            period,
            multiplier,
            after,
        } => TaskOutput::Bollinger(indicators::bollinger_after(&weekly, period, multiplier, after)),
        Task::SummarizeTrade { daily } => TaskOutput::Trade(indicators::summarize_trade(&daily)),
        Task::Ping => TaskOutput::Pong(format!("pong {}", Utc::now().to_rfc3339())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(Task::Ping.kind().to_string(), "ping");
        let t = Task::ComputeKdj {
            weekly: Arc::from(Vec::<WeeklyCandle>::new()),
            period: 9,
            prior: None,
        };
        assert_eq!(t.kind(), TaskKind::ComputeKdj);
    }

    #[test]
    fn execute_dispatches_to_aggregator() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let bars: Arc<[DailyBar]> = Arc::from(vec![DailyBar::new(day, 1.0, 2.0, 0.5, 1.5, 10.0)]);
        let out = execute(Task::AggregateWeekly {
            existing: Arc::from(Vec::<WeeklyCandle>::new()),
            all_daily: bars.clone(),
            new_daily: bars,
        });
        let merge = out.into_weekly().unwrap().unwrap();
        assert_eq!(merge.candles.len(), 1);
        assert_eq!(merge.rebuilt_from, 0);
    }

    #[test]
    fn execute_summarizes_trade_and_bands() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let daily: Arc<[DailyBar]> = Arc::from(vec![
            DailyBar::new(day, 1.0, 2.0, 0.5, 10.0, 10.0),
            DailyBar::new(day + chrono::Duration::days(1), 1.0, 2.0, 0.5, 12.0, 10.0),
        ]);
        let trade = execute(Task::SummarizeTrade { daily: daily.clone() })
            .into_trade()
            .unwrap()
            .unwrap();
        assert!((trade.profit_rate - 20.0).abs() < 1e-9);

        let weekly = aggregator::aggregate(&daily).unwrap();
        let bands = execute(Task::ComputeBollinger {
            weekly: Arc::from(weekly),
            period: 1,
            multiplier: 2.0,
            after: None,
        })
        .into_bollinger()
        .unwrap();
        assert_eq!(bands.len(), 1);
        assert_eq!(bands[0].middle, 12.0);
    }

    #[test]
    fn mismatched_output_is_reported() {
        let out = execute(Task::Ping);
        assert!(matches!(
            out.into_kdj(),
            Err(TaskError::UnexpectedOutput { kind: "compute_kdj" })
        ));
    }
}
