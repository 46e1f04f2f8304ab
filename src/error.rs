//! Error taxonomy for the watchlist engine.
//!
//! Each error knows whether the caller may retry the operation that produced
//! it. Stage-local failures abort one security's pipeline run only.

use thiserror::Error;

/// Malformed daily-bar input. Carries the index of the offending bar.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    #[error("daily bar {index} is not strictly after the previous bar ({date})")]
    NonMonotonic { index: usize, date: chrono::NaiveDate },

    #[error("daily bar {index} is malformed: {reason}")]
    Malformed { index: usize, reason: String },
}

impl AggregationError {
    /// Index of the offending bar within the input slice.
    pub fn index(&self) -> usize {
        match self {
            Self::NonMonotonic { index, .. } | Self::Malformed { index, .. } => *index,
        }
    }
}

/// Failure fetching daily bars from the price-bar source.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request for {security} failed: {source}")]
    Http {
        security: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("price source returned {status} for {security}")]
    Status { security: String, status: u16 },

    #[error("price source payload for {security} is malformed: {reason}")]
    Malformed { security: String, reason: String },
}

/// Failure of the persistent key-value store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record in collection '{0}' has no string \"id\" field")]
    MissingKey(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Failure of a task submitted to a worker pool.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error("task {task_id} ({kind}) timed out after {timeout_ms}ms")]
    Timeout {
        task_id: u64,
        kind: &'static str,
        timeout_ms: u64,
    },

    #[error("worker {worker} crashed while running task {task_id} ({kind})")]
    WorkerFault {
        task_id: u64,
        kind: &'static str,
        worker: usize,
    },

    #[error("worker pool '{0}' has shut down")]
    PoolShutdown(String),

    #[error("worker pool '{pool}' failed to initialise: {reason}")]
    InitFailed { pool: String, reason: String },

    /// The worker returned an output variant that does not match the task.
    #[error("task {kind} returned an unexpected result")]
    UnexpectedOutput { kind: &'static str },
}

/// Umbrella error for one security's pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("security {0} is not on the watchlist")]
    UnknownSecurity(String),

    #[error("security {0} is already on the watchlist")]
    Duplicate(String),

    #[error("bar series for {0} changed during refresh")]
    Conflict(String),
}

impl TaskError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::WorkerFault { .. })
    }
}

impl PipelineError {
    /// Whether re-running the same refresh may succeed without upstream fixes.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(_) => true,
            Self::Aggregation(_) => false,
            Self::Task(e) => e.is_retryable(),
            Self::Storage(StorageError::Unavailable(_)) => true,
            Self::Storage(StorageError::Serialization(_) | StorageError::MissingKey(_)) => false,
            Self::Conflict(_) => true,
            Self::UnknownSecurity(_) | Self::Duplicate(_) => false,
        }
    }
}
