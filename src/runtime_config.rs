// =============================================================================
// Runtime Configuration — watchlist engine settings with atomic save
// =============================================================================
//
// Every tunable lives here: which securities to watch, where price bars come
// from, where the cache lives, worker-pool sizing, and indicator parameters.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields never
// breaks loading an older config file.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::indicators::{bollinger, kdj, ma, rsi};

/// Hard ceiling on worker threads per pool.
pub const MAX_WORKERS: usize = 8;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_securities() -> Vec<String> {
    vec!["2330".to_string(), "2317".to_string(), "2454".to_string()]
}

fn default_data_base_url() -> String {
    "http://localhost:5173".to_string()
}

fn default_cache_dir() -> String {
    "cache".to_string()
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(MAX_WORKERS)
}

fn default_task_timeout_ms() -> u64 {
    30_000
}

fn default_kdj_period() -> usize {
    kdj::DEFAULT_PERIOD
}

fn default_rsi_period() -> usize {
    rsi::DEFAULT_PERIOD
}

fn default_ma_periods() -> Vec<usize> {
    ma::DEFAULT_PERIODS.to_vec()
}

fn default_bollinger_period() -> usize {
    bollinger::DEFAULT_PERIOD
}

fn default_bollinger_multiplier() -> f64 {
    bollinger::DEFAULT_MULTIPLIER
}

fn default_cache_ttl_minutes() -> u64 {
    30
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_view_weeks() -> usize {
    26
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

// =============================================================================
// PoolConfig
// =============================================================================

/// Sizing and deadlines for one worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker threads (clamped to `1..=MAX_WORKERS`).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-task deadline in milliseconds.
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
}

impl PoolConfig {
    pub fn effective_workers(&self) -> usize {
        self.workers.clamp(1, MAX_WORKERS)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            task_timeout_ms: default_task_timeout_ms(),
        }
    }
}

// =============================================================================
// IndicatorParams
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorParams {
    #[serde(default = "default_kdj_period")]
    pub kdj_period: usize,

    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,

    /// Moving-average windows, in weeks.
    #[serde(default = "default_ma_periods")]
    pub ma_periods: Vec<usize>,

    /// Bollinger window, in weeks.
    #[serde(default = "default_bollinger_period")]
    pub bollinger_period: usize,

    /// Band width in standard deviations.
    #[serde(default = "default_bollinger_multiplier")]
    pub bollinger_multiplier: f64,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            kdj_period: default_kdj_period(),
            rsi_period: default_rsi_period(),
            ma_periods: default_ma_periods(),
            bollinger_period: default_bollinger_period(),
            bollinger_multiplier: default_bollinger_multiplier(),
        }
    }
}

// =============================================================================
// WatchlistConfig
// =============================================================================

/// Top-level configuration for the watchlist engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistConfig {
    /// Securities refreshed by the background loop.
    #[serde(default = "default_securities")]
    pub securities: Vec<String>,

    /// Base URL serving `stocks/{id}/all.json`.
    #[serde(default = "default_data_base_url")]
    pub data_base_url: String,

    /// Root directory of the JSON record cache.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub indicators: IndicatorParams,

    /// Cached records younger than this are served without refetching.
    #[serde(default = "default_cache_ttl_minutes")]
    pub cache_ttl_minutes: u64,

    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Trailing weeks included in a record view.
    #[serde(default = "default_view_weeks")]
    pub view_weeks: usize,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for WatchlistConfig {
    fn default() -> Self {
        Self {
            securities: default_securities(),
            data_base_url: default_data_base_url(),
            cache_dir: default_cache_dir(),
            pool: PoolConfig::default(),
            indicators: IndicatorParams::default(),
            cache_ttl_minutes: default_cache_ttl_minutes(),
            refresh_interval_secs: default_refresh_interval_secs(),
            view_weeks: default_view_weeks(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl WatchlistConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read watchlist config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse watchlist config from {}", path.display()))?;

        info!(
            path = %path.display(),
            securities = ?config.securities,
            workers = config.pool.workers,
            "watchlist config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise watchlist config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "watchlist config saved (atomic)");
        Ok(())
    }

    /// Apply `WATCHLIST_SECURITIES` / `WATCHLIST_DATA_URL` overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(ids) = std::env::var("WATCHLIST_SECURITIES") {
            self.securities = parse_security_list(&ids);
        }
        if let Ok(url) = std::env::var("WATCHLIST_DATA_URL") {
            if !url.trim().is_empty() {
                self.data_base_url = url.trim().trim_end_matches('/').to_string();
            }
        }
    }

    /// Replace nonsensical values with defaults, warning about each one.
    pub fn validate(&mut self) {
        if self.pool.workers == 0 || self.pool.workers > MAX_WORKERS {
            let clamped = self.pool.effective_workers();
            warn!(requested = self.pool.workers, clamped, "worker count out of range");
            self.pool.workers = clamped;
        }
        if self.pool.task_timeout_ms == 0 {
            warn!("task_timeout_ms of 0 replaced with default");
            self.pool.task_timeout_ms = default_task_timeout_ms();
        }
        if self.indicators.kdj_period == 0 {
            warn!("kdj_period of 0 replaced with default");
            self.indicators.kdj_period = default_kdj_period();
        }
        if self.indicators.rsi_period == 0 {
            warn!("rsi_period of 0 replaced with default");
            self.indicators.rsi_period = default_rsi_period();
        }
        if self.indicators.bollinger_period == 0 {
            warn!("bollinger_period of 0 replaced with default");
            self.indicators.bollinger_period = default_bollinger_period();
        }
        if !(self.indicators.bollinger_multiplier.is_finite() && self.indicators.bollinger_multiplier > 0.0) {
            warn!(
                multiplier = self.indicators.bollinger_multiplier,
                "bollinger_multiplier replaced with default"
            );
            self.indicators.bollinger_multiplier = default_bollinger_multiplier();
        }
        let before = self.indicators.ma_periods.len();
        self.indicators.ma_periods.retain(|&p| p > 0);
        self.indicators.ma_periods.sort_unstable();
        self.indicators.ma_periods.dedup();
        if self.indicators.ma_periods.len() != before {
            warn!(periods = ?self.indicators.ma_periods, "ma_periods normalised");
        }
        if self.view_weeks == 0 {
            self.view_weeks = default_view_weeks();
        }
        if self.refresh_interval_secs == 0 {
            warn!("refresh_interval_secs of 0 replaced with default");
            self.refresh_interval_secs = default_refresh_interval_secs();
        }
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cache_ttl_minutes as i64)
    }
}

/// Split a comma-separated list of ids, trimming and dropping blanks.
pub fn parse_security_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}
