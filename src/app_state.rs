// =============================================================================
// Central Application State — Weekly Watch
// =============================================================================
//
// Ties the subsystems together: configuration, the pool registry, the
// persistent store, the pipeline orchestrator and the watchlist. Every
// background loop holds an `Arc<AppState>`.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for the mutable config and the error log.
//   - Arc wrappers for subsystems that manage their own interior mutability.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::executor::{PoolRegistry, PoolStatus};
use crate::market_data::{HttpPriceSource, PriceSource};
use crate::pipeline::{Orchestrator, PipelineSettings, RefreshProgress, SecurityView};
use crate::runtime_config::WatchlistConfig;
use crate::storage::{JsonFileStore, KvStore};
use crate::watchlist::Watchlist;

// =============================================================================
// Error Record
// =============================================================================

/// A failed refresh, kept for the status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub security: String,
    pub message: String,
    pub retryable: bool,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

// =============================================================================
// AppState
// =============================================================================

pub struct AppState {
    /// Incremented on every refresh round and every recorded error.
    pub state_version: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub config: Arc<RwLock<WatchlistConfig>>,

    // ── Subsystems ──────────────────────────────────────────────────────
    pub registry: Arc<PoolRegistry>,
    pub store: Arc<dyn KvStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub watchlist: Watchlist,

    // ── Error Log ───────────────────────────────────────────────────────
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    // ── Timing ──────────────────────────────────────────────────────────
    pub last_refresh: RwLock<Option<DateTime<Utc>>>,
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire the subsystems around an explicit price source and store.
    pub fn new(config: WatchlistConfig, source: Arc<dyn PriceSource>, store: Arc<dyn KvStore>) -> Self {
        let registry = Arc::new(PoolRegistry::new());
        let orchestrator = Arc::new(Orchestrator::new(
            registry.clone(),
            store.clone(),
            source,
            PipelineSettings::from(&config),
        ));
        let watchlist = Watchlist::new(store.clone(), orchestrator.clone());

        Self {
            state_version: AtomicU64::new(0),
            config: Arc::new(RwLock::new(config)),
            registry,
            store,
            orchestrator,
            watchlist,
            recent_errors: RwLock::new(Vec::new()),
            last_refresh: RwLock::new(None),
            start_time: std::time::Instant::now(),
        }
    }

    /// Production wiring: HTTP price source and JSON files under `cache_dir`.
    pub fn from_config(config: WatchlistConfig) -> Result<Self> {
        let source = HttpPriceSource::new(
            config.data_base_url.clone(),
            Duration::from_secs(config.fetch_timeout_secs),
        )
        .context("failed to build price source")?;
        let store = JsonFileStore::new(config.cache_dir.clone());
        info!(
            data_url = %config.data_base_url,
            cache_dir = %config.cache_dir,
            backend = store.backend_type(),
            "application state wired"
        );
        Ok(Self::new(config, Arc::new(source), Arc::new(store)))
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record a refresh failure, evicting the oldest past [`MAX_RECENT_ERRORS`].
    pub fn push_error(&self, security: &str, error: &PipelineError) {
        let record = ErrorRecord {
            security: security.to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        drop(errors);

        self.increment_version();
    }

    // ── Refresh ─────────────────────────────────────────────────────────

    /// Refresh every watchlist security once. Returns how many succeeded.
    pub async fn refresh_watchlist(&self) -> Result<usize, PipelineError> {
        let ids = self.watchlist.ids().await?;
        let results = self
            .orchestrator
            .refresh_all_with_progress(&ids, &|p: &RefreshProgress| {
                debug!(security = %p.security, stage = ?p.stage, percent = p.percent(), "refresh progress");
            })
            .await;

        let mut ok = 0;
        for (id, result) in &results {
            match result {
                Ok(_) => ok += 1,
                Err(e) => self.push_error(id, e),
            }
        }
        *self.last_refresh.write() = Some(Utc::now());
        self.increment_version();
        Ok(ok)
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Serialisable view of the whole engine: pool health plus the trailing
    /// weeks of every watchlist security that has a cached record.
    pub async fn build_snapshot(&self) -> Result<StateSnapshot, PipelineError> {
        let weeks = self.config.read().view_weeks;
        let entries = self.watchlist.list().await?;

        let mut securities = Vec::with_capacity(entries.len());
        let mut missing = Vec::new();
        for entry in entries {
            match self.orchestrator.get_cached_record(&entry.id).await {
                Some(record) => securities.push(record.view(weeks)),
                None => missing.push(entry.id),
            }
        }
        if !missing.is_empty() {
            warn!(missing = ?missing, "watchlist securities without a cached record");
        }

        Ok(StateSnapshot {
            version: self.current_state_version(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            last_refresh: *self.last_refresh.read(),
            pools: self.registry.all_status(),
            securities,
            missing,
            recent_errors: self.recent_errors.read().clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub version: u64,
    pub uptime_secs: u64,
    pub last_refresh: Option<DateTime<Utc>>,
    pub pools: BTreeMap<String, PoolStatus>,
    pub securities: Vec<SecurityView>,
    /// Listed securities that have never been refreshed successfully.
    pub missing: Vec<String>,
    pub recent_errors: Vec<ErrorRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::pipeline::{AGGREGATION_POOL, INDICATOR_POOL};
    use crate::storage::MemoryStore;
    use crate::types::DailyBar;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    /// Ten weekdays of bars for anything except "BAD".
    struct TwoWeeks;

    #[async_trait]
    impl PriceSource for TwoWeeks {
        async fn fetch_daily_bars(&self, security: &str, since: Option<NaiveDate>) -> Result<Vec<DailyBar>, FetchError> {
            if security == "BAD" {
                return Err(FetchError::Status {
                    security: security.to_string(),
                    status: 404,
                });
            }
            let monday = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
            Ok((0..14)
                .map(|d| monday + chrono::Duration::days(d))
                .filter(|d| chrono::Datelike::weekday(d).number_from_monday() <= 5)
                .filter(|d| since.map_or(true, |s| *d > s))
                .map(|d| DailyBar::new(d, 10.0, 11.0, 9.0, 10.5, 100.0))
                .collect())
        }
    }

    fn state() -> AppState {
        AppState::new(WatchlistConfig::default(), Arc::new(TwoWeeks), Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn refresh_round_records_failures() {
        let state = state();
        state.watchlist.seed(&["2330".into(), "BAD".into()]).await.unwrap();

        let ok = state.refresh_watchlist().await.unwrap();
        assert_eq!(ok, 1);

        let errors = state.recent_errors.read().clone();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].security, "BAD");
        assert!(state.last_refresh.read().is_some());
        assert!(state.current_state_version() >= 2);
    }

    #[tokio::test]
    async fn snapshot_lists_views_and_pools() {
        let state = state();
        state.watchlist.seed(&["2330".into(), "BAD".into()]).await.unwrap();
        state.refresh_watchlist().await.unwrap();

        let snapshot = state.build_snapshot().await.unwrap();
        assert_eq!(snapshot.securities.len(), 1);
        assert_eq!(snapshot.securities[0].weekly_candles.len(), 2);
        assert_eq!(snapshot.missing, vec!["BAD".to_string()]);
        assert!(snapshot.pools.contains_key(AGGREGATION_POOL));
        assert!(snapshot.pools.contains_key(INDICATOR_POOL));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["securities"][0]["id"], "2330");
    }

    #[test]
    fn error_log_is_capped() {
        let state = state();
        let err = PipelineError::UnknownSecurity("X".into());
        for _ in 0..(MAX_RECENT_ERRORS + 5) {
            state.push_error("X", &err);
        }
        assert_eq!(state.recent_errors.read().len(), MAX_RECENT_ERRORS);
    }
}
