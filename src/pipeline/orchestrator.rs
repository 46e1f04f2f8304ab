// =============================================================================
// Pipeline Orchestrator — fetch → aggregate → indicators → commit
// =============================================================================
//
// One refresh of one security:
//
//   1. Load the prior record (memory, then the persistent store).
//   2. Fetch daily bars after the last stored date.
//   3. Stage the new bars in the Bar Series Store (not yet visible).
//   4. Submit incremental weekly aggregation to the "aggregation" pool.
//   5. Submit KDJ, RSI and MA to the "indicators" pool concurrently, each
//      continuing from the state carried over before the rebuilt weeks.
//   6. Commit: publish the bars and the merged record, then persist it.
//
// Progress callbacks fire after steps 2, 4, 5 and 6.
//
// Any error in steps 2–5 returns before step 6, so the previous record stays
// untouched. A storage failure during step 6 is logged and the freshly
// computed record is still returned; it simply is not cached on disk.
//
// Refreshes of the same security are serialised by a per-security lock.
// Different securities run fully in parallel, bounded only by pool slots.
//
// Lock order is `records` then the bar store. Commit, hydration and removal
// all hold the `records` write guard across both maps, so a reader never
// sees a record without its bars, and a slow cache load can never overwrite
// a newer commit.
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::record::{IndicatorCarry, SecurityRecord};
use crate::aggregator::WeeklyMerge;
use crate::error::{PipelineError, StorageError};
use crate::executor::{PoolRegistry, Task, WorkerPool};
use crate::market_data::{BarSeriesStore, PendingAppend, PriceSource};
use crate::runtime_config::{IndicatorParams, PoolConfig, WatchlistConfig};
use crate::storage::{self, KvStore, RECORDS};
use crate::types::{DailyBar, WeeklyCandle};

/// Pool running weekly aggregation.
pub const AGGREGATION_POOL: &str = "aggregation";
/// Pool running indicator computations.
pub const INDICATOR_POOL: &str = "indicators";

/// Settings the orchestrator needs from the full config.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub pool: PoolConfig,
    pub indicators: IndicatorParams,
    pub cache_ttl: chrono::Duration,
}

impl From<&WatchlistConfig> for PipelineSettings {
    fn from(config: &WatchlistConfig) -> Self {
        Self {
            pool: config.pool.clone(),
            indicators: config.indicators.clone(),
            cache_ttl: config.cache_ttl(),
        }
    }
}

/// Pipeline stage reached by a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStage {
    Fetched,
    Aggregated,
    IndicatorsComputed,
    Committed,
}

impl RefreshStage {
    pub const COUNT: usize = 4;

    pub fn step(self) -> usize {
        match self {
            Self::Fetched => 1,
            Self::Aggregated => 2,
            Self::IndicatorsComputed => 3,
            Self::Committed => 4,
        }
    }
}

/// Reported to a progress callback after each completed stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshProgress {
    pub security: String,
    pub stage: RefreshStage,
    pub step: usize,
    pub total_steps: usize,
}

impl RefreshProgress {
    fn new(security: &str, stage: RefreshStage) -> Self {
        Self {
            security: security.to_string(),
            stage,
            step: stage.step(),
            total_steps: RefreshStage::COUNT,
        }
    }

    pub fn percent(&self) -> f64 {
        self.step as f64 / self.total_steps as f64 * 100.0
    }
}

/// Callback receiving refresh progress.
pub type ProgressFn<'a> = &'a (dyn Fn(&RefreshProgress) + Send + Sync);

fn no_progress(_: &RefreshProgress) {}

/// A record served by [`Orchestrator::get_or_refresh`].
#[derive(Debug, Clone)]
pub struct CachedRecord {
    pub record: Arc<SecurityRecord>,
    /// Refresh failed and this is the last cached copy.
    pub stale: bool,
}

pub struct Orchestrator {
    registry: Arc<PoolRegistry>,
    store: Arc<dyn KvStore>,
    source: Arc<dyn PriceSource>,
    settings: PipelineSettings,
    bars: BarSeriesStore,
    records: RwLock<HashMap<String, Arc<SecurityRecord>>>,
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<PoolRegistry>,
        store: Arc<dyn KvStore>,
        source: Arc<dyn PriceSource>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            registry,
            store,
            source,
            settings,
            bars: BarSeriesStore::new(),
            records: RwLock::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn bar_store(&self) -> &BarSeriesStore {
        &self.bars
    }

    fn pool(&self, name: &str) -> Arc<WorkerPool> {
        self.registry.get_or_create(name, &self.settings.pool)
    }

    fn refresh_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.refresh_locks.lock().entry(id.to_string()).or_default())
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// The cached record for `id`: memory first, then the persistent store.
    /// Store failures are logged and reported as a miss.
    pub async fn get_cached_record(&self, id: &str) -> Option<Arc<SecurityRecord>> {
        if let Some(record) = self.records.read().get(id) {
            return Some(Arc::clone(record));
        }

        let loaded: SecurityRecord = match storage::load(&*self.store, RECORDS, id).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                warn!(security = id, error = %e, backend = self.store.backend_type(), "cached record unavailable");
                return None;
            }
        };

        // A refresh may have committed while the store read was in flight.
        let mut records = self.records.write();
        if let Some(current) = records.get(id) {
            return Some(Arc::clone(current));
        }
        match self.bars.hydrate(id, loaded.daily_bars.clone()) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                warn!(security = id, error = %e, "discarding corrupt cached record");
                return None;
            }
        }

        let record = Arc::new(loaded);
        records.insert(id.to_string(), Arc::clone(&record));
        drop(records);
        debug!(security = id, bars = record.daily_bars.len(), "record hydrated from store");
        Some(record)
    }

    /// Serve the cached record while it is younger than the cache TTL,
    /// otherwise refresh. If the refresh fails but a cached copy exists, the
    /// copy is returned flagged as stale.
    pub async fn get_or_refresh(&self, id: &str) -> Result<CachedRecord, PipelineError> {
        let cached = self.get_cached_record(id).await;
        if let Some(record) = &cached {
            if record.is_fresh(Utc::now(), self.settings.cache_ttl) {
                return Ok(CachedRecord {
                    record: Arc::clone(record),
                    stale: false,
                });
            }
        }

        match self.refresh_security(id).await {
            Ok(record) => Ok(CachedRecord { record, stale: false }),
            Err(e) => match cached {
                Some(record) => {
                    warn!(security = id, error = %e, "refresh failed, serving stale record");
                    Ok(CachedRecord { record, stale: true })
                }
                None => Err(e),
            },
        }
    }

    // -------------------------------------------------------------------------
    // Refresh
    // -------------------------------------------------------------------------

    /// Run the full pipeline for one security and return the merged record.
    pub async fn refresh_security(&self, id: &str) -> Result<Arc<SecurityRecord>, PipelineError> {
        self.refresh_security_with_progress(id, &no_progress).await
    }

    /// [`refresh_security`](Self::refresh_security), reporting each completed
    /// stage to `progress`.
    pub async fn refresh_security_with_progress(
        &self,
        id: &str,
        progress: ProgressFn<'_>,
    ) -> Result<Arc<SecurityRecord>, PipelineError> {
        let lock = self.refresh_lock(id);
        let _guard = lock.lock().await;
        let started = Instant::now();

        let prior = self.get_cached_record(id).await;
        let since = self.bars.last_date(id);

        let fetched = self.source.fetch_daily_bars(id, since).await.map_err(|e| {
            warn!(security = id, error = %e, "fetch failed, cached record left untouched");
            PipelineError::from(e)
        })?;
        let pending = self.bars.prepare_append(id, fetched)?;
        progress(&RefreshProgress::new(id, RefreshStage::Fetched));

        let params = &self.settings.indicators;
        let params_changed = prior.as_ref().is_some_and(|r| r.params != *params);

        if pending.is_empty() {
            let Some(prior) = &prior else {
                // Records start with the first fetched bar.
                debug!(security = id, "source has no daily bars yet, nothing cached");
                return Ok(Arc::new(SecurityRecord::new(id, params.clone())));
            };
            if !params_changed {
                // Nothing new: bump the timestamp so the TTL restarts.
                let mut record = SecurityRecord::clone(prior);
                record.last_updated = Utc::now();
                debug!(security = id, "no new daily bars");
                let record = self.commit(&pending, record).await?;
                progress(&RefreshProgress::new(id, RefreshStage::Committed));
                return Ok(record);
            }
        }

        let existing: Vec<WeeklyCandle> = prior.as_ref().map(|r| r.weekly_candles.clone()).unwrap_or_default();
        let merge = if pending.is_empty() {
            WeeklyMerge {
                rebuilt_from: existing.len(),
                candles: existing,
            }
        } else {
            self.pool(AGGREGATION_POOL)
                .submit(Task::AggregateWeekly {
                    existing: Arc::from(existing),
                    all_daily: Arc::clone(&pending.all_bars),
                    new_daily: Arc::clone(&pending.new_bars),
                })
                .await?
                .into_weekly()??
        };
        progress(&RefreshProgress::new(id, RefreshStage::Aggregated));

        let boundary = merge.candles.get(merge.rebuilt_from).map(|c| c.week_start);
        let carry = match &prior {
            Some(record) => record.carry_before(boundary, params),
            None => IndicatorCarry::default(),
        };
        let ma_after = merge.rebuilt_from.checked_sub(1).and_then(|i| merge.candles.get(i)).map(|c| c.week_start);

        let weekly: Arc<[WeeklyCandle]> = Arc::from(merge.candles.clone());
        let record = self
            .compute_indicators(id, weekly, Arc::clone(&pending.all_bars), carry, ma_after)
            .await?;
        progress(&RefreshProgress::new(id, RefreshStage::IndicatorsComputed));

        let record = SecurityRecord {
            daily_bars: pending.all_bars.to_vec(),
            weekly_candles: merge.candles,
            ..record
        };

        info!(
            security = id,
            new_bars = pending.new_bars.len(),
            overlap = pending.overlap,
            weeks = record.weekly_candles.len(),
            rebuilt_from = merge.rebuilt_from,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "security refreshed"
        );

        let record = self.commit(&pending, record).await?;
        progress(&RefreshProgress::new(id, RefreshStage::Committed));
        Ok(record)
    }

    async fn compute_indicators(
        &self,
        id: &str,
        weekly: Arc<[WeeklyCandle]>,
        daily: Arc<[DailyBar]>,
        carry: IndicatorCarry,
        ma_after: Option<NaiveDate>,
    ) -> Result<SecurityRecord, PipelineError> {
        let params = &self.settings.indicators;
        let pool = self.pool(INDICATOR_POOL);

        // Periods absent from the prior record are computed over the full history.
        let (carried_periods, fresh_periods): (Vec<usize>, Vec<usize>) =
            params.ma_periods.iter().copied().partition(|p| carry.ma.contains_key(p));

        // Bands continue from the carried prefix unless their parameters changed.
        let bollinger_after = if carry.bollinger.is_some() { ma_after } else { None };

        let (kdj, rsi, ma_carried, ma_fresh, bands, trade) = tokio::try_join!(
            async {
                pool.submit(Task::ComputeKdj {
                    weekly: Arc::clone(&weekly),
                    period: params.kdj_period,
                    prior: carry.kdj_state,
                })
                .await?
                .into_kdj()
            },
            async {
                pool.submit(Task::ComputeRsi {
                    weekly: Arc::clone(&weekly),
                    period: params.rsi_period,
                    prior: carry.rsi_state,
                })
                .await?
                .into_rsi()
            },
            async {
                if carried_periods.is_empty() {
                    return Ok(BTreeMap::new());
                }
                pool.submit(Task::ComputeMovingAverages {
                    weekly: Arc::clone(&weekly),
                    periods: carried_periods.clone(),
                    after: ma_after,
                })
                .await?
                .into_moving_averages()
            },
            async {
                if fresh_periods.is_empty() {
                    return Ok(BTreeMap::new());
                }
                pool.submit(Task::ComputeMovingAverages {
                    weekly: Arc::clone(&weekly),
                    periods: fresh_periods.clone(),
                    after: None,
                })
                .await?
                .into_moving_averages()
            },
            async {
                pool.submit(Task::ComputeBollinger {
                    weekly: Arc::clone(&weekly),
                    period: params.bollinger_period,
                    multiplier: params.bollinger_multiplier,
                    after: bollinger_after,
                })
                .await?
                .into_bollinger()
            },
            async {
                pool.submit(Task::SummarizeTrade {
                    daily: Arc::clone(&daily),
                })
                .await?
                .into_trade()
            },
        )?;

        let IndicatorCarry {
            kdj: mut kdj_series,
            rsi: mut rsi_series,
            ma: mut ma_series,
            bollinger: carried_bands,
            ..
        } = carry;

        kdj_series.extend(kdj.series);
        rsi_series.extend(rsi.series);

        let mut ma = BTreeMap::new();
        for (period, values) in ma_carried {
            let mut series = ma_series.remove(&period).unwrap_or_default();
            series.extend(values);
            ma.insert(period, series);
        }
        ma.extend(ma_fresh);

        let mut bollinger = carried_bands.unwrap_or_default();
        bollinger.extend(bands);

        debug!(
            security = id,
            kdj = kdj_series.len(),
            rsi = rsi_series.len(),
            ma_periods = ma.len(),
            bands = bollinger.len(),
            "indicators merged"
        );

        Ok(SecurityRecord {
            id: id.to_string(),
            daily_bars: Vec::new(),
            weekly_candles: Vec::new(),
            kdj: kdj_series,
            rsi: rsi_series,
            ma,
            bollinger,
            trade,
            params: params.clone(),
            last_updated: Utc::now(),
        })
    }

    /// Publish `record` and its bars together, then persist the record.
    async fn commit(
        &self,
        pending: &PendingAppend,
        record: SecurityRecord,
    ) -> Result<Arc<SecurityRecord>, PipelineError> {
        // Serialise before publishing so an encoding error leaves nothing half-committed.
        let value = serde_json::to_value(&record).map_err(StorageError::from)?;

        let record = Arc::new(record);
        {
            let mut records = self.records.write();
            if !self.bars.commit(pending) {
                return Err(PipelineError::Conflict(record.id.clone()));
            }
            records.insert(record.id.clone(), Arc::clone(&record));
        }

        if let Err(e) = self.store.put(RECORDS, value).await {
            warn!(
                security = %record.id,
                error = %e,
                backend = self.store.backend_type(),
                "record not persisted, serving uncached result"
            );
        }
        Ok(record)
    }

    /// Refresh every id concurrently. Results are in input order; one
    /// security's failure never affects another.
    pub async fn refresh_all(&self, ids: &[String]) -> Vec<(String, Result<Arc<SecurityRecord>, PipelineError>)> {
        self.refresh_all_with_progress(ids, &no_progress).await
    }

    pub async fn refresh_all_with_progress(
        &self,
        ids: &[String],
        progress: ProgressFn<'_>,
    ) -> Vec<(String, Result<Arc<SecurityRecord>, PipelineError>)> {
        let started = Instant::now();
        let results =
            futures_util::future::join_all(ids.iter().map(|id| self.refresh_security_with_progress(id, progress)))
                .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        let outcome: Vec<_> = ids.iter().cloned().zip(results).collect();
        for (id, result) in &outcome {
            if let Err(e) = result {
                error!(security = %id, error = %e, retryable = e.is_retryable(), "refresh failed");
            }
        }
        info!(
            total = ids.len(),
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "refresh round complete"
        );
        outcome
    }

    // -------------------------------------------------------------------------
    // Removal
    // -------------------------------------------------------------------------

    /// Forget everything cached for `id`.
    pub async fn remove_security(&self, id: &str) -> Result<(), PipelineError> {
        let lock = self.refresh_lock(id);
        let _guard = lock.lock().await;

        {
            let mut records = self.records.write();
            records.remove(id);
            self.bars.remove(id);
        }
        self.store.delete(RECORDS, id).await?;
        info!(security = id, "cached security removed");
        Ok(())
    }

    /// Drop every cached record and bar series.
    pub async fn clear_cache(&self) -> Result<(), PipelineError> {
        {
            let mut records = self.records.write();
            records.clear();
            self.bars.clear();
        }
        self.store.clear(RECORDS).await?;
        info!("record cache cleared");
        Ok(())
    }
}
