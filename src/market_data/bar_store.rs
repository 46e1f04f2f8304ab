use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::aggregator::validate_bars;
use crate::error::AggregationError;
use crate::types::DailyBar;

// ---------------------------------------------------------------------------
// PendingAppend -- validated bars not yet visible to readers
// ---------------------------------------------------------------------------

/// New bars for one security, validated against the stored series but not
/// yet committed. Readers keep seeing the old series until
/// [`BarSeriesStore::commit`] succeeds.
#[derive(Debug, Clone)]
pub struct PendingAppend {
    pub security: String,
    /// Length of the stored series the append was prepared against.
    pub base_len: usize,
    /// Full series after the append (stored bars followed by `new_bars`).
    pub all_bars: Arc<[DailyBar]>,
    /// Bars strictly after the stored series' last date.
    pub new_bars: Arc<[DailyBar]>,
    /// Fetched bars dropped because their dates were already stored.
    pub overlap: usize,
}

impl PendingAppend {
    pub fn is_empty(&self) -> bool {
        self.new_bars.is_empty()
    }
}

// ---------------------------------------------------------------------------
// BarSeriesStore -- append-only daily series per security
// ---------------------------------------------------------------------------

/// Thread-safe, append-only store of daily bars keyed by security id.
///
/// Each series is held as an immutable `Arc<[DailyBar]>` snapshot, so a reader
/// (or a worker task) never observes a half-applied append.
#[derive(Default)]
pub struct BarSeriesStore {
    series: RwLock<HashMap<String, Arc<[DailyBar]>>>,
}

impl BarSeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current series for `security` (empty if unknown).
    pub fn snapshot(&self, security: &str) -> Arc<[DailyBar]> {
        self.series
            .read()
            .get(security)
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::<DailyBar>::new()))
    }

    pub fn last_date(&self, security: &str) -> Option<NaiveDate> {
        self.series
            .read()
            .get(security)
            .and_then(|bars| bars.last().map(|b| b.date))
    }

    pub fn len(&self, security: &str) -> usize {
        self.series.read().get(security).map_or(0, |bars| bars.len())
    }

    pub fn contains(&self, security: &str) -> bool {
        self.series.read().contains_key(security)
    }

    pub fn securities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.series.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Validate `fetched` against the stored series and stage it for commit.
    ///
    /// Bars dated on or before the stored series' last date are dropped as
    /// overlap. The remaining bars must be well-formed and strictly
    /// increasing; the error index refers to the remaining bars.
    pub fn prepare_append(&self, security: &str, fetched: Vec<DailyBar>) -> Result<PendingAppend, AggregationError> {
        let existing = self.snapshot(security);
        let last = existing.last().map(|b| b.date);

        let total = fetched.len();
        let new_bars: Vec<DailyBar> = match last {
            Some(last) => fetched.into_iter().filter(|b| b.date > last).collect(),
            None => fetched,
        };
        let overlap = total - new_bars.len();

        validate_bars(&new_bars)?;

        let all_bars: Arc<[DailyBar]> = if new_bars.is_empty() {
            Arc::clone(&existing)
        } else {
            let mut all = Vec::with_capacity(existing.len() + new_bars.len());
            all.extend_from_slice(&existing);
            all.extend_from_slice(&new_bars);
            Arc::from(all)
        };

        debug!(
            security,
            stored = existing.len(),
            new = new_bars.len(),
            overlap,
            "daily bars staged"
        );

        Ok(PendingAppend {
            security: security.to_string(),
            base_len: existing.len(),
            all_bars,
            new_bars: Arc::from(new_bars),
            overlap,
        })
    }

    /// Publish a staged append. Returns `false` (and changes nothing) if the
    /// series moved since the append was prepared.
    pub fn commit(&self, pending: &PendingAppend) -> bool {
        let mut map = self.series.write();
        let current = map.get(&pending.security).map_or(0, |bars| bars.len());
        if current != pending.base_len {
            warn!(
                security = %pending.security,
                expected = pending.base_len,
                current,
                "bar series changed underneath a pending append"
            );
            return false;
        }
        map.insert(pending.security.clone(), Arc::clone(&pending.all_bars));
        true
    }

    /// Seed the series for `security` with bars loaded from the cache.
    /// Returns `false` and leaves the store untouched when a series is
    /// already held; a loaded copy is never newer than a committed one.
    pub fn hydrate(&self, security: &str, bars: Vec<DailyBar>) -> Result<bool, AggregationError> {
        validate_bars(&bars)?;
        let mut map = self.series.write();
        if map.contains_key(security) {
            debug!(security, "bar series already held, cached copy ignored");
            return Ok(false);
        }
        map.insert(security.to_string(), Arc::from(bars));
        Ok(true)
    }

    pub fn remove(&self, security: &str) -> bool {
        self.series.write().remove(security).is_some()
    }

    pub fn clear(&self) {
        self.series.write().clear();
    }
}
