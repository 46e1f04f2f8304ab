//! The user's watchlist: an ordered set of securities persisted in the
//! `watchlist` collection. Removing a security also drops everything the
//! orchestrator has cached for it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PipelineError;
use crate::pipeline::Orchestrator;
use crate::storage::{self, KvStore, WATCHLIST};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Display position, ascending.
    pub order: u32,
    pub added_at: DateTime<Utc>,
}

pub struct Watchlist {
    store: Arc<dyn KvStore>,
    orchestrator: Arc<Orchestrator>,
}

/// Canonical form of a user-entered security id.
pub fn normalize_id(raw: &str) -> String {
    raw.trim().to_uppercase()
}

impl Watchlist {
    pub fn new(store: Arc<dyn KvStore>, orchestrator: Arc<Orchestrator>) -> Self {
        Self { store, orchestrator }
    }

    /// Entries sorted by `order`.
    pub async fn list(&self) -> Result<Vec<WatchlistEntry>, PipelineError> {
        let mut entries: Vec<WatchlistEntry> = storage::load_all(&*self.store, WATCHLIST).await?;
        entries.sort_by_key(|e| e.order);
        Ok(entries)
    }

    pub async fn ids(&self) -> Result<Vec<String>, PipelineError> {
        Ok(self.list().await?.into_iter().map(|e| e.id).collect())
    }

    pub async fn contains(&self, id: &str) -> Result<bool, PipelineError> {
        let found: Option<WatchlistEntry> = storage::load(&*self.store, WATCHLIST, &normalize_id(id)).await?;
        Ok(found.is_some())
    }

    /// Append `id` at the end of the list. Adding an id twice is an error.
    pub async fn add(&self, id: &str, name: &str) -> Result<WatchlistEntry, PipelineError> {
        let id = normalize_id(id);
        let entries = self.list().await?;
        if entries.iter().any(|e| e.id == id) {
            return Err(PipelineError::Duplicate(id));
        }

        let entry = WatchlistEntry {
            order: entries.last().map_or(0, |e| e.order + 1),
            id,
            name: name.trim().to_string(),
            added_at: Utc::now(),
        };
        storage::save(&*self.store, WATCHLIST, &entry).await?;
        info!(security = %entry.id, order = entry.order, "added to watchlist");
        Ok(entry)
    }

    /// Remove `id` and its cached record and bar series.
    pub async fn remove(&self, id: &str) -> Result<(), PipelineError> {
        let id = normalize_id(id);
        if !self.contains(&id).await? {
            return Err(PipelineError::UnknownSecurity(id));
        }
        self.store.delete(WATCHLIST, &id).await?;
        self.orchestrator.remove_security(&id).await?;
        info!(security = %id, "removed from watchlist");
        Ok(())
    }

    /// Empty the watchlist and the record cache.
    pub async fn clear(&self) -> Result<(), PipelineError> {
        self.store.clear(WATCHLIST).await?;
        self.orchestrator.clear_cache().await?;
        info!("watchlist cleared");
        Ok(())
    }

    /// Add every id in `ids` that is not already listed. Returns how many were added.
    pub async fn seed(&self, ids: &[String]) -> Result<usize, PipelineError> {
        let mut added = 0;
        for id in ids {
            match self.add(id, "").await {
                Ok(_) => added += 1,
                Err(PipelineError::Duplicate(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(added)
    }
}
