// =============================================================================
// Pool Registry — named worker pools owned by the composition root
// =============================================================================
//
// Replaces a process-wide pool singleton: whoever needs a pool asks the
// registry by name and receives the same `Arc<WorkerPool>` every time.
// Registry-level listeners observe status changes of every pool, including
// pools created after the listener was registered. After `shutdown_all` the
// registry only hands out destroyed pools, so late submits fail with
// PoolShutdown instead of quietly starting new threads.
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::info;

use super::pool::{PoolStatus, StatusSubscription, WorkerPool};
use super::task::{default_handler, TaskHandler};
use crate::runtime_config::PoolConfig;

/// Callback receiving `(pool_name, status)`.
pub type RegistryListener = Arc<dyn Fn(&str, &PoolStatus) + Send + Sync>;

type ListenerList = Mutex<Vec<(u64, RegistryListener)>>;

pub struct PoolRegistry {
    handler: TaskHandler,
    pools: RwLock<HashMap<String, Arc<WorkerPool>>>,
    listeners: Arc<ListenerList>,
    forwarders: Mutex<Vec<StatusSubscription>>,
    next_listener_id: AtomicU64,
    shut_down: AtomicBool,
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::with_handler(default_handler())
    }

    /// Registry whose pools run `handler` instead of the production one.
    pub fn with_handler(handler: TaskHandler) -> Self {
        Self {
            handler,
            pools: RwLock::new(HashMap::new()),
            listeners: Arc::new(Mutex::new(Vec::new())),
            forwarders: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Return the pool called `name`, creating it with `config` if absent.
    /// `config` is ignored when the pool already exists. Once the registry
    /// is shut down the returned pool is already destroyed.
    pub fn get_or_create(&self, name: &str, config: &PoolConfig) -> Arc<WorkerPool> {
        if let Some(pool) = self.pools.read().get(name) {
            return Arc::clone(pool);
        }

        let pool = {
            let mut pools = self.pools.write();
            if let Some(pool) = pools.get(name) {
                return Arc::clone(pool);
            }
            if self.is_shut_down() {
                let pool = WorkerPool::new(name, config.clone(), Arc::clone(&self.handler));
                pool.destroy();
                return pool;
            }
            let pool = WorkerPool::new(name, config.clone(), Arc::clone(&self.handler));
            pools.insert(name.to_string(), Arc::clone(&pool));
            pool
        };
        info!(pool = name, workers = config.effective_workers(), "worker pool registered");

        let listeners = Arc::downgrade(&self.listeners);
        let pool_name = name.to_string();
        let forwarder = pool.on_status_change(move |status| forward(&listeners, &pool_name, status));
        self.forwarders.lock().push(forwarder);

        pool
    }

    pub fn get(&self, name: &str) -> Option<Arc<WorkerPool>> {
        self.pools.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn all_status(&self) -> BTreeMap<String, PoolStatus> {
        self.pools
            .read()
            .iter()
            .map(|(name, pool)| (name.clone(), pool.status()))
            .collect()
    }

    /// Observe status changes of every pool in the registry.
    pub fn on_any_status_change<F>(&self, listener: F) -> RegistrySubscription
    where
        F: Fn(&str, &PoolStatus) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        RegistrySubscription {
            listeners: Arc::downgrade(&self.listeners),
            id,
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Destroy every pool and forget it. Idempotent.
    pub fn shutdown_all(&self) {
        let pools: Vec<Arc<WorkerPool>> = {
            let mut pools = self.pools.write();
            self.shut_down.store(true, Ordering::SeqCst);
            pools.drain().map(|(_, pool)| pool).collect()
        };
        for pool in &pools {
            pool.destroy();
        }
        self.forwarders.lock().clear();
        info!(count = pools.len(), "all worker pools shut down");
    }
}

fn forward(listeners: &Weak<ListenerList>, pool: &str, status: &PoolStatus) {
    let Some(listeners) = listeners.upgrade() else {
        return;
    };
    let snapshot: Vec<RegistryListener> = listeners.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
    for listener in snapshot {
        listener(pool, status);
    }
}

/// Handle returned by [`PoolRegistry::on_any_status_change`].
pub struct RegistrySubscription {
    listeners: Weak<ListenerList>,
    id: u64,
}

impl RegistrySubscription {
    pub fn unsubscribe(self) {}
}

impl Drop for RegistrySubscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}
