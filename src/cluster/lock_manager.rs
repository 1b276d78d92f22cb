use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::cluster::distributed_lock::{DistributedLock, LockOptions};
use crate::common::error::{ClusterError, Result};
use crate::common::keys::Keyspace;
use crate::storage::coord_store_impl::CoordStoreImpl;

struct TrackedLock {
    lock: Arc<DistributedLock>,
    stop: CancellationToken,
    renewal: JoinHandle<()>,
}

type LockTable = Arc<RwLock<HashMap<String, TrackedLock>>>;

/// Owns locks acquired through it and keeps their leases alive.
///
/// A lock whose renewal fails is dropped from the table and must be treated
/// as lost; nothing notifies the holder beyond that.
pub struct LockManager {
    store: Arc<CoordStoreImpl>,
    keys: Keyspace,
    default_options: LockOptions,
    locks: LockTable,
    cancel: CancellationToken,
}

impl LockManager {
    pub fn new(
        store: Arc<CoordStoreImpl>,
        keys: Keyspace,
        default_options: LockOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            keys,
            default_options,
            locks: Arc::new(RwLock::new(HashMap::new())),
            cancel,
        }
    }

    pub async fn acquire_lock(
        &self,
        key: &str,
        opts: Option<&LockOptions>,
        cancel: &CancellationToken,
    ) -> Result<Arc<DistributedLock>> {
        let opts = opts.unwrap_or(&self.default_options);
        let lock = Arc::new(DistributedLock::new(Arc::clone(&self.store), &self.keys, key, opts));
        lock.acquire_with_retry(opts, cancel).await?;

        let stop = self.cancel.child_token();
        // hold the table while spawning so the renewal task never observes
        // the lock as untracked
        let mut table = self.locks.write().await;
        let renewal = tokio::spawn(renew_loop(
            Arc::clone(&self.locks),
            key.to_string(),
            Arc::clone(&lock),
            stop.clone(),
        ));
        let previous = table.insert(
            key.to_string(),
            TrackedLock {
                lock: Arc::clone(&lock),
                stop,
                renewal,
            },
        );
        drop(table);
        if let Some(previous) = previous {
            // only reachable if the earlier lease was already gone from the store
            previous.stop.cancel();
        }
        log::info!("Lock {} acquired by manager", key);
        Ok(lock)
    }

    pub async fn release_lock(&self, key: &str) -> Result<()> {
        let tracked = self.locks.write().await.remove(key);
        let Some(tracked) = tracked else {
            return Err(ClusterError::LockNotHeld);
        };
        tracked.stop.cancel();
        if let Err(e) = tracked.renewal.await {
            log::error!("Renewal task for lock {} failed: {}", key, e);
        }
        tracked.lock.release().await
    }

    /// Releases every tracked lock; individual failures are logged.
    pub async fn release_all(&self) {
        let drained: Vec<(String, TrackedLock)> = self.locks.write().await.drain().collect();
        for (_, tracked) in &drained {
            tracked.stop.cancel();
        }
        for (key, tracked) in drained {
            if let Err(e) = tracked.renewal.await {
                log::error!("Renewal task for lock {} failed: {}", key, e);
            }
            if let Err(e) = tracked.lock.release().await {
                log::error!("Failed to release lock {}: {}", key, e);
            }
        }
    }

    pub async fn held_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.locks.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn is_held_locally(&self, key: &str) -> bool {
        self.locks.read().await.contains_key(key)
    }
}

fn is_tracked(table: &HashMap<String, TrackedLock>, key: &str, lock: &Arc<DistributedLock>) -> bool {
    table
        .get(key)
        .is_some_and(|tracked| Arc::ptr_eq(&tracked.lock, lock))
}

async fn renew_loop(locks: LockTable, key: String, lock: Arc<DistributedLock>, stop: CancellationToken) {
    let mut ticker = interval((lock.ttl() / 2).max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !is_tracked(&*locks.read().await, &key, &lock) {
            break;
        }
        if let Err(e) = lock.extend(lock.ttl()).await {
            log::error!("Failed to extend lock {}: {}", key, e);
            let mut table = locks.write().await;
            if is_tracked(&table, &key, &lock) {
                table.remove(&key);
            }
            break;
        }
    }
    log::debug!("Renewal stopped for lock {}", key);
}
