//! Session affinity: which node owns each long-lived client session.
//!
//! The full record lives in the store under a TTL; the owning node also keeps
//! a mirror in a local cache so lookups for its own sessions never touch the
//! network. A per-user set in the store indexes session ids for reverse
//! lookup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::common::error::{ClusterError, Result};
use crate::common::keys::Keyspace;
use crate::common::session::SessionRecord;
use crate::storage::coord_store_impl::CoordStoreImpl;
use crate::traits::coord_store::CoordStore;

#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    pub node_id: String,
    pub session_ttl: Duration,
    pub cleanup_interval: Duration,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            session_ttl: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

pub struct SessionStore {
    node_id: String,
    ttl: Duration,
    cleanup_interval: Duration,
    keys: Keyspace,
    store: Arc<CoordStoreImpl>,
    local: RwLock<HashMap<String, SessionRecord>>,
    cancel: CancellationToken,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionStore {
    pub fn new(
        config: SessionStoreConfig,
        keys: Keyspace,
        store: Arc<CoordStoreImpl>,
        cancel: &CancellationToken,
    ) -> Self {
        Self {
            node_id: config.node_id,
            ttl: config.session_ttl,
            cleanup_interval: config.cleanup_interval,
            keys,
            store,
            local: RwLock::new(HashMap::new()),
            cancel: cancel.child_token(),
            cleanup_task: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Starts the local cleanup loop. Calling it twice is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.cleanup_task.lock().await;
        if task.is_none() {
            *task = Some(tokio::spawn(Arc::clone(self).cleanup_loop()));
        }
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.cleanup_task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                log::error!("Session cleanup task ended abnormally: {}", e);
            }
        }
    }

    async fn write_record(&self, record: &SessionRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        let key = self.keys.session_key(&record.session_id);
        self.store
            .set(&key, &payload, Some(self.ttl))
            .await
            .map_err(|e| ClusterError::Store(e.context(format!("failed to store session {}", record.session_id))))
    }

    async fn read_remote(&self, session_id: &str) -> Result<SessionRecord> {
        let key = self.keys.session_key(session_id);
        let raw = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| ClusterError::SessionNotFound(session_id.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Creates a session owned by this node.
    pub async fn register(&self, session_id: &str, user_id: &str) -> Result<SessionRecord> {
        let record = SessionRecord::new(session_id, user_id, &self.node_id);
        self.write_record(&record).await?;
        self.local
            .write()
            .await
            .insert(session_id.to_string(), record.clone());

        self.touch_user_index(&record).await;

        log::debug!(
            "Session registered: {} (user {}, node {})",
            session_id,
            user_id,
            self.node_id
        );
        Ok(record)
    }

    /// Keeps the user's index set alive as long as any of its sessions is.
    async fn touch_user_index(&self, record: &SessionRecord) {
        let user_key = self.keys.user_sessions_key(&record.user_id);
        if let Err(e) = self.store.set_add(&user_key, &record.session_id).await {
            log::warn!("Failed to add session {} to user set: {:?}", record.session_id, e);
        }
        if let Err(e) = self.store.expire(&user_key, self.ttl).await {
            log::warn!("Failed to refresh user set TTL for {}: {:?}", record.user_id, e);
        }
    }

    /// Brings the local mirror in line with the store copy: kept only while
    /// the store names this node as owner.
    async fn sync_local(&self, record: &SessionRecord) {
        let mut local = self.local.write().await;
        if record.owner_node_id == self.node_id {
            local.insert(record.session_id.clone(), record.clone());
        } else if local.remove(&record.session_id).is_some() {
            log::info!(
                "Dropped stale local session {}; now owned by node {}",
                record.session_id,
                record.owner_node_id
            );
        }
    }

    /// Rewrites the store copy after `update`. The store copy is the base, so
    /// a stale local mirror can never revert the owner.
    async fn modify_record<F>(&self, session_id: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut SessionRecord),
    {
        let mut record = self.read_remote(session_id).await?;
        update(&mut record);
        self.write_record(&record).await?;
        self.sync_local(&record).await;
        self.touch_user_index(&record).await;
        Ok(())
    }

    pub async fn unregister(&self, session_id: &str) -> Result<()> {
        if let Ok(record) = self.get_session(session_id).await {
            let user_key = self.keys.user_sessions_key(&record.user_id);
            if let Err(e) = self.store.set_remove(&user_key, session_id).await {
                log::warn!("Failed to remove session {} from user set: {:?}", session_id, e);
            }
        }

        self.local.write().await.remove(session_id);

        let key = self.keys.session_key(session_id);
        self.store
            .delete(&key)
            .await
            .map_err(|e| ClusterError::Store(e.context(format!("failed to remove session {}", session_id))))?;
        log::debug!("Session unregistered: {}", session_id);
        Ok(())
    }

    /// Touches `last_activity` in the store, renewing the record and user
    /// index TTLs.
    pub async fn update_activity(&self, session_id: &str) -> Result<()> {
        let now = Utc::now();
        self.modify_record(session_id, |record| record.last_activity = now)
            .await
    }

    /// Local cache first, then the store.
    pub async fn get_session(&self, session_id: &str) -> Result<SessionRecord> {
        if let Some(record) = self.local.read().await.get(session_id) {
            return Ok(record.clone());
        }
        self.read_remote(session_id).await
    }

    pub async fn get_node_for_session(&self, session_id: &str) -> Result<String> {
        Ok(self.get_session(session_id).await?.owner_node_id)
    }

    /// Sessions of `user_id` that still resolve. Ids whose records have
    /// expired are skipped and pruned from the index.
    pub async fn get_sessions_for_user(&self, user_id: &str) -> Result<Vec<SessionRecord>> {
        let user_key = self.keys.user_sessions_key(user_id);
        let session_ids = self
            .store
            .set_members(&user_key)
            .await
            .map_err(|e| ClusterError::Store(e.context(format!("failed to read sessions of user {}", user_id))))?;

        let mut sessions = Vec::with_capacity(session_ids.len());
        for session_id in session_ids {
            match self.get_session(&session_id).await {
                Ok(record) => sessions.push(record),
                Err(ClusterError::SessionNotFound(_)) => {
                    log::debug!("Session {} of user {} has expired", session_id, user_id);
                    if let Err(e) = self.store.set_remove(&user_key, &session_id).await {
                        log::debug!("Failed to prune expired session {}: {:?}", session_id, e);
                    }
                }
                Err(e) => log::warn!("Skipping session {} of user {}: {}", session_id, user_id, e),
            }
        }
        Ok(sessions)
    }

    pub async fn get_local_sessions(&self) -> Vec<SessionRecord> {
        let mut sessions: Vec<SessionRecord> = self.local.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        sessions
    }

    pub async fn is_local(&self, session_id: &str) -> bool {
        self.local.read().await.contains_key(session_id)
    }

    pub async fn set_metadata(&self, session_id: &str, key: &str, value: &str) -> Result<()> {
        self.modify_record(session_id, |record| {
            record.metadata.insert(key.to_string(), value.to_string());
        })
        .await
    }

    /// Reassigns a session this node owns to `target_node_id` and drops the
    /// local mirror. Only the owner may migrate, so the origin's mirror goes
    /// away in the same call. Bookkeeping only: moving the client connection
    /// is up to the transport.
    pub async fn migrate_session(&self, session_id: &str, target_node_id: &str) -> Result<()> {
        let mut record = self.read_remote(session_id).await?;
        if record.owner_node_id == target_node_id {
            self.sync_local(&record).await;
            return Ok(());
        }
        if record.owner_node_id != self.node_id {
            let owner = record.owner_node_id.clone();
            self.sync_local(&record).await;
            return Err(ClusterError::SessionOwnedElsewhere {
                session_id: session_id.to_string(),
                owner,
            });
        }
        let from_node = std::mem::replace(&mut record.owner_node_id, target_node_id.to_string());
        self.write_record(&record).await?;
        self.sync_local(&record).await;

        log::info!(
            "Session {} migrated from node {} to node {}",
            session_id,
            from_node,
            target_node_id
        );
        Ok(())
    }

    /// Mirrors a session this node now owns, e.g. after a client reconnects
    /// here following a migration.
    pub async fn attach_session(&self, session_id: &str) -> Result<SessionRecord> {
        let record = self.read_remote(session_id).await?;
        if record.owner_node_id != self.node_id {
            return Err(ClusterError::SessionOwnedElsewhere {
                session_id: session_id.to_string(),
                owner: record.owner_node_id,
            });
        }
        self.local
            .write()
            .await
            .insert(session_id.to_string(), record.clone());
        log::debug!("Session {} attached to node {}", session_id, self.node_id);
        Ok(record)
    }

    /// Drops locally cached sessions idle for longer than the session TTL.
    /// Store copies expire on their own.
    pub async fn evict_idle_sessions(&self) -> usize {
        let cutoff = match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => Utc::now() - ttl,
            Err(_) => return 0,
        };
        let mut local = self.local.write().await;
        let before = local.len();
        local.retain(|session_id, record| {
            let keep = record.last_activity >= cutoff;
            if !keep {
                log::debug!("Cleaned up inactive local session {}", session_id);
            }
            keep
        });
        before - local.len()
    }

    async fn cleanup_loop(self: Arc<Self>) {
        let mut ticker = interval(self.cleanup_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let evicted = self.evict_idle_sessions().await;
            if evicted > 0 {
                log::info!("Evicted {} idle local sessions", evicted);
            }
        }
        log::debug!("Session cleanup loop stopped");
    }
}
