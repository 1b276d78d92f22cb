use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cluster::coordinator::Coordinator;
use crate::cluster::lock_manager::LockManager;
use crate::cluster::session_store::SessionStore;
use crate::common::cluster::NodeRecord;
use crate::common::config::ClusterConfig;
use crate::common::error::{ClusterError, Result};
use crate::storage::coord_store_impl::CoordStoreImpl;

#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub node_id: String,
    pub leader_id: String,
    pub is_leader: bool,
    pub nodes: Vec<NodeRecord>,
}

/// One node's coordination stack: coordinator, lock manager and session
/// store sharing a store, a node id and a cancellation token.
pub struct ClusterNode {
    pub coordinator: Arc<Coordinator>,
    pub locks: Arc<LockManager>,
    pub sessions: Arc<SessionStore>,
    cancel: CancellationToken,
}

impl ClusterNode {
    pub fn new(config: &ClusterConfig, store: Arc<CoordStoreImpl>) -> Self {
        let cancel = CancellationToken::new();
        let keys = config.keyspace();
        let coordinator = Arc::new(Coordinator::new(
            config.coordinator_config(),
            keys.clone(),
            Arc::clone(&store),
            &cancel,
        ));
        let locks = Arc::new(LockManager::new(
            Arc::clone(&store),
            keys.clone(),
            config.lock_options(),
            cancel.child_token(),
        ));
        let sessions = Arc::new(SessionStore::new(
            config.session_store_config(),
            keys,
            store,
            &cancel,
        ));
        Self {
            coordinator,
            locks,
            sessions,
            cancel,
        }
    }

    pub fn node_id(&self) -> &str {
        self.coordinator.get_node_id()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn start(&self) -> Result<()> {
        self.coordinator.start().await?;
        self.sessions.start().await;
        log::info!("Cluster node {} started", self.node_id());
        Ok(())
    }

    /// Releases held locks, stops the session cleanup and leaves the cluster.
    pub async fn shutdown(&self) {
        self.locks.release_all().await;
        self.sessions.stop().await;
        self.coordinator.stop().await;
        self.cancel.cancel();
        log::info!("Cluster node {} stopped", self.node_id());
    }

    /// Migrates a session, refusing targets that are not active members.
    pub async fn migrate_session(&self, session_id: &str, target_node_id: &str) -> Result<()> {
        let target_active = target_node_id == self.node_id()
            || self
                .coordinator
                .get_node(target_node_id)
                .await
                .is_some_and(|node| node.is_active());
        if !target_active {
            return Err(ClusterError::NodeNotActive(target_node_id.to_string()));
        }
        self.sessions.migrate_session(session_id, target_node_id).await
    }

    pub async fn cluster_status(&self) -> ClusterStatus {
        let leader_id = self.coordinator.leader_id().await;
        ClusterStatus {
            node_id: self.node_id().to_string(),
            is_leader: leader_id == self.node_id(),
            leader_id,
            nodes: self.coordinator.get_nodes().await,
        }
    }
}
