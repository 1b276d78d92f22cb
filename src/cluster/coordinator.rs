//! Cluster membership, leader computation and the cluster event bus.
//!
//! Each node keeps its own record alive in the store with a TTL-bounded
//! heartbeat write and periodically rebuilds its view of the cluster from a
//! prefix scan of everyone's records. That scan is the source of truth; the
//! pub/sub events are best-effort hints layered on top.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::common::cluster::{NodeRecord, NodeStatus};
use crate::common::error::{ClusterError, Result};
use crate::common::event::{ClusterEvent, EventHandler, EventKind, EventType};
use crate::common::keys::Keyspace;
use crate::common::utils::stable_hash;
use crate::storage::coord_store_impl::CoordStoreImpl;
use crate::traits::coord_store::{CoordStore, MessageStream};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub node_id: String,
    pub hostname: String,
    pub ip: String,
    pub port: u16,
    pub metadata: HashMap<String, String>,
    pub heartbeat_interval: Duration,
    /// Also the delay before resubscribing to a dead event channel.
    pub discovery_interval: Duration,
    pub node_timeout: Duration,
    /// TTL on this node's record; several heartbeat intervals.
    pub node_ttl: Duration,
    /// Bound on the leave publish and record delete during `stop`, and on
    /// any single event publish.
    pub shutdown_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            hostname: String::new(),
            ip: String::new(),
            port: 8080,
            metadata: HashMap::new(),
            heartbeat_interval: Duration::from_secs(5),
            discovery_interval: Duration::from_secs(10),
            node_timeout: Duration::from_secs(30),
            node_ttl: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

pub struct Coordinator {
    node_id: String,
    config: CoordinatorConfig,
    keys: Keyspace,
    store: Arc<CoordStoreImpl>,
    local_node: RwLock<NodeRecord>,
    nodes: RwLock<HashMap<String, NodeRecord>>,
    handlers: RwLock<HashMap<EventType, Vec<EventHandler>>>,
    cancel: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
}

impl Coordinator {
    /// `cancel` stops every background loop of this coordinator; `stop`
    /// cancels a child of it, so the parent is left untouched.
    pub fn new(
        config: CoordinatorConfig,
        keys: Keyspace,
        store: Arc<CoordStoreImpl>,
        cancel: &CancellationToken,
    ) -> Self {
        let local_node = NodeRecord {
            id: config.node_id.clone(),
            hostname: config.hostname.clone(),
            ip: config.ip.clone(),
            port: config.port,
            last_heartbeat: Utc::now(),
            status: NodeStatus::Active,
            metadata: config.metadata.clone(),
        };
        Self {
            node_id: config.node_id.clone(),
            config,
            keys,
            store,
            local_node: RwLock::new(local_node),
            nodes: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
            cancel: cancel.child_token(),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn get_node_id(&self) -> &str {
        &self.node_id
    }

    /// Registers this node, then starts the heartbeat, discovery and event
    /// loops. Only a failed first registration is an error.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        log::info!("Starting cluster coordinator for node {}", self.node_id);
        self.send_heartbeat().await.map_err(|e| match e {
            ClusterError::Store(inner) => ClusterError::Registration(inner),
            other => ClusterError::Registration(other.into()),
        })?;

        // subscribe before returning so no event published after start is missed
        let subscription = self.subscribe_events().await;

        {
            let mut tasks = self.tasks.lock().await;
            tasks.spawn(Arc::clone(self).heartbeat_loop());
            tasks.spawn(Arc::clone(self).discovery_loop());
            tasks.spawn(Arc::clone(self).event_loop(subscription));
        }

        let node = self.node_info().await;
        self.publish_event(EventKind::NodeJoin { node }).await;
        Ok(())
    }

    /// Announces departure, deletes this node's record (best effort, bounded
    /// by the shutdown timeout) and waits for every loop to exit.
    pub async fn stop(&self) {
        log::info!("Stopping cluster coordinator for node {}", self.node_id);
        self.publish_event(EventKind::NodeLeave).await;

        let key = self.keys.node_key(&self.node_id);
        match tokio::time::timeout(self.config.shutdown_timeout, self.store.delete(&key)).await {
            Ok(Ok(_)) => log::debug!("Node record {} removed", key),
            Ok(Err(e)) => log::warn!("Failed to remove node record {}: {:?}", key, e),
            Err(_) => log::warn!("Timed out removing node record {}", key),
        }

        self.cancel.cancel();
        let mut tasks = self.tasks.lock().await;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                log::error!("Coordinator task ended abnormally: {}", e);
            }
        }
    }

    /// Writes this node's record with a fresh timestamp and TTL.
    pub async fn send_heartbeat(&self) -> Result<()> {
        let payload = {
            let mut node = self.local_node.write().await;
            node.last_heartbeat = Utc::now();
            serde_json::to_string(&*node)?
        };
        let key = self.keys.node_key(&self.node_id);
        self.store.set(&key, &payload, Some(self.config.node_ttl)).await?;
        log::debug!("Cluster heartbeat sent for node {}", self.node_id);
        Ok(())
    }

    /// One reconciliation pass: rebuilds the membership map from a scan of
    /// node records, dropping nodes whose records are gone.
    pub async fn discover_nodes(&self) -> Result<()> {
        let keys = self.store.scan_prefix(&self.keys.node_prefix()).await?;
        let now = Utc::now();

        let mut seen = HashSet::new();
        let mut fresh = Vec::new();
        for key in keys {
            let Some(node_id) = self.keys.node_id_from_key(&key) else {
                continue;
            };
            let raw = match self.store.get(&key).await {
                Ok(Some(raw)) => raw,
                // expired between the scan and the read
                Ok(None) => continue,
                Err(e) => {
                    // keep whatever we knew; the next pass decides
                    log::warn!("Failed to read node record {}: {:?}", key, e);
                    seen.insert(node_id.to_string());
                    continue;
                }
            };
            seen.insert(node_id.to_string());
            match serde_json::from_str::<NodeRecord>(&raw) {
                Ok(mut node) => {
                    node.id = node_id.to_string();
                    node.status = NodeStatus::from_heartbeat(node.last_heartbeat, now, self.config.node_timeout);
                    fresh.push(node);
                }
                Err(e) => log::warn!("Ignoring undecodable node record {}: {}", key, e),
            }
        }

        let mut transitions = Vec::new();
        {
            let mut nodes = self.nodes.write().await;
            nodes.retain(|id, _| {
                let keep = seen.contains(id);
                if !keep {
                    log::info!("Node {} removed from cluster", id);
                }
                keep
            });
            for node in fresh {
                let node_id = node.id.clone();
                let new_status = node.status;
                match nodes.insert(node_id.clone(), node) {
                    None => log::info!("Node {} joined cluster view ({:?})", node_id, new_status),
                    Some(previous) if previous.status != new_status => {
                        log::info!(
                            "Node {} changed status {:?} -> {:?}",
                            node_id,
                            previous.status,
                            new_status
                        );
                        transitions.push((node_id, previous.status, new_status));
                    }
                    Some(_) => {}
                }
            }
        }

        for (node_id, old_status, new_status) in transitions {
            self.publish_event(EventKind::NodeUpdate {
                node_id,
                old_status,
                new_status,
            })
            .await;
        }
        Ok(())
    }

    pub async fn node_info(&self) -> NodeRecord {
        self.local_node.read().await.clone()
    }

    pub async fn get_node(&self, node_id: &str) -> Option<NodeRecord> {
        self.nodes.read().await.get(node_id).cloned()
    }

    /// Every known node, ordered by id.
    pub async fn get_nodes(&self) -> Vec<NodeRecord> {
        let mut nodes: Vec<NodeRecord> = self.nodes.read().await.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub async fn get_active_nodes(&self) -> Vec<NodeRecord> {
        let mut nodes = self.get_nodes().await;
        nodes.retain(NodeRecord::is_active);
        nodes
    }

    /// Active nodes, ordered by id. This node is judged by its observed
    /// record like any peer once discovery has seen it; before that, or when
    /// no node is active at all, it stands in alone.
    async fn candidates(&self) -> Vec<NodeRecord> {
        let nodes = self.get_nodes().await;
        let seen_self = nodes.iter().any(|n| n.id == self.node_id);
        let mut active: Vec<NodeRecord> = nodes.into_iter().filter(NodeRecord::is_active).collect();
        if !seen_self || active.is_empty() {
            active.push(self.node_info().await);
            active.sort_by(|a, b| a.id.cmp(&b.id));
        }
        active
    }

    /// Smallest id among the candidates above.
    pub async fn leader_id(&self) -> String {
        self.candidates()
            .await
            .into_iter()
            .map(|n| n.id)
            .min()
            .unwrap_or_else(|| self.node_id.clone())
    }

    /// Recomputed on every call from the current membership view.
    pub async fn is_leader(&self) -> bool {
        self.leader_id().await == self.node_id
    }

    /// Routes `key` to one active node by hash; this node when no node is
    /// active.
    pub async fn select_node(&self, key: &str) -> NodeRecord {
        let mut candidates = self.candidates().await;
        let index = (stable_hash(key) % candidates.len() as u64) as usize;
        candidates.swap_remove(index)
    }

    pub async fn register_event_handler<F>(&self, event_type: EventType, handler: F)
    where
        F: Fn(&ClusterEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .await
            .entry(event_type)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Best effort: no acknowledgement and no retry.
    pub async fn publish_cache_invalidation(&self, patterns: Vec<String>) {
        self.publish_event(EventKind::CacheInvalidate { patterns }).await;
    }

    pub async fn publish_config_update(&self, settings: HashMap<String, serde_json::Value>) {
        self.publish_event(EventKind::ConfigUpdate { settings }).await;
    }

    pub async fn publish_event(&self, kind: EventKind) {
        let event = ClusterEvent::new(kind, self.node_id.clone());
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("Failed to encode cluster event: {}", e);
                return;
            }
        };
        let channel = self.keys.events_channel();
        match tokio::time::timeout(self.config.shutdown_timeout, self.store.publish(&channel, &payload)).await {
            Ok(Ok(())) => log::debug!("Published {:?} event", event.event_type()),
            Ok(Err(e)) => log::error!("Failed to publish {:?} event: {:?}", event.event_type(), e),
            Err(_) => log::error!("Timed out publishing {:?} event", event.event_type()),
        }
    }

    async fn subscribe_events(&self) -> Option<MessageStream> {
        match self.store.subscribe(&self.keys.events_channel()).await {
            Ok(stream) => Some(stream),
            Err(e) => {
                log::error!("Failed to subscribe to cluster events: {:?}", e);
                None
            }
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // registration in start() counts as the first beat
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.send_heartbeat().await {
                log::error!("Failed to send heartbeat: {:?}", e);
            }
        }
        log::debug!("Heartbeat loop stopped");
    }

    async fn discovery_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.discovery_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.discover_nodes().await {
                log::error!("Node discovery failed: {:?}", e);
            }
        }
        log::debug!("Discovery loop stopped");
    }

    async fn event_loop(self: Arc<Self>, mut subscription: Option<MessageStream>) {
        let mut running = JoinSet::new();
        loop {
            while let Some(finished) = running.try_join_next() {
                if let Err(e) = finished {
                    log::error!("Cluster event handler panicked: {}", e);
                }
            }

            let Some(messages) = subscription.as_mut() else {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.discovery_interval) => {}
                }
                subscription = self.subscribe_events().await;
                continue;
            };

            let next = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = messages.next() => next,
            };
            match next {
                Some(payload) => self.dispatch(&payload, &mut running).await,
                None => {
                    log::warn!("Cluster event subscription closed, resubscribing");
                    subscription = None;
                }
            }
        }

        while let Some(finished) = running.join_next().await {
            if let Err(e) = finished {
                log::error!("Cluster event handler panicked: {}", e);
            }
        }
        log::debug!("Event loop stopped");
    }

    async fn dispatch(&self, payload: &str, running: &mut JoinSet<()>) {
        let event: ClusterEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                log::error!("Failed to decode cluster event: {}", e);
                return;
            }
        };
        if event.node_id == self.node_id {
            return;
        }

        let handlers = self
            .handlers
            .read()
            .await
            .get(&event.event_type())
            .cloned()
            .unwrap_or_default();
        let event = Arc::new(event);
        for handler in handlers {
            let event = Arc::clone(&event);
            running.spawn(async move {
                if let Err(e) = handler(event.as_ref()) {
                    log::warn!("Cluster event handler for {:?} failed: {:?}", event.event_type(), e);
                }
            });
        }
    }
}
