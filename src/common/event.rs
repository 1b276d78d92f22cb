//! Cluster events broadcast over the store's pub/sub channel.
//!
//! Delivery is at-most-once and unordered. Reconciliation through the
//! discovery scan is authoritative; an event is only a hint that something
//! changed, and consumers must tolerate missing or reordered ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::common::cluster::{NodeRecord, NodeStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    NodeJoin,
    NodeLeave,
    NodeUpdate,
    CacheInvalidate,
    ConfigUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventKind {
    NodeJoin {
        node: NodeRecord,
    },
    NodeLeave,
    NodeUpdate {
        node_id: String,
        old_status: NodeStatus,
        new_status: NodeStatus,
    },
    CacheInvalidate {
        patterns: Vec<String>,
    },
    ConfigUpdate {
        settings: HashMap<String, serde_json::Value>,
    },
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::NodeJoin { .. } => EventType::NodeJoin,
            EventKind::NodeLeave => EventType::NodeLeave,
            EventKind::NodeUpdate { .. } => EventType::NodeUpdate,
            EventKind::CacheInvalidate { .. } => EventType::CacheInvalidate,
            EventKind::ConfigUpdate { .. } => EventType::ConfigUpdate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterEvent {
    pub kind: EventKind,
    /// Node that published the event.
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
}

impl ClusterEvent {
    pub fn new(kind: EventKind, node_id: impl Into<String>) -> Self {
        Self {
            kind,
            node_id: node_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }
}

pub type EventHandler = Arc<dyn Fn(&ClusterEvent) -> anyhow::Result<()> + Send + Sync>;
