use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Inactive,
}

impl NodeStatus {
    /// Status implied by a heartbeat timestamp observed at `now`.
    pub fn from_heartbeat(last_heartbeat: DateTime<Utc>, now: DateTime<Utc>, node_timeout: Duration) -> Self {
        let age = now.signed_duration_since(last_heartbeat);
        let fresh = chrono::Duration::from_std(node_timeout)
            .map(|limit| age <= limit)
            .unwrap_or(true);
        if fresh { NodeStatus::Active } else { NodeStatus::Inactive }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub hostname: String,
    pub ip: String,
    pub port: u16,
    pub last_heartbeat: DateTime<Utc>,
    pub status: NodeStatus,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl NodeRecord {
    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_within_timeout_is_active() {
        let now = Utc::now();
        let hb = now - chrono::Duration::seconds(29);
        assert_eq!(NodeStatus::from_heartbeat(hb, now, Duration::from_secs(30)), NodeStatus::Active);
    }

    #[test]
    fn heartbeat_past_timeout_is_inactive() {
        let now = Utc::now();
        let hb = now - chrono::Duration::seconds(31);
        assert_eq!(NodeStatus::from_heartbeat(hb, now, Duration::from_secs(30)), NodeStatus::Inactive);
    }
}
