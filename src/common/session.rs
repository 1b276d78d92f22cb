use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    /// Node currently serving the session. Only migration changes it.
    #[serde(rename = "node_id")]
    pub owner_node_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SessionRecord {
    pub fn new(session_id: &str, user_id: &str, owner_node_id: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            owner_node_id: owner_node_id.to_string(),
            connected_at: now,
            last_activity: now,
            metadata: HashMap::new(),
        }
    }
}
