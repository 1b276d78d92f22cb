pub const DEFAULT_KEY_PREFIX: &str = "ovncp:";

/// Store key naming shared by every node of one cluster.
#[derive(Debug, Clone)]
pub struct Keyspace {
    prefix: String,
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl Keyspace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn node_prefix(&self) -> String {
        format!("{}cluster:node:", self.prefix)
    }

    pub fn node_key(&self, node_id: &str) -> String {
        format!("{}{}", self.node_prefix(), node_id)
    }

    pub fn node_id_from_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.node_prefix().as_str())
            .filter(|id| !id.is_empty())
    }

    pub fn events_channel(&self) -> String {
        format!("{}cluster:events", self.prefix)
    }

    pub fn lock_key(&self, name: &str) -> String {
        format!("{}lock:{}", self.prefix, name)
    }

    pub fn session_key(&self, session_id: &str) -> String {
        format!("{}session:{}", self.prefix, session_id)
    }

    pub fn user_sessions_key(&self, user_id: &str) -> String {
        format!("{}user_sessions:{}", self.prefix, user_id)
    }
}
