//! Error types for the coordination core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClusterError>;

#[derive(Error, Debug)]
pub enum ClusterError {
    // === Lock Errors ===
    #[error("failed to acquire lock")]
    LockAcquireFailed,

    #[error("lock not held")]
    LockNotHeld,

    // === Session Errors ===
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session {session_id} is owned by node {owner}")]
    SessionOwnedElsewhere { session_id: String, owner: String },

    // === Membership Errors ===
    #[error("node {0} is not an active cluster member")]
    NodeNotActive(String),

    #[error("failed to register node: {0}")]
    Registration(#[source] anyhow::Error),

    #[error("operation cancelled")]
    Cancelled,

    // === Store Errors ===
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}
