//! Mutual exclusion for one named resource across every node.
//!
//! The lock is a single store key whose value is this instance's owner token.
//! Exclusivity comes only from the store's single-key atomic operations:
//! set-if-absent to take it, compare-and-delete / compare-and-set-expiry to
//! give it back or keep it. The TTL reclaims locks of crashed holders.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::common::error::{ClusterError, Result};
use crate::common::keys::Keyspace;
use crate::storage::coord_store_impl::CoordStoreImpl;
use crate::traits::coord_store::CoordStore;

#[derive(Debug, Clone)]
pub struct LockOptions {
    pub ttl: Duration,
    pub retry_delay: Duration,
    pub max_retries: u32,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            retry_delay: Duration::from_millis(100),
            max_retries: 10,
        }
    }
}

/// What this instance believes about its own ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unacquired,
    Held,
    /// A release or extend found another value (or none) under the key.
    Lost,
}

impl LockState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => LockState::Held,
            2 => LockState::Lost,
            _ => LockState::Unacquired,
        }
    }
}

pub struct DistributedLock {
    store: Arc<CoordStoreImpl>,
    name: String,
    key: String,
    token: String,
    ttl: Duration,
    state: AtomicU8,
}

impl DistributedLock {
    pub fn new(store: Arc<CoordStoreImpl>, keys: &Keyspace, name: &str, opts: &LockOptions) -> Self {
        Self {
            store,
            name: name.to_string(),
            key: keys.lock_key(name),
            token: uuid::Uuid::new_v4().to_string(),
            ttl: opts.ttl,
            state: AtomicU8::new(LockState::Unacquired as u8),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn state(&self) -> LockState {
        LockState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: LockState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// A single attempt; a contested key is `LockAcquireFailed`.
    pub async fn acquire(&self) -> Result<()> {
        let acquired = self
            .store
            .set_if_absent(&self.key, &self.token, self.ttl)
            .await
            .map_err(|e| ClusterError::Store(e.context("failed to acquire lock")))?;
        if !acquired {
            return Err(ClusterError::LockAcquireFailed);
        }
        self.set_state(LockState::Held);
        log::debug!("✅ Lock acquired: {} (ttl {:?})", self.key, self.ttl);
        Ok(())
    }

    /// Up to `max_retries` attempts with `retry_delay` between them. Store
    /// errors abort at once. Cancellation during an attempt or the wait
    /// returns `Cancelled`; an attempt abandoned mid-flight may still have
    /// written the key, which then lapses with its TTL.
    pub async fn acquire_with_retry(&self, opts: &LockOptions, cancel: &CancellationToken) -> Result<()> {
        for attempt in 1..=opts.max_retries {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClusterError::Cancelled),
                outcome = self.acquire() => outcome,
            };
            match outcome {
                Ok(()) => return Ok(()),
                Err(ClusterError::LockAcquireFailed) => {
                    log::debug!(
                        "🔒 Lock busy (attempt {}/{}): {}",
                        attempt,
                        opts.max_retries,
                        self.key
                    );
                }
                Err(e) => return Err(e),
            }
            if attempt == opts.max_retries {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClusterError::Cancelled),
                _ = tokio::time::sleep(opts.retry_delay) => {}
            }
        }
        Err(ClusterError::LockAcquireFailed)
    }

    /// Deletes the key only if it still carries this token.
    pub async fn release(&self) -> Result<()> {
        let released = self
            .store
            .compare_and_delete(&self.key, &self.token)
            .await
            .map_err(|e| ClusterError::Store(e.context("failed to release lock")))?;
        if !released {
            self.mark_lost();
            return Err(ClusterError::LockNotHeld);
        }
        self.set_state(LockState::Unacquired);
        log::debug!("Lock released: {}", self.key);
        Ok(())
    }

    /// Re-arms the TTL only if the key still carries this token.
    pub async fn extend(&self, ttl: Duration) -> Result<()> {
        let extended = self
            .store
            .compare_and_set_expiry(&self.key, &self.token, ttl)
            .await
            .map_err(|e| ClusterError::Store(e.context("failed to extend lock")))?;
        if !extended {
            self.mark_lost();
            return Err(ClusterError::LockNotHeld);
        }
        log::debug!("Lock extended: {} (ttl {:?})", self.key, ttl);
        Ok(())
    }

    fn mark_lost(&self) {
        if self.state() == LockState::Held {
            log::warn!("Lock {} is no longer held by this instance", self.key);
            self.set_state(LockState::Lost);
        }
    }

    /// Informational only: the answer may be stale by the time it returns.
    pub async fn is_held(&self) -> Result<bool> {
        let current = self.store.get(&self.key).await?;
        Ok(current.as_deref() == Some(self.token.as_str()))
    }

    /// Runs `f` under the lock. The lock is released on every exit path,
    /// including a panic inside `f`, which is resumed after the release.
    pub async fn with_lock<F, Fut, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<ClusterError>,
    {
        self.acquire().await?;
        // building the future can panic too
        let outcome = AssertUnwindSafe(async { f().await }).catch_unwind().await;
        if let Err(e) = self.release().await {
            log::warn!("Failed to release lock {} after scoped use: {}", self.key, e);
        }
        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
