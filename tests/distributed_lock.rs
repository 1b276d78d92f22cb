use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use ovncp_cluster::cluster::distributed_lock::{DistributedLock, LockOptions, LockState};
use ovncp_cluster::common::error::ClusterError;
use ovncp_cluster::common::keys::Keyspace;
use ovncp_cluster::storage::coord_store_impl::CoordStoreImpl;
use ovncp_cluster::storage::memory::memory_coord_store::MemoryCoordStore;
use ovncp_cluster::traits::coord_store::CoordStore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn memory_store() -> (MemoryCoordStore, Arc<CoordStoreImpl>) {
    let memory = MemoryCoordStore::new();
    let store = Arc::new(CoordStoreImpl::Memory(memory.clone()));
    (memory, store)
}

fn lock_options(ttl_ms: u64, retry_ms: u64, max_retries: u32) -> LockOptions {
    LockOptions {
        ttl: Duration::from_millis(ttl_ms),
        retry_delay: Duration::from_millis(retry_ms),
        max_retries,
    }
}

#[tokio::test]
async fn test_only_one_concurrent_acquire_wins() {
    let (_, store) = memory_store();
    let keys = Keyspace::default();
    let opts = LockOptions::default();
    let a = DistributedLock::new(Arc::clone(&store), &keys, "ovn-sync", &opts);
    let b = DistributedLock::new(Arc::clone(&store), &keys, "ovn-sync", &opts);
    assert_ne!(a.token(), b.token());
    assert_eq!(a.key(), "ovncp:lock:ovn-sync");

    let (ra, rb) = tokio::join!(a.acquire(), b.acquire());
    assert!(ra.is_ok() ^ rb.is_ok(), "exactly one acquire must succeed");
    let loser = if ra.is_ok() { rb } else { ra };
    assert!(matches!(loser, Err(ClusterError::LockAcquireFailed)));

    let winner = if a.state() == LockState::Held { &a } else { &b };
    assert_eq!(store.get(winner.key()).await.unwrap().as_deref(), Some(winner.token()));
}

#[tokio::test]
async fn test_release_and_extend_with_wrong_token_leave_holder_untouched() {
    let (_, store) = memory_store();
    let keys = Keyspace::default();
    let opts = LockOptions::default();
    let holder = DistributedLock::new(Arc::clone(&store), &keys, "acl", &opts);
    let intruder = DistributedLock::new(Arc::clone(&store), &keys, "acl", &opts);

    holder.acquire().await.unwrap();
    assert!(matches!(intruder.release().await, Err(ClusterError::LockNotHeld)));
    assert!(matches!(
        intruder.extend(Duration::from_secs(60)).await,
        Err(ClusterError::LockNotHeld)
    ));
    // the intruder never held it, so it was not "lost" either
    assert_eq!(intruder.state(), LockState::Unacquired);

    assert!(holder.is_held().await.unwrap());
    assert!(!intruder.is_held().await.unwrap());
    holder.extend(Duration::from_secs(60)).await.unwrap();
    holder.release().await.unwrap();
    assert_eq!(holder.state(), LockState::Unacquired);
    assert_eq!(store.get(holder.key()).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_retry_gives_up_after_max_attempts_without_trailing_sleep() {
    let (_, store) = memory_store();
    let keys = Keyspace::default();
    let opts = lock_options(60_000, 1_000, 3);
    let holder = DistributedLock::new(Arc::clone(&store), &keys, "busy", &opts);
    let waiter = DistributedLock::new(Arc::clone(&store), &keys, "busy", &opts);
    holder.acquire().await.unwrap();

    let started = Instant::now();
    let result = waiter.acquire_with_retry(&opts, &CancellationToken::new()).await;
    assert!(matches!(result, Err(ClusterError::LockAcquireFailed)));
    // three attempts, two waits in between
    assert_eq!(started.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_retry_succeeds_once_holder_lease_expires() {
    let (_, store) = memory_store();
    let keys = Keyspace::default();
    let short = lock_options(250, 100, 10);
    let holder = DistributedLock::new(Arc::clone(&store), &keys, "lease", &short);
    let waiter = DistributedLock::new(Arc::clone(&store), &keys, "lease", &short);
    holder.acquire().await.unwrap();

    waiter
        .acquire_with_retry(&short, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(waiter.state(), LockState::Held);

    // the crashed holder finds out only when it touches the lock
    assert!(matches!(holder.release().await, Err(ClusterError::LockNotHeld)));
    assert_eq!(holder.state(), LockState::Lost);
    assert!(waiter.is_held().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_retry_honors_cancellation() {
    let (_, store) = memory_store();
    let keys = Keyspace::default();
    let opts = lock_options(60_000, 100, 10);
    let holder = DistributedLock::new(Arc::clone(&store), &keys, "cancel", &opts);
    let waiter = DistributedLock::new(Arc::clone(&store), &keys, "cancel", &opts);
    holder.acquire().await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = waiter.acquire_with_retry(&opts, &cancel).await;
    assert!(matches!(result, Err(ClusterError::Cancelled)));
    assert!(started.elapsed() < Duration::from_millis(300));
}

#[tokio::test]
async fn test_store_error_aborts_retry() {
    let (memory, store) = memory_store();
    let keys = Keyspace::default();
    let opts = lock_options(1_000, 10, 5);
    let lock = DistributedLock::new(store, &keys, "offline", &opts);
    memory.set_offline(true);

    let result = lock.acquire_with_retry(&opts, &CancellationToken::new()).await;
    assert!(matches!(result, Err(ClusterError::Store(_))));
}

#[tokio::test]
async fn test_with_lock_releases_after_error() {
    let (_, store) = memory_store();
    let keys = Keyspace::default();
    let lock = DistributedLock::new(Arc::clone(&store), &keys, "scoped", &LockOptions::default());

    let result = lock
        .with_lock(|| async { Err::<(), ClusterError>(ClusterError::SessionNotFound("s1".to_string())) })
        .await;
    assert!(matches!(result, Err(ClusterError::SessionNotFound(_))));
    assert_eq!(store.get(lock.key()).await.unwrap(), None);

    let value = lock.with_lock(|| async { Ok::<_, ClusterError>(42) }).await.unwrap();
    assert_eq!(value, 42);
    assert_eq!(lock.state(), LockState::Unacquired);
}

#[tokio::test]
async fn test_with_lock_releases_after_panic() {
    let (_, store) = memory_store();
    let keys = Keyspace::default();
    let lock = DistributedLock::new(Arc::clone(&store), &keys, "scoped-panic", &LockOptions::default());

    let outcome = AssertUnwindSafe(lock.with_lock(|| async {
        if lock.key().is_empty() {
            return Ok::<(), ClusterError>(());
        }
        panic!("critical section blew up");
    }))
    .catch_unwind()
    .await;
    assert!(outcome.is_err());
    assert_eq!(store.get(lock.key()).await.unwrap(), None);
}

#[tokio::test]
async fn test_with_lock_fails_fast_when_contended() {
    let (_, store) = memory_store();
    let keys = Keyspace::default();
    let opts = LockOptions::default();
    let holder = DistributedLock::new(Arc::clone(&store), &keys, "contended", &opts);
    let other = DistributedLock::new(Arc::clone(&store), &keys, "contended", &opts);
    holder.acquire().await.unwrap();

    let mut ran = false;
    let result = other
        .with_lock(|| {
            ran = true;
            async { Ok::<(), ClusterError>(()) }
        })
        .await;
    assert!(matches!(result, Err(ClusterError::LockAcquireFailed)));
    assert!(!ran);
    assert!(holder.is_held().await.unwrap());
}

#[tokio::test]
async fn test_with_lock_releases_when_building_future_panics() {
    let (_, store) = memory_store();
    let keys = Keyspace::default();
    let lock = DistributedLock::new(Arc::clone(&store), &keys, "eager-panic", &LockOptions::default());

    let outcome = AssertUnwindSafe(lock.with_lock(|| -> std::future::Ready<Result<(), ClusterError>> {
        panic!("closure failed before returning its future")
    }))
    .catch_unwind()
    .await;
    assert!(outcome.is_err());
    assert_eq!(store.get(lock.key()).await.unwrap(), None);
    assert_eq!(lock.state(), LockState::Unacquired);
}

#[tokio::test(start_paused = true)]
async fn test_retry_cancels_while_store_hangs() {
    let (memory, store) = memory_store();
    let keys = Keyspace::default();
    let opts = lock_options(60_000, 100, 10);
    let lock = DistributedLock::new(store, &keys, "hung", &opts);
    memory.set_stalled(true);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = lock.acquire_with_retry(&opts, &cancel).await;
    assert!(matches!(result, Err(ClusterError::Cancelled)));
    assert_eq!(started.elapsed(), Duration::from_millis(250));
}
