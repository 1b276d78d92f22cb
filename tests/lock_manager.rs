use std::sync::Arc;
use std::time::Duration;

use ovncp_cluster::cluster::distributed_lock::{LockOptions, LockState};
use ovncp_cluster::cluster::lock_manager::LockManager;
use ovncp_cluster::common::error::ClusterError;
use ovncp_cluster::common::keys::Keyspace;
use ovncp_cluster::storage::coord_store_impl::CoordStoreImpl;
use ovncp_cluster::storage::memory::memory_coord_store::MemoryCoordStore;
use ovncp_cluster::traits::coord_store::CoordStore;
use tokio_util::sync::CancellationToken;

fn manager(ttl_ms: u64) -> (MemoryCoordStore, Arc<CoordStoreImpl>, LockManager) {
    let memory = MemoryCoordStore::new();
    let store = Arc::new(CoordStoreImpl::Memory(memory.clone()));
    let opts = LockOptions {
        ttl: Duration::from_millis(ttl_ms),
        retry_delay: Duration::from_millis(10),
        max_retries: 3,
    };
    let manager = LockManager::new(Arc::clone(&store), Keyspace::default(), opts, CancellationToken::new());
    (memory, store, manager)
}

#[tokio::test(start_paused = true)]
async fn test_renewal_keeps_lock_past_ttl() {
    let (_, store, manager) = manager(100);
    let lock = manager
        .acquire_lock("northbound", None, &CancellationToken::new())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(450)).await;
    assert_eq!(store.get(lock.key()).await.unwrap().as_deref(), Some(lock.token()));
    assert!(manager.is_held_locally("northbound").await);

    manager.release_lock("northbound").await.unwrap();
    assert_eq!(store.get(lock.key()).await.unwrap(), None);
    assert!(!manager.is_held_locally("northbound").await);
}

#[tokio::test(start_paused = true)]
async fn test_renewal_failure_drops_tracking_when_key_stolen() {
    let (_, store, manager) = manager(100);
    let lock = manager
        .acquire_lock("southbound", None, &CancellationToken::new())
        .await
        .unwrap();

    // another holder's value replaces ours
    store.set(lock.key(), "someone-else", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(!manager.is_held_locally("southbound").await);
    assert_eq!(lock.state(), LockState::Lost);
    assert!(matches!(
        manager.release_lock("southbound").await,
        Err(ClusterError::LockNotHeld)
    ));
    assert_eq!(store.get(lock.key()).await.unwrap().as_deref(), Some("someone-else"));
}

#[tokio::test(start_paused = true)]
async fn test_renewal_failure_drops_tracking_when_store_unreachable() {
    let (memory, _store, manager) = manager(100);
    manager
        .acquire_lock("offline", None, &CancellationToken::new())
        .await
        .unwrap();

    memory.set_offline(true);
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(!manager.is_held_locally("offline").await);
    assert!(manager.held_keys().await.is_empty());
}

#[tokio::test]
async fn test_release_unknown_key_is_not_held() {
    let (_, _, manager) = manager(1_000);
    assert!(matches!(
        manager.release_lock("never-acquired").await,
        Err(ClusterError::LockNotHeld)
    ));
}

#[tokio::test]
async fn test_contended_key_fails_after_retries() {
    let (_, _, manager) = manager(5_000);
    manager
        .acquire_lock("shared", None, &CancellationToken::new())
        .await
        .unwrap();

    let result = manager.acquire_lock("shared", None, &CancellationToken::new()).await;
    assert!(matches!(result, Err(ClusterError::LockAcquireFailed)));
    assert_eq!(manager.held_keys().await, vec!["shared".to_string()]);
}

#[tokio::test]
async fn test_release_all_frees_every_lock() {
    let (_, store, manager) = manager(5_000);
    let cancel = CancellationToken::new();
    let custom = LockOptions {
        ttl: Duration::from_secs(60),
        ..LockOptions::default()
    };
    let a = manager.acquire_lock("a", None, &cancel).await.unwrap();
    let b = manager.acquire_lock("b", Some(&custom), &cancel).await.unwrap();
    assert_eq!(b.ttl(), Duration::from_secs(60));
    assert_eq!(manager.held_keys().await, vec!["a".to_string(), "b".to_string()]);

    manager.release_all().await;
    assert!(manager.held_keys().await.is_empty());
    assert_eq!(store.get(a.key()).await.unwrap(), None);
    assert_eq!(store.get(b.key()).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_lock_honors_cancellation_on_hung_store() {
    let (memory, _store, manager) = manager(1_000);
    memory.set_stalled(true);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = manager.acquire_lock("stuck", None, &cancel).await;
    assert!(matches!(result, Err(ClusterError::Cancelled)));
    assert!(!manager.is_held_locally("stuck").await);
}
