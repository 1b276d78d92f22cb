use std::time::Duration;

use crate::storage::memory::memory_coord_store::MemoryCoordStore;
use crate::storage::redis::redis_coord_store::RedisCoordStore;
use crate::traits::coord_store::{CoordStore, MessageStream};
use anyhow::Result;

pub enum CoordStoreImpl {
    Redis(RedisCoordStore),
    Memory(MemoryCoordStore),
}

impl CoordStore for CoordStoreImpl {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        match self {
            CoordStoreImpl::Redis(r) => r.set_if_absent(key, value, ttl).await,
            CoordStoreImpl::Memory(m) => m.set_if_absent(key, value, ttl).await,
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        match self {
            CoordStoreImpl::Redis(r) => r.compare_and_delete(key, expected).await,
            CoordStoreImpl::Memory(m) => m.compare_and_delete(key, expected).await,
        }
    }

    async fn compare_and_set_expiry(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
        match self {
            CoordStoreImpl::Redis(r) => r.compare_and_set_expiry(key, expected, ttl).await,
            CoordStoreImpl::Memory(m) => m.compare_and_set_expiry(key, expected, ttl).await,
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        match self {
            CoordStoreImpl::Redis(r) => r.scan_prefix(prefix).await,
            CoordStoreImpl::Memory(m) => m.scan_prefix(prefix).await,
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self {
            CoordStoreImpl::Redis(r) => r.get(key).await,
            CoordStoreImpl::Memory(m) => m.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        match self {
            CoordStoreImpl::Redis(r) => r.set(key, value, ttl).await,
            CoordStoreImpl::Memory(m) => m.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match self {
            CoordStoreImpl::Redis(r) => r.delete(key).await,
            CoordStoreImpl::Memory(m) => m.delete(key).await,
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        match self {
            CoordStoreImpl::Redis(r) => r.expire(key, ttl).await,
            CoordStoreImpl::Memory(m) => m.expire(key, ttl).await,
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        match self {
            CoordStoreImpl::Redis(r) => r.set_add(key, member).await,
            CoordStoreImpl::Memory(m) => m.set_add(key, member).await,
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        match self {
            CoordStoreImpl::Redis(r) => r.set_remove(key, member).await,
            CoordStoreImpl::Memory(m) => m.set_remove(key, member).await,
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        match self {
            CoordStoreImpl::Redis(r) => r.set_members(key).await,
            CoordStoreImpl::Memory(m) => m.set_members(key).await,
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        match self {
            CoordStoreImpl::Redis(r) => r.publish(channel, payload).await,
            CoordStoreImpl::Memory(m) => m.publish(channel, payload).await,
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        match self {
            CoordStoreImpl::Redis(r) => r.subscribe(channel).await,
            CoordStoreImpl::Memory(m) => m.subscribe(channel).await,
        }
    }
}
