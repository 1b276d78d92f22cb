use crate::common::config::{ClusterConfig, StorageType};
use crate::storage::{
    coord_store_impl::CoordStoreImpl,
    memory::memory_coord_store::MemoryCoordStore,
    redis::redis_client::RedisClient,
    redis::redis_coord_store::RedisCoordStore,
};
use anyhow::Result;

pub async fn load_coord_store(config: &ClusterConfig) -> Result<CoordStoreImpl> {
    let store = match &config.store_type {
        StorageType::Redis => {
            log::debug!("Using Redis coordination store at {}", config.redis_url);
            let client = RedisClient::connect(&config.redis_url).await?;
            CoordStoreImpl::Redis(RedisCoordStore::new(client))
        }
        StorageType::Memory => {
            log::warn!("Using in-memory coordination store; this node cannot see any peers");
            CoordStoreImpl::Memory(MemoryCoordStore::new())
        }
    };
    Ok(store)
}
