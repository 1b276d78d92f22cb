pub mod redis {
    pub mod redis_client;
    pub mod redis_coord_store;
}
pub mod memory {
    pub mod memory_coord_store;
}
pub mod coord_store_impl;
