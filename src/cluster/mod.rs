pub mod coordinator;
pub mod distributed_lock;
pub mod lock_manager;
pub mod session_store;
