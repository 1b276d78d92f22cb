#![allow(clippy::async_fn_in_trait)]
pub mod cluster;
pub mod common;
pub mod server;
pub mod storage;
pub mod traits;

pub use server::node::ClusterNode;
pub use server::server::server_start;
