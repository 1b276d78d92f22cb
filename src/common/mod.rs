pub mod cluster;
pub mod config;
pub mod error;
pub mod event;
pub mod keys;
pub mod session;
pub mod utils;
