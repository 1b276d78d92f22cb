pub mod loader;
pub mod node;
pub mod server;
