use futures_util::Stream;
use std::pin::Pin;
use std::time::Duration;

/// Payloads received on a subscribed channel. Ends when the subscription dies.
pub type MessageStream = Pin<Box<dyn Stream<Item = String> + Send>>;

#[trait_variant::make(CoordStore: Send)]
pub trait UnsendCoordStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool>;
    async fn compare_and_delete(&self, key: &str, expected: &str) -> anyhow::Result<bool>;
    async fn compare_and_set_expiry(&self, key: &str, expected: &str, ttl: Duration) -> anyhow::Result<bool>;
    async fn scan_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<bool>;
    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<bool>;
    async fn set_add(&self, key: &str, member: &str) -> anyhow::Result<()>;
    async fn set_remove(&self, key: &str, member: &str) -> anyhow::Result<()>;
    async fn set_members(&self, key: &str) -> anyhow::Result<Vec<String>>;
    async fn publish(&self, channel: &str, payload: &str) -> anyhow::Result<()>;
    async fn subscribe(&self, channel: &str) -> anyhow::Result<MessageStream>;
}
