use futures_util::StreamExt;
use redis::Script;
use std::time::Duration;

use crate::common::utils::ttl_millis;
use crate::storage::redis::redis_client::RedisClient;
use crate::traits::coord_store::{CoordStore, MessageStream};

const COMPARE_AND_DELETE: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

const COMPARE_AND_PEXPIRE: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

const SCAN_PAGE_SIZE: usize = 100;

pub struct RedisCoordStore {
    client: RedisClient,
    compare_and_delete: Script,
    compare_and_pexpire: Script,
}

impl RedisCoordStore {
    pub fn new(client: RedisClient) -> Self {
        Self {
            client,
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            compare_and_pexpire: Script::new(COMPARE_AND_PEXPIRE),
        }
    }
}

/// Escapes glob metacharacters so a literal prefix can be used in `MATCH`.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl CoordStore for RedisCoordStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool> {
        self.client.set_nx_px(key, value, ttl_millis(ttl)).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> anyhow::Result<bool> {
        self.client
            .eval_guarded(&self.compare_and_delete, key, &[expected.to_string()])
            .await
    }

    async fn compare_and_set_expiry(&self, key: &str, expected: &str, ttl: Duration) -> anyhow::Result<bool> {
        let args = [expected.to_string(), ttl_millis(ttl).to_string()];
        self.client
            .eval_guarded(&self.compare_and_pexpire, key, &args)
            .await
    }

    async fn scan_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let pattern = format!("{}*", escape_glob(prefix));
        self.client.scan_match(&pattern, SCAN_PAGE_SIZE).await
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.client.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()> {
        self.client.set(key, value, ttl.map(ttl_millis)).await
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.client.del(key).await? > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        self.client.pexpire(key, ttl_millis(ttl)).await
    }

    async fn set_add(&self, key: &str, member: &str) -> anyhow::Result<()> {
        self.client.sadd(key, member).await
    }

    async fn set_remove(&self, key: &str, member: &str) -> anyhow::Result<()> {
        self.client.srem(key, member).await
    }

    async fn set_members(&self, key: &str) -> anyhow::Result<Vec<String>> {
        self.client.smembers(key).await
    }

    async fn publish(&self, channel: &str, payload: &str) -> anyhow::Result<()> {
        self.client.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> anyhow::Result<MessageStream> {
        let pubsub = self.client.subscribe(channel).await?;
        let messages = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    log::warn!("Dropping undecodable pubsub payload: {}", e);
                    None
                }
            }
        });
        Ok(Box::pin(messages))
    }
}

#[cfg(test)]
mod tests {
    use super::escape_glob;

    #[test]
    fn glob_metacharacters_are_escaped() {
        assert_eq!(escape_glob("ovncp:cluster:node:"), "ovncp:cluster:node:");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }
}
