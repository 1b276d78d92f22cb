use anyhow::Context;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::{AsyncCommands, Script};

/// Thin wrapper around one multiplexed connection plus the client needed to
/// open dedicated pub/sub connections.
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisClient {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)
            .with_context(|| format!("invalid redis url: {}", url))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .with_context(|| format!("failed to connect to redis at {}", url))?;
        log::debug!("Connected to Redis at {}", url);
        Ok(Self { client, conn })
    }

    pub async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    pub async fn set(&self, key: &str, value: &str, ttl_ms: Option<u64>) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        match ttl_ms {
            Some(ms) => {
                let _: () = conn.pset_ex(key, value, ms).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    /// `SET key value NX PX ttl`; true when the key was written.
    pub async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    pub async fn del(&self, key: &str) -> anyhow::Result<usize> {
        let mut conn = self.conn.clone();
        let removed: usize = conn.del(key).await?;
        Ok(removed)
    }

    pub async fn pexpire(&self, key: &str, ttl_ms: u64) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let ms = i64::try_from(ttl_ms).unwrap_or(i64::MAX);
        let applied: bool = conn.pexpire(key, ms).await?;
        Ok(applied)
    }

    pub async fn sadd(&self, key: &str, member: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    pub async fn srem(&self, key: &str, member: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(key, member).await?;
        Ok(())
    }

    pub async fn smembers(&self, key: &str) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    /// Runs a script that compares `KEYS[1]` against `ARGV[1]` and returns 0/1.
    pub async fn eval_guarded(&self, script: &Script, key: &str, args: &[String]) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let mut invocation = script.key(key);
        for arg in args {
            invocation.arg(arg);
        }
        let result: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(result != 0)
    }

    pub async fn scan_match(&self, pattern: &str, page_size: usize) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut all_keys = Vec::new();
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(page_size)
                .query_async(&mut conn)
                .await?;
            all_keys.extend(keys);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        // SCAN may return a key more than once across pages
        all_keys.sort();
        all_keys.dedup();
        log::debug!("Scanned {} keys matching pattern '{}'", all_keys.len(), pattern);
        Ok(all_keys)
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _receivers: i64 = conn.publish(channel, payload).await?;
        Ok(())
    }

    pub async fn subscribe(&self, channel: &str) -> anyhow::Result<PubSub> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .context("failed to open pubsub connection")?;
        pubsub.subscribe(channel).await?;
        Ok(pubsub)
    }
}
