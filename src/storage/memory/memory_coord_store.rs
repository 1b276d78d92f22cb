//! In-process coordination store.
//!
//! TTLs are measured on the tokio clock and enforced lazily on access, so a
//! test running with a paused clock can expire keys by advancing time.
//! Every clone shares the same keyspace and channels, which lets several
//! simulated nodes coordinate through one instance.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::time::Instant;

use crate::traits::coord_store::{CoordStore, MessageStream};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Clone, Default)]
pub struct MemoryCoordStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
    offline: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
}

impl MemoryCoordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every operation fails, as if the store were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// While stalled every operation hangs, as if the store stopped
    /// answering. Calls already waiting stay stuck.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    async fn check_online(&self) -> anyhow::Result<()> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.offline.load(Ordering::SeqCst) {
            anyhow::bail!("memory store is offline");
        }
        Ok(())
    }

    /// Drops `key` if its TTL has lapsed and returns the live entry, if any.
    fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }

    fn string_value(entry: &Entry) -> anyhow::Result<&str> {
        match &entry.value {
            Value::Str(s) => Ok(s),
            Value::Set(_) => anyhow::bail!("WRONGTYPE key holds a set"),
        }
    }
}

impl CoordStore for MemoryCoordStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool> {
        self.check_online().await?;
        let mut entries = self.entries.lock().await;
        if Self::live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> anyhow::Result<bool> {
        self.check_online().await?;
        let mut entries = self.entries.lock().await;
        let matches = match Self::live(&mut entries, key) {
            Some(entry) => Self::string_value(entry)? == expected,
            None => false,
        };
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn compare_and_set_expiry(&self, key: &str, expected: &str, ttl: Duration) -> anyhow::Result<bool> {
        self.check_online().await?;
        let mut entries = self.entries.lock().await;
        let Some(entry) = Self::live(&mut entries, key) else {
            return Ok(false);
        };
        if Self::string_value(entry)? != expected {
            return Ok(false);
        }
        entry.expires_at = Some(Instant::now() + ttl);
        Ok(true)
    }

    async fn scan_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        self.check_online().await?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, e| !e.is_expired(now));
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.check_online().await?;
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key) {
            Some(entry) => Ok(Some(Self::string_value(entry)?.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()> {
        self.check_online().await?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        self.check_online().await?;
        let mut entries = self.entries.lock().await;
        let existed = Self::live(&mut entries, key).is_some();
        entries.remove(key);
        Ok(existed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        self.check_online().await?;
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> anyhow::Result<()> {
        self.check_online().await?;
        let mut entries = self.entries.lock().await;
        if let Some(entry) = Self::live(&mut entries, key) {
            return match &mut entry.value {
                Value::Set(members) => {
                    members.insert(member.to_string());
                    Ok(())
                }
                Value::Str(_) => anyhow::bail!("WRONGTYPE key holds a string"),
            };
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Set(HashSet::from([member.to_string()])),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> anyhow::Result<()> {
        self.check_online().await?;
        let mut entries = self.entries.lock().await;
        let now_empty = match Self::live(&mut entries, key) {
            Some(Entry { value: Value::Set(members), .. }) => {
                members.remove(member);
                members.is_empty()
            }
            Some(_) => anyhow::bail!("WRONGTYPE key holds a string"),
            None => false,
        };
        // Redis drops a set once its last member is removed
        if now_empty {
            entries.remove(key);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> anyhow::Result<Vec<String>> {
        self.check_online().await?;
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key) {
            Some(Entry { value: Value::Set(members), .. }) => {
                let mut members: Vec<String> = members.iter().cloned().collect();
                members.sort();
                Ok(members)
            }
            Some(_) => anyhow::bail!("WRONGTYPE key holds a string"),
            None => Ok(Vec::new()),
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> anyhow::Result<()> {
        self.check_online().await?;
        let channels = self.channels.lock().await;
        if let Some(sender) = channels.get(channel) {
            // no subscribers is not an error, same as PUBLISH returning 0
            let _ = sender.send(payload.to_string());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> anyhow::Result<MessageStream> {
        self.check_online().await?;
        let mut channels = self.channels.lock().await;
        let receiver = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        let messages = futures_util::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => return Some((payload, receiver)),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("Subscriber lagged, {} messages dropped", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn keys_expire_on_the_tokio_clock() {
        let store = MemoryCoordStore::new();
        assert!(store.set_if_absent("k", "a", Duration::from_secs(1)).await.unwrap());
        assert!(!store.set_if_absent("k", "b", Duration::from_secs(1)).await.unwrap());

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.set_if_absent("k", "b", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn compare_operations_respect_value() {
        let store = MemoryCoordStore::new();
        store.set("k", "mine", None).await.unwrap();
        assert!(!store.compare_and_delete("k", "theirs").await.unwrap());
        assert!(!store.compare_and_set_expiry("k", "theirs", Duration::from_secs(1)).await.unwrap());
        assert!(store.compare_and_set_expiry("k", "mine", Duration::from_secs(1)).await.unwrap());
        assert!(store.compare_and_delete("k", "mine").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = MemoryCoordStore::new();
        store.set_offline(true);
        assert!(store.get("k").await.is_err());
        assert!(store.publish("c", "x").await.is_err());
        store.set_offline(false);
        assert!(store.get("k").await.is_ok());
    }
}
