// ── In-process store backend ──
//
// DashMap-backed key space plus a broadcast bus for pub/sub. Mirrors the
// Redis semantics the agent relies on (lazy expiry, glob patterns,
// keyspace notifications) so the facade can run without a server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::warn;

use crate::backend::{KeyPattern, Message, MessageStream, StoreBackend};
use crate::config::Topology;
use crate::error::StoreError;

const BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// Store backend living entirely in process memory.
///
/// Reports itself as [`Topology::Standalone`]. Useful for tests and for
/// running the agent without a store deployment.
pub struct MemoryBackend {
    entries: DashMap<String, Entry>,
    bus: broadcast::Sender<Message>,
    notifications: AtomicBool,
    db: i64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            entries: DashMap::new(),
            bus,
            notifications: AtomicBool::new(false),
            db: 0,
        }
    }

    /// Live pub/sub receivers, including pattern feeds.
    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.bus.receiver_count()
    }

    /// Drop `key` if its TTL has elapsed, emitting an `expired` event.
    fn purge_expired(&self, key: &str) {
        if self.entries.remove_if(key, |_, e| e.is_expired()).is_some() {
            self.notify(key, "expired");
        }
    }

    fn live_value(&self, key: &str) -> Option<Value> {
        self.purge_expired(key);
        self.entries.get(key).map(|e| e.value.clone())
    }

    fn with_hash<R>(
        &self,
        key: &str,
        f: impl FnOnce(&mut HashMap<String, String>) -> R,
    ) -> Result<R, StoreError> {
        self.purge_expired(key);
        let mut entry = self.entries.entry(key.to_owned()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Hash(fields) => Ok(f(fields)),
            Value::Text(_) => Err(wrong_type(key)),
        }
    }

    fn notify(&self, key: &str, event: &str) {
        if !self.notifications.load(Ordering::Relaxed) {
            return;
        }
        let db = self.db;
        let _ = self
            .bus
            .send(Message::new(format!("__keyspace@{db}__:{key}"), event));
        let _ = self
            .bus
            .send(Message::new(format!("__keyevent@{db}__:{event}"), key));
    }

    fn feed(&self, matches: impl Fn(&str) -> bool + Send + 'static) -> MessageStream {
        let mut rx = self.bus.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(msg) if matches(&msg.channel) => yield msg,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "memory store subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::backend(format!(
        "WRONGTYPE operation against key '{key}' holding the wrong kind of value"
    ))
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    fn topology(&self) -> Topology {
        Topology::Standalone
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.live_value(key) {
            None => Ok(None),
            Some(Value::Text(value)) => Ok(Some(value)),
            Some(Value::Hash(_)) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.filter(|t| !t.is_zero()).map(|ttl| Instant::now() + ttl);
        self.entries.insert(
            key.to_owned(),
            Entry {
                value: Value::Text(value.to_owned()),
                expires_at,
            },
        );
        self.notify(key, "set");
        if expires_at.is_some() {
            self.notify(key, "expire");
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.purge_expired(key);
        if self.entries.remove(key).is_some() {
            self.notify(key, "del");
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.purge_expired(key);
        if ttl.is_zero() {
            return self.delete(key).await;
        }
        let touched = match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        };
        if touched {
            self.notify(key, "expire");
        }
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let pattern = KeyPattern::new(pattern);
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.value().is_expired() && pattern.matches(e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.with_hash(key, |fields| {
            fields.insert(field.to_owned(), value.to_owned());
        })?;
        self.notify(key, "hset");
        Ok(())
    }

    async fn hash_set_many(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<(), StoreError> {
        self.with_hash(key, |existing| {
            existing.extend(fields.iter().cloned());
        })?;
        self.notify(key, "hset");
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        match self.live_value(key) {
            None => Ok(None),
            Some(Value::Hash(fields)) => Ok(fields.get(field).cloned()),
            Some(Value::Text(_)) => Err(wrong_type(key)),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        match self.live_value(key) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(fields)) => Ok(fields),
            Some(Value::Text(_)) => Err(wrong_type(key)),
        }
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<(), StoreError> {
        self.purge_expired(key);
        let removed = match self.entries.get_mut(key) {
            None => false,
            Some(mut entry) => match &mut entry.value {
                Value::Hash(fields) => fields.remove(field).is_some(),
                Value::Text(_) => return Err(wrong_type(key)),
            },
        };
        self.entries
            .remove_if(key, |_, e| matches!(&e.value, Value::Hash(f) if f.is_empty()));
        if removed {
            self.notify(key, "hdel");
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError> {
        // No subscribers is not an error.
        let _ = self.bus.send(Message::new(channel, message));
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, StoreError> {
        let channel = channel.to_owned();
        Ok(self.feed(move |name| name == channel))
    }

    async fn psubscribe(&self, pattern: &str) -> Result<MessageStream, StoreError> {
        let pattern = KeyPattern::new(pattern);
        Ok(self.feed(move |name| pattern.matches(name)))
    }

    async fn enable_keyspace_events(&self) -> Result<(), StoreError> {
        self.notifications.store(true, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ttl_expires_lazily() {
        let store = MemoryBackend::new();
        store
            .set("k", "v", Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.keys("*").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_means_no_expiry() {
        let store = MemoryBackend::new();
        store.set("k", "v", Some(Duration::ZERO)).await.unwrap();

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn wrong_type_is_reported() {
        let store = MemoryBackend::new();
        store.set("k", "v", None).await.unwrap();
        assert!(store.hash_set("k", "f", "x").await.is_err());
        store.hash_set("h", "f", "x").await.unwrap();
        assert!(store.get("h").await.is_err());
    }

    #[tokio::test]
    async fn hash_delete_removes_empty_hash() {
        let store = MemoryBackend::new();
        store.hash_set("h", "f", "x").await.unwrap();
        store.hash_delete("h", "f").await.unwrap();
        assert!(store.keys("h").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keyspace_events_follow_writes() {
        let store = MemoryBackend::new();
        store.enable_keyspace_events().await.unwrap();
        let mut feed = store.psubscribe("__keyspace@0__:*").await.unwrap();

        store.set("alpha", "1", None).await.unwrap();
        store.delete("alpha").await.unwrap();

        let first = feed.next().await.unwrap();
        assert_eq!(first.channel, "__keyspace@0__:alpha");
        assert_eq!(first.payload, "set");
        let second = feed.next().await.unwrap();
        assert_eq!(second.payload, "del");
    }

    #[tokio::test]
    async fn subscribe_filters_by_exact_channel() {
        let store = MemoryBackend::new();
        let mut feed = store.subscribe("wanted").await.unwrap();

        store.publish("other", "nope").await.unwrap();
        store.publish("wanted", "yes").await.unwrap();

        let msg = feed.next().await.unwrap();
        assert_eq!(msg, Message::new("wanted", "yes"));
    }
}
