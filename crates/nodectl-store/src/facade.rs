// ── Store facade ──
//
// Single owner of the backing connection. Every call takes the guard for
// its full duration, so concurrent producers never interleave on the wire.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{Message, MessageStream, StoreBackend};
use crate::config::{ProbePolicy, StoreConfig, Topology};
use crate::error::StoreError;
use crate::redis_backend;

/// A change notification observed through [`Store::watch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyspaceEvent {
    /// Raw notification channel, e.g. `__keyspace@0__:user:1`.
    pub channel: String,
    /// Key the event refers to, when the channel carries one.
    pub key: Option<String>,
    /// Operation name, e.g. `set`, `del`, `expired`.
    pub operation: String,
}

impl KeyspaceEvent {
    /// Interpret a pattern-subscription message.
    ///
    /// `__keyspace@N__:<key>` carries the operation as payload;
    /// `__keyevent@N__:<op>` carries the key as payload. Anything else is
    /// passed through with the payload as the operation.
    pub fn from_message(msg: Message) -> Self {
        let suffix = msg.channel.split_once("__:").map(|(_, rest)| rest.to_owned());
        if msg.channel.starts_with("__keyevent@") {
            if let Some(operation) = suffix {
                return Self {
                    channel: msg.channel,
                    key: Some(msg.payload),
                    operation,
                };
            }
        }
        let key = if msg.channel.starts_with("__keyspace@") {
            suffix
        } else {
            None
        };
        Self {
            channel: msg.channel,
            key,
            operation: msg.payload,
        }
    }
}

/// Uniform, serialised access to one store deployment.
///
/// Share it as `Arc<Store>` between tasks.
pub struct Store {
    backend: Box<dyn StoreBackend>,
    guard: Mutex<()>,
}

impl Store {
    /// Wrap an already-built backend.
    pub fn new(backend: impl StoreBackend + 'static) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    fn from_boxed(backend: Box<dyn StoreBackend>) -> Self {
        Self {
            backend,
            guard: Mutex::new(()),
        }
    }

    /// Build the backend for `config`, ping it, and enable keyspace
    /// notifications.
    ///
    /// A probe failure aborts under [`ProbePolicy::FailFast`] and is logged
    /// under [`ProbePolicy::Degraded`], whatever the topology.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let store = Self::from_boxed(redis_backend::open(config)?);
        let topology = store.topology();

        match store.ping().await {
            Ok(()) => {
                info!(%topology, "store connection established");
                if let Err(e) = store.enable_keyspace_events().await {
                    warn!(%topology, error = %e, "could not enable keyspace notifications");
                }
            }
            Err(e) => match config.probe_policy {
                ProbePolicy::FailFast => return Err(into_connection_error(topology, e)),
                ProbePolicy::Degraded => {
                    warn!(%topology, error = %e, "store ping failed, starting degraded");
                }
            },
        }

        Ok(store)
    }

    pub fn topology(&self) -> Topology {
        self.backend.topology()
    }

    // ── Plain keys ───────────────────────────────────────────────────

    pub async fn ping(&self) -> Result<(), StoreError> {
        let _guard = self.guard.lock().await;
        self.backend.ping().await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.guard.lock().await;
        self.backend.get(key).await
    }

    /// Write `value`. `ttl = None` keeps the key until deleted.
    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let _guard = self.guard.lock().await;
        self.backend.set(key, value, ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.guard.lock().await;
        self.backend.delete(key).await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let _guard = self.guard.lock().await;
        self.backend.expire(key, ttl).await
    }

    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let _guard = self.guard.lock().await;
        self.backend.keys(pattern).await
    }

    // ── Hashes ───────────────────────────────────────────────────────

    pub async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.guard.lock().await;
        self.backend.hash_set(key, field, value).await
    }

    pub async fn hash_set_many(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<(), StoreError> {
        let _guard = self.guard.lock().await;
        self.backend.hash_set_many(key, fields).await
    }

    pub async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.guard.lock().await;
        self.backend.hash_get(key, field).await
    }

    pub async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let _guard = self.guard.lock().await;
        self.backend.hash_get_all(key).await
    }

    pub async fn hash_delete(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let _guard = self.guard.lock().await;
        self.backend.hash_delete(key, field).await
    }

    /// Write a hash field, then put a TTL on the whole key.
    ///
    /// Two commands, not atomic: if the expiry step fails the field write
    /// stays in place and the error is returned.
    pub async fn set_with_expiry(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let _guard = self.guard.lock().await;
        self.backend.hash_set(key, field, value).await?;
        self.backend.expire(key, ttl).await
    }

    // ── Pub/sub ──────────────────────────────────────────────────────

    pub async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError> {
        let _guard = self.guard.lock().await;
        self.backend.publish(channel, message).await
    }

    /// Open a feed of messages on `channel`. The guard covers only the
    /// subscription handshake; consuming the feed does not hold it.
    pub async fn subscribe(&self, channel: &str) -> Result<MessageStream, StoreError> {
        let _guard = self.guard.lock().await;
        self.backend.subscribe(channel).await
    }

    /// Observe keyspace notifications matching `pattern` until `cancel`
    /// fires.
    ///
    /// The returned stream is lazy. On cancellation it ends and the
    /// underlying subscription is dropped.
    pub async fn watch(
        &self,
        pattern: &str,
        cancel: CancellationToken,
    ) -> Result<impl Stream<Item = KeyspaceEvent> + Send + 'static, StoreError> {
        let mut feed = {
            let _guard = self.guard.lock().await;
            self.backend.psubscribe(pattern).await?
        };
        let pattern = pattern.to_owned();

        Ok(async_stream::stream! {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    msg = feed.next() => match msg {
                        Some(msg) => {
                            let event = KeyspaceEvent::from_message(msg);
                            debug!(pattern = %pattern, key = ?event.key, op = %event.operation, "keyspace event");
                            yield event;
                        }
                        None => break,
                    }
                }
            }
            drop(feed);
            debug!(pattern = %pattern, "watch finished");
        })
    }

    pub async fn enable_keyspace_events(&self) -> Result<(), StoreError> {
        let _guard = self.guard.lock().await;
        self.backend.enable_keyspace_events().await
    }

    /// Release backend connections.
    pub async fn close(&self) {
        let _guard = self.guard.lock().await;
        self.backend.close().await;
    }
}

fn into_connection_error(topology: Topology, err: StoreError) -> StoreError {
    match err {
        StoreError::Operation(source) => StoreError::Connection { topology, source },
        other => other,
    }
}
