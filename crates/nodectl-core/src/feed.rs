// ── Control feed ──
//
// Subscription to the control channel that reopens itself. A feed ends when
// the store connection drops; subscribe errors back off exponentially until
// the store is reachable again.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use nodectl_store::{Message, MessageStream, Store, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delays between resubscription attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResubscribeConfig {
    /// Wait after a feed ends and before the first retry. Default: 1s.
    pub initial_delay: Duration,
    /// Upper bound on the doubling delay. Default: 30s.
    pub max_delay: Duration,
}

impl Default for ResubscribeConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ResubscribeConfig {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Messages from one channel, across any number of subscriptions.
pub struct ControlFeed {
    store: Arc<Store>,
    channel: String,
    backoff: ResubscribeConfig,
    current: Option<MessageStream>,
    attempt: u32,
}

impl ControlFeed {
    /// A feed with no subscription yet. The first [`next`](Self::next)
    /// subscribes if [`open`](Self::open) was not called or failed.
    pub fn new(store: Arc<Store>, channel: impl Into<String>, backoff: ResubscribeConfig) -> Self {
        Self {
            store,
            channel: channel.into(),
            backoff,
            current: None,
            attempt: 0,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Subscribe now, so messages published after this returns are seen.
    pub async fn open(&mut self) -> Result<(), StoreError> {
        let feed = self.store.subscribe(&self.channel).await?;
        info!(channel = %self.channel, "subscribed to control channel");
        self.current = Some(feed);
        self.attempt = 0;
        Ok(())
    }

    /// Next message, resubscribing as often as needed. `None` only once
    /// `cancel` fires.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Option<Message> {
        loop {
            if self.current.is_none() {
                if let Err(e) = self.open().await {
                    let delay = self.backoff.delay(self.attempt);
                    warn!(channel = %self.channel, error = %e, attempt = self.attempt, ?delay, "control subscription failed");
                    self.attempt = self.attempt.saturating_add(1);
                    if !pause(cancel, delay).await {
                        return None;
                    }
                    continue;
                }
            }
            let Some(feed) = self.current.as_mut() else {
                continue;
            };

            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                msg = feed.next() => msg,
            };
            match next {
                Some(msg) => return Some(msg),
                None => {
                    warn!(channel = %self.channel, "control subscription closed, resubscribing");
                    self.current = None;
                    if !pause(cancel, self.backoff.initial_delay).await {
                        return None;
                    }
                }
            }
        }
    }
}

/// Sleep for `delay`. `false` if cancelled first.
async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            debug!("resubscribe wait cancelled");
            false
        }
        () = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use nodectl_store::{MemoryBackend, StoreBackend, Topology};
    use pretty_assertions::assert_eq;

    use super::*;

    /// Memory store whose first `subscribe` hands out an already-ended feed
    /// and whose next `failures` subscribes are refused, as after a restart.
    pub(crate) struct FlakyBackend {
        inner: MemoryBackend,
        subscribes: Arc<AtomicUsize>,
        failures: usize,
    }

    impl FlakyBackend {
        pub(crate) fn new(failures: usize) -> (Self, Arc<AtomicUsize>) {
            let subscribes = Arc::new(AtomicUsize::new(0));
            let backend = Self {
                inner: MemoryBackend::new(),
                subscribes: Arc::clone(&subscribes),
                failures,
            };
            (backend, subscribes)
        }
    }

    #[async_trait]
    impl StoreBackend for FlakyBackend {
        fn topology(&self) -> Topology {
            Topology::Standalone
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }
        async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
            self.inner.expire(key, ttl).await
        }
        async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
            self.inner.keys(pattern).await
        }
        async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
            self.inner.hash_set(key, field, value).await
        }
        async fn hash_set_many(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
            self.inner.hash_set_many(key, fields).await
        }
        async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
            self.inner.hash_get(key, field).await
        }
        async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
            self.inner.hash_get_all(key).await
        }
        async fn hash_delete(&self, key: &str, field: &str) -> Result<(), StoreError> {
            self.inner.hash_delete(key, field).await
        }
        async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError> {
            self.inner.publish(channel, message).await
        }
        async fn subscribe(&self, channel: &str) -> Result<MessageStream, StoreError> {
            let feed = self.inner.subscribe(channel).await?;
            let call = self.subscribes.load(Ordering::SeqCst);
            let result = if call == 0 {
                Ok(futures_util::stream::empty::<Message>().boxed())
            } else if call <= self.failures {
                Err(StoreError::Backend {
                    message: "connection refused".into(),
                })
            } else {
                Ok(feed)
            };
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            result
        }
        async fn psubscribe(&self, pattern: &str) -> Result<MessageStream, StoreError> {
            self.inner.psubscribe(pattern).await
        }
        async fn enable_keyspace_events(&self) -> Result<(), StoreError> {
            self.inner.enable_keyspace_events().await
        }
    }

    pub(crate) const FAST: ResubscribeConfig = ResubscribeConfig {
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    };

    #[test]
    fn delay_doubles_up_to_the_cap() {
        let backoff = ResubscribeConfig::default();
        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(4), Duration::from_secs(16));
        assert_eq!(backoff.delay(5), Duration::from_secs(30));
        assert_eq!(backoff.delay(40), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn ended_feed_is_reopened() {
        let (backend, subscribes) = FlakyBackend::new(2);
        let store = Arc::new(Store::new(backend));
        let mut feed = ControlFeed::new(Arc::clone(&store), "control", FAST);
        feed.open().await.unwrap();
        let cancel = CancellationToken::new();

        let publisher = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                while subscribes.load(Ordering::SeqCst) < 4 {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
                store.publish("control", "after restart").await.unwrap();
            })
        };

        let msg = tokio::time::timeout(Duration::from_secs(5), feed.next(&cancel))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, "after restart");
        publisher.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_interrupts_the_wait_between_attempts() {
        let (backend, _) = FlakyBackend::new(usize::MAX);
        let store = Arc::new(Store::new(backend));
        let mut feed = ControlFeed::new(store, "control", ResubscribeConfig::default());
        feed.open().await.unwrap();
        let cancel = CancellationToken::new();

        let stopper = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            })
        };

        let next = tokio::time::timeout(Duration::from_millis(500), feed.next(&cancel))
            .await
            .unwrap();
        assert!(next.is_none());
        assert_eq!(feed.channel(), "control");
        stopper.await.unwrap();
    }
}
