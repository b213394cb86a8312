// ── Redis-backed store ──
//
// One generic backend over any async Redis connection type. The three
// deployments differ only in how a connection and a pub/sub session are
// obtained, so each is a pair of connector closures built once here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use redis::aio::{ConnectionLike, MultiplexedConnection, PubSub};
use redis::cluster::ClusterClientBuilder;
use redis::cluster_async::ClusterConnection;
use redis::sentinel::{Sentinel, SentinelNodeConnectionInfo};
use redis::{AsyncCommands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisResult};
use secrecy::ExposeSecret;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backend::{Message, MessageStream, StoreBackend};
use crate::config::{StoreConfig, Topology, parse_endpoint};
use crate::error::StoreError;

type Connector<T> = Arc<dyn Fn() -> BoxFuture<'static, RedisResult<T>> + Send + Sync>;

/// Redis backend for one deployment shape.
///
/// Connections are established lazily on first use and cached; a dropped
/// or failed connection is discarded so the next call redials.
pub struct RedisBackend<C> {
    topology: Topology,
    connection: Mutex<Option<C>>,
    connect: Connector<C>,
    pubsub: Connector<PubSub>,
}

/// Build the backend matching `config`'s topology. No network I/O happens here.
pub fn open(config: &StoreConfig) -> Result<Box<dyn StoreBackend>, StoreError> {
    Ok(match config.topology()? {
        Topology::Standalone => Box::new(RedisBackend::standalone(config)?),
        Topology::Cluster => Box::new(RedisBackend::cluster(config)?),
        Topology::Sentinel => Box::new(RedisBackend::sentinel(config)?),
    })
}

impl RedisBackend<MultiplexedConnection> {
    pub fn standalone(config: &StoreConfig) -> Result<Self, StoreError> {
        let endpoint = config
            .endpoints()
            .first()
            .copied()
            .ok_or_else(|| StoreError::Configuration {
                message: "standalone topology needs one endpoint".into(),
            })?;
        let info = node_info(endpoint, config, config.db)?;
        let client = redis::Client::open(info).map_err(invalid)?;

        let (connect_timeout, response_timeout) = (config.connect_timeout, config.response_timeout);
        let data_client = client.clone();
        let connect: Connector<MultiplexedConnection> = Arc::new(move || {
            let client = data_client.clone();
            async move {
                client
                    .get_multiplexed_async_connection_with_timeouts(
                        response_timeout,
                        connect_timeout,
                    )
                    .await
            }
            .boxed()
        });
        let pubsub: Connector<PubSub> = Arc::new(move || {
            let client = client.clone();
            async move { client.get_async_pubsub().await }.boxed()
        });

        Ok(Self::new(Topology::Standalone, connect, pubsub))
    }

    /// Master resolved through the sentinels on every (re)connect, so a
    /// failover is picked up the next time the connection is redialled.
    pub fn sentinel(config: &StoreConfig) -> Result<Self, StoreError> {
        let master = config
            .master()
            .ok_or_else(|| StoreError::Configuration {
                message: "sentinel topology needs a master name".into(),
            })?
            .to_owned();
        let sentinels = config
            .sentinel_endpoints()
            .into_iter()
            .map(sentinel_info)
            .collect::<Result<Vec<_>, _>>()?;
        let db = config.db;
        let password = config
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_owned());

        let resolve: Connector<redis::Client> = Arc::new(move || {
            let sentinels = sentinels.clone();
            let master = master.clone();
            let node = SentinelNodeConnectionInfo {
                tls_mode: None,
                redis_connection_info: Some(RedisConnectionInfo {
                    db,
                    password: password.clone(),
                    ..Default::default()
                }),
            };
            async move {
                let mut sentinel = Sentinel::build(sentinels)?;
                let client = sentinel.async_master_for(&master, Some(&node)).await?;
                debug!(master = %master, "resolved master through sentinels");
                Ok::<_, redis::RedisError>(client)
            }
            .boxed()
        });

        let (connect_timeout, response_timeout) = (config.connect_timeout, config.response_timeout);
        let data_resolve = Arc::clone(&resolve);
        let connect: Connector<MultiplexedConnection> = Arc::new(move || {
            let resolve = Arc::clone(&data_resolve);
            async move {
                let client = resolve().await?;
                client
                    .get_multiplexed_async_connection_with_timeouts(
                        response_timeout,
                        connect_timeout,
                    )
                    .await
            }
            .boxed()
        });
        let pubsub: Connector<PubSub> = Arc::new(move || {
            let resolve = Arc::clone(&resolve);
            async move { resolve().await?.get_async_pubsub().await }.boxed()
        });

        Ok(Self::new(Topology::Sentinel, connect, pubsub))
    }
}

impl RedisBackend<ClusterConnection> {
    /// Pub/sub runs on a plain connection to the first node; cluster
    /// PUBLISH is propagated to every node.
    pub fn cluster(config: &StoreConfig) -> Result<Self, StoreError> {
        if config.db != 0 {
            warn!(db = config.db, "cluster topology ignores the logical database index");
        }
        let nodes = config
            .endpoints()
            .into_iter()
            .map(|endpoint| node_info(endpoint, config, 0))
            .collect::<Result<Vec<_>, _>>()?;
        let first = nodes.first().cloned().ok_or_else(|| StoreError::Configuration {
            message: "cluster topology needs at least one endpoint".into(),
        })?;

        let mut builder = ClusterClientBuilder::new(nodes)
            .connection_timeout(config.connect_timeout)
            .response_timeout(config.response_timeout);
        if let Some(password) = &config.password {
            builder = builder.password(password.expose_secret().to_owned());
        }
        let client = builder.build().map_err(invalid)?;
        let pubsub_client = redis::Client::open(first).map_err(invalid)?;

        let connect: Connector<ClusterConnection> = Arc::new(move || {
            let client = client.clone();
            async move { client.get_async_connection().await }.boxed()
        });
        let pubsub: Connector<PubSub> = Arc::new(move || {
            let client = pubsub_client.clone();
            async move { client.get_async_pubsub().await }.boxed()
        });

        Ok(Self::new(Topology::Cluster, connect, pubsub))
    }
}

impl<C> RedisBackend<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    fn new(topology: Topology, connect: Connector<C>, pubsub: Connector<PubSub>) -> Self {
        Self {
            topology,
            connection: Mutex::new(None),
            connect,
            pubsub,
        }
    }

    async fn connection(&self) -> Result<C, StoreError> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = (self.connect)().await?;
        debug!(topology = %self.topology, "store connection established");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Pass the result through, discarding the cached connection if it broke.
    async fn settle<T>(&self, result: RedisResult<T>) -> Result<T, StoreError> {
        if let Err(e) = &result {
            if e.is_connection_dropped() || e.is_io_error() {
                debug!(topology = %self.topology, error = %e, "dropping broken store connection");
                self.connection.lock().await.take();
            }
        }
        result.map_err(StoreError::from)
    }

    async fn open_pubsub(&self) -> Result<PubSub, StoreError> {
        Ok((self.pubsub)().await?)
    }
}

#[async_trait]
impl<C> StoreBackend for RedisBackend<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    fn topology(&self) -> Topology {
        self.topology
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let result: RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        self.settle(result).await.map(|_| ())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let result: RedisResult<Option<String>> = conn.get(key).await;
        self.settle(result).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl.filter(|t| !t.is_zero()) {
            cmd.arg("PX").arg(millis(ttl));
        }
        let result: RedisResult<()> = cmd.query_async(&mut conn).await;
        self.settle(result).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let result: RedisResult<()> = conn.del(key).await;
        self.settle(result).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let result: RedisResult<()> = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await;
        self.settle(result).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection().await?;
        let result: RedisResult<Vec<String>> = conn.keys(pattern).await;
        self.settle(result).await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let result: RedisResult<()> = conn.hset(key, field, value).await;
        self.settle(result).await
    }

    async fn hash_set_many(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let result: RedisResult<()> = conn.hset_multiple(key, fields).await;
        self.settle(result).await
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let result: RedisResult<Option<String>> = conn.hget(key, field).await;
        self.settle(result).await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.connection().await?;
        let result: RedisResult<HashMap<String, String>> = conn.hgetall(key).await;
        self.settle(result).await
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let result: RedisResult<()> = conn.hdel(key, field).await;
        self.settle(result).await
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let result: RedisResult<()> = conn.publish(channel, message).await;
        self.settle(result).await
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, StoreError> {
        let mut pubsub = self.open_pubsub().await?;
        pubsub.subscribe(channel).await?;
        debug!(topology = %self.topology, channel, "subscribed");
        Ok(into_feed(pubsub))
    }

    async fn psubscribe(&self, pattern: &str) -> Result<MessageStream, StoreError> {
        let mut pubsub = self.open_pubsub().await?;
        pubsub.psubscribe(pattern).await?;
        debug!(topology = %self.topology, pattern, "pattern-subscribed");
        Ok(into_feed(pubsub))
    }

    async fn enable_keyspace_events(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let result: RedisResult<()> = redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg("AKE")
            .query_async(&mut conn)
            .await;
        self.settle(result).await
    }

    async fn close(&self) {
        self.connection.lock().await.take();
    }
}

fn into_feed(pubsub: PubSub) -> MessageStream {
    pubsub
        .into_on_message()
        .filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(Message::new(msg.get_channel_name(), payload)),
                Err(e) => {
                    warn!(channel = msg.get_channel_name(), error = %e, "dropping non-UTF-8 pub/sub payload");
                    None
                }
            }
        })
        .boxed()
}

fn node_info(endpoint: &str, config: &StoreConfig, db: i64) -> Result<ConnectionInfo, StoreError> {
    let (host, port) = parse_endpoint(endpoint)?;
    Ok(ConnectionInfo {
        addr: ConnectionAddr::Tcp(host, port),
        redis: RedisConnectionInfo {
            db,
            password: config
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_owned()),
            ..Default::default()
        },
    })
}

fn sentinel_info(endpoint: &str) -> Result<ConnectionInfo, StoreError> {
    let (host, port) = parse_endpoint(endpoint)?;
    Ok(ConnectionInfo {
        addr: ConnectionAddr::Tcp(host, port),
        redis: RedisConnectionInfo::default(),
    })
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

fn invalid(err: redis::RedisError) -> StoreError {
    StoreError::Configuration {
        message: err.to_string(),
    }
}
