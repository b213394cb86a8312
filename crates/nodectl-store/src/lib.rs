//! Uniform async access to a Redis-compatible store.
//!
//! One [`Store`] handle fronts exactly one deployment shape (standalone,
//! cluster, or sentinel-managed), chosen once from [`StoreConfig`]. Callers
//! never branch on topology; every operation goes through the same
//! serialised facade.
//!
//! ```text
//! StoreConfig ──► Store::connect ──► Box<dyn StoreBackend>
//!                     │                 ├─ RedisBackend<MultiplexedConnection>
//!                     │                 ├─ RedisBackend<ClusterConnection>
//!                     │                 └─ MemoryBackend
//!                     └─ guard: every call holds it end to end
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod facade;
pub mod memory;
pub mod redis_backend;

pub use backend::{Message, MessageStream, StoreBackend};
pub use config::{DEFAULT_PORT, ProbePolicy, StoreConfig, Topology, parse_endpoint};
pub use error::StoreError;
pub use facade::{KeyspaceEvent, Store};
pub use memory::MemoryBackend;
pub use redis_backend::RedisBackend;
