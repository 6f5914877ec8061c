//! Query engine services: pool, cache, retrying orchestrator and statistics

pub mod cache;
pub mod connection;
pub mod data_source;
pub mod stats;
pub mod worker_pool;

pub use cache::{Cache, CacheManager, CacheRef, SweepReport};
pub use connection::{ConnectionFactory, HttpConnectionFactory, TransportError};
pub use data_source::{DataSource, DataSourceRegistry};
pub use stats::{Counter, Stats, StatsReport};
pub use worker_pool::{AdaptiveWorkerPool, PoolConfig};
