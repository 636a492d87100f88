//! PhishGuard Cache Substrate
//!
//! Uniform key/value + sorted-set interface with three backends:
//!
//! - [`LocalCache`]: process-wide map with lazy expiry and a sweep task
//! - [`RedisCache`]: distributed backend with native TTLs and sorted sets
//! - [`ResilientCache`]: composes the two behind a circuit breaker so
//!   callers keep working while the distributed backend is unavailable
//!
//! Keys are versioned and namespaced by callers (`dedup:hash:v1:<h>`,
//! `rate:window:v1:<mailbox>`, `msgid:v1:<id>`); every entry carries an
//! absolute TTL and expiry is the only cleanup mechanism on the
//! distributed side.

pub mod distributed;
pub mod local;
pub mod pipeline;
pub mod resilient;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use distributed::RedisCache;
pub use local::LocalCache;
pub use pipeline::{Pipeline, PipelineOp, PipelineOutcome, PipelineValue};
pub use resilient::ResilientCache;

/// Cache backend error
#[derive(Debug, Error, Clone)]
pub enum CacheError {
    /// Backend rejected or failed the operation
    #[error("cache backend error: {0}")]
    Backend(String),
    /// Backend unreachable
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    /// Operation exceeded its deadline
    #[error("cache operation timed out")]
    Timeout,
}

/// Result alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Uniform async cache interface implemented by every backend.
///
/// Sorted-set scores are f64 (callers use epoch milliseconds);
/// `f64::NEG_INFINITY` / `f64::INFINITY` are valid range bounds.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;
    async fn exists(&self, key: &str) -> CacheResult<bool>;
    async fn delete(&self, key: &str) -> CacheResult<()>;
    /// Increment an integer value, creating it at 1 with `ttl` when absent
    async fn increment(&self, key: &str, ttl: Duration) -> CacheResult<i64>;
    /// Atomic set-if-absent; returns true when this caller won the key
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;
    /// Refresh a key's TTL; returns false when the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;
    async fn zadd(&self, key: &str, member: &str, score: f64) -> CacheResult<()>;
    async fn zcount(&self, key: &str, min: f64, max: f64) -> CacheResult<u64>;
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> CacheResult<u64>;
    /// Execute a batch of operations in one round trip, returning per-op
    /// results in order. Callers must tolerate partial failure.
    async fn exec_pipeline(&self, ops: Vec<PipelineOp>) -> Vec<PipelineOutcome>;
}
