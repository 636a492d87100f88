//! Resilient cache wrapper
//!
//! Composes a distributed backend with the local backend behind a
//! circuit breaker. Reads fall back to local when the distributed side
//! fails or times out; writes always write through to local so reads
//! stay consistent during degradation. No method raises on backend
//! unavailability.

use crate::pipeline::{PipelineOp, PipelineOutcome};
use crate::{CacheError, CacheResult, CacheStore, LocalCache};
use async_trait::async_trait;
use phishguard_common::{BreakerConfig, BreakerState, CircuitBreaker};
use std::sync::Arc;
use std::time::Duration;

/// Circuit-breaker-protected cache with local fallback
pub struct ResilientCache {
    primary: Option<Arc<dyn CacheStore>>,
    local: Arc<LocalCache>,
    breaker: CircuitBreaker,
    op_timeout: Duration,
}

impl ResilientCache {
    /// Wrap a distributed backend. Pass `None` for single-replica
    /// deployments with no distributed cache configured.
    pub fn new(primary: Option<Arc<dyn CacheStore>>, local: Arc<LocalCache>) -> Self {
        let config = BreakerConfig {
            call_timeout: Duration::from_secs(2),
            error_threshold_pct: 50,
            volume_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            window: Duration::from_secs(60),
        };
        Self::with_breaker(primary, local, config)
    }

    /// Wrap with explicit breaker tuning
    pub fn with_breaker(
        primary: Option<Arc<dyn CacheStore>>,
        local: Arc<LocalCache>,
        config: BreakerConfig,
    ) -> Self {
        let op_timeout = config.call_timeout;
        Self {
            primary,
            local,
            breaker: CircuitBreaker::new("cache", config),
            op_timeout,
        }
    }

    /// True when a distributed backend is configured
    pub fn has_distributed(&self) -> bool {
        self.primary.is_some()
    }

    /// True when the distributed backend is configured but the breaker
    /// is not closed (multi-replica guarantees are weakened)
    pub fn is_degraded(&self) -> bool {
        self.primary.is_some() && self.breaker.state() != BreakerState::Closed
    }

    /// Handle to the local fallback backend
    pub fn local(&self) -> &Arc<LocalCache> {
        &self.local
    }

    async fn primary_call<T, F>(&self, op: F) -> Option<T>
    where
        F: std::future::Future<Output = CacheResult<T>>,
    {
        match self.breaker.call(op).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(error = %e, "distributed cache degraded, using local fallback");
                None
            }
        }
    }
}

#[async_trait]
impl CacheStore for ResilientCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        if let Some(primary) = self.primary.clone() {
            if let Some(v) = self.primary_call(async move { primary.get(key).await }).await {
                return Ok(v);
            }
        }
        self.local.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        if let Some(primary) = self.primary.clone() {
            let _ = self
                .primary_call(async move { primary.set(key, value, ttl).await })
                .await;
        }
        self.local.set(key, value, ttl).await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        if let Some(primary) = self.primary.clone() {
            if let Some(v) = self
                .primary_call(async move { primary.exists(key).await })
                .await
            {
                return Ok(v);
            }
        }
        self.local.exists(key).await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        if let Some(primary) = self.primary.clone() {
            let _ = self
                .primary_call(async move { primary.delete(key).await })
                .await;
        }
        self.local.delete(key).await
    }

    async fn increment(&self, key: &str, ttl: Duration) -> CacheResult<i64> {
        let local_value = self.local.increment(key, ttl).await?;
        if let Some(primary) = self.primary.clone() {
            if let Some(v) = self
                .primary_call(async move { primary.increment(key, ttl).await })
                .await
            {
                return Ok(v);
            }
        }
        Ok(local_value)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        if let Some(primary) = self.primary.clone() {
            if let Some(won) = self
                .primary_call(async move { primary.set_if_absent(key, value, ttl).await })
                .await
            {
                // Mirror the key locally either way so degraded reads agree.
                self.local.set(key, value, ttl).await?;
                return Ok(won);
            }
        }
        self.local.set_if_absent(key, value, ttl).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut refreshed = None;
        if let Some(primary) = self.primary.clone() {
            refreshed = self
                .primary_call(async move { primary.expire(key, ttl).await })
                .await;
        }
        let local = self.local.expire(key, ttl).await?;
        Ok(refreshed.unwrap_or(local))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> CacheResult<()> {
        if let Some(primary) = self.primary.clone() {
            let _ = self
                .primary_call(async move { primary.zadd(key, member, score).await })
                .await;
        }
        self.local.zadd(key, member, score).await
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> CacheResult<u64> {
        if let Some(primary) = self.primary.clone() {
            if let Some(v) = self
                .primary_call(async move { primary.zcount(key, min, max).await })
                .await
            {
                return Ok(v);
            }
        }
        self.local.zcount(key, min, max).await
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> CacheResult<u64> {
        let mut removed = None;
        if let Some(primary) = self.primary.clone() {
            removed = self
                .primary_call(async move { primary.zremrangebyscore(key, min, max).await })
                .await;
        }
        let local = self.local.zremrangebyscore(key, min, max).await?;
        Ok(removed.unwrap_or(local))
    }

    async fn exec_pipeline(&self, ops: Vec<PipelineOp>) -> Vec<PipelineOutcome> {
        if let Some(primary) = &self.primary {
            if self.breaker.try_acquire() {
                let attempt =
                    tokio::time::timeout(self.op_timeout, primary.exec_pipeline(ops.clone())).await;
                match attempt {
                    Ok(results) => {
                        let transport_failed = !results.is_empty()
                            && results.iter().all(|r| {
                                matches!(
                                    r,
                                    Err(CacheError::Unavailable(_)) | Err(CacheError::Timeout)
                                )
                            });
                        if transport_failed {
                            self.breaker.record_failure();
                        } else {
                            self.breaker.record_success();
                            // Write-through so degraded reads stay consistent.
                            let writes: Vec<PipelineOp> =
                                ops.iter().filter(|op| op.is_write()).cloned().collect();
                            if !writes.is_empty() {
                                self.local.exec_pipeline(writes).await;
                            }
                            return results;
                        }
                    }
                    Err(_) => self.breaker.record_failure(),
                }
                tracing::warn!("cache pipeline degraded, executing on local backend");
            }
        }
        self.local.exec_pipeline(ops).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pipeline;

    struct FailingStore;

    #[async_trait]
    impl CacheStore for FailingStore {
        async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn exists(&self, _key: &str) -> CacheResult<bool> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn delete(&self, _key: &str) -> CacheResult<()> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn increment(&self, _key: &str, _ttl: Duration) -> CacheResult<i64> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn set_if_absent(&self, _k: &str, _v: &str, _t: Duration) -> CacheResult<bool> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn expire(&self, _key: &str, _ttl: Duration) -> CacheResult<bool> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn zadd(&self, _key: &str, _member: &str, _score: f64) -> CacheResult<()> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn zcount(&self, _key: &str, _min: f64, _max: f64) -> CacheResult<u64> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn zremrangebyscore(&self, _key: &str, _min: f64, _max: f64) -> CacheResult<u64> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn exec_pipeline(&self, ops: Vec<PipelineOp>) -> Vec<PipelineOutcome> {
            ops.iter()
                .map(|_| Err(CacheError::Unavailable("down".into())))
                .collect()
        }
    }

    #[tokio::test]
    async fn falls_back_to_local_when_primary_down() {
        let cache = ResilientCache::new(
            Some(Arc::new(FailingStore)),
            Arc::new(LocalCache::new()),
        );
        cache.set("k", "v", Duration::from_secs(5)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn no_primary_behaves_as_local() {
        let cache = ResilientCache::new(None, Arc::new(LocalCache::new()));
        assert!(!cache.has_distributed());
        assert!(!cache.is_degraded());
        assert!(cache
            .set_if_absent("msgid:v1:x", "1", Duration::from_secs(5))
            .await
            .unwrap());
        assert!(!cache
            .set_if_absent("msgid:v1:x", "1", Duration::from_secs(5))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn pipeline_falls_back_and_trips_breaker() {
        let cache = ResilientCache::new(
            Some(Arc::new(FailingStore)),
            Arc::new(LocalCache::new()),
        );
        for _ in 0..6 {
            let results = Pipeline::new()
                .set("a", "1", Duration::from_secs(5))
                .exists("a")
                .exec(&cache)
                .await;
            assert!(results.iter().all(|r| r.is_ok()));
        }
        assert!(cache.is_degraded());
    }

    #[tokio::test]
    async fn write_through_keeps_local_consistent() {
        // Primary that works: use another LocalCache as the "distributed" side.
        let primary: Arc<dyn CacheStore> = Arc::new(LocalCache::new());
        let local = Arc::new(LocalCache::new());
        let cache = ResilientCache::new(Some(primary), Arc::clone(&local));
        cache.set("k", "v", Duration::from_secs(5)).await.unwrap();
        assert_eq!(local.get("k").await.unwrap(), Some("v".to_string()));
    }
}
