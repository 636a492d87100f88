//! In-process cache backend
//!
//! DashMap-backed key/value and sorted-set store with absolute TTLs.
//! Expiry is enforced lazily on access and by a periodic sweep task, so
//! correctness never depends on the sweeper running.

use crate::pipeline::{PipelineOp, PipelineOutcome, PipelineValue};
use crate::{CacheResult, CacheStore};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct KvEntry {
    value: String,
    expires_at: Instant,
}

impl KvEntry {
    fn live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Debug, Clone, Default)]
struct ZSetEntry {
    members: HashMap<String, f64>,
    expires_at: Option<Instant>,
}

impl ZSetEntry {
    fn live(&self) -> bool {
        self.expires_at.map(|e| Instant::now() < e).unwrap_or(true)
    }
}

/// Process-wide cache backend
pub struct LocalCache {
    kv: DashMap<String, KvEntry>,
    zsets: DashMap<String, ZSetEntry>,
    sweeping: AtomicBool,
}

impl LocalCache {
    pub fn new() -> Self {
        Self {
            kv: DashMap::new(),
            zsets: DashMap::new(),
            sweeping: AtomicBool::new(false),
        }
    }

    /// Spawn the periodic expiry sweep. Idempotent; stops when
    /// [`LocalCache::stop_sweep`] is called.
    pub fn start_sweep(self: &Arc<Self>, every: Duration) {
        if self.sweeping.swap(true, Ordering::SeqCst) {
            return;
        }
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            while cache.sweeping.load(Ordering::SeqCst) {
                tick.tick().await;
                cache.sweep();
            }
        });
    }

    /// Stop the sweep task cooperatively
    pub fn stop_sweep(&self) {
        self.sweeping.store(false, Ordering::SeqCst);
    }

    /// Drop every expired entry now
    pub fn sweep(&self) {
        self.kv.retain(|_, e| e.live());
        self.zsets.retain(|_, e| e.live());
    }

    /// Entries currently held (testing / introspection)
    pub fn len(&self) -> usize {
        self.kv.len() + self.zsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for LocalCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        // Clone out of the shard guard before any removal on the same key.
        let hit = self.kv.get(key).map(|e| (e.value.clone(), e.live()));
        match hit {
            Some((value, true)) => Ok(Some(value)),
            Some((_, false)) => {
                self.kv.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.kv.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.kv.remove(key);
        self.zsets.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> CacheResult<i64> {
        let mut entry = self.kv.entry(key.to_string()).or_insert_with(|| KvEntry {
            value: "0".to_string(),
            expires_at: Instant::now() + ttl,
        });
        if !entry.live() {
            entry.value = "0".to_string();
            entry.expires_at = Instant::now() + ttl;
        }
        let next = entry.value.parse::<i64>().unwrap_or(0) + 1;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let mut won = false;
        let mut entry = self.kv.entry(key.to_string()).or_insert_with(|| {
            won = true;
            KvEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            }
        });
        if !won && !entry.live() {
            entry.value = value.to_string();
            entry.expires_at = Instant::now() + ttl;
            won = true;
        }
        Ok(won)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        if let Some(mut e) = self.kv.get_mut(key) {
            if e.live() {
                e.expires_at = Instant::now() + ttl;
                return Ok(true);
            }
        }
        if let Some(mut z) = self.zsets.get_mut(key) {
            if z.live() {
                z.expires_at = Some(Instant::now() + ttl);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> CacheResult<()> {
        let mut entry = self.zsets.entry(key.to_string()).or_default();
        if !entry.live() {
            entry.members.clear();
            entry.expires_at = None;
        }
        entry.members.insert(member.to_string(), score);
        Ok(())
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> CacheResult<u64> {
        Ok(match self.zsets.get(key) {
            Some(e) if e.live() => e
                .members
                .values()
                .filter(|&&s| s >= min && s <= max)
                .count() as u64,
            _ => 0,
        })
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> CacheResult<u64> {
        Ok(match self.zsets.get_mut(key) {
            Some(mut e) if e.live() => {
                let before = e.members.len();
                e.members.retain(|_, &mut s| s < min || s > max);
                (before - e.members.len()) as u64
            }
            _ => 0,
        })
    }

    async fn exec_pipeline(&self, ops: Vec<PipelineOp>) -> Vec<PipelineOutcome> {
        let mut out = Vec::with_capacity(ops.len());
        for op in ops {
            let outcome = match op {
                PipelineOp::Get { key } => self.get(&key).await.map(|v| match v {
                    Some(s) => PipelineValue::Text(s),
                    None => PipelineValue::Nil,
                }),
                PipelineOp::Set { key, value, ttl } => {
                    self.set(&key, &value, ttl).await.map(|_| PipelineValue::Ok)
                }
                PipelineOp::Exists { key } => {
                    self.exists(&key).await.map(PipelineValue::Bool)
                }
                PipelineOp::Delete { key } => {
                    self.delete(&key).await.map(|_| PipelineValue::Ok)
                }
                PipelineOp::Increment { key, ttl } => {
                    self.increment(&key, ttl).await.map(PipelineValue::Int)
                }
                PipelineOp::SetIfAbsent { key, value, ttl } => self
                    .set_if_absent(&key, &value, ttl)
                    .await
                    .map(PipelineValue::Bool),
                PipelineOp::Expire { key, ttl } => {
                    self.expire(&key, ttl).await.map(PipelineValue::Bool)
                }
                PipelineOp::ZAdd { key, member, score } => self
                    .zadd(&key, &member, score)
                    .await
                    .map(|_| PipelineValue::Ok),
                PipelineOp::ZCount { key, min, max } => self
                    .zcount(&key, min, max)
                    .await
                    .map(|n| PipelineValue::Int(n as i64)),
                PipelineOp::ZRemRangeByScore { key, min, max } => self
                    .zremrangebyscore(&key, min, max)
                    .await
                    .map(|n| PipelineValue::Int(n as i64)),
            };
            out.push(outcome);
        }
        out
    }
}
