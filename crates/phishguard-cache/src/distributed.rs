//! Redis backend
//!
//! Distributed cache with native TTLs, sorted sets, and pipelining.
//! Keys get the configured deployment prefix so multiple environments
//! can share one cluster. Entry cleanup is TTL expiry only.

use crate::pipeline::{PipelineOp, PipelineOutcome, PipelineValue};
use crate::{CacheError, CacheResult, CacheStore};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::RedisError;
use std::time::Duration;

/// Distributed cache backend over Redis
pub struct RedisCache {
    conn: ConnectionManager,
    prefix: String,
}

fn map_err(e: RedisError) -> CacheError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        CacheError::Unavailable(e.to_string())
    } else if e.is_timeout() {
        CacheError::Timeout
    } else {
        CacheError::Backend(e.to_string())
    }
}

fn score_arg(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

impl RedisCache {
    /// Connect and return a backend handle. The connection manager
    /// reconnects on its own after transient drops.
    pub async fn connect(url: &str, prefix: &str) -> CacheResult<Self> {
        let client = redis::Client::open(url).map_err(map_err)?;
        let conn = ConnectionManager::new(client).await.map_err(map_err)?;
        tracing::info!(prefix, "connected to distributed cache");
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    fn apply_op(&self, pipe: &mut redis::Pipeline, op: &PipelineOp) {
        match op {
            PipelineOp::Get { key } => {
                pipe.cmd("GET").arg(self.key(key));
            }
            PipelineOp::Set { key, value, ttl } => {
                pipe.cmd("SET")
                    .arg(self.key(key))
                    .arg(value)
                    .arg("PX")
                    .arg(ttl.as_millis() as u64);
            }
            PipelineOp::Exists { key } => {
                pipe.cmd("EXISTS").arg(self.key(key));
            }
            PipelineOp::Delete { key } => {
                pipe.cmd("DEL").arg(self.key(key));
            }
            PipelineOp::Increment { key, ttl } => {
                // INCR then refresh TTL; expiry keeps counters bounded.
                pipe.cmd("INCR").arg(self.key(key));
                pipe.cmd("PEXPIRE")
                    .arg(self.key(key))
                    .arg(ttl.as_millis() as u64)
                    .ignore();
            }
            PipelineOp::SetIfAbsent { key, value, ttl } => {
                pipe.cmd("SET")
                    .arg(self.key(key))
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl.as_millis() as u64);
            }
            PipelineOp::Expire { key, ttl } => {
                pipe.cmd("PEXPIRE")
                    .arg(self.key(key))
                    .arg(ttl.as_millis() as u64);
            }
            PipelineOp::ZAdd { key, member, score } => {
                pipe.cmd("ZADD")
                    .arg(self.key(key))
                    .arg(score_arg(*score))
                    .arg(member);
            }
            PipelineOp::ZCount { key, min, max } => {
                pipe.cmd("ZCOUNT")
                    .arg(self.key(key))
                    .arg(score_arg(*min))
                    .arg(score_arg(*max));
            }
            PipelineOp::ZRemRangeByScore { key, min, max } => {
                pipe.cmd("ZREMRANGEBYSCORE")
                    .arg(self.key(key))
                    .arg(score_arg(*min))
                    .arg(score_arg(*max));
            }
        }
    }
}

fn to_pipeline_value(value: redis::Value) -> PipelineValue {
    match value {
        redis::Value::Nil => PipelineValue::Nil,
        redis::Value::Int(i) => PipelineValue::Int(i),
        redis::Value::BulkString(bytes) => {
            PipelineValue::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
        redis::Value::SimpleString(_) | redis::Value::Okay => PipelineValue::Ok,
        _ => PipelineValue::Ok,
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let n: i64 = redis::cmd("EXISTS")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(n != 0)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> CacheResult<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = redis::cmd("INCR")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        if value == 1 {
            let _: () = redis::cmd("PEXPIRE")
                .arg(self.key(key))
                .arg(ttl.as_millis() as u64)
                .query_async(&mut conn)
                .await
                .map_err(map_err)?;
        }
        Ok(value)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(reply.is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let n: i64 = redis::cmd("PEXPIRE")
            .arg(self.key(key))
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(n != 0)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("ZADD")
            .arg(self.key(key))
            .arg(score_arg(score))
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> CacheResult<u64> {
        let mut conn = self.conn.clone();
        let n: i64 = redis::cmd("ZCOUNT")
            .arg(self.key(key))
            .arg(score_arg(min))
            .arg(score_arg(max))
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(n.max(0) as u64)
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> CacheResult<u64> {
        let mut conn = self.conn.clone();
        let n: i64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(self.key(key))
            .arg(score_arg(min))
            .arg(score_arg(max))
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(n.max(0) as u64)
    }

    async fn exec_pipeline(&self, ops: Vec<PipelineOp>) -> Vec<PipelineOutcome> {
        if ops.is_empty() {
            return Vec::new();
        }
        let mut pipe = redis::pipe();
        for op in &ops {
            self.apply_op(&mut pipe, op);
        }
        let mut conn = self.conn.clone();
        let reply: Result<Vec<redis::Value>, RedisError> = pipe.query_async(&mut conn).await;
        match reply {
            Ok(values) => values.into_iter().map(|v| Ok(to_pipeline_value(v))).collect(),
            Err(e) => {
                let err = map_err(e);
                tracing::warn!(error = %err, "cache pipeline failed");
                ops.iter().map(|_| Err(err.clone())).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_bounds_format_as_redis_infinities() {
        assert_eq!(score_arg(f64::NEG_INFINITY), "-inf");
        assert_eq!(score_arg(f64::INFINITY), "+inf");
        assert_eq!(score_arg(1500.0), "1500");
    }

    #[test]
    fn values_map_to_pipeline_values() {
        assert_eq!(to_pipeline_value(redis::Value::Nil), PipelineValue::Nil);
        assert_eq!(to_pipeline_value(redis::Value::Int(3)), PipelineValue::Int(3));
        assert_eq!(
            to_pipeline_value(redis::Value::BulkString(b"hi".to_vec())),
            PipelineValue::Text("hi".to_string())
        );
        assert_eq!(to_pipeline_value(redis::Value::Okay), PipelineValue::Ok);
    }
}
