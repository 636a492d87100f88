//! Pipeline builder
//!
//! Batches cache operations into one round trip. The distributed backend
//! maps the batch onto a native pipeline; the local backend executes the
//! ops sequentially. The API contract is identical either way: `exec`
//! returns one outcome per op, in order.

use crate::{CacheError, CacheStore};
use std::time::Duration;

/// One batched operation
#[derive(Debug, Clone)]
pub enum PipelineOp {
    Get { key: String },
    Set { key: String, value: String, ttl: Duration },
    Exists { key: String },
    Delete { key: String },
    Increment { key: String, ttl: Duration },
    SetIfAbsent { key: String, value: String, ttl: Duration },
    Expire { key: String, ttl: Duration },
    ZAdd { key: String, member: String, score: f64 },
    ZCount { key: String, min: f64, max: f64 },
    ZRemRangeByScore { key: String, min: f64, max: f64 },
}

impl PipelineOp {
    /// True for ops that mutate backend state
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            PipelineOp::Get { .. } | PipelineOp::Exists { .. } | PipelineOp::ZCount { .. }
        )
    }
}

/// Result value of one pipelined op
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineValue {
    /// Write acknowledged
    Ok,
    /// Missing value (Get on absent key)
    Nil,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl PipelineValue {
    /// Boolean view (Bool directly, Int 0/1, Ok = true, Nil = false)
    pub fn as_bool(&self) -> bool {
        match self {
            PipelineValue::Bool(b) => *b,
            PipelineValue::Int(i) => *i != 0,
            PipelineValue::Ok => true,
            PipelineValue::Text(_) => true,
            PipelineValue::Nil => false,
        }
    }

    /// Integer view, defaulting to 0
    pub fn as_int(&self) -> i64 {
        match self {
            PipelineValue::Int(i) => *i,
            PipelineValue::Bool(true) => 1,
            _ => 0,
        }
    }

    /// Text view
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PipelineValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Per-op outcome
pub type PipelineOutcome = Result<PipelineValue, CacheError>;

/// Ordered batch of cache operations
#[derive(Debug, Default, Clone)]
pub struct Pipeline {
    ops: Vec<PipelineOp>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(mut self, key: impl Into<String>) -> Self {
        self.ops.push(PipelineOp::Get { key: key.into() });
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> Self {
        self.ops.push(PipelineOp::Set {
            key: key.into(),
            value: value.into(),
            ttl,
        });
        self
    }

    pub fn exists(mut self, key: impl Into<String>) -> Self {
        self.ops.push(PipelineOp::Exists { key: key.into() });
        self
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(PipelineOp::Delete { key: key.into() });
        self
    }

    pub fn increment(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.ops.push(PipelineOp::Increment {
            key: key.into(),
            ttl,
        });
        self
    }

    pub fn set_if_absent(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        self.ops.push(PipelineOp::SetIfAbsent {
            key: key.into(),
            value: value.into(),
            ttl,
        });
        self
    }

    pub fn expire(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.ops.push(PipelineOp::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    pub fn zadd(mut self, key: impl Into<String>, member: impl Into<String>, score: f64) -> Self {
        self.ops.push(PipelineOp::ZAdd {
            key: key.into(),
            member: member.into(),
            score,
        });
        self
    }

    pub fn zcount(mut self, key: impl Into<String>, min: f64, max: f64) -> Self {
        self.ops.push(PipelineOp::ZCount {
            key: key.into(),
            min,
            max,
        });
        self
    }

    pub fn zremrangebyscore(mut self, key: impl Into<String>, min: f64, max: f64) -> Self {
        self.ops.push(PipelineOp::ZRemRangeByScore {
            key: key.into(),
            min,
            max,
        });
        self
    }

    /// Number of queued ops
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True when no ops are queued
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Consume the builder into its op list
    pub fn into_ops(self) -> Vec<PipelineOp> {
        self.ops
    }

    /// Execute against a backend
    pub async fn exec(self, store: &dyn CacheStore) -> Vec<PipelineOutcome> {
        store.exec_pipeline(self.ops).await
    }
}
