//! Correlation context
//!
//! A `Context` value is threaded explicitly through every pipeline call.
//! It carries the correlation id for log lines, the arrival timestamp of
//! the originating push notification (when there was one), and the
//! current pipeline stage.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Per-message correlation context
#[derive(Debug, Clone)]
pub struct Context {
    /// Correlation id attached to every log line and metric
    pub correlation_id: String,
    /// When the push notification for this message arrived, if any
    pub arrival: Option<DateTime<Utc>>,
    /// Current pipeline stage
    pub stage: &'static str,
}

impl Context {
    /// Fresh context for a poll-discovered message
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            arrival: None,
            stage: "ingest",
        }
    }

    /// Context for a message that arrived via webhook at `arrival`
    pub fn from_push(arrival: DateTime<Utc>) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            arrival: Some(arrival),
            stage: "ingest",
        }
    }

    /// Copy with an updated stage label
    pub fn at_stage(&self, stage: &'static str) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            arrival: self.arrival,
            stage,
        }
    }

    /// Milliseconds between push arrival and now, if this is a push-path
    /// message
    pub fn webhook_latency_ms(&self) -> Option<u64> {
        self.arrival
            .map(|a| (Utc::now() - a).num_milliseconds().max(0) as u64)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
