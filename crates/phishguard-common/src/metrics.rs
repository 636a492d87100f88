//! Pipeline metrics
//!
//! Counters are plain atomics; latency and score distributions are
//! bounded reservoirs (1000 samples, oldest overwritten) with
//! percentiles computed on demand at snapshot time.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

const RESERVOIR_CAP: usize = 1000;

/// Bounded sample reservoir
#[derive(Debug)]
pub struct Reservoir {
    samples: Mutex<ReservoirInner>,
}

#[derive(Debug)]
struct ReservoirInner {
    buf: Vec<f64>,
    next: usize,
    total: u64,
}

impl Reservoir {
    /// Empty reservoir
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(ReservoirInner {
                buf: Vec::with_capacity(RESERVOIR_CAP),
                next: 0,
                total: 0,
            }),
        }
    }

    /// Record one sample, evicting the oldest past capacity
    pub fn record(&self, value: f64) {
        let mut inner = self.samples.lock();
        inner.total += 1;
        if inner.buf.len() < RESERVOIR_CAP {
            inner.buf.push(value);
        } else {
            let slot = inner.next;
            inner.buf[slot] = value;
            inner.next = (slot + 1) % RESERVOIR_CAP;
        }
    }

    /// Percentile over the retained samples; `None` when empty
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let inner = self.samples.lock();
        if inner.buf.is_empty() {
            return None;
        }
        let mut sorted = inner.buf.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        Some(sorted[rank.min(sorted.len() - 1)])
    }

    /// Snapshot with count and p50/p95/p99
    pub fn snapshot(&self) -> ReservoirSnapshot {
        let total = self.samples.lock().total;
        ReservoirSnapshot {
            count: total,
            p50: self.percentile(0.50),
            p95: self.percentile(0.95),
            p99: self.percentile(0.99),
        }
    }
}

impl Default for Reservoir {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable reservoir summary
#[derive(Debug, Clone, Serialize)]
pub struct ReservoirSnapshot {
    pub count: u64,
    pub p50: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

/// Process-wide metrics registry
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Messages entering the orchestrator
    pub messages_started: AtomicU64,
    /// Messages fully analyzed
    pub messages_analyzed: AtomicU64,
    /// Replies successfully sent
    pub replies_sent: AtomicU64,
    /// Reply send failures (not retried)
    pub reply_failures: AtomicU64,
    /// Analyzer panics / analysis errors
    pub analysis_errors: AtomicU64,
    /// Suppressions by the deduplicator
    pub dedup_suppressed: AtomicU64,
    /// Denials by the rate limiter
    pub rate_limited: AtomicU64,
    /// Guardrail denials by reason token
    guard_hits: Mutex<HashMap<String, u64>>,
    /// End-to-end pipeline duration (ms)
    pub pipeline_ms: Reservoir,
    /// Webhook arrival to pipeline start (ms)
    pub webhook_latency_ms: Reservoir,
    /// Risk score distribution
    pub risk_scores: Reservoir,
}

impl MetricsRegistry {
    /// Fresh registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a guardrail denial under its reason token
    pub fn record_guard_hit(&self, reason: &str) {
        *self.guard_hits.lock().entry(reason.to_string()).or_insert(0) += 1;
    }

    /// Serializable snapshot for the metrics endpoint
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_started: self.messages_started.load(Ordering::Relaxed),
            messages_analyzed: self.messages_analyzed.load(Ordering::Relaxed),
            replies_sent: self.replies_sent.load(Ordering::Relaxed),
            reply_failures: self.reply_failures.load(Ordering::Relaxed),
            analysis_errors: self.analysis_errors.load(Ordering::Relaxed),
            dedup_suppressed: self.dedup_suppressed.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            guard_hits: self.guard_hits.lock().clone(),
            pipeline_ms: self.pipeline_ms.snapshot(),
            webhook_latency_ms: self.webhook_latency_ms.snapshot(),
            risk_scores: self.risk_scores.snapshot(),
        }
    }
}

/// Serializable registry snapshot
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub messages_started: u64,
    pub messages_analyzed: u64,
    pub replies_sent: u64,
    pub reply_failures: u64,
    pub analysis_errors: u64,
    pub dedup_suppressed: u64,
    pub rate_limited: u64,
    pub guard_hits: HashMap<String, u64>,
    pub pipeline_ms: ReservoirSnapshot,
    pub webhook_latency_ms: ReservoirSnapshot,
    pub risk_scores: ReservoirSnapshot,
}
