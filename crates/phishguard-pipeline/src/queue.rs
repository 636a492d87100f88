//! Notification queue
//!
//! Bounded in-memory FIFO of message ids arriving via push. Enqueueing
//! an id that is already pending is a no-op. A tick-driven drain loop
//! launches up to `concurrency` workers; failed fetches retry with
//! exponential backoff until `max_retries`, then move to the dead
//! letter list. Stop is cooperative: no new items drain, in-flight
//! workers complete.

use crate::orchestrator::Orchestrator;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use phishguard_common::Context;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

const DEFAULT_CAPACITY: usize = 1000;
const DRAIN_TICK: Duration = Duration::from_millis(250);

/// Queue tuning
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub max_retries: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
    pub capacity: usize,
}

impl QueueConfig {
    pub fn from_concurrency(
        concurrency: usize,
        max_retries: u32,
        backoff: Duration,
        max_backoff: Duration,
    ) -> Self {
        Self {
            concurrency: concurrency.max(1),
            max_retries,
            backoff,
            max_backoff,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone)]
struct QueueItem {
    message_id: String,
    enqueued_at: DateTime<Utc>,
    arrival: DateTime<Utc>,
    attempts: u32,
    last_error: Option<String>,
    not_before: Option<Instant>,
}

/// Entry that exhausted its retries
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub message_id: String,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: String,
}

/// Counter snapshot
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub dead_letter_count: usize,
    pub total_enqueued: u64,
    pub total_processed: u64,
    pub total_failed: u64,
}

struct Inner {
    queue: VecDeque<QueueItem>,
    pending_ids: HashSet<String>,
    dead: Vec<DeadLetter>,
}

/// Push-path ingestion queue
pub struct NotificationQueue {
    config: QueueConfig,
    inner: Mutex<Inner>,
    total_enqueued: AtomicU64,
    total_processed: AtomicU64,
    total_failed: AtomicU64,
    running: AtomicBool,
    workers: Arc<Semaphore>,
    orchestrator: Arc<Orchestrator>,
}

impl NotificationQueue {
    pub fn new(orchestrator: Arc<Orchestrator>, config: QueueConfig) -> Self {
        let workers = Arc::new(Semaphore::new(config.concurrency));
        Self {
            config,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                pending_ids: HashSet::new(),
                dead: Vec::new(),
            }),
            total_enqueued: AtomicU64::new(0),
            total_processed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            running: AtomicBool::new(false),
            workers,
            orchestrator,
        }
    }

    /// Queue a message id from a push notification. Returns false when
    /// the id is already pending (dedupe) or the queue is full.
    pub fn enqueue(&self, message_id: &str, arrival: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock();
        if inner.pending_ids.contains(message_id) {
            tracing::debug!(message_id, "enqueue deduped, id already pending");
            return false;
        }
        if inner.queue.len() >= self.config.capacity {
            tracing::warn!(message_id, "queue full, dropping notification");
            return false;
        }
        inner.pending_ids.insert(message_id.to_string());
        inner.queue.push_back(QueueItem {
            message_id: message_id.to_string(),
            enqueued_at: Utc::now(),
            arrival,
            attempts: 0,
            last_error: None,
            not_before: None,
        });
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Start the drain loop. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(DRAIN_TICK);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            while queue.running.load(Ordering::SeqCst) {
                tick.tick().await;
                queue.drain_ready().await;
            }
            tracing::info!("notification queue drain loop stopped");
        });
    }

    /// Stop draining; in-flight workers complete
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// True while the drain loop is active
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Wait until no worker is in flight (shutdown drain)
    pub async fn drain_in_flight(&self) {
        let _all = self
            .workers
            .clone()
            .acquire_many_owned(self.config.concurrency as u32)
            .await;
    }

    async fn drain_ready(self: &Arc<Self>) {
        loop {
            let permit = match self.workers.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let item = {
                let mut inner = self.inner.lock();
                pop_ready(&mut inner.queue)
            };
            let mut item = match item {
                Some(item) => item,
                None => return,
            };

            let queue = Arc::clone(self);
            tokio::spawn(async move {
                let _permit = permit;
                item.attempts += 1;
                let ctx = Context::from_push(item.arrival);
                match queue
                    .orchestrator
                    .process_message(&item.message_id, ctx)
                    .await
                {
                    Ok(_) => {
                        queue.total_processed.fetch_add(1, Ordering::Relaxed);
                        queue.inner.lock().pending_ids.remove(&item.message_id);
                    }
                    Err(e) => {
                        item.last_error = Some(e.to_string());
                        if e.is_transient() && item.attempts <= queue.config.max_retries {
                            let backoff = exponential_backoff(
                                queue.config.backoff,
                                queue.config.max_backoff,
                                item.attempts,
                            );
                            tracing::warn!(
                                message_id = %item.message_id,
                                attempts = item.attempts,
                                backoff_ms = backoff.as_millis() as u64,
                                "message fetch failed, requeueing"
                            );
                            item.not_before = Some(Instant::now() + backoff);
                            queue.inner.lock().queue.push_back(item);
                        } else {
                            tracing::error!(
                                message_id = %item.message_id,
                                attempts = item.attempts,
                                error = %e,
                                "message moved to dead letter"
                            );
                            queue.total_failed.fetch_add(1, Ordering::Relaxed);
                            let mut inner = queue.inner.lock();
                            inner.pending_ids.remove(&item.message_id);
                            inner.dead.push(DeadLetter {
                                message_id: item.message_id.clone(),
                                enqueued_at: item.enqueued_at,
                                attempts: item.attempts,
                                last_error: e.to_string(),
                            });
                        }
                    }
                }
            });
        }
    }

    /// Counter snapshot
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            pending: inner.queue.len(),
            dead_letter_count: inner.dead.len(),
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_processed: self.total_processed.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
        }
    }

    /// Dead letter snapshot for inspection
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.lock().dead.clone()
    }
}

fn pop_ready(queue: &mut VecDeque<QueueItem>) -> Option<QueueItem> {
    let now = Instant::now();
    let position = queue
        .iter()
        .position(|item| item.not_before.map(|t| t <= now).unwrap_or(true))?;
    queue.remove(position)
}

/// `base * 2^(attempts-1)`, capped
fn exponential_backoff(base: Duration, max: Duration, attempts: u32) -> Duration {
    let factor = 1u32 << (attempts.saturating_sub(1)).min(16);
    (base * factor).min(max)
}
