//! Poll fallback monitor
//!
//! Timer-driven safety net behind the push path. Every interval it
//! lists messages received inside the lookback window and feeds them to
//! the orchestrator, which relies on guardrails and deduplication for
//! exactly-once behavior. Fetch errors increment a counter and the next
//! tick retries; only `stop()` ends the loop.

use crate::orchestrator::{Orchestrator, TriageOutcome};
use chrono::Utc;
use phishguard_common::Context;
use phishguard_mail::MailProvider;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Poll loop counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollStats {
    pub polls: u64,
    pub new_messages: u64,
    pub dedup_filtered: u64,
    pub errors: u64,
    pub last_poll_ms: u64,
}

/// Catch-up poller over the recent window
pub struct PollMonitor {
    provider: Arc<dyn MailProvider>,
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    lookback: Duration,
    max_pages: u32,
    running: AtomicBool,
    polls: AtomicU64,
    new_messages: AtomicU64,
    dedup_filtered: AtomicU64,
    errors: AtomicU64,
    last_poll_ms: AtomicU64,
    poll_lock: tokio::sync::Mutex<()>,
}

impl PollMonitor {
    pub fn new(
        provider: Arc<dyn MailProvider>,
        orchestrator: Arc<Orchestrator>,
        interval: Duration,
        lookback: Duration,
        max_pages: u32,
    ) -> Self {
        Self {
            provider,
            orchestrator,
            interval,
            lookback,
            max_pages,
            running: AtomicBool::new(false),
            polls: AtomicU64::new(0),
            new_messages: AtomicU64::new(0),
            dedup_filtered: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_poll_ms: AtomicU64::new(0),
            poll_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Start the periodic loop. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(monitor.interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup does
            // not double up with the initial catch-up hooks.
            tick.tick().await;
            while monitor.running.load(Ordering::SeqCst) {
                tick.tick().await;
                if !monitor.running.load(Ordering::SeqCst) {
                    break;
                }
                monitor.poll_once().await;
            }
            tracing::info!("poll monitor stopped");
        });
    }

    /// Stop the loop cooperatively
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// One-shot catch-up pass (also used for `missed` lifecycle events)
    pub fn trigger_catch_up(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            monitor.poll_once().await;
        });
    }

    /// One poll cycle over the lookback window
    pub async fn poll_once(&self) {
        // One cycle at a time; a slow cycle must not overlap a catch-up.
        let _serial = self.poll_lock.lock().await;
        let started = std::time::Instant::now();
        self.polls.fetch_add(1, Ordering::Relaxed);

        let since = Utc::now()
            - chrono::Duration::milliseconds(self.lookback.as_millis() as i64);
        let emails = match self.provider.list_messages_since(since, self.max_pages).await {
            Ok(emails) => emails,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "poll listing failed, next tick retries");
                self.last_poll_ms
                    .store(started.elapsed().as_millis() as u64, Ordering::Relaxed);
                return;
            }
        };

        let found = emails.len();
        for email in emails {
            let ctx = Context::new();
            let outcome = self.orchestrator.process_fetched(email, ctx).await;
            match outcome {
                TriageOutcome::GuardDenied("duplicate-message-id") => {
                    self.dedup_filtered.fetch_add(1, Ordering::Relaxed);
                }
                _ => {
                    self.new_messages.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        let elapsed = started.elapsed().as_millis() as u64;
        self.last_poll_ms.store(elapsed, Ordering::Relaxed);
        tracing::debug!(found, elapsed_ms = elapsed, "poll cycle finished");
    }

    /// Counter snapshot
    pub fn stats(&self) -> PollStats {
        PollStats {
            polls: self.polls.load(Ordering::Relaxed),
            new_messages: self.new_messages.load(Ordering::Relaxed),
            dedup_filtered: self.dedup_filtered.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_poll_ms: self.last_poll_ms.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{benign_email, orchestrator, phishing_email, MemoryProvider};

    fn monitor(provider: Arc<MemoryProvider>) -> Arc<PollMonitor> {
        let orch = Arc::new(orchestrator(Arc::clone(&provider)));
        Arc::new(PollMonitor::new(
            provider as Arc<dyn MailProvider>,
            orch,
            Duration::from_millis(50),
            Duration::from_secs(600),
            5,
        ))
    }

    #[tokio::test]
    async fn poll_processes_window_messages() {
        let provider = Arc::new(MemoryProvider::new());
        provider.put(benign_email("p1", "<m1@x>"));
        let monitor = monitor(Arc::clone(&provider));

        monitor.poll_once().await;

        let stats = monitor.stats();
        assert_eq!(stats.polls, 1);
        assert_eq!(stats.new_messages, 1);
        assert_eq!(stats.dedup_filtered, 0);
        assert_eq!(provider.sent_count(), 1);
    }

    #[tokio::test]
    async fn second_poll_dedup_filters_same_message() {
        let provider = Arc::new(MemoryProvider::new());
        provider.put(phishing_email("p1", "<m1@x>", "a@one.test"));
        let monitor = monitor(Arc::clone(&provider));

        monitor.poll_once().await;
        monitor.poll_once().await;

        let stats = monitor.stats();
        assert_eq!(stats.new_messages, 1);
        assert_eq!(stats.dedup_filtered, 1);
        assert_eq!(provider.sent_count(), 1);
    }

    #[tokio::test]
    async fn listing_failure_counts_error_and_loop_survives() {
        let provider = Arc::new(MemoryProvider::new());
        provider.fail_list.store(true, Ordering::SeqCst);
        let monitor = monitor(Arc::clone(&provider));

        monitor.poll_once().await;
        assert_eq!(monitor.stats().errors, 1);

        // Recovery on the next cycle.
        provider.fail_list.store(false, Ordering::SeqCst);
        provider.put(benign_email("p1", "<m1@x>"));
        monitor.poll_once().await;
        assert_eq!(monitor.stats().new_messages, 1);
    }

    #[tokio::test]
    async fn timer_loop_starts_and_stops() {
        let provider = Arc::new(MemoryProvider::new());
        provider.put(benign_email("p1", "<m1@x>"));
        let monitor = monitor(Arc::clone(&provider));

        monitor.start();
        tokio::time::sleep(Duration::from_millis(180)).await;
        monitor.stop();
        let polls_at_stop = monitor.stats().polls;
        assert!(polls_at_stop >= 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(monitor.stats().polls <= polls_at_stop + 1);
    }

    #[tokio::test]
    async fn catch_up_runs_one_cycle() {
        let provider = Arc::new(MemoryProvider::new());
        provider.put(benign_email("p1", "<m1@x>"));
        let monitor = monitor(Arc::clone(&provider));

        monitor.trigger_catch_up();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(monitor.stats().polls, 1);
        assert_eq!(provider.sent_count(), 1);
    }
}
