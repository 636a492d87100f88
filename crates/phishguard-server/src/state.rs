//! Shared handler state

use phishguard_cache::ResilientCache;
use phishguard_common::MetricsRegistry;
use phishguard_guard::ReplyRateLimiter;
use phishguard_mail::SubscriptionManager;
use phishguard_pipeline::{NotificationQueue, PollMonitor};
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;

/// Everything the HTTP handlers need
#[derive(Clone)]
pub struct AppState {
    pub started: Instant,
    pub mailbox: String,
    pub client_state: String,
    pub validation_token_re: Arc<Regex>,
    pub metrics: Arc<MetricsRegistry>,
    pub cache: Arc<ResilientCache>,
    pub queue: Arc<NotificationQueue>,
    pub poll: Arc<PollMonitor>,
    pub subscription: Arc<SubscriptionManager>,
    pub rate_limiter: Arc<ReplyRateLimiter>,
}

impl AppState {
    /// Pattern accepted for webhook validation tokens
    pub fn validation_token_pattern() -> Regex {
        Regex::new(r"^[\w\-.~+/=%]+$").expect("validation token pattern")
    }
}
