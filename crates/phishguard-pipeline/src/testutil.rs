//! Shared fixtures for pipeline tests: an in-memory mail provider and
//! canned messages matching the end-to-end scenarios.

use crate::orchestrator::Orchestrator;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use phishguard_analysis::ReplyMessage;
use phishguard_cache::{LocalCache, ResilientCache};
use phishguard_common::config::{AllowlistConfig, DedupConfig, LlmConfig, RateConfig};
use phishguard_common::{Email, HeaderMap, MetricsRegistry};
use phishguard_guard::{Deduplicator, Guardrails, ReplyRateLimiter};
use phishguard_intel::LlmExplainer;
use phishguard_mail::{MailError, MailProvider, SubscriptionInfo, SubscriptionRequest};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub(crate) const MAILBOX: &str = "triage@corp.test";

/// In-memory mail provider capturing sent replies
pub(crate) struct MemoryProvider {
    pub messages: Mutex<HashMap<String, Email>>,
    pub sent: Mutex<Vec<ReplyMessage>>,
    pub fail_send: AtomicBool,
    pub fail_list: AtomicBool,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            fail_send: AtomicBool::new(false),
            fail_list: AtomicBool::new(false),
        }
    }

    pub fn put(&self, email: Email) {
        self.messages
            .lock()
            .insert(email.provider_id.clone(), email);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl MailProvider for MemoryProvider {
    async fn list_messages_since(
        &self,
        since: DateTime<Utc>,
        _max_pages: u32,
    ) -> Result<Vec<Email>, MailError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(MailError::Transient("listing down".to_string()));
        }
        let mut found: Vec<Email> = self
            .messages
            .lock()
            .values()
            .filter(|e| e.received_at >= since)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.received_at);
        Ok(found)
    }

    async fn get_message(&self, provider_id: &str) -> Result<Email, MailError> {
        self.messages
            .lock()
            .get(provider_id)
            .cloned()
            .ok_or_else(|| MailError::NotFound(provider_id.to_string()))
    }

    async fn send_reply(&self, reply: &ReplyMessage) -> Result<(), MailError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(MailError::Transient("smtp down".to_string()));
        }
        self.sent.lock().push(reply.clone());
        Ok(())
    }

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionInfo>, MailError> {
        Ok(vec![])
    }

    async fn create_subscription(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<SubscriptionInfo, MailError> {
        Ok(SubscriptionInfo {
            id: "sub-1".to_string(),
            resource: request.resource.clone(),
            notification_url: request.notification_url.clone(),
            expires_at: request.expires_at,
        })
    }

    async fn renew_subscription(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SubscriptionInfo, MailError> {
        Ok(SubscriptionInfo {
            id: id.to_string(),
            resource: String::new(),
            notification_url: String::new(),
            expires_at,
        })
    }

    async fn delete_subscription(&self, _id: &str) -> Result<(), MailError> {
        Ok(())
    }
}

/// Orchestrator over local-only cache with permissive limits
pub(crate) fn orchestrator(provider: Arc<MemoryProvider>) -> Orchestrator {
    let cache = Arc::new(ResilientCache::new(None, Arc::new(LocalCache::new())));
    let guardrails = Guardrails::new(
        MAILBOX,
        AllowlistConfig::default(),
        false,
        Arc::clone(&cache),
        false,
        Duration::from_secs(3600),
    );
    let dedup = Deduplicator::new(
        Arc::clone(&cache),
        DedupConfig {
            enabled: true,
            content_ttl: Duration::from_secs(3600),
            sender_cooldown: Duration::from_secs(3600),
        },
    );
    let rate_limiter = Arc::new(ReplyRateLimiter::new(
        Arc::clone(&cache),
        RateConfig {
            max_per_hour: 100,
            max_per_day: 400,
            burst_threshold: 50,
            burst_window: Duration::from_secs(600),
            breaker_reset: Duration::from_secs(60),
        },
    ));
    let llm = LlmExplainer::with_client(
        LlmConfig {
            api_key: None,
            demo_mode: false,
            timeout: Duration::from_millis(100),
            retries: 0,
            breaker_threshold: 3,
            breaker_reset: Duration::from_secs(30),
        },
        None,
    );
    Orchestrator::new(
        provider as Arc<dyn MailProvider>,
        guardrails,
        dedup,
        rate_limiter,
        None,
        llm,
        Arc::new(MetricsRegistry::new()),
        MAILBOX,
        5,
    )
}

/// Scenario 1: benign mail with passing authentication
pub(crate) fn benign_email(provider_id: &str, message_id: &str) -> Email {
    let mut headers = HeaderMap::new();
    headers.insert(
        "Authentication-Results",
        "spf=pass; dkim=pass; dmarc=pass; header.from=google.com",
    );
    Email {
        message_id: message_id.to_string(),
        provider_id: provider_id.to_string(),
        sender: "noreply@google.com".to_string(),
        recipient: MAILBOX.to_string(),
        subject: "Quarterly report".to_string(),
        received_at: Utc::now(),
        headers,
        body: "Your quarterly report is attached.".to_string(),
        attachments: vec![],
    }
}

/// Scenario 2: classic credential phish
pub(crate) fn phishing_email(provider_id: &str, message_id: &str, sender: &str) -> Email {
    let mut headers = HeaderMap::new();
    headers.insert("Authentication-Results", "spf=fail; dkim=fail; dmarc=fail");
    Email {
        message_id: message_id.to_string(),
        provider_id: provider_id.to_string(),
        sender: sender.to_string(),
        recipient: MAILBOX.to_string(),
        subject: "Account verification required".to_string(),
        received_at: Utc::now(),
        headers,
        body: "URGENT: Verify your account password at https://192.168.1.1/paypal — act now!"
            .to_string(),
        attachments: vec![],
    }
}
