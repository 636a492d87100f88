//! Guardrails
//!
//! Synchronous pre-analysis filters over a fully fetched message,
//! evaluated in a fixed order with fail-on-first-hit. Recently seen
//! message-ids live in a bounded TTL LRU; across replicas the
//! distributed `set-if-absent` on `msgid:v1:<id>` is the single-winner
//! authority unless the deployment opts into LRU-only mode.

use moka::future::Cache as LruCache;
use phishguard_cache::{CacheStore, ResilientCache};
use phishguard_common::config::AllowlistConfig;
use phishguard_common::Email;
use std::sync::Arc;
use std::time::Duration;

const MSGID_LRU_CAPACITY: u64 = 10_000;

/// Guardrail reason tokens
pub mod reason {
    pub const MISSING_SENDER: &str = "missing-sender";
    pub const MISSING_MESSAGE_ID: &str = "missing-message-id";
    pub const DUPLICATE_MESSAGE_ID: &str = "duplicate-message-id";
    pub const SELF_SENDER: &str = "self-sender-detected";
    pub const NOT_ALLOWLISTED: &str = "sender-not-allowlisted";
    pub const AUTO_RESPONDER: &str = "auto-responder-detected";
}

/// Guardrail evaluation outcome
#[derive(Debug, Clone)]
pub struct GuardVerdict {
    pub allowed: bool,
    pub reason: Option<&'static str>,
    pub detail: Option<String>,
}

impl GuardVerdict {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            detail: None,
        }
    }

    fn deny(reason: &'static str, detail: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            detail: Some(detail.into()),
        }
    }
}

/// Pre-analysis filter chain
pub struct Guardrails {
    mailbox: String,
    allowlist: AllowlistConfig,
    production: bool,
    cache: Arc<ResilientCache>,
    seen_ids: LruCache<String, ()>,
    lru_authoritative: bool,
    msgid_ttl: Duration,
}

impl Guardrails {
    pub fn new(
        mailbox: &str,
        allowlist: AllowlistConfig,
        production: bool,
        cache: Arc<ResilientCache>,
        lru_authoritative: bool,
        msgid_ttl: Duration,
    ) -> Self {
        let seen_ids = LruCache::builder()
            .max_capacity(MSGID_LRU_CAPACITY)
            .time_to_live(msgid_ttl)
            .build();
        Self {
            mailbox: mailbox.to_lowercase(),
            allowlist,
            production,
            cache,
            seen_ids,
            lru_authoritative,
            msgid_ttl,
        }
    }

    /// Evaluate every check in order; the first hit denies.
    pub async fn evaluate(&self, email: &Email) -> GuardVerdict {
        let sender = email.sender.trim().to_lowercase();
        if sender.is_empty() {
            return GuardVerdict::deny(reason::MISSING_SENDER, "sender address is empty");
        }

        let message_id = email.message_id.trim();
        if message_id.is_empty() {
            return GuardVerdict::deny(reason::MISSING_MESSAGE_ID, "message id is empty");
        }

        if let Some(verdict) = self.check_duplicate(message_id).await {
            return verdict;
        }

        if let Some(verdict) = self.check_self_sender(&sender) {
            return verdict;
        }

        if let Some(verdict) = self.check_allowlist(&sender) {
            return verdict;
        }

        if let Some(verdict) = Self::check_auto_responder(email, &sender) {
            return verdict;
        }

        GuardVerdict::allow()
    }

    async fn check_duplicate(&self, message_id: &str) -> Option<GuardVerdict> {
        if self.seen_ids.get(message_id).await.is_some() {
            return Some(GuardVerdict::deny(
                reason::DUPLICATE_MESSAGE_ID,
                "message id seen recently in this replica",
            ));
        }

        if !self.lru_authoritative {
            let key = format!("msgid:v1:{}", message_id);
            match self.cache.set_if_absent(&key, "1", self.msgid_ttl).await {
                Ok(true) => {}
                Ok(false) => {
                    // Another replica (or an earlier ingestion path) won.
                    self.seen_ids.insert(message_id.to_string(), ()).await;
                    return Some(GuardVerdict::deny(
                        reason::DUPLICATE_MESSAGE_ID,
                        "message id already claimed",
                    ));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "message-id claim failed, falling back to LRU only");
                }
            }
        }

        self.seen_ids.insert(message_id.to_string(), ()).await;
        None
    }

    fn check_self_sender(&self, sender: &str) -> Option<GuardVerdict> {
        if sender == self.mailbox {
            return Some(GuardVerdict::deny(
                reason::SELF_SENDER,
                "sender equals monitored mailbox",
            ));
        }
        // Sibling detection: same domain and the sender local part is an
        // extension of the mailbox local part (triage+dlq@, triage-2@, ...).
        if let (Some((sender_local, sender_domain)), Some((mailbox_local, mailbox_domain))) =
            (sender.split_once('@'), self.mailbox.split_once('@'))
        {
            if sender_domain == mailbox_domain && sender_local.starts_with(mailbox_local) {
                return Some(GuardVerdict::deny(
                    reason::SELF_SENDER,
                    "sender is a sibling address of the monitored mailbox",
                ));
            }
        }
        None
    }

    fn check_allowlist(&self, sender: &str) -> Option<GuardVerdict> {
        if self.allowlist.is_empty() {
            if self.production {
                // Fail closed: production with no allowlist replies to no one.
                return Some(GuardVerdict::deny(
                    reason::NOT_ALLOWLISTED,
                    "allowlist empty in production",
                ));
            }
            return None;
        }

        if self.allowlist.emails.iter().any(|e| e == sender) {
            return None;
        }
        let domain = sender.rsplit_once('@').map(|(_, d)| d).unwrap_or("");
        if self.allowlist.domains.iter().any(|d| d == domain) {
            return None;
        }
        Some(GuardVerdict::deny(
            reason::NOT_ALLOWLISTED,
            format!("sender domain {} not allowlisted", domain),
        ))
    }

    fn check_auto_responder(email: &Email, sender: &str) -> Option<GuardVerdict> {
        if sender.contains("mailer-daemon") || sender.contains("postmaster") {
            return Some(GuardVerdict::deny(
                reason::AUTO_RESPONDER,
                "delivery-system sender address",
            ));
        }

        if let Some(value) = email.headers.get("auto-submitted") {
            let value = value.trim().to_lowercase();
            if matches!(
                value.as_str(),
                "auto-replied" | "auto-generated" | "auto-notified"
            ) {
                return Some(GuardVerdict::deny(
                    reason::AUTO_RESPONDER,
                    format!("auto-submitted: {}", value),
                ));
            }
        }

        if let Some(value) = email.headers.get("precedence") {
            let value = value.trim().to_lowercase();
            if matches!(value.as_str(), "bulk" | "junk" | "auto_reply") {
                return Some(GuardVerdict::deny(
                    reason::AUTO_RESPONDER,
                    format!("precedence: {}", value),
                ));
            }
        }

        if let Some(value) = email.headers.get("x-auto-response-suppress") {
            let value = value.trim().to_lowercase();
            if matches!(value.as_str(), "all" | "dr" | "autoreply") {
                return Some(GuardVerdict::deny(
                    reason::AUTO_RESPONDER,
                    format!("x-auto-response-suppress: {}", value),
                ));
            }
        }

        None
    }
}
