//! Deduplicator
//!
//! Two orthogonal suppressions checked in one pipelined round trip:
//! a content hash over the normalized subject+body, and a per-sender
//! cooldown. A check claims absent keys atomically, so concurrent
//! checks across replicas elect a single winner.

use chrono::{DateTime, TimeZone, Utc};
use phishguard_cache::{Pipeline, ResilientCache};
use phishguard_common::config::DedupConfig;
use sha2::{Digest, Sha256};
use std::sync::Arc;

const BODY_HASH_PREFIX_CHARS: usize = 1000;

/// Outcome of a dedup check
#[derive(Debug, Clone)]
pub struct DedupDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl DedupDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Content-hash and sender-cooldown suppression
pub struct Deduplicator {
    cache: Arc<ResilientCache>,
    config: DedupConfig,
}

impl Deduplicator {
    pub fn new(cache: Arc<ResilientCache>, config: DedupConfig) -> Self {
        Self { cache, config }
    }

    /// Normalized content hash: sha256 of the lowered subject joined
    /// with the first 1000 characters of the body
    pub fn content_hash(subject: &str, body: &str) -> String {
        let prefix: String = body.chars().take(BODY_HASH_PREFIX_CHARS).collect();
        let normalized = format!("{}||{}", subject, prefix).to_lowercase();
        let digest = Sha256::digest(normalized.as_bytes());
        hex::encode(digest)
    }

    fn hash_key(hash: &str) -> String {
        format!("dedup:hash:v1:{}", hash)
    }

    fn sender_key(sender: &str) -> String {
        format!("dedup:sender:v1:{}", sender.to_lowercase())
    }

    /// Check both suppressions, claiming absent keys. Disabled
    /// deduplication allows everything and writes nothing.
    pub async fn check(&self, sender: &str, subject: &str, body: &str) -> DedupDecision {
        if !self.config.enabled {
            return DedupDecision::allow();
        }

        let hash = Self::content_hash(subject, body);
        let now = Utc::now().timestamp_millis();

        let results = Pipeline::new()
            .set_if_absent(Self::hash_key(&hash), "1", self.config.content_ttl)
            .get(Self::sender_key(sender))
            .set_if_absent(
                Self::sender_key(sender),
                now.to_string(),
                self.config.sender_cooldown,
            )
            .exec(self.cache.as_ref())
            .await;

        let hash_won = results
            .first()
            .and_then(|r| r.as_ref().ok())
            .map(|v| v.as_bool())
            .unwrap_or(true);
        if !hash_won {
            return DedupDecision::deny(format!(
                "Duplicate email content detected (hash {}) within {}s window",
                &hash[..12],
                self.config.content_ttl.as_secs()
            ));
        }

        let prior_send = results
            .get(1)
            .and_then(|r| r.as_ref().ok())
            .and_then(|v| v.as_text())
            .and_then(|s| s.parse::<i64>().ok());
        if let Some(sent_at) = prior_send {
            let next_allowed = self.next_allowed(sent_at);
            return DedupDecision::deny(format!(
                "Sender cooldown active; next allowed at {}",
                next_allowed.to_rfc3339()
            ));
        }

        DedupDecision::allow()
    }

    /// Refresh both keys after a reply was sent
    pub async fn record_processed(&self, sender: &str, subject: &str, body: &str) {
        if !self.config.enabled {
            return;
        }
        let hash = Self::content_hash(subject, body);
        let now = Utc::now().timestamp_millis();

        let results = Pipeline::new()
            .set(Self::hash_key(&hash), "1", self.config.content_ttl)
            .set(
                Self::sender_key(sender),
                now.to_string(),
                self.config.sender_cooldown,
            )
            .exec(self.cache.as_ref())
            .await;

        if results.iter().any(|r| r.is_err()) {
            tracing::warn!("dedup record_processed partially failed");
        }
    }

    fn next_allowed(&self, sent_at_ms: i64) -> DateTime<Utc> {
        let next = sent_at_ms + self.config.sender_cooldown.as_millis() as i64;
        Utc.timestamp_millis_opt(next)
            .single()
            .unwrap_or_else(Utc::now)
    }
}
