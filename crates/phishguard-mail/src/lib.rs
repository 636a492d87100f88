//! PhishGuard Mail Provider Interface
//!
//! The narrow surface the rest of the system consumes from the mail
//! provider: list/fetch/send plus change-notification subscription CRUD.
//! [`graph::GraphMailClient`] implements it against a Microsoft-Graph
//! style REST API; tests substitute in-memory providers.

pub mod graph;
pub mod subscription;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phishguard_analysis::ReplyMessage;
use phishguard_common::Email;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use graph::GraphMailClient;
pub use subscription::{LifecycleEvent, SubscriptionManager, SubscriptionSnapshot};

/// Maximum change-notification subscription lifetime the provider allows
pub const MAX_SUBSCRIPTION_LIFETIME_MINUTES: i64 = 4230;

/// Mail provider error, split by retryability
#[derive(Debug, Error)]
pub enum MailError {
    /// Worth retrying (throttling, 5xx, transport)
    #[error("transient mail provider error: {0}")]
    Transient(String),
    /// Retrying will not help
    #[error("permanent mail provider error: {0}")]
    Permanent(String),
    /// Credentials rejected
    #[error("mail provider rejected credentials")]
    Unauthorized,
    /// Message or subscription gone
    #[error("not found: {0}")]
    NotFound(String),
}

impl MailError {
    /// Should the caller retry this failure?
    pub fn is_transient(&self) -> bool {
        matches!(self, MailError::Transient(_))
    }
}

/// A change-notification subscription as the provider reports it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub id: String,
    pub resource: String,
    pub notification_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Parameters for creating a subscription
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    pub resource: String,
    pub notification_url: String,
    pub client_state: String,
    pub expires_at: DateTime<Utc>,
}

/// Everything the pipeline needs from the mail provider
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Messages received at or after `since`, ascending, paginating up
    /// to `max_pages` via continuation links
    async fn list_messages_since(
        &self,
        since: DateTime<Utc>,
        max_pages: u32,
    ) -> Result<Vec<Email>, MailError>;

    /// Fetch one message by provider id with headers and attachment
    /// metadata
    async fn get_message(&self, provider_id: &str) -> Result<Email, MailError>;

    /// Send a rendered reply
    async fn send_reply(&self, reply: &ReplyMessage) -> Result<(), MailError>;

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionInfo>, MailError>;
    async fn create_subscription(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<SubscriptionInfo, MailError>;
    async fn renew_subscription(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SubscriptionInfo, MailError>;
    async fn delete_subscription(&self, id: &str) -> Result<(), MailError>;
}
