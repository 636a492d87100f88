//! Push-subscription manager
//!
//! A single owning task keeps one change-notification subscription
//! healthy. All mutation happens inside that task in response to
//! `{init, renew, lifecycle, stop}` commands, which keeps timer
//! callbacks from re-entering the state. At most one renewal timer is
//! armed at any time.

use crate::{MailProvider, SubscriptionRequest, MAX_SUBSCRIPTION_LIFETIME_MINUTES};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use phishguard_common::config::WebhookConfig;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const COMMAND_BUFFER: usize = 16;

/// Provider lifecycle notifications that affect the subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    SubscriptionRemoved,
    ReauthorizationRequired,
    Missed,
}

impl LifecycleEvent {
    /// Parse the provider's `lifecycleEvent` token
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "subscriptionRemoved" => Some(LifecycleEvent::SubscriptionRemoved),
            "reauthorizationRequired" => Some(LifecycleEvent::ReauthorizationRequired),
            "missed" => Some(LifecycleEvent::Missed),
            _ => None,
        }
    }
}

/// Read-only view of the subscription state
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubscriptionSnapshot {
    pub subscription_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

#[derive(Debug)]
enum Command {
    Init,
    Renew,
    Recreate,
    Lifecycle(LifecycleEvent),
    Stop,
}

/// Handle to the owning task
pub struct SubscriptionManager {
    tx: mpsc::Sender<Command>,
    state: Arc<RwLock<SubscriptionSnapshot>>,
}

impl SubscriptionManager {
    /// Spawn the owning task. `on_missed` is the catch-up callback run
    /// when the provider reports missed notifications.
    pub fn spawn(
        provider: Arc<dyn MailProvider>,
        webhook: WebhookConfig,
        retry_backoff: Duration,
        on_missed: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let state = Arc::new(RwLock::new(SubscriptionSnapshot::default()));

        let owner = Owner {
            provider,
            webhook,
            retry_backoff,
            on_missed,
            state: Arc::clone(&state),
            tx: tx.clone(),
            timer: None,
        };
        tokio::spawn(owner.run(rx));

        Self { tx, state }
    }

    /// Ask the owner to adopt or create the subscription
    pub async fn init(&self) {
        let _ = self.tx.send(Command::Init).await;
    }

    /// Forward a provider lifecycle notification
    pub async fn lifecycle(&self, event: LifecycleEvent) {
        let _ = self.tx.send(Command::Lifecycle(event)).await;
    }

    /// Cancel the timer and deactivate; in-flight work completes
    pub async fn stop(&self) {
        let _ = self.tx.send(Command::Stop).await;
    }

    /// Current state
    pub fn snapshot(&self) -> SubscriptionSnapshot {
        self.state.read().clone()
    }

    /// True once a subscription exists and the manager is running
    pub fn is_active(&self) -> bool {
        self.state.read().is_active
    }
}

struct Owner {
    provider: Arc<dyn MailProvider>,
    webhook: WebhookConfig,
    retry_backoff: Duration,
    on_missed: Arc<dyn Fn() + Send + Sync>,
    state: Arc<RwLock<SubscriptionSnapshot>>,
    tx: mpsc::Sender<Command>,
    timer: Option<JoinHandle<()>>,
}

impl Owner {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Init => self.init().await,
                Command::Renew => self.renew().await,
                Command::Recreate => self.recreate().await,
                Command::Lifecycle(event) => self.lifecycle(event).await,
                Command::Stop => {
                    self.cancel_timer();
                    self.state.write().is_active = false;
                    tracing::info!("subscription manager stopped");
                    break;
                }
            }
        }
    }

    async fn init(&mut self) {
        match self.provider.list_subscriptions().await {
            Ok(existing) => {
                let adopt = existing.into_iter().find(|s| {
                    s.resource == self.webhook.resource
                        && s.notification_url == self.webhook.notification_url
                });
                match adopt {
                    Some(subscription) => {
                        tracing::info!(id = %subscription.id, "adopted existing subscription");
                        self.activate(subscription.id, subscription.expires_at);
                    }
                    None => self.create().await,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "listing subscriptions failed");
                self.create().await;
            }
        }
    }

    async fn create(&mut self) {
        let request = SubscriptionRequest {
            resource: self.webhook.resource.clone(),
            notification_url: self.webhook.notification_url.clone(),
            client_state: self.webhook.client_state.clone(),
            expires_at: Utc::now()
                + ChronoDuration::minutes(MAX_SUBSCRIPTION_LIFETIME_MINUTES),
        };
        match self.provider.create_subscription(&request).await {
            Ok(subscription) => {
                tracing::info!(id = %subscription.id, "created subscription");
                self.activate(subscription.id, subscription.expires_at);
            }
            Err(e) => {
                tracing::error!(error = %e, "subscription creation failed, scheduling retry");
                self.state.write().is_active = false;
                self.arm_timer(self.retry_backoff, Command::Init);
            }
        }
    }

    async fn renew(&mut self) {
        // Clone out of the lock before awaiting anything.
        let current = { self.state.read().subscription_id.clone() };
        let id = match current {
            Some(id) => id,
            None => {
                self.init().await;
                return;
            }
        };
        let expires_at =
            Utc::now() + ChronoDuration::minutes(MAX_SUBSCRIPTION_LIFETIME_MINUTES);
        match self.provider.renew_subscription(&id, expires_at).await {
            Ok(subscription) => {
                tracing::info!(id = %subscription.id, "renewed subscription");
                self.activate(subscription.id, subscription.expires_at);
            }
            Err(e) => {
                tracing::warn!(error = %e, "renewal failed, recreating");
                self.recreate().await;
            }
        }
    }

    async fn recreate(&mut self) {
        let stale = { self.state.read().subscription_id.clone() };
        if let Some(id) = stale {
            if let Err(e) = self.provider.delete_subscription(&id).await {
                tracing::debug!(error = %e, "stale subscription delete failed");
            }
        }
        self.create().await;
    }

    async fn lifecycle(&mut self, event: LifecycleEvent) {
        tracing::info!(?event, "lifecycle notification");
        match event {
            LifecycleEvent::SubscriptionRemoved => self.recreate().await,
            LifecycleEvent::ReauthorizationRequired => self.renew().await,
            LifecycleEvent::Missed => (self.on_missed)(),
        }
    }

    fn activate(&mut self, id: String, expires_at: DateTime<Utc>) {
        {
            let mut state = self.state.write();
            state.subscription_id = Some(id);
            state.expires_at = Some(expires_at);
            state.is_active = true;
        }
        self.schedule_renewal(expires_at);
    }

    fn schedule_renewal(&mut self, expires_at: DateTime<Utc>) {
        let margin = ChronoDuration::milliseconds(self.webhook.renewal_margin.as_millis() as i64);
        let due = expires_at - margin;
        let delay = due - Utc::now();

        if delay <= ChronoDuration::zero() {
            // Margin exceeds the remaining lifetime: renew now. The
            // renewed expiration re-enters scheduling with a full
            // lifetime, so this does not loop.
            let tx = self.tx.clone();
            self.cancel_timer();
            self.timer = Some(tokio::spawn(async move {
                let _ = tx.send(Command::Renew).await;
            }));
            return;
        }

        let sleep_for = delay
            .to_std()
            .unwrap_or_else(|_| Duration::from_secs(60));
        let tx = self.tx.clone();
        self.cancel_timer();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(sleep_for).await;
            let _ = tx.send(Command::Renew).await;
        }));
    }

    fn arm_timer(&mut self, after: Duration, command: Command) {
        let tx = self.tx.clone();
        self.cancel_timer();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(command).await;
        }));
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
