//! PhishGuard Service
//!
//! HTTP surface (webhook + operations endpoints) and the wiring that
//! assembles the pipeline from configuration. The binary in `main.rs`
//! calls [`build`] and serves the router.

pub mod ops;
pub mod state;
pub mod webhook;

use anyhow::Context as _;
use axum::routing::{get, post};
use axum::Router;
use phishguard_cache::{CacheStore, LocalCache, RedisCache, ResilientCache};
use phishguard_common::{AppConfig, MetricsRegistry};
use phishguard_guard::{Deduplicator, Guardrails, ReplyRateLimiter};
use phishguard_intel::{HttpProviders, LlmExplainer, ThreatIntelService};
use phishguard_mail::{GraphMailClient, MailProvider, SubscriptionManager};
use phishguard_pipeline::{queue::QueueConfig, NotificationQueue, Orchestrator, PollMonitor};
use state::AppState;
use std::sync::Arc;
use std::time::{Duration, Instant};

const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const SUBSCRIPTION_RETRY_BACKOFF: Duration = Duration::from_secs(60);

/// Fully wired service, ready to serve and shut down
pub struct Service {
    pub router: Router,
    pub state: AppState,
    local_cache: Arc<LocalCache>,
}

impl Service {
    /// Graceful shutdown in reverse dependency order: stop timers,
    /// drain the queue, then close cache backends.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down");
        self.state.subscription.stop().await;
        self.state.poll.stop();
        self.state.queue.stop();
        self.state.queue.drain_in_flight().await;
        self.local_cache.stop_sweep();
        tracing::info!("shutdown complete");
    }
}

/// Assemble every component from configuration
pub async fn build(config: AppConfig) -> anyhow::Result<Service> {
    // Cache substrate: local always, distributed when configured.
    let local_cache = Arc::new(LocalCache::new());
    local_cache.start_sweep(CACHE_SWEEP_INTERVAL);
    let distributed: Option<Arc<dyn CacheStore>> = match &config.cache.url {
        Some(url) => match RedisCache::connect(url, &config.cache.key_prefix).await {
            Ok(cache) => Some(Arc::new(cache)),
            Err(e) => {
                // Non-fatal: degraded multi-replica guarantees.
                tracing::warn!(error = %e, "distributed cache unavailable at startup");
                None
            }
        },
        None => None,
    };
    let cache = Arc::new(ResilientCache::new(distributed, Arc::clone(&local_cache)));

    // Mail provider.
    let provider: Arc<dyn MailProvider> =
        Arc::new(GraphMailClient::new(&config.mail, &config.mailbox.address));

    // Reply gating.
    let guardrails = Guardrails::new(
        &config.mailbox.address,
        config.allowlist.clone(),
        config.environment.is_production(),
        Arc::clone(&cache),
        config.msgid_lru_authoritative,
        config.msgid_ttl,
    );
    let dedup = Deduplicator::new(Arc::clone(&cache), config.dedup.clone());
    let rate_limiter = Arc::new(ReplyRateLimiter::new(Arc::clone(&cache), config.rate.clone()));

    // External enrichment.
    let intel = if config.intel.enabled {
        Some(Arc::new(ThreatIntelService::new(
            config.intel.clone(),
            Arc::new(HttpProviders::new(&config.intel)),
        )))
    } else {
        None
    };
    let llm = LlmExplainer::new(config.llm.clone());

    // Pipeline.
    let metrics = Arc::new(MetricsRegistry::new());
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&provider),
        guardrails,
        dedup,
        Arc::clone(&rate_limiter),
        intel,
        llm,
        Arc::clone(&metrics),
        &config.mailbox.address,
        config.concurrency.parallel_limit,
    ));

    let queue = Arc::new(NotificationQueue::new(
        Arc::clone(&orchestrator),
        QueueConfig::from_concurrency(
            config.concurrency.queue_concurrency,
            config.concurrency.queue_max_retries,
            config.concurrency.queue_backoff,
            config.concurrency.queue_max_backoff,
        ),
    ));
    queue.start();

    let poll = Arc::new(PollMonitor::new(
        Arc::clone(&provider),
        Arc::clone(&orchestrator),
        config.mailbox.check_interval,
        config.mailbox.lookback,
        config.mailbox.max_pages,
    ));
    poll.start();

    // Push subscription; missed lifecycle events trigger a catch-up poll.
    let poll_for_catch_up = Arc::clone(&poll);
    let subscription = Arc::new(SubscriptionManager::spawn(
        Arc::clone(&provider),
        config.webhook.clone(),
        SUBSCRIPTION_RETRY_BACKOFF,
        Arc::new(move || poll_for_catch_up.trigger_catch_up()),
    ));
    subscription.init().await;

    let state = AppState {
        started: Instant::now(),
        mailbox: config.mailbox.address.clone(),
        client_state: config.webhook.client_state.clone(),
        validation_token_re: Arc::new(AppState::validation_token_pattern()),
        metrics,
        cache,
        queue,
        poll,
        subscription,
        rate_limiter,
    };

    Ok(Service {
        router: router(state.clone()),
        state,
        local_cache,
    })
}

/// Route table
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/mail", post(webhook::mail_webhook))
        .route("/health", get(ops::health))
        .route("/ready", get(ops::ready))
        .route("/metrics", get(ops::metrics))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until ctrl-c / SIGTERM, then run the shutdown sequence
pub async fn serve(service: Service, bind_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;
    tracing::info!(%bind_addr, "listening");

    let router = service.router.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    service.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use phishguard_analysis::ReplyMessage;
    use phishguard_common::config::{
        AllowlistConfig, DedupConfig, LlmConfig, RateConfig, WebhookConfig,
    };
    use phishguard_common::Email;
    use phishguard_mail::{MailError, SubscriptionInfo, SubscriptionRequest};
    use tower::ServiceExt;

    struct StubProvider;

    #[async_trait::async_trait]
    impl MailProvider for StubProvider {
        async fn list_messages_since(
            &self,
            _since: chrono::DateTime<chrono::Utc>,
            _max_pages: u32,
        ) -> Result<Vec<Email>, MailError> {
            Ok(vec![])
        }
        async fn get_message(&self, id: &str) -> Result<Email, MailError> {
            Err(MailError::NotFound(id.to_string()))
        }
        async fn send_reply(&self, _reply: &ReplyMessage) -> Result<(), MailError> {
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
            expires_at: chrono::DateTime<chrono::Utc>,
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

    async fn test_state() -> AppState {
        let local_cache = Arc::new(LocalCache::new());
        let cache = Arc::new(ResilientCache::new(None, Arc::clone(&local_cache)));
        let provider: Arc<dyn MailProvider> = Arc::new(StubProvider);

        let guardrails = Guardrails::new(
            "triage@corp.test",
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
                max_per_hour: 10,
                max_per_day: 20,
                burst_threshold: 5,
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
        let metrics = Arc::new(MetricsRegistry::new());
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&provider),
            guardrails,
            dedup,
            Arc::clone(&rate_limiter),
            None,
            llm,
            Arc::clone(&metrics),
            "triage@corp.test",
            2,
        ));
        let queue = Arc::new(NotificationQueue::new(
            Arc::clone(&orchestrator),
            QueueConfig::from_concurrency(
                1,
                0,
                Duration::from_millis(10),
                Duration::from_millis(50),
            ),
        ));
        let poll = Arc::new(PollMonitor::new(
            Arc::clone(&provider),
            Arc::clone(&orchestrator),
            Duration::from_secs(300),
            Duration::from_secs(600),
            3,
        ));
        let webhook = WebhookConfig {
            notification_url: "https://svc.test/webhooks/mail".to_string(),
            client_state: "secret-state".to_string(),
            resource: "users/triage@corp.test/messages".to_string(),
            renewal_margin: Duration::from_secs(60),
        };
        let subscription = Arc::new(SubscriptionManager::spawn(
            Arc::clone(&provider),
            webhook,
            Duration::from_secs(60),
            Arc::new(|| {}),
        ));
        subscription.init().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        AppState {
            started: Instant::now(),
            mailbox: "triage@corp.test".to_string(),
            client_state: "secret-state".to_string(),
            validation_token_re: Arc::new(AppState::validation_token_pattern()),
            metrics,
            cache,
            queue,
            poll,
            subscription,
            rate_limiter,
        }
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn validation_handshake_echoes_token() {
        let app = router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/mail?validationToken=abc-123.token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "abc-123.token");
    }

    #[tokio::test]
    async fn hostile_validation_token_rejected() {
        let app = router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/mail?validationToken=%3Cscript%3E")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let app = router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/mail")
                    .header("content-type", "application/json")
                    .body(Body::from("{\"not\":\"a notification\"}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let app = router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/mail")
                    .header("content-type", "application/json")
                    .body(Body::from("{\"value\":[]}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bad_client_state_is_403() {
        let state = test_state().await;
        let app = router(state.clone());
        let body = serde_json::json!({
            "value": [{
                "subscriptionId": "sub-1",
                "clientState": "wrong",
                "changeType": "created",
                "resource": "users/triage@corp.test/messages/m1",
                "resourceData": { "id": "m1" }
            }]
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/mail")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(state.queue.stats().total_enqueued, 0);
    }

    #[tokio::test]
    async fn created_notifications_enqueue_once() {
        let state = test_state().await;
        let body = serde_json::json!({
            "value": [{
                "subscriptionId": "sub-1",
                "clientState": "secret-state",
                "changeType": "created",
                "resource": "users/triage@corp.test/messages/m1",
                "resourceData": { "id": "m1" }
            }]
        });

        for _ in 0..2 {
            let app = router(state.clone());
            let response = app
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/webhooks/mail")
                        .header("content-type", "application/json")
                        .body(Body::from(body.to_string()))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED);
        }
        // Second delivery of the same id is deduped at enqueue.
        assert_eq!(state.queue.stats().total_enqueued, 1);
    }

    #[tokio::test]
    async fn health_reports_uptime() {
        let app = router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("\"status\":\"ok\""));
    }

    #[tokio::test]
    async fn ready_is_200_when_components_healthy() {
        let state = test_state().await;
        state.queue.start();
        let app = router(state.clone());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Stopping the queue flips readiness.
        state.queue.stop();
        let app = router(state.clone());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_snapshot_includes_sections() {
        let app = router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        for section in ["pipeline", "queue", "poll", "rate", "subscription"] {
            assert!(body.contains(section), "missing section {}", section);
        }
    }
}
