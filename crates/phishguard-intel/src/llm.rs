//! LLM explainer
//!
//! Optional natural-language summary for borderline verdicts. The call
//! path is wrapped in retry-with-backoff (skipping auth errors), a
//! per-call timeout, and a consecutive-failure circuit breaker. Any
//! failure is soft: the explanation is simply omitted.

use async_trait::async_trait;
use phishguard_analysis::AnalysisResult;
use phishguard_common::config::LlmConfig;
use phishguard_common::{BreakerConfig, CircuitBreaker, Email};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Borderline band where explanations add review value
const BORDERLINE_LOW: f64 = 4.0;
const BORDERLINE_HIGH: f64 = 6.0;
const MAX_PROMPT_INDICATORS: usize = 5;
const MAX_PROMPT_BODY_CHARS: usize = 500;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// LLM call failure
#[derive(Debug, Error)]
pub enum LlmError {
    /// Bad or missing API key; never retried
    #[error("llm endpoint rejected credentials")]
    Unauthorized,
    #[error("llm http error: {0}")]
    Http(String),
    #[error("llm returned unusable payload: {0}")]
    Payload(String),
}

/// Narrow completion interface over the LLM endpoint
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// reqwest-backed chat-completion client
pub struct HttpLlmClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl HttpLlmClient {
    pub fn new(api_key: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_key: api_key.to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You summarize email phishing analysis for a non-technical \
                              recipient in two or three sentences.",
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: 200,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        match response.status().as_u16() {
            401 | 403 => return Err(LlmError::Unauthorized),
            status if status >= 400 => {
                return Err(LlmError::Http(format!("status {}", status)));
            }
            _ => {}
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Payload(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| LlmError::Payload("empty choices".to_string()))
    }
}

/// Borderline-band explanation generator
pub struct LlmExplainer {
    config: LlmConfig,
    client: Option<Arc<dyn LlmClient>>,
    breaker: CircuitBreaker,
}

impl LlmExplainer {
    /// Build from configuration; unconfigured (no API key) explainers
    /// never run.
    pub fn new(config: LlmConfig) -> Self {
        let client: Option<Arc<dyn LlmClient>> = config
            .api_key
            .as_deref()
            .map(|key| Arc::new(HttpLlmClient::new(key, config.timeout)) as Arc<dyn LlmClient>);
        Self::with_client(config, client)
    }

    /// Build with an explicit client (testing, alternative endpoints)
    pub fn with_client(config: LlmConfig, client: Option<Arc<dyn LlmClient>>) -> Self {
        let breaker = CircuitBreaker::new(
            "llm",
            BreakerConfig {
                call_timeout: config.timeout,
                // Consecutive-failure policy: any success resets the window.
                error_threshold_pct: 100,
                volume_threshold: config.breaker_threshold.max(1),
                reset_timeout: config.breaker_reset,
                window: Duration::from_secs(300),
            },
        );
        Self {
            config,
            client,
            breaker,
        }
    }

    /// Should this verdict get an explanation pass?
    pub fn should_explain(&self, risk_score: f64) -> bool {
        self.client.is_some()
            && (self.config.demo_mode
                || (BORDERLINE_LOW..=BORDERLINE_HIGH).contains(&risk_score))
    }

    /// Generate an explanation; `None` on any failure or when the
    /// breaker is open.
    pub async fn explain(&self, email: &Email, result: &AnalysisResult) -> Option<String> {
        let client = self.client.as_ref()?;
        if !self.breaker.try_acquire() {
            tracing::debug!("llm breaker open, skipping explanation");
            return None;
        }

        let prompt = build_prompt(email, result);
        let mut delay = RETRY_BASE_DELAY;
        let attempts = self.config.retries + 1;

        for attempt in 0..attempts {
            match tokio::time::timeout(self.config.timeout, client.complete(&prompt)).await {
                Ok(Ok(text)) => {
                    self.breaker.record_success();
                    return Some(text);
                }
                Ok(Err(LlmError::Unauthorized)) => {
                    self.breaker.record_failure();
                    tracing::warn!("llm credentials rejected, not retrying");
                    return None;
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, attempt, "llm call failed");
                }
                Err(_) => {
                    tracing::warn!(attempt, "llm call timed out");
                }
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        self.breaker.record_failure();
        None
    }
}

fn build_prompt(email: &Email, result: &AnalysisResult) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!("Subject: {}\n", email.subject));
    prompt.push_str(&format!("Sender: {}\n", email.sender));
    prompt.push_str(&format!("Risk score: {:.1}/10\n", result.risk_score));
    prompt.push_str("Indicators:\n");
    for indicator in result.indicators.iter().take(MAX_PROMPT_INDICATORS) {
        prompt.push_str(&format!("- {}\n", indicator.description));
    }
    let body_prefix: String = email.body.chars().take(MAX_PROMPT_BODY_CHARS).collect();
    prompt.push_str(&format!("Body excerpt:\n{}\n", body_prefix));
    prompt.push_str("Explain in plain language why this message received this verdict.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use phishguard_analysis::{Severity, SubScores};
    use phishguard_common::HeaderMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubClient {
        calls: AtomicU32,
        failures_before_success: u32,
        unauthorized: bool,
    }

    #[async_trait]
    impl LlmClient for StubClient {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unauthorized {
                return Err(LlmError::Unauthorized);
            }
            if call < self.failures_before_success {
                return Err(LlmError::Http("boom".to_string()));
            }
            Ok("Looks like credential phishing.".to_string())
        }
    }

    fn config(retries: u32) -> LlmConfig {
        LlmConfig {
            api_key: Some("k".into()),
            demo_mode: false,
            timeout: Duration::from_millis(200),
            retries,
            breaker_threshold: 3,
            breaker_reset: Duration::from_millis(50),
        }
    }

    fn email() -> Email {
        Email {
            message_id: "m1".into(),
            provider_id: "p1".into(),
            sender: "a@x.test".into(),
            recipient: "t@corp.test".into(),
            subject: "Invoice".into(),
            received_at: Utc::now(),
            headers: HeaderMap::new(),
            body: "b".repeat(2000),
            attachments: vec![],
        }
    }

    fn verdict(risk: f64) -> AnalysisResult {
        AnalysisResult {
            message_id: "m1".into(),
            is_phishing: risk >= 5.0,
            risk_score: risk,
            confidence: 0.5,
            severity: Severity::Medium,
            indicators: vec![],
            recommended_actions: vec![],
            explanation: None,
            analysis_id: "a1".into(),
            analyzed_at: Utc::now(),
            sub_scores: SubScores::default(),
        }
    }

    #[test]
    fn borderline_band_gates_runs() {
        let explainer = LlmExplainer::with_client(
            config(0),
            Some(Arc::new(StubClient {
                calls: AtomicU32::new(0),
                failures_before_success: 0,
                unauthorized: false,
            })),
        );
        assert!(!explainer.should_explain(3.9));
        assert!(explainer.should_explain(4.0));
        assert!(explainer.should_explain(6.0));
        assert!(!explainer.should_explain(6.1));
    }

    #[test]
    fn demo_mode_always_runs() {
        let mut cfg = config(0);
        cfg.demo_mode = true;
        let explainer = LlmExplainer::with_client(
            cfg,
            Some(Arc::new(StubClient {
                calls: AtomicU32::new(0),
                failures_before_success: 0,
                unauthorized: false,
            })),
        );
        assert!(explainer.should_explain(0.0));
        assert!(explainer.should_explain(9.9));
    }

    #[test]
    fn unconfigured_never_runs() {
        let mut cfg = config(0);
        cfg.api_key = None;
        let explainer = LlmExplainer::with_client(cfg, None);
        assert!(!explainer.should_explain(5.0));
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let client = Arc::new(StubClient {
            calls: AtomicU32::new(0),
            failures_before_success: 2,
            unauthorized: false,
        });
        let explainer =
            LlmExplainer::with_client(config(2), Some(Arc::clone(&client) as Arc<dyn LlmClient>));
        let text = explainer.explain(&email(), &verdict(5.0)).await;
        assert!(text.is_some());
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let client = Arc::new(StubClient {
            calls: AtomicU32::new(0),
            failures_before_success: 0,
            unauthorized: true,
        });
        let explainer =
            LlmExplainer::with_client(config(3), Some(Arc::clone(&client) as Arc<dyn LlmClient>));
        let text = explainer.explain(&email(), &verdict(5.0)).await;
        assert!(text.is_none());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn breaker_opens_after_consecutive_failures() {
        let client = Arc::new(StubClient {
            calls: AtomicU32::new(0),
            failures_before_success: u32::MAX,
            unauthorized: false,
        });
        let explainer =
            LlmExplainer::with_client(config(0), Some(Arc::clone(&client) as Arc<dyn LlmClient>));

        for _ in 0..3 {
            assert!(explainer.explain(&email(), &verdict(5.0)).await.is_none());
        }
        let calls_before = client.calls.load(Ordering::SeqCst);
        // Breaker is open now; no further calls reach the client.
        assert!(explainer.explain(&email(), &verdict(5.0)).await.is_none());
        assert_eq!(client.calls.load(Ordering::SeqCst), calls_before);
    }

    #[test]
    fn prompt_truncates_body() {
        let prompt = build_prompt(&email(), &verdict(5.0));
        let body_line = prompt
            .lines()
            .find(|l| l.starts_with('b'))
            .unwrap_or_default();
        assert!(body_line.len() <= MAX_PROMPT_BODY_CHARS);
    }
}
