//! Pipeline orchestrator
//!
//! Runs one message through the full triage flow inside a bounded
//! semaphore. Analyzers fan out on a spawned task (so a panicking rule
//! is contained to this message) concurrently with the threat-intel
//! enricher; enrichment and explanation failures are soft. Exactly-one
//! reply is enforced by the guardrails + deduplicator, never by
//! ordering.

use phishguard_analysis::{
    aggregate, build_reply, AnalyzerOutput, AttachmentAnalyzer, ContentAnalyzer, HeaderAnalyzer,
};
use phishguard_common::{Context, Email, MetricsRegistry, Redactor};
use phishguard_guard::{Deduplicator, Guardrails, ReplyRateLimiter};
use phishguard_intel::{IntelFindings, LlmExplainer, ThreatIntelService};
use phishguard_mail::{MailError, MailProvider};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Terminal state of one message's trip through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriageOutcome {
    /// Verdict rendered and reply sent
    Replied,
    /// A guardrail denied before analysis
    GuardDenied(&'static str),
    /// Analyzed, but deduplication or rate limiting suppressed the reply
    Suppressed(String),
    /// Analysis task panicked or failed; no reply
    AnalysisError(String),
    /// Reply send failed; not retried
    ReplyFailed(String),
}

/// Per-message pipeline
pub struct Orchestrator {
    provider: Arc<dyn MailProvider>,
    guardrails: Guardrails,
    dedup: Deduplicator,
    rate_limiter: Arc<ReplyRateLimiter>,
    header: Arc<HeaderAnalyzer>,
    content: Arc<ContentAnalyzer>,
    attachment: Arc<AttachmentAnalyzer>,
    intel: Option<Arc<ThreatIntelService>>,
    llm: Arc<LlmExplainer>,
    metrics: Arc<MetricsRegistry>,
    redactor: Redactor,
    mailbox: String,
    permits: Arc<Semaphore>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn MailProvider>,
        guardrails: Guardrails,
        dedup: Deduplicator,
        rate_limiter: Arc<ReplyRateLimiter>,
        intel: Option<Arc<ThreatIntelService>>,
        llm: LlmExplainer,
        metrics: Arc<MetricsRegistry>,
        mailbox: &str,
        parallel_limit: usize,
    ) -> Self {
        Self {
            provider,
            guardrails,
            dedup,
            rate_limiter,
            header: Arc::new(HeaderAnalyzer::new()),
            content: Arc::new(ContentAnalyzer::new()),
            attachment: Arc::new(AttachmentAnalyzer::new()),
            intel,
            llm: Arc::new(llm),
            metrics,
            redactor: Redactor::new(),
            mailbox: mailbox.to_lowercase(),
            permits: Arc::new(Semaphore::new(parallel_limit.max(1))),
        }
    }

    /// Fetch by provider id and run the pipeline. Fetch errors propagate
    /// so the push queue can retry transient ones; everything after the
    /// fetch resolves to a [`TriageOutcome`].
    pub async fn process_message(
        &self,
        provider_id: &str,
        ctx: Context,
    ) -> Result<TriageOutcome, MailError> {
        let email = self.provider.get_message(provider_id).await?;
        Ok(self.process_fetched(email, ctx).await)
    }

    /// Run the pipeline over an already-fetched message (poll path).
    pub async fn process_fetched(&self, email: Email, ctx: Context) -> TriageOutcome {
        // Bounded fan-out across concurrent pipelines.
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return TriageOutcome::AnalysisError("pipeline shutting down".to_string());
            }
        };

        let started = std::time::Instant::now();
        self.metrics.messages_started.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = ctx.webhook_latency_ms() {
            self.metrics.webhook_latency_ms.record(latency as f64);
        }

        let outcome = self.run_pipeline(&email, &ctx).await;

        self.metrics
            .pipeline_ms
            .record(started.elapsed().as_millis() as f64);
        tracing::info!(
            correlation_id = %ctx.correlation_id,
            sender = %self.redactor.redact_address(&email.sender),
            outcome = ?discriminant_label(&outcome),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pipeline finished"
        );
        outcome
    }

    async fn run_pipeline(&self, email: &Email, ctx: &Context) -> TriageOutcome {
        // 1. Guardrails.
        let guard_ctx = ctx.at_stage("guard");
        let verdict = self.guardrails.evaluate(email).await;
        if !verdict.allowed {
            let reason = verdict.reason.unwrap_or("unknown");
            self.metrics.record_guard_hit(reason);
            tracing::debug!(
                correlation_id = %guard_ctx.correlation_id,
                reason,
                detail = verdict.detail.as_deref().unwrap_or(""),
                "guardrail denied"
            );
            return TriageOutcome::GuardDenied(reason);
        }

        // 2. Analyzers fan out on their own task (panic isolation) while
        //    the enricher runs its lookups.
        let analyze_ctx = ctx.at_stage("analyze");
        let header = Arc::clone(&self.header);
        let content = Arc::clone(&self.content);
        let attachment = Arc::clone(&self.attachment);
        let analysis_email = email.clone();
        let analysis_task = tokio::spawn(async move {
            let header_findings = header.analyze(&analysis_email);
            let content_findings = content.analyze(&analysis_email);
            let attachment_findings = attachment.analyze(&analysis_email.attachments);
            AnalyzerOutput {
                header: header_findings,
                content: content_findings,
                attachment: attachment_findings,
            }
        });

        let intel_task = async {
            match &self.intel {
                Some(intel) => {
                    let urls = self.content.suspicious_urls(email);
                    intel.enrich(email, &urls).await
                }
                None => IntelFindings::default(),
            }
        };

        let (analysis, intel_findings) = tokio::join!(analysis_task, intel_task);
        let output = match analysis {
            Ok(output) => output,
            Err(e) => {
                self.metrics.analysis_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    correlation_id = %analyze_ctx.correlation_id,
                    error = %e,
                    "analysis task failed"
                );
                return TriageOutcome::AnalysisError(e.to_string());
            }
        };

        // 3. Aggregate, then optionally explain borderline verdicts.
        let mut result = aggregate(
            &email.message_id,
            output,
            intel_findings.indicators,
            intel_findings.risk,
        );
        self.metrics.risk_scores.record(result.risk_score);
        self.metrics
            .messages_analyzed
            .fetch_add(1, Ordering::Relaxed);

        if self.llm.should_explain(result.risk_score) {
            result.explanation = self.llm.explain(email, &result).await;
        }

        // 4. Reply gating.
        let gate_ctx = ctx.at_stage("gate");
        let dedup_decision = self
            .dedup
            .check(&email.sender, &email.subject, &email.body)
            .await;
        if !dedup_decision.allowed {
            self.metrics.dedup_suppressed.fetch_add(1, Ordering::Relaxed);
            let reason = dedup_decision
                .reason
                .unwrap_or_else(|| "duplicate".to_string());
            tracing::info!(
                correlation_id = %gate_ctx.correlation_id,
                "reply suppressed by deduplicator"
            );
            return TriageOutcome::Suppressed(reason);
        }

        let rate_decision = self.rate_limiter.can_send(&self.mailbox).await;
        if !rate_decision.allowed {
            self.metrics.rate_limited.fetch_add(1, Ordering::Relaxed);
            let reason = rate_decision
                .reason
                .unwrap_or_else(|| "rate limited".to_string());
            tracing::warn!(
                correlation_id = %gate_ctx.correlation_id,
                reason = %reason,
                "reply suppressed by rate limiter"
            );
            return TriageOutcome::Suppressed(reason);
        }

        // 5. Send; outbound failures are terminal (no backscatter risk
        //    from blind retries).
        let reply = build_reply(&result, email);
        match self.provider.send_reply(&reply).await {
            Ok(()) => {
                self.dedup
                    .record_processed(&email.sender, &email.subject, &email.body)
                    .await;
                self.rate_limiter.record_sent(&self.mailbox).await;
                self.metrics.replies_sent.fetch_add(1, Ordering::Relaxed);
                TriageOutcome::Replied
            }
            Err(e) => {
                self.metrics.reply_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    correlation_id = %ctx.correlation_id,
                    error = %e,
                    "reply send failed"
                );
                TriageOutcome::ReplyFailed(e.to_string())
            }
        }
    }
}

fn discriminant_label(outcome: &TriageOutcome) -> &'static str {
    match outcome {
        TriageOutcome::Replied => "replied",
        TriageOutcome::GuardDenied(_) => "guard-denied",
        TriageOutcome::Suppressed(_) => "suppressed",
        TriageOutcome::AnalysisError(_) => "analysis-error",
        TriageOutcome::ReplyFailed(_) => "reply-failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{benign_email, orchestrator, phishing_email, MemoryProvider, MAILBOX};
    use chrono::Utc;

    #[tokio::test]
    async fn benign_email_gets_safe_normal_reply() {
        let provider = Arc::new(MemoryProvider::new());
        provider.put(benign_email("p1", "<m1@x>"));
        let orch = orchestrator(Arc::clone(&provider));

        let outcome = orch
            .process_message("p1", Context::new())
            .await
            .expect("fetch ok");
        assert_eq!(outcome, TriageOutcome::Replied);

        let sent = provider.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].importance, phishguard_analysis::Importance::Normal);
        assert!(sent[0].html_body.contains("No phishing detected"));
        assert!(sent[0].html_body.contains("0.0/10"));
        assert_eq!(sent[0].recipients, vec!["noreply@google.com"]);
    }

    #[tokio::test]
    async fn classic_phishing_gets_high_importance_critical_reply() {
        let provider = Arc::new(MemoryProvider::new());
        provider.put(phishing_email("p1", "<m1@x>", "security@paypa1.com"));
        let orch = orchestrator(Arc::clone(&provider));

        let outcome = orch
            .process_message("p1", Context::new())
            .await
            .expect("fetch ok");
        assert_eq!(outcome, TriageOutcome::Replied);

        let sent = provider.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].importance, phishguard_analysis::Importance::High);
        assert!(sent[0].html_body.contains("Phishing detected"));
        assert!(sent[0].html_body.contains("critical"));
    }

    #[tokio::test]
    async fn duplicate_content_from_second_sender_suppressed() {
        let provider = Arc::new(MemoryProvider::new());
        provider.put(phishing_email("p1", "<m1@x>", "a@one.test"));
        provider.put(phishing_email("p2", "<m2@x>", "b@two.test"));
        let orch = orchestrator(Arc::clone(&provider));

        let first = orch.process_message("p1", Context::new()).await.unwrap();
        assert_eq!(first, TriageOutcome::Replied);

        let second = orch.process_message("p2", Context::new()).await.unwrap();
        match second {
            TriageOutcome::Suppressed(reason) => {
                assert!(reason.contains("Duplicate email"));
            }
            other => panic!("expected suppression, got {:?}", other),
        }
        assert_eq!(provider.sent_count(), 1);
    }

    #[tokio::test]
    async fn self_sender_denied_without_analysis() {
        let provider = Arc::new(MemoryProvider::new());
        let mut email = benign_email("p1", "<m1@x>");
        email.sender = MAILBOX.to_string();
        provider.put(email);
        let orch = orchestrator(Arc::clone(&provider));

        let outcome = orch.process_message("p1", Context::new()).await.unwrap();
        assert_eq!(outcome, TriageOutcome::GuardDenied("self-sender-detected"));
        assert_eq!(provider.sent_count(), 0);
    }

    #[tokio::test]
    async fn auto_responder_denied() {
        let provider = Arc::new(MemoryProvider::new());
        let mut email = benign_email("p1", "<m1@x>");
        email.headers.insert("Auto-Submitted", "auto-replied");
        provider.put(email);
        let orch = orchestrator(Arc::clone(&provider));

        let outcome = orch.process_message("p1", Context::new()).await.unwrap();
        assert_eq!(
            outcome,
            TriageOutcome::GuardDenied("auto-responder-detected")
        );
        assert_eq!(provider.sent_count(), 0);
    }

    #[tokio::test]
    async fn same_message_id_twice_single_reply() {
        let provider = Arc::new(MemoryProvider::new());
        provider.put(phishing_email("p1", "<race@x>", "a@one.test"));
        let orch = orchestrator(Arc::clone(&provider));

        let push = orch
            .process_message("p1", Context::from_push(Utc::now()))
            .await
            .unwrap();
        assert_eq!(push, TriageOutcome::Replied);

        // Same id resurfaces in the poll window.
        let poll = orch.process_message("p1", Context::new()).await.unwrap();
        assert_eq!(poll, TriageOutcome::GuardDenied("duplicate-message-id"));
        assert_eq!(provider.sent_count(), 1);
    }

    #[tokio::test]
    async fn reply_send_failure_is_terminal_not_retried() {
        let provider = Arc::new(MemoryProvider::new());
        provider.put(benign_email("p1", "<m1@x>"));
        provider.fail_send.store(true, Ordering::SeqCst);
        let orch = orchestrator(Arc::clone(&provider));

        let outcome = orch.process_message("p1", Context::new()).await.unwrap();
        assert!(matches!(outcome, TriageOutcome::ReplyFailed(_)));
        assert_eq!(provider.sent_count(), 0);
    }

    #[tokio::test]
    async fn fetch_failure_propagates_for_queue_retry() {
        let provider = Arc::new(MemoryProvider::new());
        let orch = orchestrator(Arc::clone(&provider));
        let err = orch.process_message("missing", Context::new()).await;
        assert!(matches!(err, Err(MailError::NotFound(_))));
    }

    #[tokio::test]
    async fn identical_content_identical_verdict() {
        // Idempotent analysis: same message through two fresh
        // orchestrators yields the same verdict fields.
        let make = || async {
            let provider = Arc::new(MemoryProvider::new());
            provider.put(phishing_email("p1", "<m1@x>", "security@paypa1.com"));
            let orch = orchestrator(Arc::clone(&provider));
            orch.process_message("p1", Context::new()).await.unwrap();
            let body = provider.sent.lock()[0].html_body.clone();
            body
        };
        let a = make().await;
        let b = make().await;
        // Bodies differ only in the random analysis id footer.
        let strip = |s: &str| s[..s.find("Automated triage").unwrap()].to_string();
        assert_eq!(strip(&a), strip(&b));
    }
}
