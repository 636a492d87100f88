//! Threat-intel enricher
//!
//! Issues up to three URL-reputation lookups, one sender-IP lookup, and
//! one domain-age lookup concurrently, each bounded by the provider
//! timeout and cached per identifier. A failed or timed-out lookup
//! contributes nothing; the verdict never waits on enrichment beyond
//! the configured bound.

use crate::providers::{
    DomainAgeReport, IntelProviders, IpReputationReport, UrlReputationReport,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use phishguard_analysis::{IndicatorKind, Severity, ThreatIndicator};
use phishguard_common::config::IntelConfig;
use phishguard_common::Email;
use regex::Regex;
use std::sync::Arc;
use tokio::task::JoinSet;

const MAX_URL_LOOKUPS: usize = 3;
const YOUNG_DOMAIN_DAYS: i64 = 30;
const VERY_YOUNG_DOMAIN_DAYS: i64 = 7;
const ABUSE_SCORE_FLOOR: u32 = 50;
const ABUSE_SCORE_HIGH: u32 = 75;

/// Enrichment output merged into the verdict
#[derive(Debug, Clone, Default)]
pub struct IntelFindings {
    pub indicators: Vec<ThreatIndicator>,
    /// Additional risk added to the aggregate before clipping
    pub risk: f64,
}

#[derive(Clone)]
struct Cached<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

impl<T: Clone> Cached<T> {
    fn fresh(&self) -> Option<T> {
        (self.expires_at > Utc::now()).then(|| self.value.clone())
    }
}

enum Lookup {
    Url(String, UrlReputationReport),
    Ip(String, IpReputationReport),
    Domain(String, DomainAgeReport),
}

/// Concurrent, cached reputation enrichment
pub struct ThreatIntelService {
    config: IntelConfig,
    providers: Arc<dyn IntelProviders>,
    url_cache: DashMap<String, Cached<UrlReputationReport>>,
    ip_cache: DashMap<String, Cached<IpReputationReport>>,
    domain_cache: DashMap<String, Cached<DomainAgeReport>>,
    received_ip_re: Regex,
}

impl ThreatIntelService {
    pub fn new(config: IntelConfig, providers: Arc<dyn IntelProviders>) -> Self {
        Self {
            config,
            providers,
            url_cache: DashMap::new(),
            ip_cache: DashMap::new(),
            domain_cache: DashMap::new(),
            received_ip_re: Regex::new(r"\[(\d{1,3}(?:\.\d{1,3}){3})\]")
                .expect("received ip pattern"),
        }
    }

    /// Look up the message's suspicious URLs, sender IP, and sender
    /// domain. Never errors; partial results merge.
    pub async fn enrich(&self, email: &Email, suspicious_urls: &[String]) -> IntelFindings {
        let mut findings = IntelFindings::default();
        if !self.config.enabled {
            return findings;
        }

        let mut set: JoinSet<Option<Lookup>> = JoinSet::new();
        let timeout = self.config.timeout;

        for url in suspicious_urls.iter().take(MAX_URL_LOOKUPS) {
            if let Some(report) = self.url_cache.get(url).and_then(|c| c.fresh()) {
                apply_url(&mut findings, url, &report);
                continue;
            }
            let providers = Arc::clone(&self.providers);
            let url = url.clone();
            set.spawn(async move {
                let report = tokio::time::timeout(timeout, providers.lookup_url(&url))
                    .await
                    .ok()?
                    .ok()?;
                Some(Lookup::Url(url, report))
            });
        }

        if let Some(ip) = self.sender_ip(email) {
            if let Some(report) = self.ip_cache.get(&ip).and_then(|c| c.fresh()) {
                apply_ip(&mut findings, &ip, &report);
            } else {
                let providers = Arc::clone(&self.providers);
                set.spawn(async move {
                    let report = tokio::time::timeout(timeout, providers.lookup_ip(&ip))
                        .await
                        .ok()?
                        .ok()?;
                    Some(Lookup::Ip(ip, report))
                });
            }
        }

        let domain = email.sender_domain();
        if !domain.is_empty() {
            if let Some(report) = self.domain_cache.get(&domain).and_then(|c| c.fresh()) {
                apply_domain(&mut findings, &domain, &report);
            } else {
                let providers = Arc::clone(&self.providers);
                let domain = domain.clone();
                set.spawn(async move {
                    let report =
                        tokio::time::timeout(timeout, providers.lookup_domain_age(&domain))
                            .await
                            .ok()?
                            .ok()?;
                    Some(Lookup::Domain(domain, report))
                });
            }
        }

        while let Some(joined) = set.join_next().await {
            let lookup = match joined {
                Ok(Some(lookup)) => lookup,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "intel lookup task failed");
                    continue;
                }
            };
            let expires_at = Utc::now()
                + chrono::Duration::milliseconds(self.config.cache_ttl.as_millis() as i64);
            match lookup {
                Lookup::Url(url, report) => {
                    self.url_cache.insert(
                        url.clone(),
                        Cached {
                            value: report.clone(),
                            expires_at,
                        },
                    );
                    apply_url(&mut findings, &url, &report);
                }
                Lookup::Ip(ip, report) => {
                    self.ip_cache.insert(
                        ip.clone(),
                        Cached {
                            value: report.clone(),
                            expires_at,
                        },
                    );
                    apply_ip(&mut findings, &ip, &report);
                }
                Lookup::Domain(domain, report) => {
                    self.domain_cache.insert(
                        domain.clone(),
                        Cached {
                            value: report.clone(),
                            expires_at,
                        },
                    );
                    apply_domain(&mut findings, &domain, &report);
                }
            }
        }

        findings
    }

    /// Best-effort sender IP from X-Originating-IP or Received headers
    fn sender_ip(&self, email: &Email) -> Option<String> {
        if let Some(raw) = email.headers.get("x-originating-ip") {
            let trimmed = raw.trim().trim_start_matches('[').trim_end_matches(']');
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        for received in email.headers.get_all("received") {
            if let Some(captures) = self.received_ip_re.captures(received) {
                return Some(captures[1].to_string());
            }
        }
        None
    }
}

fn apply_url(findings: &mut IntelFindings, url: &str, report: &UrlReputationReport) {
    if !report.malicious {
        return;
    }
    findings.risk += 2.0 + report.confidence;
    findings.indicators.push(ThreatIndicator {
        kind: IndicatorKind::Url,
        severity: if report.confidence > 0.5 {
            Severity::Critical
        } else {
            Severity::High
        },
        description: "URL flagged malicious by reputation provider".to_string(),
        evidence: url.to_string(),
        confidence: report.confidence,
    });
}

fn apply_ip(findings: &mut IntelFindings, ip: &str, report: &IpReputationReport) {
    if report.abuse_score < ABUSE_SCORE_FLOOR {
        return;
    }
    findings.risk += 1.5 + f64::from(report.abuse_score - ABUSE_SCORE_FLOOR) / 100.0;
    findings.indicators.push(ThreatIndicator {
        kind: IndicatorKind::Sender,
        severity: if report.abuse_score >= ABUSE_SCORE_HIGH {
            Severity::High
        } else {
            Severity::Medium
        },
        description: format!("Sending IP has abuse score {}", report.abuse_score),
        evidence: ip.to_string(),
        confidence: f64::from(report.abuse_score) / 100.0,
    });
}

fn apply_domain(findings: &mut IntelFindings, domain: &str, report: &DomainAgeReport) {
    if report.age_days >= YOUNG_DOMAIN_DAYS {
        return;
    }
    let very_young = report.age_days < VERY_YOUNG_DOMAIN_DAYS;
    findings.risk += if very_young { 2.0 } else { 1.0 };
    findings.indicators.push(ThreatIndicator {
        kind: IndicatorKind::Sender,
        severity: if very_young {
            Severity::High
        } else {
            Severity::Medium
        },
        description: format!("Sender domain registered {} days ago", report.age_days),
        evidence: domain.to_string(),
        confidence: 0.8,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use async_trait::async_trait;
    use phishguard_common::HeaderMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct StubProviders {
        url_calls: AtomicU32,
        malicious: bool,
        abuse_score: u32,
        age_days: i64,
        delay: Duration,
    }

    impl StubProviders {
        fn new(malicious: bool, abuse_score: u32, age_days: i64) -> Self {
            Self {
                url_calls: AtomicU32::new(0),
                malicious,
                abuse_score,
                age_days,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl IntelProviders for StubProviders {
        async fn lookup_url(&self, _url: &str) -> Result<UrlReputationReport, ProviderError> {
            self.url_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(UrlReputationReport {
                malicious: self.malicious,
                confidence: 0.8,
            })
        }
        async fn lookup_ip(&self, _ip: &str) -> Result<IpReputationReport, ProviderError> {
            tokio::time::sleep(self.delay).await;
            Ok(IpReputationReport {
                abuse_score: self.abuse_score,
            })
        }
        async fn lookup_domain_age(
            &self,
            _domain: &str,
        ) -> Result<DomainAgeReport, ProviderError> {
            tokio::time::sleep(self.delay).await;
            Ok(DomainAgeReport {
                age_days: self.age_days,
            })
        }
    }

    fn config(enabled: bool, timeout: Duration) -> IntelConfig {
        IntelConfig {
            enabled,
            url_api_key: Some("k".into()),
            ip_api_key: Some("k".into()),
            domain_api_key: Some("k".into()),
            timeout,
            cache_ttl: Duration::from_secs(60),
        }
    }

    fn email_with_ip() -> Email {
        let mut headers = HeaderMap::new();
        headers.insert("Received", "from mail.evil.test [203.0.113.9] by mx");
        Email {
            message_id: "m1".into(),
            provider_id: "p1".into(),
            sender: "a@fresh.test".into(),
            recipient: "t@corp.test".into(),
            subject: "s".into(),
            received_at: Utc::now(),
            headers,
            body: String::new(),
            attachments: vec![],
        }
    }

    #[tokio::test]
    async fn disabled_service_contributes_nothing() {
        let providers = Arc::new(StubProviders::new(true, 99, 1));
        let service = ThreatIntelService::new(config(false, Duration::from_secs(1)), providers);
        let findings = service
            .enrich(&email_with_ip(), &["https://bad.test/x".to_string()])
            .await;
        assert!(findings.indicators.is_empty());
        assert_eq!(findings.risk, 0.0);
    }

    #[tokio::test]
    async fn malicious_url_high_abuse_ip_and_young_domain_all_contribute() {
        let providers = Arc::new(StubProviders::new(true, 80, 3));
        let service = ThreatIntelService::new(config(true, Duration::from_secs(1)), providers);
        let findings = service
            .enrich(&email_with_ip(), &["https://bad.test/x".to_string()])
            .await;

        assert_eq!(findings.indicators.len(), 3);
        // url 2.0+0.8, ip 1.5+0.30, domain 2.0
        assert!((findings.risk - 6.6).abs() < 1e-9);
        assert!(findings
            .indicators
            .iter()
            .any(|i| i.severity == Severity::Critical && i.kind == IndicatorKind::Url));
    }

    #[tokio::test]
    async fn low_scores_and_old_domains_contribute_nothing() {
        let providers = Arc::new(StubProviders::new(false, 10, 4000));
        let service = ThreatIntelService::new(config(true, Duration::from_secs(1)), providers);
        let findings = service
            .enrich(&email_with_ip(), &["https://ok.test/x".to_string()])
            .await;
        assert!(findings.indicators.is_empty());
        assert_eq!(findings.risk, 0.0);
    }

    #[tokio::test]
    async fn url_lookups_capped_at_three_and_cached() {
        let providers = Arc::new(StubProviders::new(true, 0, 4000));
        let service =
            ThreatIntelService::new(config(true, Duration::from_secs(1)), Arc::clone(&providers) as Arc<dyn IntelProviders>);
        let urls: Vec<String> = (0..5).map(|i| format!("https://bad{}.test/", i)).collect();

        let email = email_with_ip();
        service.enrich(&email, &urls).await;
        assert_eq!(providers.url_calls.load(Ordering::SeqCst), 3);

        // Second pass hits the cache for the same first three URLs.
        service.enrich(&email, &urls).await;
        assert_eq!(providers.url_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn slow_provider_times_out_softly() {
        let mut stub = StubProviders::new(true, 99, 1);
        stub.delay = Duration::from_millis(200);
        let providers = Arc::new(stub);
        let service = ThreatIntelService::new(config(true, Duration::from_millis(20)), providers);
        let findings = service
            .enrich(&email_with_ip(), &["https://bad.test/".to_string()])
            .await;
        assert!(findings.indicators.is_empty());
        assert_eq!(findings.risk, 0.0);
    }
}
