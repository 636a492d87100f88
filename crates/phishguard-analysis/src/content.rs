//! Content analyzer
//!
//! Table-driven detectors over subject and body: URL heuristics,
//! social-engineering keyword families, anchor-text mismatch, brand
//! impersonation, and sender-domain typosquatting. Every table compiles
//! once at construction.

use crate::{IndicatorKind, Severity, ThreatIndicator};
use aho_corasick::AhoCorasick;
use phishguard_common::Email;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;

const EVIDENCE_CAP: usize = 3;

/// Output of the content pass
#[derive(Debug, Clone, Default)]
pub struct ContentFindings {
    pub indicators: Vec<ThreatIndicator>,
    /// Distinct social-engineering tactic families detected
    pub tactic_count: usize,
    /// URLs flagged by any URL heuristic
    pub suspicious_urls: Vec<String>,
    /// Every URL extracted from the body
    pub urls: Vec<String>,
}

struct Brand {
    name: &'static str,
    domains: &'static [&'static str],
}

/// Keyword and URL rule engine
pub struct ContentAnalyzer {
    url_re: Regex,
    ipv4_host_re: Regex,
    urgency: AhoCorasick,
    urgency_labels: Vec<&'static str>,
    credential: AhoCorasick,
    credential_labels: Vec<&'static str>,
    financial: AhoCorasick,
    financial_labels: Vec<&'static str>,
    shortener_hosts: HashSet<&'static str>,
    suspicious_tlds: HashSet<&'static str>,
    brands: Vec<Brand>,
    typosquats: Vec<(Regex, &'static str)>,
    anchor_selector: Selector,
}

impl ContentAnalyzer {
    pub fn new() -> Self {
        let urgency_labels = vec![
            "urgent",
            "immediately",
            "act now",
            "action required",
            "within 24 hours",
            "account will be suspended",
            "account has been locked",
            "expires today",
            "final notice",
            "unusual activity",
        ];
        let credential_labels = vec![
            "password",
            "verify your account",
            "confirm your identity",
            "login credentials",
            "update your payment",
            "social security number",
            "bank account details",
            "credit card number",
            "security question",
        ];
        let financial_labels = vec![
            "wire transfer",
            "gift card",
            "payment overdue",
            "outstanding invoice",
            "claim your refund",
            "lottery",
            "inheritance",
            "bitcoin payment",
            "investment opportunity",
        ];

        Self {
            url_re: Regex::new(r#"(?i)\bhttps?://[^\s<>"')\]]+"#).expect("url pattern"),
            ipv4_host_re: Regex::new(r"^\d{1,3}(\.\d{1,3}){3}$").expect("ipv4 host pattern"),
            urgency: build_automaton(&urgency_labels),
            urgency_labels,
            credential: build_automaton(&credential_labels),
            credential_labels,
            financial: build_automaton(&financial_labels),
            financial_labels,
            shortener_hosts: [
                "bit.ly",
                "tinyurl.com",
                "goo.gl",
                "t.co",
                "ow.ly",
                "is.gd",
                "buff.ly",
                "rebrand.ly",
                "cutt.ly",
                "shorturl.at",
            ]
            .into_iter()
            .collect(),
            suspicious_tlds: [
                "tk", "ml", "ga", "cf", "gq", "xyz", "top", "work", "click", "link", "buzz",
                "cam", "icu", "surf", "monster", "uno",
            ]
            .into_iter()
            .collect(),
            brands: vec![
                Brand {
                    name: "microsoft",
                    domains: &["microsoft.com", "office.com", "live.com"],
                },
                Brand {
                    name: "google",
                    domains: &["google.com", "gmail.com"],
                },
                Brand {
                    name: "apple",
                    domains: &["apple.com", "icloud.com"],
                },
                Brand {
                    name: "amazon",
                    domains: &["amazon.com"],
                },
                Brand {
                    name: "paypal",
                    domains: &["paypal.com"],
                },
                Brand {
                    name: "netflix",
                    domains: &["netflix.com"],
                },
                Brand {
                    name: "docusign",
                    domains: &["docusign.com", "docusign.net"],
                },
            ],
            typosquats: vec![
                (Regex::new(r"paypa1|pay-pal|paypall").expect("typosquat"), "paypal"),
                (Regex::new(r"g00gle|go0gle|g0ogle|googie").expect("typosquat"), "google"),
                (
                    Regex::new(r"micr0s0ft|micr0soft|micros0ft|rnicrosoft").expect("typosquat"),
                    "microsoft",
                ),
                (Regex::new(r"amaz0n|arnazon|amazonn").expect("typosquat"), "amazon"),
                (Regex::new(r"app1e|appl3").expect("typosquat"), "apple"),
                (Regex::new(r"netf1ix|n3tflix").expect("typosquat"), "netflix"),
                (
                    Regex::new(r"faceb00k|faceb0ok|facebo0k").expect("typosquat"),
                    "facebook",
                ),
                (
                    Regex::new(r"1inkedin|linked1n|l1nkedin").expect("typosquat"),
                    "linkedin",
                ),
            ],
            anchor_selector: Selector::parse("a[href]").expect("anchor selector"),
        }
    }

    /// URL pass only: the suspicious URLs the enricher should look up.
    /// Cheap enough to run ahead of the full analysis fan-out.
    pub fn suspicious_urls(&self, email: &Email) -> Vec<String> {
        let combined = format!("{} {}", email.subject, email.body);
        let mut findings = ContentFindings::default();
        self.check_urls(&combined, &mut findings);
        findings.suspicious_urls
    }

    /// Run the content rules; pure over the message.
    pub fn analyze(&self, email: &Email) -> ContentFindings {
        let mut findings = ContentFindings::default();
        let combined = format!("{} {}", email.subject, email.body);

        self.check_urls(&combined, &mut findings);
        self.check_keywords(&combined, &mut findings);
        self.check_anchor_mismatch(&email.body, &mut findings);
        self.check_brand_impersonation(email, &combined, &mut findings);
        self.check_typosquat(email, &mut findings);

        findings
    }

    fn check_urls(&self, text: &str, findings: &mut ContentFindings) {
        let mut seen = HashSet::new();
        for m in self.url_re.find_iter(text) {
            let raw = m.as_str().trim_end_matches(['.', ',', ';', '!', '?']);
            if !seen.insert(raw.to_string()) {
                continue;
            }
            findings.urls.push(raw.to_string());

            let host = url_host(raw);
            let mut flagged = false;

            if let Some(host) = &host {
                if self.shortener_hosts.contains(host.as_str()) {
                    flagged = true;
                    findings.indicators.push(ThreatIndicator {
                        kind: IndicatorKind::Url,
                        severity: Severity::Medium,
                        description: "Link uses a URL shortener".to_string(),
                        evidence: raw.to_string(),
                        confidence: 0.6,
                    });
                }
                if self.ipv4_host_re.is_match(host) {
                    flagged = true;
                    findings.indicators.push(ThreatIndicator {
                        kind: IndicatorKind::Url,
                        severity: Severity::High,
                        description: "Link points at a raw IP address".to_string(),
                        evidence: raw.to_string(),
                        confidence: 0.8,
                    });
                }
                if let Some(tld) = host.rsplit('.').next() {
                    if self.suspicious_tlds.contains(tld) {
                        flagged = true;
                        findings.indicators.push(ThreatIndicator {
                            kind: IndicatorKind::Url,
                            severity: Severity::Medium,
                            description: format!("Link uses suspicious TLD .{}", tld),
                            evidence: raw.to_string(),
                            confidence: 0.6,
                        });
                    }
                }
            }

            // Userinfo trick: https://trusted.com@evil.test/
            if raw.contains('@') {
                flagged = true;
                findings.indicators.push(ThreatIndicator {
                    kind: IndicatorKind::Url,
                    severity: Severity::Critical,
                    description: "Link embeds credentials-style @ redirection".to_string(),
                    evidence: raw.to_string(),
                    confidence: 0.9,
                });
            }

            if flagged {
                findings.suspicious_urls.push(raw.to_string());
            }
        }
    }

    fn check_keywords(&self, text: &str, findings: &mut ContentFindings) {
        let urgency_hits = unique_matches(&self.urgency, &self.urgency_labels, text);
        if !urgency_hits.is_empty() {
            findings.tactic_count += 1;
            let hits = urgency_hits.len();
            findings.indicators.push(ThreatIndicator {
                kind: IndicatorKind::Content,
                severity: if hits > 2 {
                    Severity::High
                } else {
                    Severity::Medium
                },
                description: "Urgency pressure language".to_string(),
                evidence: cap_join(&urgency_hits),
                confidence: (0.6 + 0.1 * hits as f64).min(0.9),
            });
        }

        let credential_hits = unique_matches(&self.credential, &self.credential_labels, text);
        if !credential_hits.is_empty() {
            findings.tactic_count += 1;
            findings.indicators.push(ThreatIndicator {
                kind: IndicatorKind::Content,
                severity: Severity::Critical,
                description: "Requests credentials or personal data".to_string(),
                evidence: cap_join(&credential_hits),
                confidence: 0.9,
            });
        }

        let financial_hits = unique_matches(&self.financial, &self.financial_labels, text);
        if !financial_hits.is_empty() {
            findings.tactic_count += 1;
            findings.indicators.push(ThreatIndicator {
                kind: IndicatorKind::Content,
                severity: Severity::High,
                description: "Financial lure language".to_string(),
                evidence: cap_join(&financial_hits),
                confidence: 0.85,
            });
        }
    }

    fn check_anchor_mismatch(&self, body: &str, findings: &mut ContentFindings) {
        if !body.contains("<a") {
            return;
        }
        let fragment = Html::parse_fragment(body);
        for anchor in fragment.select(&self.anchor_selector) {
            let href = match anchor.value().attr("href") {
                Some(h) => h,
                None => continue,
            };
            // scraper's text extraction is the sanitization boundary:
            // nested markup in the anchor is dropped before comparison.
            let text: String = anchor.text().collect::<String>().trim().to_string();
            if !looks_like_url(&text) {
                continue;
            }
            let text_domain = url_host(&normalize_url(&text));
            let href_domain = url_host(&normalize_url(href));
            if let (Some(text_domain), Some(href_domain)) = (text_domain, href_domain) {
                if text_domain != href_domain {
                    findings.tactic_count += 1;
                    findings.indicators.push(ThreatIndicator {
                        kind: IndicatorKind::Content,
                        severity: Severity::High,
                        description: "Link text shows a different destination than its href"
                            .to_string(),
                        evidence: format!("text={} href={}", text_domain, href_domain),
                        confidence: 0.85,
                    });
                }
            }
        }
    }

    fn check_brand_impersonation(
        &self,
        email: &Email,
        combined: &str,
        findings: &mut ContentFindings,
    ) {
        let lowered = combined.to_lowercase();
        let sender_domain = email.sender_domain();
        for brand in &self.brands {
            if !lowered.contains(brand.name) {
                continue;
            }
            let official = brand
                .domains
                .iter()
                .any(|d| sender_domain == *d || sender_domain.ends_with(&format!(".{}", d)));
            if !official && !sender_domain.is_empty() {
                findings.tactic_count += 1;
                findings.indicators.push(ThreatIndicator {
                    kind: IndicatorKind::Sender,
                    severity: Severity::Critical,
                    description: format!("Mentions {} but sender is unrelated", brand.name),
                    evidence: format!("sender domain {}", sender_domain),
                    confidence: 0.95,
                });
            }
        }
    }

    fn check_typosquat(&self, email: &Email, findings: &mut ContentFindings) {
        let sender_domain = email.sender_domain();
        if sender_domain.is_empty() {
            return;
        }
        for (re, brand) in &self.typosquats {
            if re.is_match(&sender_domain) {
                findings.tactic_count += 1;
                findings.indicators.push(ThreatIndicator {
                    kind: IndicatorKind::Sender,
                    severity: Severity::Critical,
                    description: format!("Sender domain typosquats {}", brand),
                    evidence: sender_domain.clone(),
                    confidence: 0.98,
                });
                break;
            }
        }
    }
}

impl Default for ContentAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn build_automaton(labels: &[&'static str]) -> AhoCorasick {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(labels)
        .expect("keyword automaton")
}

fn unique_matches(
    automaton: &AhoCorasick,
    labels: &[&'static str],
    text: &str,
) -> Vec<&'static str> {
    let mut seen = HashSet::new();
    for m in automaton.find_iter(text) {
        seen.insert(m.pattern().as_usize());
    }
    let mut hits: Vec<usize> = seen.into_iter().collect();
    hits.sort_unstable();
    hits.into_iter().map(|i| labels[i]).collect()
}

fn cap_join(hits: &[&str]) -> String {
    hits.iter()
        .take(EVIDENCE_CAP)
        .copied()
        .collect::<Vec<_>>()
        .join(", ")
}

fn looks_like_url(text: &str) -> bool {
    let t = text.to_lowercase();
    t.starts_with("http://") || t.starts_with("https://") || t.starts_with("www.")
}

fn normalize_url(raw: &str) -> String {
    if raw.to_lowercase().starts_with("www.") {
        format!("https://{}", raw)
    } else {
        raw.to_string()
    }
}

fn url_host(raw: &str) -> Option<String> {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use phishguard_common::HeaderMap;

    fn email(sender: &str, subject: &str, body: &str) -> Email {
        Email {
            message_id: "m1".into(),
            provider_id: "p1".into(),
            sender: sender.into(),
            recipient: "triage@corp.test".into(),
            subject: subject.into(),
            received_at: Utc::now(),
            headers: HeaderMap::new(),
            body: body.into(),
            attachments: vec![],
        }
    }

    #[test]
    fn benign_body_produces_nothing() {
        let analyzer = ContentAnalyzer::new();
        let findings = analyzer.analyze(&email(
            "noreply@google.com",
            "Quarterly report",
            "Your quarterly report is attached.",
        ));
        assert!(findings.indicators.is_empty());
        assert_eq!(findings.tactic_count, 0);
        assert!(findings.suspicious_urls.is_empty());
    }

    #[test]
    fn classic_phishing_hits_all_families() {
        let analyzer = ContentAnalyzer::new();
        let findings = analyzer.analyze(&email(
            "security@paypa1.com",
            "Account alert",
            "URGENT: Verify your account password at https://192.168.1.1/paypal — act now!",
        ));
        let descriptions: Vec<&str> = findings
            .indicators
            .iter()
            .map(|i| i.description.as_str())
            .collect();
        assert!(descriptions.iter().any(|d| d.contains("Urgency")));
        assert!(descriptions.iter().any(|d| d.contains("credentials")));
        assert!(descriptions.iter().any(|d| d.contains("raw IP address")));
        assert!(descriptions.iter().any(|d| d.contains("paypal")));
        assert!(descriptions.iter().any(|d| d.contains("typosquats")));
        assert!(findings.tactic_count >= 3);
        assert_eq!(findings.suspicious_urls.len(), 1);
    }

    #[test]
    fn urgency_severity_scales_with_hits() {
        let analyzer = ContentAnalyzer::new();
        let two = analyzer.analyze(&email("a@x.test", "urgent", "act now"));
        let urgency = two
            .indicators
            .iter()
            .find(|i| i.description.contains("Urgency"))
            .unwrap();
        assert_eq!(urgency.severity, Severity::Medium);
        assert!((urgency.confidence - 0.8).abs() < 1e-9);

        let many = analyzer.analyze(&email(
            "a@x.test",
            "urgent final notice",
            "act now, account will be suspended immediately",
        ));
        let urgency = many
            .indicators
            .iter()
            .find(|i| i.description.contains("Urgency"))
            .unwrap();
        assert_eq!(urgency.severity, Severity::High);
        assert!((urgency.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn shortener_and_tld_flagged() {
        let analyzer = ContentAnalyzer::new();
        let findings = analyzer.analyze(&email(
            "a@x.test",
            "links",
            "see https://bit.ly/abc and https://deal.xyz/win",
        ));
        assert_eq!(findings.suspicious_urls.len(), 2);
        assert!(findings
            .indicators
            .iter()
            .any(|i| i.description.contains("shortener")));
        assert!(findings
            .indicators
            .iter()
            .any(|i| i.description.contains(".xyz")));
    }

    #[test]
    fn at_sign_url_is_critical() {
        let analyzer = ContentAnalyzer::new();
        let findings = analyzer.analyze(&email(
            "a@x.test",
            "login",
            "go to https://paypal.com@evil.example/login",
        ));
        assert!(findings
            .indicators
            .iter()
            .any(|i| i.severity == Severity::Critical && i.kind == IndicatorKind::Url));
    }

    #[test]
    fn anchor_mismatch_detected_through_sanitized_text() {
        let analyzer = ContentAnalyzer::new();
        let findings = analyzer.analyze(&email(
            "a@x.test",
            "doc",
            r#"<p>Click <a href="https://evil.example/x"><b>https://bank.example/login</b></a></p>"#,
        ));
        assert!(findings
            .indicators
            .iter()
            .any(|i| i.description.contains("different destination")));
    }

    #[test]
    fn brand_mention_from_official_domain_is_clean() {
        let analyzer = ContentAnalyzer::new();
        let findings = analyzer.analyze(&email(
            "security@mail.paypal.com",
            "Your PayPal receipt",
            "Thanks for using PayPal.",
        ));
        assert!(findings.indicators.is_empty());
    }
}
