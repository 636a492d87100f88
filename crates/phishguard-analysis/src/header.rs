//! Header analyzer
//!
//! Parses SPF, DKIM, and DMARC statuses out of the standard
//! authentication headers and checks domain alignment between the From
//! address, the authenticated domain, and Reply-To.

use crate::{IndicatorKind, Severity, ThreatIndicator};
use phishguard_common::Email;
use regex::Regex;

/// Parsed status of one authentication mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Pass,
    Fail,
    SoftFail,
    Neutral,
    TempError,
    PermError,
    None,
    Quarantine,
    Reject,
    Missing,
}

impl AuthStatus {
    fn parse(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "pass" => AuthStatus::Pass,
            "fail" => AuthStatus::Fail,
            "softfail" => AuthStatus::SoftFail,
            "neutral" => AuthStatus::Neutral,
            "temperror" => AuthStatus::TempError,
            "permerror" => AuthStatus::PermError,
            "none" => AuthStatus::None,
            "quarantine" => AuthStatus::Quarantine,
            "reject" => AuthStatus::Reject,
            _ => AuthStatus::Missing,
        }
    }
}

/// Output of the header pass
#[derive(Debug, Clone, Default)]
pub struct HeaderFindings {
    pub indicators: Vec<ThreatIndicator>,
    /// Additional weight from authentication failures, added to the
    /// severity-weight sum when the sub-score is computed
    pub auth_bonus: f64,
}

/// Authentication and alignment rule engine
pub struct HeaderAnalyzer {
    spf_re: Regex,
    dkim_re: Regex,
    dmarc_re: Regex,
    header_from_re: Regex,
}

impl HeaderAnalyzer {
    pub fn new() -> Self {
        Self {
            spf_re: Regex::new(r"(?i)\bspf\s*=\s*([a-z]+)").expect("spf pattern"),
            dkim_re: Regex::new(r"(?i)\bdkim\s*=\s*([a-z]+)").expect("dkim pattern"),
            dmarc_re: Regex::new(r"(?i)\bdmarc\s*=\s*([a-z]+)").expect("dmarc pattern"),
            header_from_re: Regex::new(r"(?i)header\.from\s*=\s*([a-z0-9.\-]+)")
                .expect("header.from pattern"),
        }
    }

    /// Run the header rules; pure over the message.
    pub fn analyze(&self, email: &Email) -> HeaderFindings {
        let mut findings = HeaderFindings::default();

        let auth_results = self.collect_auth_header(email);
        if let Some(raw) = auth_results {
            let spf = self.status(&self.spf_re, &raw);
            let dkim = self.status(&self.dkim_re, &raw);
            let dmarc = self.status(&self.dmarc_re, &raw);

            self.mechanism_indicator(&mut findings, "SPF", spf, 3.0, 1.5);
            self.mechanism_indicator(&mut findings, "DKIM", dkim, 3.0, 1.5);
            self.dmarc_indicator(&mut findings, dmarc);

            // Domain alignment: From vs the domain that authenticated.
            if let Some(auth_domain) = self
                .header_from_re
                .captures(&raw)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_lowercase())
            {
                let from_domain = email.sender_domain();
                if !from_domain.is_empty()
                    && !domains_aligned(&from_domain, &auth_domain)
                {
                    findings.indicators.push(ThreatIndicator {
                        kind: IndicatorKind::Header,
                        severity: Severity::Critical,
                        description: "Sender domain does not match authenticated domain"
                            .to_string(),
                        evidence: format!("from={} authenticated={}", from_domain, auth_domain),
                        confidence: 0.9,
                    });
                }
            }
        }

        // Reply-To pointing somewhere other than the From domain.
        if let Some(reply_to) = email.headers.get("reply-to") {
            let reply_domain = address_domain(reply_to);
            let from_domain = email.sender_domain();
            if !reply_domain.is_empty()
                && !from_domain.is_empty()
                && reply_domain != from_domain
            {
                findings.indicators.push(ThreatIndicator {
                    kind: IndicatorKind::Header,
                    severity: Severity::Medium,
                    description: "Reply-To domain differs from sender domain".to_string(),
                    evidence: format!("from={} reply-to={}", from_domain, reply_domain),
                    confidence: 0.7,
                });
            }
        }

        findings
    }

    fn collect_auth_header(&self, email: &Email) -> Option<String> {
        let mut parts: Vec<&str> = Vec::new();
        for name in ["authentication-results", "arc-authentication-results"] {
            for value in email.headers.get_all(name) {
                parts.push(value.as_str());
            }
        }
        if let Some(received_spf) = email.headers.get("received-spf") {
            parts.push(received_spf);
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }

    fn status(&self, re: &Regex, raw: &str) -> AuthStatus {
        re.captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| AuthStatus::parse(m.as_str()))
            .unwrap_or(AuthStatus::Missing)
    }

    fn mechanism_indicator(
        &self,
        findings: &mut HeaderFindings,
        mechanism: &str,
        status: AuthStatus,
        fail_bonus: f64,
        soft_bonus: f64,
    ) {
        match status {
            AuthStatus::Pass => {}
            AuthStatus::Fail => {
                findings.auth_bonus += fail_bonus;
                findings.indicators.push(ThreatIndicator {
                    kind: IndicatorKind::Header,
                    severity: Severity::High,
                    description: format!("{} authentication failed", mechanism),
                    evidence: format!("{}=fail", mechanism.to_lowercase()),
                    confidence: 0.9,
                });
            }
            AuthStatus::SoftFail
            | AuthStatus::Neutral
            | AuthStatus::TempError
            | AuthStatus::PermError
            | AuthStatus::None => {
                findings.auth_bonus += soft_bonus;
                findings.indicators.push(ThreatIndicator {
                    kind: IndicatorKind::Header,
                    severity: Severity::Medium,
                    description: format!("{} did not authenticate", mechanism),
                    evidence: format!("{}={:?}", mechanism.to_lowercase(), status),
                    confidence: 0.7,
                });
            }
            AuthStatus::Missing | AuthStatus::Quarantine | AuthStatus::Reject => {
                if status == AuthStatus::Missing {
                    findings.indicators.push(ThreatIndicator {
                        kind: IndicatorKind::Header,
                        severity: Severity::Medium,
                        description: format!("{} result missing", mechanism),
                        evidence: format!("no {} status present", mechanism.to_lowercase()),
                        confidence: 0.5,
                    });
                }
            }
        }
    }

    fn dmarc_indicator(&self, findings: &mut HeaderFindings, status: AuthStatus) {
        match status {
            AuthStatus::Pass => {}
            AuthStatus::Reject => {
                findings.auth_bonus += 4.0;
                findings.indicators.push(ThreatIndicator {
                    kind: IndicatorKind::Header,
                    severity: Severity::Critical,
                    description: "DMARC policy rejects this message".to_string(),
                    evidence: "dmarc=reject".to_string(),
                    confidence: 0.95,
                });
            }
            AuthStatus::Fail | AuthStatus::Quarantine => {
                findings.auth_bonus += 3.0;
                findings.indicators.push(ThreatIndicator {
                    kind: IndicatorKind::Header,
                    severity: Severity::High,
                    description: "DMARC authentication failed".to_string(),
                    evidence: format!("dmarc={:?}", status),
                    confidence: 0.9,
                });
            }
            AuthStatus::SoftFail
            | AuthStatus::Neutral
            | AuthStatus::TempError
            | AuthStatus::PermError
            | AuthStatus::None => {
                findings.auth_bonus += 1.5;
                findings.indicators.push(ThreatIndicator {
                    kind: IndicatorKind::Header,
                    severity: Severity::Medium,
                    description: "DMARC did not authenticate".to_string(),
                    evidence: format!("dmarc={:?}", status),
                    confidence: 0.7,
                });
            }
            AuthStatus::Missing => {
                findings.indicators.push(ThreatIndicator {
                    kind: IndicatorKind::Header,
                    severity: Severity::Medium,
                    description: "DMARC result missing".to_string(),
                    evidence: "no dmarc status present".to_string(),
                    confidence: 0.5,
                });
            }
        }
    }
}

impl Default for HeaderAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn address_domain(addr: &str) -> String {
    addr.rsplit_once('@')
        .map(|(_, d)| d.trim_end_matches('>').trim().to_lowercase())
        .unwrap_or_default()
}

/// Equal domains, or one a subdomain of the other
fn domains_aligned(a: &str, b: &str) -> bool {
    a == b || a.ends_with(&format!(".{}", b)) || b.ends_with(&format!(".{}", a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use phishguard_common::HeaderMap;

    fn email_with_auth(sender: &str, auth: &str) -> Email {
        let mut headers = HeaderMap::new();
        headers.insert("Authentication-Results", auth);
        Email {
            message_id: "m1".into(),
            provider_id: "p1".into(),
            sender: sender.into(),
            recipient: "triage@corp.test".into(),
            subject: "s".into(),
            received_at: Utc::now(),
            headers,
            body: String::new(),
            attachments: vec![],
        }
    }

    #[test]
    fn all_pass_produces_no_indicators() {
        let analyzer = HeaderAnalyzer::new();
        let email = email_with_auth(
            "noreply@google.com",
            "spf=pass; dkim=pass; dmarc=pass; header.from=google.com",
        );
        let findings = analyzer.analyze(&email);
        assert!(findings.indicators.is_empty());
        assert_eq!(findings.auth_bonus, 0.0);
    }

    #[test]
    fn hard_fails_carry_high_severity_and_bonus() {
        let analyzer = HeaderAnalyzer::new();
        let email = email_with_auth(
            "security@paypa1.com",
            "spf=fail; dkim=fail; dmarc=fail",
        );
        let findings = analyzer.analyze(&email);
        assert_eq!(findings.indicators.len(), 3);
        assert!(findings
            .indicators
            .iter()
            .all(|i| i.severity == Severity::High));
        assert_eq!(findings.auth_bonus, 9.0);
    }

    #[test]
    fn dmarc_reject_is_critical() {
        let analyzer = HeaderAnalyzer::new();
        let email = email_with_auth("a@x.test", "spf=pass; dkim=pass; dmarc=reject");
        let findings = analyzer.analyze(&email);
        assert_eq!(findings.indicators.len(), 1);
        assert_eq!(findings.indicators[0].severity, Severity::Critical);
        assert_eq!(findings.auth_bonus, 4.0);
    }

    #[test]
    fn softfail_maps_to_medium() {
        let analyzer = HeaderAnalyzer::new();
        let email = email_with_auth("a@x.test", "spf=softfail; dkim=pass; dmarc=pass");
        let findings = analyzer.analyze(&email);
        assert_eq!(findings.indicators.len(), 1);
        assert_eq!(findings.indicators[0].severity, Severity::Medium);
        assert_eq!(findings.auth_bonus, 1.5);
    }

    #[test]
    fn from_domain_mismatch_is_critical_except_subdomain() {
        let analyzer = HeaderAnalyzer::new();

        let email = email_with_auth(
            "billing@evil.test",
            "spf=pass; dkim=pass; dmarc=pass; header.from=bank.example",
        );
        let findings = analyzer.analyze(&email);
        assert!(findings
            .indicators
            .iter()
            .any(|i| i.severity == Severity::Critical));

        let email = email_with_auth(
            "billing@mail.bank.example",
            "spf=pass; dkim=pass; dmarc=pass; header.from=bank.example",
        );
        let findings = analyzer.analyze(&email);
        assert!(findings.indicators.is_empty());
    }

    #[test]
    fn reply_to_mismatch_is_medium() {
        let analyzer = HeaderAnalyzer::new();
        let mut email = email_with_auth(
            "a@corp.example",
            "spf=pass; dkim=pass; dmarc=pass; header.from=corp.example",
        );
        email.headers.insert("Reply-To", "collector@elsewhere.test");
        let findings = analyzer.analyze(&email);
        assert_eq!(findings.indicators.len(), 1);
        assert_eq!(findings.indicators[0].severity, Severity::Medium);
    }

    #[test]
    fn no_auth_headers_yields_no_mechanism_indicators() {
        let analyzer = HeaderAnalyzer::new();
        let email = Email {
            message_id: "m1".into(),
            provider_id: "p1".into(),
            sender: "a@x.test".into(),
            recipient: "t@corp.test".into(),
            subject: "s".into(),
            received_at: Utc::now(),
            headers: HeaderMap::new(),
            body: String::new(),
            attachments: vec![],
        };
        assert!(analyzer.analyze(&email).indicators.is_empty());
    }
}
