//! Reputation providers
//!
//! Narrow client interfaces over the external reputation services. The
//! HTTP implementations keep each provider's native wire shape; the
//! trait keeps the enricher testable and the rest of the system
//! ignorant of provider details.

use async_trait::async_trait;
use phishguard_common::config::IntelConfig;
use serde::Deserialize;
use thiserror::Error;

/// Provider call failure; always soft at the enricher level
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider http error: {0}")]
    Http(String),
    #[error("provider returned unusable payload: {0}")]
    Payload(String),
    #[error("provider not configured")]
    NotConfigured,
}

/// URL reputation verdict
#[derive(Debug, Clone)]
pub struct UrlReputationReport {
    pub malicious: bool,
    /// Provider confidence in [0, 1]
    pub confidence: f64,
}

/// Sender-IP abuse verdict
#[derive(Debug, Clone)]
pub struct IpReputationReport {
    /// Abuse confidence score 0-100
    pub abuse_score: u32,
}

/// Domain registration age
#[derive(Debug, Clone)]
pub struct DomainAgeReport {
    pub age_days: i64,
}

/// The three lookups the enricher performs
#[async_trait]
pub trait IntelProviders: Send + Sync {
    async fn lookup_url(&self, url: &str) -> Result<UrlReputationReport, ProviderError>;
    async fn lookup_ip(&self, ip: &str) -> Result<IpReputationReport, ProviderError>;
    async fn lookup_domain_age(&self, domain: &str) -> Result<DomainAgeReport, ProviderError>;
}

// Wire shapes, kept close to the providers' JSON.

#[derive(Debug, Deserialize)]
struct VtUrlReport {
    data: VtUrlData,
}

#[derive(Debug, Deserialize)]
struct VtUrlData {
    attributes: VtUrlAttributes,
}

#[derive(Debug, Deserialize)]
struct VtUrlAttributes {
    last_analysis_stats: VtAnalysisStats,
}

#[derive(Debug, Deserialize)]
struct VtAnalysisStats {
    malicious: u32,
    suspicious: u32,
    harmless: u32,
    undetected: u32,
}

#[derive(Debug, Deserialize)]
struct AbuseIpReport {
    data: AbuseIpData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AbuseIpData {
    abuse_confidence_score: u32,
}

#[derive(Debug, Deserialize)]
struct WhoisReport {
    created_at: chrono::DateTime<chrono::Utc>,
}

/// reqwest-backed provider clients
pub struct HttpProviders {
    client: reqwest::Client,
    url_api_key: Option<String>,
    ip_api_key: Option<String>,
    domain_api_key: Option<String>,
    url_base: String,
    ip_base: String,
    domain_base: String,
}

impl HttpProviders {
    pub fn new(config: &IntelConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url_api_key: config.url_api_key.clone(),
            ip_api_key: config.ip_api_key.clone(),
            domain_api_key: config.domain_api_key.clone(),
            url_base: "https://www.virustotal.com/api/v3".to_string(),
            ip_base: "https://api.abuseipdb.com/api/v2".to_string(),
            domain_base: "https://api.domainmeta.example/v1".to_string(),
        }
    }

    /// Override provider endpoints (staging, self-hosted mirrors)
    pub fn with_endpoints(mut self, url_base: &str, ip_base: &str, domain_base: &str) -> Self {
        self.url_base = url_base.trim_end_matches('/').to_string();
        self.ip_base = ip_base.trim_end_matches('/').to_string();
        self.domain_base = domain_base.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl IntelProviders for HttpProviders {
    async fn lookup_url(&self, url: &str) -> Result<UrlReputationReport, ProviderError> {
        let key = self
            .url_api_key
            .as_deref()
            .ok_or(ProviderError::NotConfigured)?;
        // VirusTotal addresses URLs by the unpadded base64 of the URL.
        let id = base64_url(url);
        let endpoint = format!("{}/urls/{}", self.url_base, id);

        let report: VtUrlReport = self
            .client
            .get(&endpoint)
            .header("x-apikey", key)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProviderError::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProviderError::Payload(e.to_string()))?;

        let stats = report.data.attributes.last_analysis_stats;
        let flagged = stats.malicious + stats.suspicious;
        let total = flagged + stats.harmless + stats.undetected;
        Ok(UrlReputationReport {
            malicious: stats.malicious > 0,
            confidence: if total == 0 {
                0.0
            } else {
                (flagged as f64 / total as f64).min(1.0)
            },
        })
    }

    async fn lookup_ip(&self, ip: &str) -> Result<IpReputationReport, ProviderError> {
        let key = self
            .ip_api_key
            .as_deref()
            .ok_or(ProviderError::NotConfigured)?;
        let endpoint = format!("{}/check", self.ip_base);

        let report: AbuseIpReport = self
            .client
            .get(&endpoint)
            .query(&[("ipAddress", ip)])
            .header("Key", key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProviderError::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProviderError::Payload(e.to_string()))?;

        Ok(IpReputationReport {
            abuse_score: report.data.abuse_confidence_score.min(100),
        })
    }

    async fn lookup_domain_age(&self, domain: &str) -> Result<DomainAgeReport, ProviderError> {
        let key = self
            .domain_api_key
            .as_deref()
            .ok_or(ProviderError::NotConfigured)?;
        let endpoint = format!("{}/domains/{}", self.domain_base, domain);

        let report: WhoisReport = self
            .client
            .get(&endpoint)
            .header("x-api-key", key)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProviderError::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProviderError::Payload(e.to_string()))?;

        let age = chrono::Utc::now() - report.created_at;
        Ok(DomainAgeReport {
            age_days: age.num_days(),
        })
    }
}

/// Unpadded URL-safe base64, as the URL reputation API expects
fn base64_url(input: &str) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(input.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_url_is_unpadded_and_url_safe() {
        assert_eq!(base64_url("http://a/"), "aHR0cDovL2Ev");
        assert_eq!(base64_url("ab"), "YWI");
        assert!(!base64_url("https://x.test/?q=1&r=2").contains('='));
        assert!(!base64_url("https://x.test/?q=1&r=2").contains('+'));
    }

    #[test]
    fn missing_keys_report_not_configured() {
        let providers = HttpProviders::new(&IntelConfig {
            enabled: true,
            url_api_key: None,
            ip_api_key: None,
            domain_api_key: None,
            timeout: std::time::Duration::from_secs(1),
            cache_ttl: std::time::Duration::from_secs(60),
        });
        let err = tokio_test::block_on(providers.lookup_url("https://x.test"));
        assert!(matches!(err, Err(ProviderError::NotConfigured)));
    }
}
