//! Environment-driven configuration
//!
//! All tunables are read once at startup. In production, keys without a
//! safe default abort startup with an error naming the missing variable.

use crate::error::{ConfigError, ConfigResult};
use std::time::Duration;

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Fail-closed guardrails, required secrets
    Production,
    /// Permissive defaults for local work
    Development,
}

impl Environment {
    fn from_env() -> Self {
        match std::env::var("PG_ENVIRONMENT").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            _ => Environment::Development,
        }
    }

    /// True in production
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Mailbox under observation and poll-fallback tuning
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub address: String,
    pub check_interval: Duration,
    pub lookback: Duration,
    pub max_pages: u32,
}

/// Push notification configuration
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub notification_url: String,
    pub client_state: String,
    pub resource: String,
    pub renewal_margin: Duration,
}

/// Outbound reply rate limits
#[derive(Debug, Clone)]
pub struct RateConfig {
    pub max_per_hour: u64,
    pub max_per_day: u64,
    pub burst_threshold: u64,
    pub burst_window: Duration,
    pub breaker_reset: Duration,
}

/// Deduplication windows
#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub enabled: bool,
    pub content_ttl: Duration,
    pub sender_cooldown: Duration,
}

/// Threat-intel provider keys and bounds
#[derive(Debug, Clone)]
pub struct IntelConfig {
    pub enabled: bool,
    pub url_api_key: Option<String>,
    pub ip_api_key: Option<String>,
    pub domain_api_key: Option<String>,
    pub timeout: Duration,
    pub cache_ttl: Duration,
}

/// LLM explainer configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub demo_mode: bool,
    pub timeout: Duration,
    pub retries: u32,
    pub breaker_threshold: u32,
    pub breaker_reset: Duration,
}

/// Distributed cache backend
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub url: Option<String>,
    pub key_prefix: String,
}

/// Guardrail allowlists
#[derive(Debug, Clone, Default)]
pub struct AllowlistConfig {
    pub emails: Vec<String>,
    pub domains: Vec<String>,
}

impl AllowlistConfig {
    /// True when neither list has entries
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty() && self.domains.is_empty()
    }
}

/// Pipeline and queue concurrency bounds
#[derive(Debug, Clone)]
pub struct ConcurrencyConfig {
    pub parallel_limit: usize,
    pub queue_concurrency: usize,
    pub queue_max_retries: u32,
    pub queue_backoff: Duration,
    pub queue_max_backoff: Duration,
}

/// Mail provider API endpoint
#[derive(Debug, Clone)]
pub struct MailApiConfig {
    pub base_url: String,
    pub token: Option<String>,
}

/// Top-level application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub bind_addr: String,
    pub mailbox: MailboxConfig,
    pub webhook: WebhookConfig,
    pub rate: RateConfig,
    pub dedup: DedupConfig,
    pub intel: IntelConfig,
    pub llm: LlmConfig,
    pub cache: CacheConfig,
    pub allowlist: AllowlistConfig,
    pub concurrency: ConcurrencyConfig,
    pub mail: MailApiConfig,
    /// When true the in-process message-id LRU alone decides duplicates
    /// (single-replica deployments). Otherwise the distributed
    /// set-if-absent on `msgid:v1:<id>` is authoritative.
    pub msgid_lru_authoritative: bool,
    /// TTL for the duplicate message-id window
    pub msgid_ttl: Duration,
}

fn var(key: &'static str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required(key: &'static str, production: bool, default: &str) -> ConfigResult<String> {
    match var(key) {
        Some(v) => Ok(v),
        None if production => Err(ConfigError::MissingKey(key)),
        None => Ok(default.to_string()),
    }
}

fn parse_u64(key: &'static str, default: u64) -> ConfigResult<u64> {
    match var(key) {
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: v }),
        None => Ok(default),
    }
}

fn parse_bool(key: &'static str, default: bool) -> bool {
    match var(key).as_deref() {
        Some("1") | Some("true") | Some("yes") => true,
        Some("0") | Some("false") | Some("no") => false,
        _ => default,
    }
}

fn parse_ms(key: &'static str, default_ms: u64) -> ConfigResult<Duration> {
    Ok(Duration::from_millis(parse_u64(key, default_ms)?))
}

fn parse_list(key: &'static str) -> Vec<String> {
    var(key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

impl AppConfig {
    /// Load from environment variables. In production every key without a
    /// safe default must be present, otherwise startup aborts with the
    /// key name.
    pub fn from_env() -> ConfigResult<Self> {
        let environment = Environment::from_env();
        let production = environment.is_production();

        Ok(Self {
            environment,
            bind_addr: var("PG_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            mailbox: MailboxConfig {
                address: required("PG_MAILBOX_ADDRESS", production, "triage@example.dev")?
                    .to_lowercase(),
                check_interval: parse_ms("PG_CHECK_INTERVAL_MS", 300_000)?,
                lookback: parse_ms("PG_LOOKBACK_MS", 600_000)?,
                max_pages: parse_u64("PG_MAX_PAGES", 10)? as u32,
            },
            webhook: WebhookConfig {
                notification_url: required(
                    "PG_WEBHOOK_NOTIFICATION_URL",
                    production,
                    "http://localhost:8080/webhooks/mail",
                )?,
                client_state: required("PG_WEBHOOK_CLIENT_STATE", production, "dev-client-state")?,
                resource: var("PG_WEBHOOK_RESOURCE").unwrap_or_else(|| {
                    format!(
                        "users/{}/mailFolders('inbox')/messages",
                        var("PG_MAILBOX_ADDRESS").unwrap_or_else(|| "triage@example.dev".into())
                    )
                }),
                renewal_margin: parse_ms("PG_RENEWAL_MARGIN_MS", 1_800_000)?,
            },
            rate: RateConfig {
                max_per_hour: parse_u64("PG_RATE_MAX_PER_HOUR", 50)?,
                max_per_day: parse_u64("PG_RATE_MAX_PER_DAY", 200)?,
                burst_threshold: parse_u64("PG_RATE_BURST_THRESHOLD", 10)?,
                burst_window: parse_ms("PG_RATE_BURST_WINDOW_MS", 600_000)?,
                breaker_reset: parse_ms("PG_RATE_BREAKER_RESET_MS", 1_800_000)?,
            },
            dedup: DedupConfig {
                enabled: parse_bool("PG_DEDUP_ENABLED", true),
                content_ttl: parse_ms("PG_DEDUP_CONTENT_TTL_MS", 86_400_000)?,
                sender_cooldown: parse_ms("PG_DEDUP_SENDER_COOLDOWN_MS", 3_600_000)?,
            },
            intel: IntelConfig {
                enabled: parse_bool("PG_INTEL_ENABLED", false),
                url_api_key: var("PG_INTEL_URL_API_KEY"),
                ip_api_key: var("PG_INTEL_IP_API_KEY"),
                domain_api_key: var("PG_INTEL_DOMAIN_API_KEY"),
                timeout: parse_ms("PG_INTEL_TIMEOUT_MS", 3_000)?,
                cache_ttl: parse_ms("PG_INTEL_CACHE_TTL_MS", 3_600_000)?,
            },
            llm: LlmConfig {
                api_key: var("PG_LLM_API_KEY"),
                demo_mode: parse_bool("PG_LLM_DEMO_MODE", false),
                timeout: parse_ms("PG_LLM_TIMEOUT_MS", 10_000)?,
                retries: parse_u64("PG_LLM_RETRIES", 2)? as u32,
                breaker_threshold: parse_u64("PG_LLM_BREAKER_THRESHOLD", 5)? as u32,
                breaker_reset: parse_ms("PG_LLM_BREAKER_RESET_MS", 60_000)?,
            },
            cache: CacheConfig {
                url: var("PG_CACHE_URL"),
                key_prefix: var("PG_CACHE_KEY_PREFIX").unwrap_or_else(|| "pg".to_string()),
            },
            allowlist: AllowlistConfig {
                emails: parse_list("PG_ALLOWLIST_EMAILS"),
                domains: parse_list("PG_ALLOWLIST_DOMAINS"),
            },
            concurrency: ConcurrencyConfig {
                parallel_limit: parse_u64("PG_PARALLEL_LIMIT", 5)? as usize,
                queue_concurrency: parse_u64("PG_QUEUE_CONCURRENCY", 2)? as usize,
                queue_max_retries: parse_u64("PG_QUEUE_MAX_RETRIES", 3)? as u32,
                queue_backoff: parse_ms("PG_QUEUE_BACKOFF_MS", 5_000)?,
                queue_max_backoff: parse_ms("PG_QUEUE_MAX_BACKOFF_MS", 300_000)?,
            },
            mail: MailApiConfig {
                base_url: var("PG_MAIL_BASE_URL")
                    .unwrap_or_else(|| "https://graph.microsoft.com/v1.0".to_string()),
                token: var("PG_MAIL_TOKEN"),
            },
            msgid_lru_authoritative: parse_bool("PG_MSGID_LRU_AUTHORITATIVE", false),
            msgid_ttl: parse_ms("PG_MSGID_TTL_MS", 86_400_000)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_development() {
        // Not production: everything should have a default.
        std::env::remove_var("PG_ENVIRONMENT");
        let cfg = AppConfig::from_env().expect("dev config loads");
        assert_eq!(cfg.concurrency.parallel_limit, 5);
        assert_eq!(cfg.concurrency.queue_concurrency, 2);
        assert_eq!(cfg.rate.max_per_hour, 50);
    }

    #[test]
    fn list_parsing_normalizes() {
        std::env::set_var("PG_ALLOWLIST_DOMAINS", "Example.COM, ,foo.org");
        let cfg = AppConfig::from_env().expect("config loads");
        assert_eq!(cfg.allowlist.domains, vec!["example.com", "foo.org"]);
        std::env::remove_var("PG_ALLOWLIST_DOMAINS");
    }
}
