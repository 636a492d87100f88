//! PhishGuard External Enrichment
//!
//! Threat-intel lookups (URL reputation, sender-IP abuse, domain age)
//! and the optional LLM explanation for borderline verdicts. Every
//! external call is timeout-bounded and soft-failing: a lookup that
//! errors contributes nothing, and the pipeline never blocks on this
//! crate.

pub mod enricher;
pub mod llm;
pub mod providers;

pub use enricher::{IntelFindings, ThreatIntelService};
pub use llm::{LlmClient, LlmError, LlmExplainer};
pub use providers::{
    DomainAgeReport, HttpProviders, IntelProviders, IpReputationReport, UrlReputationReport,
};
