//! PhishGuard Analysis Engine
//!
//! Three independent, deterministic rule engines over an ingested
//! email (headers, content, attachments), score aggregation into an
//! [`AnalysisResult`], and the HTML reply renderer. Analyzers are pure
//! functions of the message: no I/O, no shared mutable state, safe to
//! fan out concurrently.

pub mod attachment;
pub mod content;
pub mod header;
pub mod reply;
pub mod score;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use attachment::AttachmentAnalyzer;
pub use content::{ContentAnalyzer, ContentFindings};
pub use header::HeaderAnalyzer;
pub use reply::{build_reply, escape_html, Importance, ReplyMessage};
pub use score::{aggregate, severity_weight, AnalyzerOutput};

/// Indicator severity, ordered low to critical
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// What part of the message an indicator came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    Header,
    Content,
    Url,
    Attachment,
    Sender,
    Behavioral,
}

/// One piece of evidence contributing to the verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatIndicator {
    pub kind: IndicatorKind,
    pub severity: Severity,
    pub description: String,
    pub evidence: String,
    /// Detector confidence in [0, 1]
    pub confidence: f64,
}

/// Priority of a recommended action
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionPriority {
    Low,
    Medium,
    High,
    Urgent,
}

/// Operator guidance derived from the verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedAction {
    pub priority: ActionPriority,
    /// Stable action token (`quarantine-message`, `reset-credentials`, ...)
    pub action: String,
    pub description: String,
    pub automated: bool,
    pub requires_approval: bool,
}

/// Per-analyzer sub-scores before aggregation, each clipped to 10
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SubScores {
    pub header: f64,
    pub content: f64,
    pub attachment: f64,
}

/// Immutable analysis verdict for one message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub message_id: String,
    pub is_phishing: bool,
    /// Aggregate risk in [0, 10]
    pub risk_score: f64,
    /// Mean of indicator confidences; 0 with no indicators
    pub confidence: f64,
    pub severity: Severity,
    pub indicators: Vec<ThreatIndicator>,
    pub recommended_actions: Vec<RecommendedAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub analysis_id: String,
    pub analyzed_at: DateTime<Utc>,
    pub sub_scores: SubScores,
}
