//! Score aggregation
//!
//! Folds the three analyzer outputs (plus appended threat-intel
//! findings) into one [`AnalysisResult`]. Sub-scores and the aggregate
//! are clipped to 10; the phishing verdict is exactly `risk >= 5.0`.

use crate::attachment::AttachmentFindings;
use crate::content::ContentFindings;
use crate::header::HeaderFindings;
use crate::{
    ActionPriority, AnalysisResult, RecommendedAction, Severity, SubScores, ThreatIndicator,
};
use chrono::Utc;
use uuid::Uuid;

/// Phishing verdict threshold
pub const PHISHING_THRESHOLD: f64 = 5.0;

/// Weight of one indicator by severity
pub fn severity_weight(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 2.5,
        Severity::High => 1.5,
        Severity::Medium => 0.75,
        Severity::Low => 0.25,
    }
}

fn clip10(value: f64) -> f64 {
    value.clamp(0.0, 10.0)
}

fn weight_sum(indicators: &[ThreatIndicator]) -> f64 {
    indicators.iter().map(|i| severity_weight(i.severity)).sum()
}

/// Combined analyzer output for one message
#[derive(Debug, Clone, Default)]
pub struct AnalyzerOutput {
    pub header: HeaderFindings,
    pub content: ContentFindings,
    pub attachment: AttachmentFindings,
}

/// Merge analyzer findings and optional enrichment into the final
/// verdict. Intel indicators are appended and intel risk is added after
/// the weighted aggregation, before clipping.
pub fn aggregate(
    message_id: &str,
    output: AnalyzerOutput,
    intel_indicators: Vec<ThreatIndicator>,
    intel_risk: f64,
) -> AnalysisResult {
    let header_score = clip10(weight_sum(&output.header.indicators) + output.header.auth_bonus);

    let mut content_score = weight_sum(&output.content.indicators);
    if output.content.tactic_count > 2 {
        content_score += 1.0;
    }
    if output.content.suspicious_urls.len() > 2 {
        content_score += 1.0;
    }
    let content_score = clip10(content_score);

    let attachment_score = clip10(weight_sum(&output.attachment.indicators));

    let weighted = if attachment_score > 0.0 {
        0.4 * header_score + 0.3 * content_score + 0.3 * attachment_score
    } else {
        0.6 * header_score + 0.4 * content_score
    };
    let risk_score = clip10(weighted + intel_risk.max(0.0));

    let mut indicators = output.header.indicators;
    indicators.extend(output.content.indicators);
    indicators.extend(output.attachment.indicators);
    indicators.extend(intel_indicators);

    let confidence = if indicators.is_empty() {
        0.0
    } else {
        indicators.iter().map(|i| i.confidence).sum::<f64>() / indicators.len() as f64
    };

    let is_phishing = risk_score >= PHISHING_THRESHOLD;
    let severity = severity_band(risk_score);

    AnalysisResult {
        message_id: message_id.to_string(),
        is_phishing,
        risk_score,
        confidence,
        severity,
        recommended_actions: recommend(is_phishing, severity, &indicators),
        indicators,
        explanation: None,
        analysis_id: Uuid::new_v4().to_string(),
        analyzed_at: Utc::now(),
        sub_scores: SubScores {
            header: header_score,
            content: content_score,
            attachment: attachment_score,
        },
    }
}

fn severity_band(risk: f64) -> Severity {
    if risk >= 8.0 {
        Severity::Critical
    } else if risk >= 6.0 {
        Severity::High
    } else if risk >= 3.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn recommend(
    is_phishing: bool,
    severity: Severity,
    indicators: &[ThreatIndicator],
) -> Vec<RecommendedAction> {
    if !is_phishing {
        return vec![RecommendedAction {
            priority: ActionPriority::Low,
            action: "no-action".to_string(),
            description: "Message appears benign; no action required".to_string(),
            automated: true,
            requires_approval: false,
        }];
    }

    let mut actions = vec![RecommendedAction {
        priority: if severity >= Severity::High {
            ActionPriority::Urgent
        } else {
            ActionPriority::High
        },
        action: "quarantine-message".to_string(),
        description: "Move the message out of the user's inbox".to_string(),
        automated: true,
        requires_approval: false,
    }];

    let mentions_credentials = indicators
        .iter()
        .any(|i| i.description.to_lowercase().contains("credential"));
    if mentions_credentials {
        actions.push(RecommendedAction {
            priority: ActionPriority::High,
            action: "reset-credentials".to_string(),
            description: "Reset credentials for any account the recipient may have entered"
                .to_string(),
            automated: false,
            requires_approval: true,
        });
    }

    let sender_impersonation = indicators
        .iter()
        .any(|i| i.kind == crate::IndicatorKind::Sender);
    if sender_impersonation {
        actions.push(RecommendedAction {
            priority: ActionPriority::High,
            action: "block-sender".to_string(),
            description: "Block the sending address and domain at the gateway".to_string(),
            automated: false,
            requires_approval: true,
        });
    }

    actions.push(RecommendedAction {
        priority: ActionPriority::Medium,
        action: "report-to-security".to_string(),
        description: "Forward to the security team for awareness and takedown".to_string(),
        automated: true,
        requires_approval: false,
    });

    actions
}
