//! Reply builder
//!
//! Renders the verdict into an HTML reply envelope. This module is the
//! only path that emits analysis-derived strings into HTML, and every
//! one of them goes through [`escape_html`] first.

use crate::{AnalysisResult, Severity};
use phishguard_common::Email;
use serde::Serialize;

const MAX_INDICATORS_SHOWN: usize = 5;
const MAX_ACTIONS_SHOWN: usize = 3;

/// Outbound message importance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Normal,
    High,
}

/// Rendered reply envelope
#[derive(Debug, Clone, Serialize)]
pub struct ReplyMessage {
    pub subject: String,
    pub recipients: Vec<String>,
    pub html_body: String,
    pub importance: Importance,
}

/// Escape the five HTML entities. Every analysis-derived string rendered
/// into the reply passes through here.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Build the reply for an analyzed message. Pure function of the verdict
/// and the original envelope.
pub fn build_reply(result: &AnalysisResult, original: &Email) -> ReplyMessage {
    let original_subject = original.subject.trim();
    let subject = if original_subject.is_empty() {
        "Re: (No Subject)".to_string()
    } else {
        format!("Re: {}", original_subject)
    };

    ReplyMessage {
        subject,
        recipients: vec![original.sender.clone()],
        html_body: render_body(result),
        importance: if result.is_phishing {
            Importance::High
        } else {
            Importance::Normal
        },
    }
}

fn render_body(result: &AnalysisResult) -> String {
    let mut html = String::new();

    let (headline, color) = if result.is_phishing {
        ("Phishing detected", "#c62828")
    } else {
        ("No phishing detected", "#2e7d32")
    };

    html.push_str("<div style=\"font-family:Segoe UI,Arial,sans-serif;max-width:640px\">");
    html.push_str(&format!(
        "<h2 style=\"color:{}\">{}</h2>",
        color, headline
    ));
    html.push_str(&format!(
        "<p>Risk score: <strong>{:.1}/10</strong> &middot; Severity: <strong>{}</strong> \
         &middot; Confidence: <strong>{:.0}%</strong></p>",
        result.risk_score,
        severity_label(result.severity),
        result.confidence * 100.0
    ));

    if !result.indicators.is_empty() {
        html.push_str("<h3>Indicators</h3><ul>");
        for indicator in result.indicators.iter().take(MAX_INDICATORS_SHOWN) {
            html.push_str(&format!(
                "<li><strong>[{}]</strong> {} <em>({})</em></li>",
                severity_label(indicator.severity),
                escape_html(&indicator.description),
                escape_html(&indicator.evidence),
            ));
        }
        html.push_str("</ul>");
        if result.indicators.len() > MAX_INDICATORS_SHOWN {
            html.push_str(&format!(
                "<p><em>{} further indicators omitted.</em></p>",
                result.indicators.len() - MAX_INDICATORS_SHOWN
            ));
        }
    }

    if !result.recommended_actions.is_empty() {
        html.push_str("<h3>Recommended actions</h3><ol>");
        for action in result.recommended_actions.iter().take(MAX_ACTIONS_SHOWN) {
            html.push_str(&format!(
                "<li>{}</li>",
                escape_html(&action.description)
            ));
        }
        html.push_str("</ol>");
    }

    if let Some(explanation) = &result.explanation {
        html.push_str(&format!(
            "<h3>Summary</h3><p>{}</p>",
            escape_html(explanation)
        ));
    }

    html.push_str(&format!(
        "<hr/><p style=\"color:#757575;font-size:12px\">Automated triage &middot; analysis {}</p>",
        escape_html(&result.analysis_id)
    ));
    html.push_str("</div>");
    html
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Low => "low",
        Severity::Medium => "medium",
        Severity::High => "high",
        Severity::Critical => "critical",
    }
}
