//! Attachment analyzer
//!
//! Flags dangerous extensions, macro-enabled documents, archives,
//! double extensions, and size anomalies from attachment metadata.
//! Content is never downloaded.

use crate::{IndicatorKind, Severity, ThreatIndicator};
use phishguard_common::AttachmentMeta;
use std::collections::HashSet;

const MIN_PLAUSIBLE_BYTES: u64 = 100;
const MAX_PLAUSIBLE_BYTES: u64 = 25 * 1024 * 1024;

/// Output of the attachment pass
#[derive(Debug, Clone, Default)]
pub struct AttachmentFindings {
    pub indicators: Vec<ThreatIndicator>,
}

impl AttachmentFindings {
    /// Highest severity across indicators, if any
    pub fn risk_level(&self) -> Option<Severity> {
        self.indicators.iter().map(|i| i.severity).max()
    }
}

/// Extension and size rule engine
pub struct AttachmentAnalyzer {
    dangerous: HashSet<&'static str>,
    macro_enabled: HashSet<&'static str>,
    archives: HashSet<&'static str>,
    benign: HashSet<&'static str>,
}

impl AttachmentAnalyzer {
    pub fn new() -> Self {
        Self {
            dangerous: [
                "exe", "scr", "bat", "cmd", "com", "pif", "js", "jse", "vbs", "vbe", "wsf",
                "wsh", "ps1", "msi", "jar", "hta", "cpl", "lnk", "dll",
            ]
            .into_iter()
            .collect(),
            macro_enabled: ["docm", "xlsm", "pptm", "dotm", "xltm", "potm"]
                .into_iter()
                .collect(),
            archives: ["zip", "rar", "7z", "tar", "gz", "iso", "img"]
                .into_iter()
                .collect(),
            benign: [
                "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "csv", "jpg",
                "jpeg", "png", "gif",
            ]
            .into_iter()
            .collect(),
        }
    }

    /// Run the attachment rules over every attachment; pure.
    pub fn analyze(&self, attachments: &[AttachmentMeta]) -> AttachmentFindings {
        let mut findings = AttachmentFindings::default();
        for attachment in attachments {
            self.analyze_one(attachment, &mut findings);
        }
        findings
    }

    fn analyze_one(&self, attachment: &AttachmentMeta, findings: &mut AttachmentFindings) {
        let name = attachment.filename.to_lowercase();
        let parts: Vec<&str> = name.split('.').collect();
        let ext = parts.last().copied().unwrap_or("");

        if self.dangerous.contains(ext) {
            findings.indicators.push(ThreatIndicator {
                kind: IndicatorKind::Attachment,
                severity: Severity::Critical,
                description: format!("Executable attachment type .{}", ext),
                evidence: attachment.filename.clone(),
                confidence: 0.95,
            });
        } else if self.macro_enabled.contains(ext) {
            findings.indicators.push(ThreatIndicator {
                kind: IndicatorKind::Attachment,
                severity: Severity::High,
                description: format!("Macro-enabled document .{}", ext),
                evidence: attachment.filename.clone(),
                confidence: 0.85,
            });
        } else if self.archives.contains(ext) {
            findings.indicators.push(ThreatIndicator {
                kind: IndicatorKind::Attachment,
                severity: Severity::Medium,
                description: format!("Archive attachment .{}", ext),
                evidence: attachment.filename.clone(),
                confidence: 0.6,
            });
        }

        // Double extension: a benign-looking extension immediately before
        // a dangerous one (invoice.pdf.exe).
        if parts.len() > 2 {
            let inner = parts[parts.len() - 2];
            if self.benign.contains(inner) && self.dangerous.contains(ext) {
                findings.indicators.push(ThreatIndicator {
                    kind: IndicatorKind::Attachment,
                    severity: Severity::Critical,
                    description: "Double extension masquerading as a document".to_string(),
                    evidence: attachment.filename.clone(),
                    confidence: 0.98,
                });
            }
        }

        if attachment.size_bytes < MIN_PLAUSIBLE_BYTES {
            findings.indicators.push(ThreatIndicator {
                kind: IndicatorKind::Attachment,
                severity: Severity::Medium,
                description: "Implausibly small attachment".to_string(),
                evidence: format!("{} ({} bytes)", attachment.filename, attachment.size_bytes),
                confidence: 0.7,
            });
        } else if attachment.size_bytes > MAX_PLAUSIBLE_BYTES {
            findings.indicators.push(ThreatIndicator {
                kind: IndicatorKind::Attachment,
                severity: Severity::Low,
                description: "Unusually large attachment".to_string(),
                evidence: format!("{} ({} bytes)", attachment.filename, attachment.size_bytes),
                confidence: 0.5,
            });
        }
    }
}

impl Default for AttachmentAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
