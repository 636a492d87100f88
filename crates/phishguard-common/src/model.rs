//! Email domain model
//!
//! The ingested message shape shared by guardrails, analyzers, and the
//! mail client. An `Email` is immutable once built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Case-insensitive header map. Multiple values per name are kept
/// internally; lookups expose the first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderMap {
    entries: HashMap<String, Vec<String>>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header value, preserving earlier values for the name
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.entries
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// First value for a name, case-insensitive
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// All values for a name
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Attachment metadata (content is never fetched)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
}

/// Ingested email message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    /// Stable external message id (RFC internet message id)
    pub message_id: String,
    /// Provider-internal id used for fetch/reply
    pub provider_id: String,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub headers: HeaderMap,
    pub body: String,
    pub attachments: Vec<AttachmentMeta>,
}

impl Email {
    /// Sender domain, lowered; empty when the address has no `@`
    pub fn sender_domain(&self) -> String {
        self.sender
            .rsplit_once('@')
            .map(|(_, d)| d.trim_end_matches('>').to_lowercase())
            .unwrap_or_default()
    }

    /// Sender local part, lowered
    pub fn sender_local(&self) -> String {
        self.sender
            .split_once('@')
            .map(|(l, _)| l.trim_start_matches('<').to_lowercase())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive_first_value() {
        let mut headers = HeaderMap::new();
        headers.insert("Received", "a");
        headers.insert("received", "b");
        assert_eq!(headers.get("RECEIVED"), Some("a"));
        assert_eq!(headers.get_all("received").len(), 2);
    }

    #[test]
    fn sender_parts() {
        let email = Email {
            message_id: "m1".into(),
            provider_id: "p1".into(),
            sender: "Alice.B@Example.COM".into(),
            recipient: "triage@corp.example".into(),
            subject: "hi".into(),
            received_at: Utc::now(),
            headers: HeaderMap::new(),
            body: String::new(),
            attachments: vec![],
        };
        assert_eq!(email.sender_domain(), "example.com");
        assert_eq!(email.sender_local(), "alice.b");
    }
}
