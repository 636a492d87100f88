//! Log redaction
//!
//! Central scrubber applied to untrusted strings before they reach log
//! output. Masks email addresses, IPv4 addresses, bearer tokens, JWTs,
//! and long hex/base64 secrets.

use regex::Regex;

/// PII / secret redactor. Patterns compile once at construction.
pub struct Redactor {
    email: Regex,
    ipv4: Regex,
    jwt: Regex,
    bearer: Regex,
    long_secret: Regex,
}

impl Redactor {
    pub fn new() -> Self {
        Self {
            email: Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}")
                .expect("email pattern"),
            ipv4: Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").expect("ipv4 pattern"),
            jwt: Regex::new(r"\beyJ[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+\b")
                .expect("jwt pattern"),
            bearer: Regex::new(r"(?i)bearer\s+[A-Za-z0-9._\-+/=]+").expect("bearer pattern"),
            long_secret: Regex::new(r"\b[A-Fa-f0-9]{32,}\b").expect("secret pattern"),
        }
    }

    /// Return `s` with sensitive spans masked
    pub fn redact(&self, s: &str) -> String {
        let out = self.jwt.replace_all(s, "[jwt]");
        let out = self.bearer.replace_all(&out, "[token]");
        let out = self.email.replace_all(&out, "[email]");
        let out = self.ipv4.replace_all(&out, "[ip]");
        let out = self.long_secret.replace_all(&out, "[secret]");
        out.into_owned()
    }

    /// Keep the domain of an address for log context, mask the local part
    pub fn redact_address(&self, addr: &str) -> String {
        match addr.split_once('@') {
            Some((_, domain)) => format!("[local]@{}", domain),
            None => "[email]".to_string(),
        }
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new()
    }
}
