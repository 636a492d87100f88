//! PhishGuard Reply Gating
//!
//! The three layers that stand between a verdict and an outbound reply:
//!
//! - [`Guardrails`]: synchronous pre-analysis filters (self-send,
//!   auto-responder, allowlist, duplicate message-id)
//! - [`Deduplicator`]: content-hash suppression and per-sender cooldown
//! - [`ReplyRateLimiter`]: sliding-window hourly/daily caps plus a burst
//!   circuit breaker
//!
//! All three share the cache substrate so the guarantees hold across
//! replicas; `set-if-absent` on `msgid:v1:<id>` provides the
//! single-winner property without distributed locks.

pub mod dedup;
pub mod guardrails;
pub mod ratelimit;

pub use dedup::{DedupDecision, Deduplicator};
pub use guardrails::{GuardVerdict, Guardrails};
pub use ratelimit::{RateDecision, RateStats, ReplyRateLimiter};
