//! PhishGuard Shared Foundation
//!
//! Configuration, error types, correlation context, circuit breaker,
//! metrics reservoirs, and log redaction shared by every PhishGuard crate.

pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod model;
pub mod redact;
pub mod resilience;

pub use config::{AppConfig, Environment};
pub use context::Context;
pub use error::{ConfigError, ConfigResult};
pub use metrics::{MetricsRegistry, Reservoir};
pub use model::{AttachmentMeta, Email, HeaderMap};
pub use redact::Redactor;
pub use resilience::{BreakerConfig, BreakerError, BreakerState, CircuitBreaker};
