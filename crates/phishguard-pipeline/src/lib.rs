//! PhishGuard Pipeline
//!
//! Wires the whole triage flow per message: fetch, guard, analyze,
//! enrich, explain, score, reply, record. Message ids arrive through
//! the push [`queue::NotificationQueue`] or the timer-driven
//! [`poll::PollMonitor`]; both feed the [`orchestrator::Orchestrator`],
//! which relies on guardrails plus deduplication for exactly-once
//! replies regardless of ingestion path.

pub mod orchestrator;
pub mod poll;
pub mod queue;

#[cfg(test)]
pub(crate) mod testutil;

pub use orchestrator::{Orchestrator, TriageOutcome};
pub use poll::{PollMonitor, PollStats};
pub use queue::{DeadLetter, NotificationQueue, QueueStats};
