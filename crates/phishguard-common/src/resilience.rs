//! Circuit breaker
//!
//! Three-state fault wrapper shared by the resilient cache, the LLM
//! explainer, and the threat-intel clients. Transitions:
//! `closed -> open` when the failure ratio crosses the threshold over at
//! least `volume_threshold` calls in the current window, `open ->
//! half-open` after `reset_timeout`, `half-open -> closed` on one
//! success, `half-open -> open` on failure.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Breaker tuning parameters
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Per-call timeout; a timeout counts as a failure
    pub call_timeout: Duration,
    /// Failure percentage (0-100) that opens the breaker
    pub error_threshold_pct: u8,
    /// Minimum calls in the window before the ratio is evaluated
    pub volume_threshold: u32,
    /// How long the breaker stays open before probing
    pub reset_timeout: Duration,
    /// Rolling window over which calls are counted
    pub window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            error_threshold_pct: 50,
            volume_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            window: Duration::from_secs(60),
        }
    }
}

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through
    Closed,
    /// Calls are rejected without being attempted
    Open,
    /// A single probe call is allowed
    HalfOpen,
}

/// Error returned by [`CircuitBreaker::call`]
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Breaker is open; the call was not attempted
    #[error("circuit breaker '{0}' is open")]
    Rejected(String),
    /// The call exceeded the configured timeout
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    /// The call itself failed
    #[error("call failed: {0}")]
    Inner(E),
}

type StateHook = Arc<dyn Fn(&str) + Send + Sync>;

struct Counters {
    state: BreakerState,
    successes: u32,
    failures: u32,
    window_started: Instant,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Three-state circuit breaker
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Counters>,
    on_open: Option<StateHook>,
    on_close: Option<StateHook>,
}

impl CircuitBreaker {
    /// Create a breaker with the given name for log lines
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Counters {
                state: BreakerState::Closed,
                successes: 0,
                failures: 0,
                window_started: Instant::now(),
                opened_at: None,
                probe_in_flight: false,
            }),
            on_open: None,
            on_close: None,
        }
    }

    /// Install a hook invoked when the breaker opens
    pub fn with_on_open(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(hook));
        self
    }

    /// Install a hook invoked when the breaker closes again
    pub fn with_on_close(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(hook));
        self
    }

    /// Current state, transitioning `open -> half-open` when the reset
    /// timeout has elapsed
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Ask whether a call may proceed. In half-open state only one probe
    /// passes at a time.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.successes = 0;
                inner.failures = 0;
                inner.window_started = Instant::now();
                inner.opened_at = None;
                inner.probe_in_flight = false;
                drop(inner);
                tracing::info!(breaker = %self.name, "circuit breaker closed");
                if let Some(hook) = &self.on_close {
                    hook(&self.name);
                }
            }
            _ => inner.successes += 1,
        }
    }

    /// Record a failed or timed-out call
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.probe_in_flight = false;
                self.trip(&mut inner);
            }
            BreakerState::Closed => {
                inner.failures += 1;
                let total = inner.successes + inner.failures;
                if total >= self.config.volume_threshold {
                    let pct = inner.failures * 100 / total;
                    if pct >= self.config.error_threshold_pct as u32 {
                        self.trip(&mut inner);
                    }
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Run `fut` under the breaker with the configured timeout
    pub async fn call<F, T, E>(&self, fut: F) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            return Err(BreakerError::Rejected(self.name.clone()));
        }
        match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record_failure();
                Err(BreakerError::Inner(err))
            }
            Err(_) => {
                self.record_failure();
                Err(BreakerError::Timeout(self.config.call_timeout))
            }
        }
    }

    fn trip(&self, inner: &mut Counters) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.successes = 0;
        inner.failures = 0;
        tracing::warn!(breaker = %self.name, "circuit breaker opened");
        if let Some(hook) = &self.on_open {
            hook(&self.name);
        }
    }

    fn refresh(&self, inner: &mut Counters) {
        match inner.state {
            BreakerState::Open => {
                if let Some(opened) = inner.opened_at {
                    if opened.elapsed() >= self.config.reset_timeout {
                        inner.state = BreakerState::HalfOpen;
                        inner.probe_in_flight = false;
                    }
                }
            }
            BreakerState::Closed => {
                if inner.window_started.elapsed() >= self.config.window {
                    inner.successes = 0;
                    inner.failures = 0;
                    inner.window_started = Instant::now();
                }
            }
            BreakerState::HalfOpen => {}
        }
    }
}
