//! Circuit breaker guarding worker-backed operations.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Breaker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// Time after the last failure before a probe is admitted.
    pub recovery_timeout: Duration,
}

impl BreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    /// When the outstanding half-open probe was admitted.
    probe_started: Option<Instant>,
}

/// Closed / Open / HalfOpen breaker with lazy recovery.
///
/// Recovery is checked on [`can_execute`](Self::can_execute), never by a
/// timer. While half-open exactly one probe is admitted; every admitted
/// attempt must be followed by one `record_success` or `record_failure`.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                probe_started: None,
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.inner().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner().failure_count
    }

    /// Admission gate for the guarded operation.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let recovered = inner
                    .last_failure
                    .map_or(true, |at| now.duration_since(at) >= self.config.recovery_timeout);
                if recovered {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_started = Some(now);
                    info!("Circuit half-open, admitting probe");
                }
                recovered
            }
            CircuitState::HalfOpen => {
                // A probe that never reported back does not wedge the breaker.
                let stale = inner
                    .probe_started
                    .map_or(true, |at| now.duration_since(at) >= self.config.recovery_timeout);
                if stale {
                    inner.probe_started = Some(now);
                    debug!("Half-open probe went stale, admitting another");
                }
                stale
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner();
        if inner.state != CircuitState::Closed {
            info!(from = %inner.state, "Circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.probe_started = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.probe_started = None;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                warn!(failures = inner.failure_count, "Probe failed, circuit re-opened");
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                warn!(
                    failures = inner.failure_count,
                    threshold = self.config.failure_threshold,
                    "Circuit opened"
                );
            }
            _ => {}
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
