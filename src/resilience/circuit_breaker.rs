//! Circuit breaker implementation.
//!
//! All state lives behind one mutex; callers only see `allow`, `check`,
//! `record_success`, `record_failure`, `state` and `stats`. The lock is never
//! held across an `.await`.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::errors::{RpcError, RpcResult};
use crate::observability::{ClientEvent, EventBus};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,
    /// Circuit is open, requests are rejected.
    Open,
    /// Circuit is probing, one request at a time is allowed.
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a probe is admitted.
    pub reset_timeout: Duration,
    /// Consecutive probe successes that close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the success threshold.
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Sets the reset timeout.
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> RpcResult<()> {
        if self.failure_threshold == 0 {
            return Err(RpcError::validation(
                "circuit_breaker.failure_threshold must be greater than 0",
            ));
        }
        if self.success_threshold == 0 {
            return Err(RpcError::validation(
                "circuit_breaker.success_threshold must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStats {
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures counted in the current state.
    pub consecutive_failures: u32,
    /// Consecutive successes counted in the current state.
    pub consecutive_successes: u32,
    /// Time since the circuit last opened, while not closed.
    pub time_since_opened: Option<Duration>,
}

#[derive(Debug)]
struct BreakerInner {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    probe_started_at: Option<Instant>,
}

type Transition = Option<(CircuitState, CircuitState)>;

impl BreakerInner {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            probe_started_at: None,
        }
    }

    fn time_since_opened(&self, now: Instant) -> Duration {
        self.opened_at
            .map(|opened| now.saturating_duration_since(opened))
            .unwrap_or_default()
    }

    fn try_acquire(&mut self, now: Instant) -> (Result<(), Duration>, Transition) {
        match self.state {
            CircuitState::Closed => (Ok(()), None),
            CircuitState::Open => {
                let open_for = self.time_since_opened(now);
                if open_for >= self.config.reset_timeout {
                    tracing::info!(open_ms = open_for.as_millis() as u64, "Circuit breaker transitioning to half-open");
                    self.state = CircuitState::HalfOpen;
                    self.consecutive_successes = 0;
                    self.probe_started_at = Some(now);
                    (Ok(()), Some((CircuitState::Open, CircuitState::HalfOpen)))
                } else {
                    (Err(open_for), None)
                }
            }
            CircuitState::HalfOpen => {
                // A probe whose outcome never arrives stops blocking after another reset timeout.
                let probe_free = self
                    .probe_started_at
                    .map_or(true, |started| now.saturating_duration_since(started) >= self.config.reset_timeout);
                if probe_free {
                    self.probe_started_at = Some(now);
                    (Ok(()), None)
                } else {
                    (Err(self.time_since_opened(now)), None)
                }
            }
        }
    }

    fn on_success(&mut self) -> Transition {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                self.consecutive_successes = self.consecutive_successes.saturating_add(1);
                None
            }
            CircuitState::HalfOpen => {
                self.probe_started_at = None;
                self.consecutive_successes += 1;
                if self.consecutive_successes >= self.config.success_threshold {
                    tracing::info!("Circuit breaker closing after successful probes");
                    self.close();
                    Some((CircuitState::HalfOpen, CircuitState::Closed))
                } else {
                    None
                }
            }
            // Late result from a call admitted before the circuit opened.
            CircuitState::Open => None,
        }
    }

    fn on_failure(&mut self, now: Instant) -> Transition {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                self.consecutive_successes = 0;
                if self.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = self.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker opening"
                    );
                    self.open(now);
                    Some((CircuitState::Closed, CircuitState::Open))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                tracing::info!("Circuit breaker re-opening after failed probe");
                self.open(now);
                Some((CircuitState::HalfOpen, CircuitState::Open))
            }
            CircuitState::Open => None,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.consecutive_successes = 0;
        self.probe_started_at = None;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.opened_at = None;
        self.probe_started_at = None;
    }
}

/// Circuit breaker guarding calls against a failing backend.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    events: Option<EventBus>,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerInner::new(config)),
            events: None,
        }
    }

    /// Creates a circuit breaker that publishes state changes on `events`.
    pub fn with_events(config: CircuitBreakerConfig, events: EventBus) -> Self {
        Self {
            inner: Mutex::new(BreakerInner::new(config)),
            events: Some(events),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, transition: Transition) {
        if let (Some(events), Some((from, to))) = (&self.events, transition) {
            events.publish(ClientEvent::CircuitStateChanged { from, to });
        }
    }

    /// Admits or rejects a call, returning a circuit-open error on rejection.
    pub fn check(&self) -> RpcResult<()> {
        let (result, transition) = self.lock().try_acquire(Instant::now());
        self.publish(transition);
        result.map_err(RpcError::circuit_open)
    }

    /// Returns true if a call may proceed.
    pub fn allow(&self) -> bool {
        self.check().is_ok()
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let transition = self.lock().on_success();
        self.publish(transition);
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        let transition = self.lock().on_failure(Instant::now());
        self.publish(transition);
    }

    /// Returns the current state.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Returns a consistent snapshot of state and counters.
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();
        CircuitBreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            time_since_opened: inner
                .opened_at
                .map(|opened| Instant::now().saturating_duration_since(opened)),
        }
    }

    /// Returns the active configuration.
    pub fn config(&self) -> CircuitBreakerConfig {
        self.lock().config.clone()
    }

    /// Resets the breaker to closed.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.lock();
            let from = inner.state;
            inner.close();
            (from != CircuitState::Closed).then_some((from, CircuitState::Closed))
        };
        self.publish(transition);
    }

    /// Replaces the configuration and resets all state.
    pub fn reconfigure(&self, config: CircuitBreakerConfig) -> RpcResult<()> {
        config.validate()?;
        let transition = {
            let mut inner = self.lock();
            let from = inner.state;
            *inner = BreakerInner::new(config);
            (from != CircuitState::Closed).then_some((from, CircuitState::Closed))
        };
        self.publish(transition);
        Ok(())
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
