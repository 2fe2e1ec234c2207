//! Per-endpoint circuit breaker with lock-free atomics
//!
//! State machine:
//! - **Closed**: calls flow; consecutive failures are counted and any success resets the
//!   count. Reaching `failure_threshold` opens the circuit.
//! - **Open**: calls are rejected without touching the transport until `open_duration` has
//!   elapsed since the circuit opened.
//! - **HalfOpen**: exactly one probe call is admitted. Its success closes the circuit; its
//!   failure reopens it and restarts the timer. Other callers are rejected meanwhile.
//!
//! Transitions are compare-and-swap on a single state word, so concurrent results never
//! double-transition and the guarded calls themselves run unserialized.

use crate::clock::{Clock, MonotonicClock};
use crate::retry::{Classification, Classifier, Outcome};
use crate::ResilienceError;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
// Half-open, no probe in flight.
const STATE_HALF_OPEN: u8 = 2;
// Half-open, probe in flight.
const STATE_PROBING: u8 = 3;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operating mode.
    Closed,
    /// Short-circuits calls until the open duration elapses.
    Open,
    /// Probe mode allowing a single call to test recovery.
    HalfOpen,
}

fn u8_to_state(v: u8) -> CircuitState {
    match v {
        STATE_OPEN => CircuitState::Open,
        STATE_HALF_OPEN | STATE_PROBING => CircuitState::HalfOpen,
        _ => CircuitState::Closed,
    }
}

/// Errors produced when validating breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerError {
    #[error("failure_threshold must be > 0 (got {provided})")]
    InvalidFailureThreshold { provided: usize },
    #[error("open_duration must be > 0 (got {0:?})")]
    InvalidOpenDuration(Duration),
}

/// Validated configuration for the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    enabled: bool,
    failure_threshold: usize,
    open_duration: Duration,
}

impl CircuitBreakerConfig {
    /// Create an enabled config with validation.
    pub fn new(
        failure_threshold: usize,
        open_duration: Duration,
    ) -> Result<Self, CircuitBreakerError> {
        if failure_threshold == 0 {
            return Err(CircuitBreakerError::InvalidFailureThreshold { provided: 0 });
        }
        if open_duration.is_zero() {
            return Err(CircuitBreakerError::InvalidOpenDuration(open_duration));
        }
        Ok(Self { enabled: true, failure_threshold, open_duration })
    }

    /// A pass-through breaker: always allows, never records.
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Consecutive failures before opening from Closed.
    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    /// Duration to stay Open before the Half-Open probe.
    pub fn open_duration(&self) -> Duration {
        self.open_duration
    }
}

impl Default for CircuitBreakerConfig {
    /// Enabled, 5 failures, 30 seconds open.
    fn default() -> Self {
        Self { enabled: true, failure_threshold: 5, open_duration: Duration::from_secs(30) }
    }
}

/// Result of [`CircuitBreaker::before_call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDecision {
    Allow(CallPermit),
    Reject { failure_count: usize, open_for: Duration },
}

/// Proof of admission; hand it back to [`CircuitBreaker::on_result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPermit {
    probe: bool,
}

impl CallPermit {
    /// Whether this call is the half-open recovery probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

/// What the breaker should record for a finished call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerOutcome {
    Success,
    Failure,
    /// Nothing learned (cancelled call). Releases a probe without transitioning.
    Ignored,
}

impl From<Classification> for BreakerOutcome {
    fn from(class: Classification) -> Self {
        match class {
            Classification::Transient => BreakerOutcome::Failure,
            Classification::Success | Classification::Permanent => BreakerOutcome::Success,
            Classification::Cancelled => BreakerOutcome::Ignored,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: AtomicU8,
    failure_count: AtomicUsize,
    opened_at_millis: AtomicU64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            failure_count: AtomicUsize::new(0),
            opened_at_millis: AtomicU64::new(0),
        }
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state.compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }
}

/// Circuit breaker guarding one logical endpoint. Share it behind an `Arc`; the
/// [`CircuitBreakerRegistry`](crate::CircuitBreakerRegistry) does this per endpoint name.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: BreakerState,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: BreakerState::new(),
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        u8_to_state(self.state.state.load(Ordering::Acquire))
    }

    pub fn failure_count(&self) -> usize {
        self.state.failure_count.load(Ordering::Acquire)
    }

    /// Force the breaker back to Closed, clearing failure counts.
    pub fn reset(&self) {
        self.state.failure_count.store(0, Ordering::Release);
        self.state.opened_at_millis.store(0, Ordering::Release);
        self.state.state.store(STATE_CLOSED, Ordering::Release);
        tracing::info!(endpoint = %self.name, "Circuit breaker reset → closed");
    }

    /// Decide whether a call may proceed.
    pub fn before_call(&self) -> CallDecision {
        if !self.config.enabled {
            return CallDecision::Allow(CallPermit { probe: false });
        }

        loop {
            match self.state.state.load(Ordering::Acquire) {
                STATE_CLOSED => return CallDecision::Allow(CallPermit { probe: false }),
                STATE_OPEN => {
                    let elapsed = self.open_for();
                    if elapsed < self.config.open_duration {
                        return self.reject(elapsed);
                    }
                    if self.state.transition(STATE_OPEN, STATE_PROBING) {
                        tracing::info!(endpoint = %self.name, "Circuit breaker → half-open");
                        return CallDecision::Allow(CallPermit { probe: true });
                    }
                    // Lost the race; re-read.
                }
                STATE_HALF_OPEN => {
                    if self.state.transition(STATE_HALF_OPEN, STATE_PROBING) {
                        tracing::debug!(endpoint = %self.name, "Circuit breaker: half-open probe");
                        return CallDecision::Allow(CallPermit { probe: true });
                    }
                }
                _ => return self.reject(self.open_for()),
            }
        }
    }

    /// Record the outcome of a call admitted by [`before_call`](Self::before_call).
    ///
    /// Only the probe's outcome moves a half-open breaker. Results from calls admitted while
    /// Closed that finish after the circuit opened are ignored.
    pub fn on_result(&self, permit: CallPermit, outcome: BreakerOutcome) {
        if !self.config.enabled {
            return;
        }

        if permit.probe {
            self.on_probe_result(outcome);
            return;
        }

        if self.state.state.load(Ordering::Acquire) != STATE_CLOSED {
            return;
        }

        match outcome {
            BreakerOutcome::Success => {
                self.state.failure_count.store(0, Ordering::Release);
            }
            BreakerOutcome::Failure => {
                let failures = self.state.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    let now = self.clock.now_millis();
                    self.state.opened_at_millis.store(now, Ordering::Release);
                    if self.state.transition(STATE_CLOSED, STATE_OPEN) {
                        tracing::error!(
                            endpoint = %self.name,
                            failures,
                            threshold = self.config.failure_threshold,
                            "Circuit breaker → open"
                        );
                    }
                }
            }
            BreakerOutcome::Ignored => {}
        }
    }

    fn on_probe_result(&self, outcome: BreakerOutcome) {
        match outcome {
            BreakerOutcome::Success => {
                // Closed-path results are dropped while PROBING, so the count must be clean
                // before the CAS publishes Closed. `opened_at_millis` is left for the next
                // opener to overwrite.
                self.state.failure_count.store(0, Ordering::Release);
                if self.state.transition(STATE_PROBING, STATE_CLOSED) {
                    tracing::info!(endpoint = %self.name, "Circuit breaker → closed");
                }
            }
            BreakerOutcome::Failure => {
                let failures = self.state.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                // Only the probe holder can leave PROBING, so the timestamp lands first.
                self.state.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
                if self.state.transition(STATE_PROBING, STATE_OPEN) {
                    tracing::warn!(endpoint = %self.name, failures, "Circuit breaker: probe failed → open");
                }
            }
            BreakerOutcome::Ignored => {
                if self.state.transition(STATE_PROBING, STATE_HALF_OPEN) {
                    tracing::debug!(endpoint = %self.name, "Circuit breaker: probe abandoned");
                }
            }
        }
    }

    /// Executes `operation` under breaker protection, classifying its outcome with
    /// `classifier`.
    ///
    /// # Errors
    /// Returns `ResilienceError::CircuitOpen` without running the operation when rejected;
    /// otherwise the operation's own result.
    pub async fn execute<T, E, C, Fut, Op>(
        &self,
        classifier: &C,
        operation: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        C: Classifier<T, E> + ?Sized,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnOnce() -> Fut,
    {
        let permit = match self.before_call() {
            CallDecision::Allow(permit) => permit,
            CallDecision::Reject { failure_count, open_for } => {
                tracing::debug!(endpoint = %self.name, "Circuit breaker: call rejected");
                return Err(ResilienceError::CircuitOpen {
                    endpoint: self.name.clone(),
                    failure_count,
                    open_for,
                });
            }
        };

        // Releases a probe if this future is dropped mid-call.
        let guard = PermitGuard { breaker: self, permit, done: false };
        let result = operation().await;

        let class = match &result {
            Ok(value) => classifier.classify(Outcome::Value(value)),
            Err(ResilienceError::Inner(e)) => classifier.classify(Outcome::Error(e)),
            Err(_) => Classification::Cancelled,
        };
        guard.complete(class.into());

        result
    }

    fn open_for(&self) -> Duration {
        let opened_at = self.state.opened_at_millis.load(Ordering::Acquire);
        Duration::from_millis(self.clock.now_millis().saturating_sub(opened_at))
    }

    fn reject(&self, open_for: Duration) -> CallDecision {
        CallDecision::Reject { failure_count: self.failure_count(), open_for }
    }
}

struct PermitGuard<'a> {
    breaker: &'a CircuitBreaker,
    permit: CallPermit,
    done: bool,
}

impl PermitGuard<'_> {
    fn complete(mut self, outcome: BreakerOutcome) {
        self.done = true;
        self.breaker.on_result(self.permit, outcome);
    }
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.breaker.on_result(self.permit, BreakerOutcome::Ignored);
        }
    }
}
