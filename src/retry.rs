//! Retry executor for fallible async operations.
//!
//! Semantics:
//! - `max_retries` counts retries only; `0` means a single attempt.
//! - Every outcome, successful value or error, goes through a [`Classifier`]. Only
//!   [`Classification::Transient`] outcomes are retried.
//! - `ResilienceError::CircuitOpen` and `ResilienceError::Cancelled` are terminal and never
//!   reach the classifier.
//! - When retries run out the last outcome is returned unchanged.
//! - The delay before retry `n` is `min(base * 2^(n-1), max)` with symmetric jitter applied.
//! - The [`Sleeper`] races each backoff delay against the cancellation token, so cancelling
//!   aborts before the next attempt starts.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use ninelives_http::retry::{Classification, Outcome, RetryConfig, RetryExecutor};
//! use ninelives_http::{InstantSleeper, ResilienceError};
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config = RetryConfig::new(2, Duration::from_millis(10), Duration::from_millis(100), 0.0).unwrap();
//! let executor = RetryExecutor::new(config).with_sleeper(InstantSleeper);
//! let classify = |outcome: Outcome<'_, u32, std::io::Error>| match outcome {
//!     Outcome::Value(_) => Classification::Success,
//!     Outcome::Error(_) => Classification::Transient,
//! };
//! let result: Result<u32, ResilienceError<std::io::Error>> = executor
//!     .execute(&classify, &CancellationToken::new(), || async { Ok(7) })
//!     .await;
//! assert_eq!(result.unwrap(), 7);
//! # });
//! ```

use crate::backoff::{Backoff, BackoffError};
use crate::jitter::{Jitter, JitterError};
use crate::transport::{HttpResponse, TransportError};
use crate::sleeper::Wake;
use crate::{ResilienceError, Sleeper, TokioSleeper};
use http::StatusCode;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How an attempt's outcome should be treated by the retry loop and the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The call worked.
    Success,
    /// Worth retrying; counts as a breaker failure.
    Transient,
    /// The call failed in a way retrying cannot fix (4xx). Not a breaker failure: the
    /// endpoint answered.
    Permanent,
    /// The caller gave up. Neither retried nor counted by the breaker.
    Cancelled,
}

impl Classification {
    pub fn should_retry(self) -> bool {
        matches!(self, Classification::Transient)
    }
}

/// Borrowed view of one attempt's result.
#[derive(Debug)]
pub enum Outcome<'a, T, E> {
    Value(&'a T),
    Error(&'a E),
}

/// Maps an attempt's outcome to a [`Classification`].
pub trait Classifier<T, E>: Send + Sync {
    fn classify(&self, outcome: Outcome<'_, T, E>) -> Classification;
}

impl<T, E, F> Classifier<T, E> for F
where
    F: Fn(Outcome<'_, T, E>) -> Classification + Send + Sync,
{
    fn classify(&self, outcome: Outcome<'_, T, E>) -> Classification {
        self(outcome)
    }
}

/// Status-code half of the default HTTP policy: 5xx, 408 and 429 are transient, any other
/// 4xx is permanent, everything else succeeded.
pub fn classify_status(status: StatusCode) -> Classification {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        Classification::Transient
    } else if status.is_client_error() {
        Classification::Permanent
    } else {
        Classification::Success
    }
}

/// Default classifier for HTTP exchanges.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpClassifier;

impl Classifier<HttpResponse, TransportError> for HttpClassifier {
    fn classify(&self, outcome: Outcome<'_, HttpResponse, TransportError>) -> Classification {
        match outcome {
            Outcome::Value(response) => classify_status(response.status),
            Outcome::Error(TransportError::Cancelled) => Classification::Cancelled,
            Outcome::Error(_) => Classification::Transient,
        }
    }
}

/// Errors produced while validating retry parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetryConfigError {
    #[error(transparent)]
    Backoff(#[from] BackoffError),
    #[error(transparent)]
    Jitter(#[from] JitterError),
}

/// Validated retry parameters. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
}

impl RetryConfig {
    /// Validate and build. `base_delay` must be > 0, `max_delay >= base_delay`, and
    /// `jitter_factor` within `[0, 1]`.
    pub fn new(
        max_retries: usize,
        base_delay: Duration,
        max_delay: Duration,
        jitter_factor: f64,
    ) -> Result<Self, RetryConfigError> {
        Ok(Self {
            max_retries,
            backoff: Backoff::new(base_delay, max_delay)?,
            jitter: Jitter::new(jitter_factor)?,
        })
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    pub fn jitter(&self) -> Jitter {
        self.jitter
    }

    /// Jittered delay before retry `attempt` (1-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        self.jitter.apply(self.backoff.delay(attempt))
    }
}

impl Default for RetryConfig {
    /// 3 retries, 200ms doubling up to 30s, 10% jitter.
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::new_unchecked(Duration::from_millis(200), Duration::from_secs(30)),
            jitter: Jitter::new_unchecked(0.1),
        }
    }
}

/// Runs an operation, retrying transient outcomes with backoff.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, sleeper: Arc::new(TokioSleeper) }
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an async operation with retry semantics.
    pub async fn execute<T, E, C, Fut, Op>(
        &self,
        classifier: &C,
        cancel: &CancellationToken,
        mut operation: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        C: Classifier<T, E> + ?Sized,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        Op: FnMut() -> Fut,
    {
        let mut retries = 0usize;
        loop {
            if cancel.is_cancelled() {
                return Err(ResilienceError::Cancelled);
            }

            let result = operation().await;
            let class = match &result {
                Ok(value) => Some(classifier.classify(Outcome::Value(value))),
                Err(ResilienceError::Inner(e)) => Some(classifier.classify(Outcome::Error(e))),
                // Breaker rejections and cancellations are never retried.
                Err(_) => None,
            };
            let Some(class) = class else {
                return result;
            };

            if !class.should_retry() || retries >= self.config.max_retries {
                if class.should_retry() {
                    tracing::debug!(retries, "retries exhausted; returning last outcome");
                }
                return result;
            }

            retries += 1;
            let delay = self.config.delay_for(retries);
            tracing::debug!(
                retry = retries,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                "transient outcome; retrying"
            );
            drop(result);

            if self.sleeper.sleep(delay, cancel).await == Wake::Cancelled {
                return Err(ResilienceError::Cancelled);
            }
        }
    }
}
