//! Cancellable waits between retry attempts.
//!
//! A [`Sleeper`] owns the race between the backoff delay and the caller's
//! [`CancellationToken`], so the retry loop only has to look at the returned [`Wake`].
//! Test sleepers skip the wait but still observe the token.

use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a sleep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Elapsed,
    Cancelled,
}

/// Waits for a backoff delay unless `cancel` fires first.
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep<'a>(&'a self, delay: Duration, cancel: &'a CancellationToken) -> BoxFuture<'a, Wake>;
}

/// Runtime sleeper: a tokio timer raced against the token.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep<'a>(&'a self, delay: Duration, cancel: &'a CancellationToken) -> BoxFuture<'a, Wake> {
        Box::pin(async move {
            tokio::select! {
                _ = cancel.cancelled() => Wake::Cancelled,
                _ = tokio::time::sleep(delay) => Wake::Elapsed,
            }
        })
    }
}

/// Returns at once; reports a token that has already fired.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleeper;

impl Sleeper for InstantSleeper {
    fn sleep<'a>(&'a self, _delay: Duration, cancel: &'a CancellationToken) -> BoxFuture<'a, Wake> {
        Box::pin(futures::future::ready(wake_now(cancel)))
    }
}

fn wake_now(cancel: &CancellationToken) -> Wake {
    if cancel.is_cancelled() {
        Wake::Cancelled
    } else {
        Wake::Elapsed
    }
}

/// Like [`InstantSleeper`], but records every requested delay.
#[derive(Debug, Clone, Default)]
pub struct TrackingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    pub fn calls(&self) -> Vec<Duration> {
        self.delays.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Sum of every requested delay: the time a real runtime would have spent backing off.
    pub fn total(&self) -> Duration {
        self.calls().into_iter().sum()
    }
}

impl Sleeper for TrackingSleeper {
    fn sleep<'a>(&'a self, delay: Duration, cancel: &'a CancellationToken) -> BoxFuture<'a, Wake> {
        self.delays.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(delay);
        Box::pin(futures::future::ready(wake_now(cancel)))
    }
}
