//! # Cancellable Backoff Polling
//!
//! Every wait in a workflow (proof, inclusion, confirmation) is a loop of
//! "probe, sleep, probe again". This module owns that loop so the
//! orchestrator never calls a bare `sleep`.
//!
//! ## Cancellation
//!
//! A [`CancelSignal`] wraps an optional `tokio::sync::watch::Receiver<bool>`.
//! Sending `true`, or dropping the sender, cancels every poll holding a
//! receiver: both the sleep between probes and an in-flight probe are
//! abandoned and [`PollOutcome::Cancelled`] is returned. The remote job is
//! not touched; we just stop asking about it.
//!
//! Timing uses `tokio::time`, so tests can drive it with a paused clock.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::trace;

use crate::config::PollPolicy;

/// How a poll loop ended, when it did not end in a probe error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut { attempts: u32, elapsed: Duration },
    Cancelled,
}

// ---------------------------------------------------------------------------
// CancelSignal
// ---------------------------------------------------------------------------

/// Shutdown awareness for a single poll loop.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }

    /// Non-blocking check.
    pub fn is_cancelled(&self) -> bool {
        match &self.rx {
            None => false,
            Some(rx) => *rx.borrow() || rx.has_changed().is_err(),
        }
    }

    /// Resolves once cancellation is requested or the sender is dropped.
    /// Never resolves for [`CancelSignal::never`].
    pub async fn cancelled(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl From<watch::Receiver<bool>> for CancelSignal {
    fn from(rx: watch::Receiver<bool>) -> Self {
        Self::new(rx)
    }
}

// ---------------------------------------------------------------------------
// poll_until
// ---------------------------------------------------------------------------

/// Probe until the probe yields `Some`, the policy's budget runs out, or
/// `cancel` fires.
///
/// `probe` receives the 0-based attempt number. A probe error ends the loop
/// immediately and is returned as-is; retrying transport failures is the
/// caller's decision, not ours.
pub async fn poll_until<T, E, F, Fut>(
    policy: &PollPolicy,
    cancel: &mut CancelSignal,
    mut probe: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let started = Instant::now();
    let max_wait = policy.max_wait();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Ok(PollOutcome::Cancelled);
        }

        let probed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PollOutcome::Cancelled),
            result = probe(attempt) => result?,
        };
        if let Some(value) = probed {
            return Ok(PollOutcome::Ready(value));
        }

        attempt += 1;
        let elapsed = started.elapsed();
        if attempt >= policy.max_attempts || elapsed >= max_wait {
            return Ok(PollOutcome::TimedOut { attempts: attempt, elapsed });
        }

        let wait = policy.interval_for(attempt - 1).min(max_wait - elapsed);
        trace!(attempt, wait_ms = wait.as_millis() as u64, "not ready, backing off");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PollOutcome::Cancelled),
            _ = sleep(wait) => {}
        }
    }
}

/// Sleep for `duration` unless cancelled first. Returns `false` if
/// cancelled.
pub async fn cancellable_sleep(duration: Duration, cancel: &mut CancelSignal) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = sleep(duration) => true,
    }
}
