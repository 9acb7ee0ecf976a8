//! Readiness polling primitives.
//!
//! This library provides the single wait loop used by every lifecycle and
//! synchronization step of the harness. Key concepts:
//!
//! - **Check**: one idempotent probe, mapped to a [`PollOutcome`].
//! - **Budget**: the overall time the caller is willing to wait.
//! - **Interval**: pause between probes; short relative to the budget.
//!
//! # Invariants
//!
//! - At least one probe is always performed, even with a zero budget
//! - No probe outlives the remaining budget
//! - A timeout always reports elapsed time, probe count and the last outcome
//! - The poller never mutates caller state; it only returns results

mod clock;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

pub use clock::{Clock, ManualClock, TokioClock};

/// Default overall budget for a readiness wait.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pause between probes.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);

/// Result of one readiness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The awaited condition holds; carries the payload that proved it.
    Ready(T),

    /// The target answered but the condition does not hold yet.
    NotReady(Option<T>),

    /// The probe itself failed (connection reset, timeout, bad payload).
    TransientError(String),
}

impl<T> PollOutcome<T> {
    /// Returns true if the condition holds.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Stable label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ready(_) => "ready",
            Self::NotReady(_) => "not_ready",
            Self::TransientError(_) => "transient_error",
        }
    }

    /// Payload, if the probe produced one.
    pub fn payload(&self) -> Option<&T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::NotReady(value) => value.as_ref(),
            Self::TransientError(_) => None,
        }
    }

    /// Map the payload type.
    pub fn map<U, F>(self, f: F) -> PollOutcome<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Self::Ready(value) => PollOutcome::Ready(f(value)),
            Self::NotReady(value) => PollOutcome::NotReady(value.map(f)),
            Self::TransientError(reason) => PollOutcome::TransientError(reason),
        }
    }
}

impl<T: fmt::Debug> fmt::Display for PollOutcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(value) => write!(f, "ready ({value:?})"),
            Self::NotReady(Some(value)) => write!(f, "not ready ({value:?})"),
            Self::NotReady(None) => write!(f, "not ready"),
            Self::TransientError(reason) => write!(f, "transient error: {reason}"),
        }
    }
}

/// Budget and cadence of one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Overall budget.
    pub timeout: Duration,

    /// Pause between probes.
    pub interval: Duration,
}

impl PollSettings {
    /// Create settings from an explicit budget and interval.
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            interval: DEFAULT_INTERVAL,
        }
    }
}

/// Successful wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSuccess<T> {
    /// Payload of the probe that reported ready.
    pub value: T,

    /// Time from the first probe to the ready one.
    pub elapsed: Duration,

    /// Number of probes performed.
    pub attempts: u32,
}

/// Budget exhausted before the condition held.
#[derive(Debug, Clone, Error)]
#[error(
    "timed out after {elapsed:?} ({attempts} probes, last outcome: {})",
    describe_last(.last)
)]
pub struct PollTimeout<T: fmt::Debug> {
    /// Time spent waiting.
    pub elapsed: Duration,

    /// Number of probes performed.
    pub attempts: u32,

    /// Last observed outcome.
    pub last: Option<PollOutcome<T>>,
}

fn describe_last<T: fmt::Debug>(last: &Option<PollOutcome<T>>) -> String {
    match last {
        Some(outcome) => outcome.to_string(),
        None => "none".to_string(),
    }
}

/// Repeatedly probes a condition until it holds or the budget runs out.
#[derive(Clone)]
pub struct ReadinessPoller {
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ReadinessPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessPoller").finish_non_exhaustive()
    }
}

impl Default for ReadinessPoller {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessPoller {
    /// Poller driven by tokio time.
    pub fn new() -> Self {
        Self {
            clock: Arc::new(TokioClock),
        }
    }

    /// Poller driven by an injected clock.
    ///
    /// The clock paces probes and also bounds each probe. Under
    /// [`ManualClock`] a probe that yields before answering is charged the
    /// whole remaining budget.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Clock used by this poller.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Wait with the budget and interval from `settings`.
    pub async fn wait<T, F, Fut>(
        &self,
        check: F,
        settings: PollSettings,
    ) -> Result<PollSuccess<T>, PollTimeout<T>>
    where
        T: fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = PollOutcome<T>>,
    {
        self.wait_for(check, settings.timeout, settings.interval)
            .await
    }

    /// Probe `check` until it reports ready or `timeout` elapses.
    ///
    /// `NotReady` and `TransientError` are both absorbed and retried after
    /// `interval`. On expiry the last outcome is returned for diagnostics.
    pub async fn wait_for<T, F, Fut>(
        &self,
        mut check: F,
        timeout: Duration,
        interval: Duration,
    ) -> Result<PollSuccess<T>, PollTimeout<T>>
    where
        T: fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = PollOutcome<T>>,
    {
        let start = self.clock.now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let remaining = timeout.saturating_sub(self.clock.now() - start);
            // The probe races the injected clock, so virtual time bounds it too.
            let outcome = tokio::select! {
                biased;
                outcome = check() => outcome,
                () = self.clock.sleep(remaining) => PollOutcome::TransientError(format!(
                    "probe did not answer within the remaining {remaining:?}"
                )),
            };

            let elapsed = self.clock.now() - start;
            debug!(
                attempts,
                outcome = outcome.label(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Readiness probe"
            );

            if let PollOutcome::Ready(value) = outcome {
                return Ok(PollSuccess {
                    value,
                    elapsed,
                    attempts,
                });
            }

            if elapsed >= timeout {
                return Err(PollTimeout {
                    elapsed,
                    attempts,
                    last: Some(outcome),
                });
            }

            self.clock.sleep(interval.min(timeout - elapsed)).await;
        }
    }
}
