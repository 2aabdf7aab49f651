//! Cancellable polling and retry primitives.
//!
//! Every wait in the crate goes through these helpers: power-state
//! transitions, out-of-band script completion and SSH session establishment.
//! Each wait is bounded by a deadline and can be interrupted through a
//! [`CancellationToken`], so a hung remote operation never hangs the tool.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

/// Largest shift applied when doubling backoff delays.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Fixed-interval polling bounded by an overall timeout.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WaitPolicy {
    /// Delay between consecutive probes.
    pub interval: Duration,
    /// Upper bound on the total time spent waiting.
    pub timeout: Duration,
}

impl WaitPolicy {
    /// Creates a polling policy.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Exponential backoff bounded by an overall timeout.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Ceiling applied to the doubled delay.
    pub max_delay: Duration,
    /// Upper bound on the total time spent retrying.
    pub timeout: Duration,
}

impl BackoffPolicy {
    /// Creates a backoff policy.
    #[must_use]
    pub const fn new(initial_delay: Duration, max_delay: Duration, timeout: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            timeout,
        }
    }

    /// Returns the delay to apply after `failures` consecutive failures.
    ///
    /// The first failure waits `initial_delay`, each further failure doubles
    /// it, and the result never exceeds `max_delay`.
    #[must_use]
    pub fn delay_after(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        let factor = 1_u32.checked_shl(shift).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Errors raised by [`poll_until`] and [`retry_with_backoff`].
#[derive(Debug, Error)]
pub enum WaitError<E>
where
    E: std::error::Error + 'static,
{
    /// The condition did not hold before the deadline.
    #[error("timed out after {}s waiting for {action}", elapsed.as_secs())]
    TimedOut {
        /// Operation being waited on.
        action: String,
        /// Time spent before giving up.
        elapsed: Duration,
    },
    /// The caller cancelled the wait.
    #[error("cancelled while waiting for {action}")]
    Cancelled {
        /// Operation being waited on.
        action: String,
    },
    /// A probe failed in a way that polling cannot recover from.
    #[error("{action} failed: {source}")]
    Probe {
        /// Operation being waited on.
        action: String,
        /// Error returned by the probe.
        #[source]
        source: E,
    },
    /// Every retry attempt failed before the deadline.
    #[error("{action} failed after {attempts} attempts: {last}")]
    Exhausted {
        /// Operation being retried.
        action: String,
        /// Number of attempts made.
        attempts: u32,
        /// Error returned by the final attempt.
        #[source]
        last: E,
    },
}

impl<E> WaitError<E>
where
    E: std::error::Error + 'static,
{
    /// Returns `true` when the wait ended because of cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Polls `probe` until it yields `Some`, the policy times out, or `cancel`
/// fires.
///
/// Probe errors abort the wait immediately. A probe still in flight when the
/// deadline passes or `cancel` fires is dropped.
///
/// # Errors
///
/// Returns [`WaitError::TimedOut`], [`WaitError::Cancelled`], or
/// [`WaitError::Probe`].
pub async fn poll_until<T, E, F, Fut>(
    policy: WaitPolicy,
    cancel: &CancellationToken,
    action: &str,
    mut probe: F,
) -> Result<T, WaitError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    loop {
        if cancel.is_cancelled() {
            return Err(cancelled(action));
        }

        let observed = tokio::select! {
            () = cancel.cancelled() => return Err(cancelled(action)),
            () = sleep_until(deadline) => return Err(timed_out(action, started)),
            observed = probe() => observed.map_err(|source| WaitError::Probe {
                action: action.to_owned(),
                source,
            })?,
        };
        if let Some(value) = observed {
            return Ok(value);
        }

        if Instant::now() + policy.interval > deadline {
            return Err(timed_out(action, started));
        }

        tokio::select! {
            () = cancel.cancelled() => return Err(cancelled(action)),
            () = sleep(policy.interval) => {}
        }
    }
}

/// Retries `attempt` with exponential backoff until it succeeds, the policy
/// deadline would be exceeded, or `cancel` fires.
///
/// The closure receives the zero-based attempt number. An attempt still in
/// flight when the deadline passes or `cancel` fires is dropped.
///
/// # Errors
///
/// Returns [`WaitError::Exhausted`] carrying the last failure,
/// [`WaitError::TimedOut`] when an attempt outlives the deadline, or
/// [`WaitError::Cancelled`].
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: BackoffPolicy,
    cancel: &CancellationToken,
    action: &str,
    mut attempt: F,
) -> Result<T, WaitError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut failures: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(cancelled(action));
        }

        let outcome = tokio::select! {
            () = cancel.cancelled() => return Err(cancelled(action)),
            () = sleep_until(deadline) => return Err(timed_out(action, started)),
            outcome = attempt(failures) => outcome,
        };
        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        failures = failures.saturating_add(1);

        let delay = policy.delay_after(failures);
        if Instant::now() + delay > deadline {
            return Err(WaitError::Exhausted {
                action: action.to_owned(),
                attempts: failures,
                last: err,
            });
        }

        tracing::debug!(
            action,
            attempt = failures,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "retrying after failure"
        );
        tokio::select! {
            () = cancel.cancelled() => return Err(cancelled(action)),
            () = sleep(delay) => {}
        }
    }
}

fn timed_out<E>(action: &str, started: Instant) -> WaitError<E>
where
    E: std::error::Error + 'static,
{
    WaitError::TimedOut {
        action: action.to_owned(),
        elapsed: started.elapsed(),
    }
}

fn cancelled<E>(action: &str) -> WaitError<E>
where
    E: std::error::Error + 'static,
{
    WaitError::Cancelled {
        action: action.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug, Error, Eq, PartialEq)]
    #[error("probe error {0}")]
    struct ProbeError(u32);

    const fn fast_policy() -> WaitPolicy {
        WaitPolicy::new(Duration::from_millis(1), Duration::from_millis(200))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = BackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_millis(350),
            Duration::from_secs(5),
        );

        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(350));
        assert_eq!(policy.delay_after(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn poll_until_returns_first_ready_value() {
        let calls = Cell::new(0_u32);
        let cancel = CancellationToken::new();
        let result = poll_until(fast_policy(), &cancel, "ready", || {
            calls.set(calls.get() + 1);
            let seen = calls.get();
            async move { Ok::<_, ProbeError>((seen >= 3).then_some(seen)) }
        })
        .await;

        assert!(matches!(result, Ok(3)), "unexpected result: {result:?}");
    }

    #[tokio::test]
    async fn poll_until_times_out() {
        let cancel = CancellationToken::new();
        let policy = WaitPolicy::new(Duration::from_millis(1), Duration::from_millis(5));
        let result: Result<(), _> = poll_until(policy, &cancel, "never", || async {
            Ok::<_, ProbeError>(None)
        })
        .await;

        assert!(
            matches!(result, Err(WaitError::TimedOut { ref action, .. }) if action == "never"),
            "unexpected result: {result:?}"
        );
    }

    #[tokio::test]
    async fn poll_until_stops_on_probe_error() {
        let cancel = CancellationToken::new();
        let result: Result<(), _> = poll_until(fast_policy(), &cancel, "status", || async {
            Err(ProbeError(9))
        })
        .await;

        assert!(matches!(
            result,
            Err(WaitError::Probe {
                source: ProbeError(9),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn poll_until_honours_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = poll_until(fast_policy(), &cancel, "status", || async {
            Ok::<_, ProbeError>(None)
        })
        .await;

        assert!(result.is_err_and(|err| err.is_cancelled()));
    }

    fn cancel_after(delay: Duration) -> CancellationToken {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            trigger.cancel();
        });
        cancel
    }

    #[tokio::test]
    async fn poll_until_abandons_hung_check_on_cancellation() {
        let cancel = cancel_after(Duration::from_millis(20));
        let policy = WaitPolicy::new(Duration::from_millis(10), Duration::from_secs(3600));

        let result: Result<Result<(), _>, _> = tokio::time::timeout(
            Duration::from_secs(2),
            poll_until(policy, &cancel, "status", || {
                std::future::pending::<Result<Option<()>, ProbeError>>()
            }),
        )
        .await;

        let outcome = result.expect("wait should not outlive cancellation");
        assert!(outcome.is_err_and(|err| err.is_cancelled()));
    }

    #[tokio::test]
    async fn poll_until_abandons_hung_check_at_deadline() {
        let cancel = CancellationToken::new();
        let policy = WaitPolicy::new(Duration::from_millis(10), Duration::from_millis(30));

        let result: Result<Result<(), _>, _> = tokio::time::timeout(
            Duration::from_secs(2),
            poll_until(policy, &cancel, "status", || {
                std::future::pending::<Result<Option<()>, ProbeError>>()
            }),
        )
        .await;

        let outcome = result.expect("wait should not outlive its deadline");
        assert!(
            matches!(outcome, Err(WaitError::TimedOut { .. })),
            "unexpected result: {outcome:?}"
        );
    }

    #[tokio::test]
    async fn retry_abandons_hung_attempt_on_cancellation() {
        let cancel = cancel_after(Duration::from_millis(20));
        let policy = BackoffPolicy::new(
            Duration::from_millis(1),
            Duration::from_millis(2),
            Duration::from_secs(3600),
        );

        let result: Result<Result<(), _>, _> = tokio::time::timeout(
            Duration::from_secs(2),
            retry_with_backoff(policy, &cancel, "connect", |_| {
                std::future::pending::<Result<(), ProbeError>>()
            }),
        )
        .await;

        let outcome = result.expect("retry should not outlive cancellation");
        assert!(outcome.is_err_and(|err| err.is_cancelled()));
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let cancel = CancellationToken::new();
        let policy = BackoffPolicy::new(
            Duration::from_millis(1),
            Duration::from_millis(2),
            Duration::from_secs(1),
        );
        let result = retry_with_backoff(policy, &cancel, "connect", |attempt| async move {
            if attempt < 2 {
                Err(ProbeError(attempt))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert!(matches!(result, Ok(2)), "unexpected result: {result:?}");
    }

    #[tokio::test]
    async fn retry_reports_last_error_when_exhausted() {
        let cancel = CancellationToken::new();
        let policy = BackoffPolicy::new(
            Duration::from_millis(2),
            Duration::from_millis(4),
            Duration::from_millis(10),
        );
        let result: Result<(), _> =
            retry_with_backoff(policy, &cancel, "connect", |attempt| async move {
                Err(ProbeError(attempt))
            })
            .await;

        let Err(WaitError::Exhausted { attempts, last, .. }) = result else {
            panic!("expected exhaustion, got {result:?}");
        };
        assert!(attempts >= 1);
        assert_eq!(last, ProbeError(attempts - 1));
    }
}
