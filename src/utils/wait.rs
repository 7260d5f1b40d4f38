//! Deadline-bound polling with backoff, cancellable through the shutdown channel.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Receiver side of the process-wide shutdown signal.
pub type Shutdown = watch::Receiver<bool>;

/// Why a wait ended without success.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("gave up after {polls} polls ({elapsed:?})")]
    TimedOut { polls: u32, elapsed: Duration },

    #[error("wait cancelled by shutdown")]
    Cancelled,
}

/// Timing of a polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay before the second check.
    pub interval: Duration,
    /// Upper bound for the delay between checks.
    pub max_interval: Duration,
    /// Growth factor applied to the delay after each unsuccessful check.
    pub multiplier: u32,
    /// Overall deadline measured from the first check.
    pub timeout: Duration,
}

impl PollPolicy {
    /// Constant interval, no backoff.
    pub fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            multiplier: 1,
            timeout,
        }
    }

    fn next_interval(&self, current: Duration) -> Duration {
        current
            .saturating_mul(self.multiplier.max(1))
            .min(self.max_interval.max(self.interval))
    }
}

/// Sleep for `duration` unless shutdown is signalled first.
///
/// Returns `true` when the sleep was interrupted by shutdown. A dropped sender
/// is not a shutdown: the sleep then simply runs to completion.
pub async fn sleep_or_shutdown(duration: Duration, shutdown: &mut Shutdown) -> bool {
    if *shutdown.borrow() {
        return true;
    }

    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => match changed {
                Ok(()) if *shutdown.borrow() => return true,
                Ok(()) => continue,
                Err(_) => {
                    (&mut sleep).await;
                    return false;
                }
            },
        }
    }
}

/// Run `check` until it yields a value, the deadline passes or shutdown is signalled.
///
/// The check receives the 1-based poll number.
pub async fn poll_until<T, F, Fut>(
    policy: &PollPolicy,
    shutdown: &mut Shutdown,
    mut check: F,
) -> Result<T, WaitError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut interval = policy.interval;
    let mut polls = 0u32;

    loop {
        if *shutdown.borrow() {
            return Err(WaitError::Cancelled);
        }

        polls += 1;
        if let Some(value) = check(polls).await {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(WaitError::TimedOut {
                polls,
                elapsed: now - started,
            });
        }

        if sleep_or_shutdown(interval.min(deadline - now), shutdown).await {
            return Err(WaitError::Cancelled);
        }
        interval = policy.next_interval(interval);
    }
}
