//! Runner of retryable tasks with backoff and abort preconditions.

use std::{future::Future, time::Duration};

use backoff::{backoff::Backoff as _, ExponentialBackoffBuilder};
use tracerr::Traced;

use crate::conf::RetryPolicy;

/// Error which may indicate whether the failed operation is worth retrying.
pub trait Retryable {
    /// Indicates whether the operation failed with this error may be retried.
    fn is_retryable(&self) -> bool;
}

impl<E: Retryable> Retryable for Traced<E> {
    #[inline]
    fn is_retryable(&self) -> bool {
        self.as_ref().is_retryable()
    }
}

/// Executes the provided `task` retrying it according to the provided
/// [`RetryPolicy`].
///
/// After a failed attempt the task is retried if the error is
/// [`Retryable`] and the number of retries is below
/// [`RetryPolicy::max_retries`]. Before each retry the executor sleeps a
/// jittered exponential delay and then checks the `precondition`: if it
/// returns `false`, the retry is no longer meaningful and the error of the
/// last attempt is returned without running the task again.
///
/// # Errors
///
/// With the error of the last attempt, if it's not [`Retryable`], retries
/// are exhausted or the `precondition` doesn't hold anymore.
pub async fn execute<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    mut precondition: P,
    mut task: F,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut() -> bool,
{
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial_delay)
        .with_multiplier(policy.multiplier)
        .with_max_interval(policy.max_delay)
        .with_randomization_factor(policy.randomization_factor)
        .with_max_elapsed_time(None)
        .build();

    let mut retries = 0;
    loop {
        let err = match task().await {
            Ok(res) => return Ok(res),
            Err(e) => e,
        };
        if !err.is_retryable() || retries >= policy.max_retries {
            return Err(err);
        }
        retries += 1;

        let delay = backoff.next_backoff().unwrap_or(policy.max_delay);
        log::debug!(
            "Retrying in {:?} ({}/{}) after error: {}",
            delay,
            retries,
            policy.max_retries,
            err,
        );
        tokio::time::sleep(delay).await;

        if !precondition() {
            log::debug!("Retry precondition failed, aborting: {}", err);
            return Err(err);
        }
    }
}

/// Delay of the provided `attempt` (starting from `1`) of the provided
/// [`RetryPolicy`] without jitter.
#[must_use]
pub fn nominal_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let factor = policy.multiplier.powi(attempt.saturating_sub(1) as i32);
    policy.initial_delay.mul_f64(factor).min(policy.max_delay)
}

#[cfg(test)]
mod spec {
    use std::{
        cell::Cell,
        time::{Duration, Instant},
    };

    use derive_more::Display;

    use crate::conf::RetryPolicy;

    use super::{execute, nominal_delay, Retryable};

    #[derive(Debug, Display, PartialEq)]
    enum TestError {
        Transient,
        Fatal,
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            *self == Self::Transient
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(1),
            randomization_factor: 0.5,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let attempts = Cell::new(0);

        let res = execute(&policy(5), || true, || {
            attempts.set(attempts.get() + 1);
            let n = attempts.get();
            async move {
                if n < 3 {
                    Err(TestError::Transient)
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(res, Ok(3));
        assert_eq!(attempts.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let attempts = Cell::new(0);

        let res: Result<(), _> = execute(&policy(2), || true, || {
            attempts.set(attempts.get() + 1);
            async { Err(TestError::Transient) }
        })
        .await;

        assert_eq!(res, Err(TestError::Transient));
        assert_eq!(attempts.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn never_retries_non_retryable_errors() {
        let attempts = Cell::new(0);

        let res: Result<(), _> = execute(&policy(10), || true, || {
            attempts.set(attempts.get() + 1);
            async { Err(TestError::Fatal) }
        })
        .await;

        assert_eq!(res, Err(TestError::Fatal));
        assert_eq!(attempts.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn precondition_is_checked_after_each_delay() {
        let attempts = Cell::new(0);
        let checks = Cell::new(0);

        let res: Result<(), _> = execute(
            &policy(10),
            || {
                checks.set(checks.get() + 1);
                checks.get() < 2
            },
            || {
                attempts.set(attempts.get() + 1);
                async { Err(TestError::Transient) }
            },
        )
        .await;

        assert_eq!(res, Err(TestError::Transient));
        assert_eq!(checks.get(), 2);
        assert_eq!(attempts.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_between_attempts() {
        let start = Instant::now();
        let tokio_start = tokio::time::Instant::now();

        let _: Result<(), _> = execute(&policy(2), || true, || async {
            Err(TestError::Transient)
        })
        .await;

        // First delay is at least 50ms, second one at least 100ms.
        assert!(tokio_start.elapsed() >= Duration::from_millis(150));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn nominal_delay_is_capped() {
        let policy = policy(10);
        assert_eq!(nominal_delay(&policy, 1), Duration::from_millis(100));
        assert_eq!(nominal_delay(&policy, 3), Duration::from_millis(400));
        assert_eq!(nominal_delay(&policy, 10), Duration::from_secs(1));
    }
}
