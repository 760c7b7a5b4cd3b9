/*!
 * Bounded retry with linear backoff, plus the one-shot validation re-issue.
 *
 * - A retryable failure is attempted again up to `max_retries` times; the
 *   wait before retry `n` is `backoff_step * n`.
 * - A successful response that fails output validation is re-requested once.
 *   That re-issue does not consume the retry budget.
 *
 * Every wait is interrupted by the run's stop flag.
 */

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::watch;
use tokio::time::sleep;

use crate::app_config::BatchConfig;

/// Why a retried operation produced no value
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// Every allowed attempt failed with a retryable error
    Exhausted { attempts: u32, last: E },
    /// A non-retryable error ended the loop
    Fatal(E),
    /// The stop flag was observed before the next attempt
    Stopped,
}

/// Retry bound and backoff step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(2000))
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_step: Duration) -> Self {
        Self {
            max_retries,
            backoff_step,
        }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.retry_backoff_ms))
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// First attempt plus retries
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Wait before retry number `retry` (1-based)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        self.backoff_step * retry
    }

    /// Run `op` until it succeeds, fails permanently or the budget is spent.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        mut stop: Option<watch::Receiver<bool>>,
        is_retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !is_retryable(&error) {
                return Err(RetryError::Fatal(error));
            }

            if attempt > self.max_retries {
                warn!("{}: giving up after {} attempts: {}", label, attempt, error);
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.backoff_for(attempt);
            warn!(
                "{}: attempt {}/{} failed ({}), retrying in {:?}",
                label,
                attempt,
                self.max_attempts(),
                error,
                delay
            );

            if !sleep_unless_stopped(delay, stop.as_mut()).await {
                info!("{}: stop requested, not retrying", label);
                return Err(RetryError::Stopped);
            }
            attempt += 1;
        }
    }

    /// Keep `original` if it passes `is_valid`; otherwise re-issue once and
    /// keep the re-issued value only if it passes.
    pub async fn keep_valid<T, E, F, Fut>(
        &self,
        label: &str,
        original: T,
        is_valid: impl Fn(&T) -> bool,
        reissue: F,
    ) -> T
    where
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if is_valid(&original) {
            return original;
        }

        info!("{}: completion marker missing, re-requesting once", label);
        match reissue().await {
            Ok(retried) if is_valid(&retried) => {
                info!("{}: re-issued response passed validation", label);
                retried
            }
            Ok(_) => {
                warn!("{}: re-issued response also lacks the marker, keeping the original", label);
                original
            }
            Err(e) => {
                warn!("{}: re-issue failed ({}), keeping the original", label, e);
                original
            }
        }
    }
}

/// Sleep for `delay` unless the stop flag is (or becomes) set.
///
/// Returns false when stopped.
pub async fn sleep_unless_stopped(delay: Duration, stop: Option<&mut watch::Receiver<bool>>) -> bool {
    let Some(rx) = stop else {
        sleep(delay).await;
        return true;
    };

    if *rx.borrow() {
        return false;
    }

    let stopped = tokio::select! {
        _ = sleep(delay) => false,
        _ = wait_until_stopped(rx) => true,
    };
    !stopped && !*rx.borrow()
}

/// Resolve once the stop flag is set (or its sender is gone)
pub async fn wait_until_stopped(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
