//! Cancellable timers and exponential backoff.
//!
//! Every suspension point here races against a [`CancellationToken`]. When
//! the token fires, the pending sleep is dropped with the losing `select!`
//! branch, so no timer outlives the caller's interest in it.
//!
//! - [`wait`]: sleep that can be cut short
//! - [`timeout`]: run a future under a deadline and a token
//! - [`RetryConfig`] / [`Backoff`]: delay schedule (doubling, jittered, capped)
//! - [`retry`]: the async loop tying them together

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{Cancelled, RetryError, WaitError};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
/// Default jitter factor (±10%).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Parameters of a retry loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts. `None` retries until success or cancellation.
    pub max_attempts: Option<u32>,
    /// Delay before the second attempt; doubles afterwards.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
    /// Symmetric jitter range, 0.0–1.0.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryConfig {
    /// Unbounded retries with the default schedule.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// At most `attempts` attempts with the default schedule.
    #[must_use]
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: Some(attempts),
            ..Self::default()
        }
    }

    /// Replace the per-delay cap.
    #[must_use]
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay_ms = u64::try_from(max_delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Replace the base delay.
    #[must_use]
    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay_ms = u64::try_from(base_delay.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Delay before retry number `attempt` (zero-based).
///
/// Formula: `min(max_delay, base_delay * 2^attempt * (1 + (random * 2 - 1) * jitter))`
///
/// `random` is a value in `[0.0, 1.0)`. The cap is applied after jitter so no
/// delay ever exceeds `max_delay_ms`. For jitter factors up to 1/3 the
/// sequence is non-decreasing: the smallest next value (`2x * 0.9`) is larger
/// than the largest current one (`x * 1.1`).
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    let with_jitter = ((exponential as f64) * jitter).round().max(0.0) as u64;
    with_jitter.min(max_delay_ms)
}

/// Stateful delay schedule drawing jitter from the thread RNG.
#[derive(Clone, Debug)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
}

impl Backoff {
    /// Start a schedule at the base delay.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of delays handed out so far.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Next delay in the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let ms = calculate_backoff_delay(
            self.attempt,
            self.config.base_delay_ms,
            self.config.max_delay_ms,
            self.config.jitter_factor,
            rand::random::<f64>(),
        );
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(ms)
    }

    /// Rewind to the base delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cancellable primitives
// ─────────────────────────────────────────────────────────────────────────────

/// Sleep for `delay` unless `cancel` fires first.
pub async fn wait(delay: Duration, cancel: &CancellationToken) -> Result<(), Cancelled> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Drive `future` to completion unless `cancel` fires first.
pub async fn cancellable<F: Future>(
    future: F,
    cancel: &CancellationToken,
) -> Result<F::Output, Cancelled> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Cancelled),
        out = future => Ok(out),
    }
}

/// Drive `future` under a deadline, unless `cancel` fires first.
pub async fn timeout<F: Future>(
    delay: Duration,
    future: F,
    cancel: &CancellationToken,
) -> Result<F::Output, WaitError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(WaitError::Cancelled),
        out = future => Ok(out),
        () = tokio::time::sleep(delay) => Err(WaitError::TimedOut(delay)),
    }
}

/// Call `op` until it succeeds, backing off between failures.
///
/// Each attempt and each delay races against `cancel`; cancellation ends the
/// loop with [`RetryError::Cancelled`] and is never retried. When
/// `max_attempts` is reached the last error is returned in
/// [`RetryError::Exhausted`].
pub async fn retry<T, E, F, Fut>(
    mut op: F,
    config: &RetryConfig,
    cancel: &CancellationToken,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut backoff = Backoff::new(config.clone());
    let mut attempts: u32 = 0;

    loop {
        attempts = attempts.saturating_add(1);
        match cancellable(op(), cancel).await? {
            Ok(value) => return Ok(value),
            Err(err) => {
                if config.max_attempts.is_some_and(|max| attempts >= max) {
                    return Err(RetryError::Exhausted {
                        attempts,
                        last: err,
                    });
                }
                let delay = backoff.next_delay();
                debug!(
                    attempt = attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "attempt failed, backing off"
                );
                wait(delay, cancel).await?;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    // -- RetryConfig --

    #[test]
    fn retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, None);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 60_000);
        assert!((config.jitter_factor - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn retry_config_partial_json() {
        let config: RetryConfig = serde_json::from_str(r#"{"max_attempts": 3}"#).unwrap();
        assert_eq!(config.max_attempts, Some(3));
        assert_eq!(config.max_delay_ms, 60_000);
    }

    #[test]
    fn retry_config_builders() {
        let config = RetryConfig::with_attempts(7)
            .base_delay(Duration::from_millis(250))
            .max_delay(Duration::from_secs(2));
        assert_eq!(config.max_attempts, Some(7));
        assert_eq!(config.base_delay_ms, 250);
        assert_eq!(config.max_delay_ms, 2000);
    }

    // -- calculate_backoff_delay --

    #[test]
    fn backoff_exponential_growth_without_jitter() {
        let delays: Vec<u64> = (0..4)
            .map(|i| calculate_backoff_delay(i, 1000, 60_000, 0.0, 0.3))
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000]);
    }

    #[test]
    fn backoff_jitter_bounds() {
        assert_eq!(calculate_backoff_delay(0, 1000, 60_000, 0.1, 0.0), 900);
        assert_eq!(calculate_backoff_delay(0, 1000, 60_000, 0.1, 0.5), 1000);
        assert_eq!(calculate_backoff_delay(0, 1000, 60_000, 0.1, 0.999_999), 1100);
    }

    #[test]
    fn backoff_cap_applies_after_jitter() {
        assert_eq!(calculate_backoff_delay(6, 1000, 60_000, 0.1, 0.999), 60_000);
        assert_eq!(calculate_backoff_delay(100, 1000, 60_000, 0.1, 0.0), 60_000);
    }

    proptest! {
        #[test]
        fn backoff_sequence_is_non_decreasing_and_capped(
            base in 1u64..5_000,
            max in 1u64..120_000,
            randoms in proptest::collection::vec(0.0f64..1.0, 20),
        ) {
            let delays: Vec<u64> = randoms
                .iter()
                .enumerate()
                .map(|(i, r)| calculate_backoff_delay(u32::try_from(i).unwrap(), base, max, 0.1, *r))
                .collect();
            for pair in delays.windows(2) {
                prop_assert!(pair[0] <= pair[1], "delays decreased: {:?}", delays);
            }
            prop_assert!(delays.iter().all(|d| *d <= max));
        }
    }

    #[test]
    fn backoff_schedule_advances_and_resets() {
        let mut backoff = Backoff::new(RetryConfig {
            jitter_factor: 0.0,
            ..RetryConfig::default()
        });
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.attempt(), 2);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    // -- wait / timeout --

    #[tokio::test(start_paused = true)]
    async fn wait_elapses() {
        let token = CancellationToken::new();
        let start = Instant::now();
        assert_eq!(wait(Duration::from_millis(250), &token).await, Ok(()));
        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_on_cancelled_token_rejects_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        let start = Instant::now();
        assert_eq!(wait(Duration::from_secs(60), &token).await, Err(Cancelled));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_cancelled_midway_does_not_resolve_late() {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            let start = Instant::now();
            (wait(Duration::from_secs(60), &child).await, start.elapsed())
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        let (result, elapsed) = handle.await.unwrap();
        assert_eq!(result, Err(Cancelled));
        assert!(elapsed < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_returns_value_in_time() {
        let token = CancellationToken::new();
        let out = timeout(Duration::from_secs(1), async { 42 }, &token).await;
        assert_eq!(out, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_expires_on_pending_future() {
        let token = CancellationToken::new();
        let out = timeout(
            Duration::from_millis(100),
            std::future::pending::<()>(),
            &token,
        )
        .await;
        assert_eq!(out, Err(WaitError::TimedOut(Duration::from_millis(100))));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancelled_before_deadline() {
        let token = CancellationToken::new();
        token.cancel();
        let out = timeout(Duration::from_secs(5), std::future::pending::<()>(), &token).await;
        assert_eq!(out, Err(WaitError::Cancelled));
    }

    // -- retry --

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let token = CancellationToken::new();

        let result: Result<&str, RetryError<String>> = retry(
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("refused".to_string())
                    } else {
                        Ok("connected")
                    }
                }
            },
            &RetryConfig::with_attempts(5),
            &token,
        )
        .await;

        assert_eq!(result.unwrap(), "connected");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhausts_after_exact_attempts_with_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let token = CancellationToken::new();
        let start = Instant::now();

        let result: Result<(), RetryError<String>> = retry(
            || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(format!("failure {n}"))
                }
            },
            &RetryConfig::with_attempts(5).max_delay(Duration::from_millis(1000)),
            &token,
        )
        .await;

        assert_matches!(
            result,
            Err(RetryError::Exhausted { attempts: 5, ref last }) if last == "failure 5"
        );
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        // Four waits: [900, 1000] then three capped at 1000.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3900), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(4000), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_retry_runs_until_cancelled() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            retry(
                move || {
                    let counter = counter.clone();
                    async move {
                        let _ = counter.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>("gateway timeout")
                    }
                },
                &RetryConfig::unbounded().max_delay(Duration::from_secs(60)),
                &child,
            )
            .await
        });

        tokio::time::sleep(Duration::from_secs(600)).await;
        token.cancel();

        let result = handle.await.unwrap();
        assert_matches!(result, Err(RetryError::Cancelled));
        assert!(calls.load(Ordering::SeqCst) > 5);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_cancels_in_flight_attempt() {
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            retry(
                || std::future::pending::<Result<(), String>>(),
                &RetryConfig::unbounded(),
                &child,
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        token.cancel();
        assert_matches!(handle.await.unwrap(), Err(RetryError::Cancelled));
    }
}
