//! Exponential backoff retry
//!
//! The delay for attempt `n` (0-based) is
//! `min(base * 2^n, max) * (1 + U(0, jitter_factor))`.
//!
//! An error is retried when it explicitly asks for it through
//! [`RetryClassify::retry_hint`], or, absent a hint, when it carries an
//! HTTP status from the configured retryable set. Everything else
//! propagates on the first failure.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Retry settings, delays in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
    pub jitter_factor: f64,
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay_secs: 2.0,
            max_delay_secs: 60.0,
            jitter_factor: 0.25,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.to_vec(),
        }
    }
}

impl RetryConfig {
    /// Bring out-of-range values back into their valid ranges.
    pub fn sanitized(mut self) -> Self {
        if !self.base_delay_secs.is_finite() || self.base_delay_secs < 0.1 {
            self.base_delay_secs = 0.1;
        }
        if !self.max_delay_secs.is_finite() || self.max_delay_secs < 1.0 {
            self.max_delay_secs = 1.0;
        }
        self.jitter_factor = if self.jitter_factor.is_finite() {
            self.jitter_factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if self.retryable_status_codes.is_empty() {
            self.retryable_status_codes = DEFAULT_RETRYABLE_STATUS_CODES.to_vec();
        }
        self
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    /// Backoff before retry number `attempt` (0-based).
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay_secs * 2f64.powi(attempt.min(62) as i32);
        let capped = exponential.min(self.max_delay_secs);

        let jitter = if self.jitter_factor > 0.0 {
            rand::rng().random_range(0.0..=self.jitter_factor)
        } else {
            0.0
        };

        Duration::from_secs_f64((capped * (1.0 + jitter)).max(0.0))
    }

    fn should_retry<E: RetryClassify>(&self, error: &E) -> bool {
        match error.retry_hint() {
            Some(hint) => hint,
            None => error
                .status_code()
                .is_some_and(|status| self.is_retryable_status(status)),
        }
    }
}

/// How an error presents itself to the retry loop
pub trait RetryClassify {
    /// Explicit decision; overrides the status code when present.
    fn retry_hint(&self) -> Option<bool> {
        None
    }

    fn status_code(&self) -> Option<u16> {
        None
    }
}

/// Run `operation` until it succeeds or retries are exhausted.
///
/// Blocks the current thread while backing off.
pub fn with_retry<T, E, F>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    E: RetryClassify + Display,
    F: FnMut() -> Result<T, E>,
{
    if !config.enabled {
        return operation();
    }

    let mut attempt = 0;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= config.max_retries || !config.should_retry(&error) {
                    return Err(error);
                }
                let delay = config.compute_delay(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after failure"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

/// Async variant of [`with_retry`].
pub async fn with_retry_async<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    E: RetryClassify + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    if !config.enabled {
        return operation().await;
    }

    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= config.max_retries || !config.should_retry(&error) {
                    return Err(error);
                }
                let delay = config.compute_delay(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::fmt;

    #[derive(Debug)]
    enum TestError {
        Status(u16),
        Hinted(bool, u16),
        Plain,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl RetryClassify for TestError {
        fn retry_hint(&self) -> Option<bool> {
            match self {
                TestError::Hinted(hint, _) => Some(*hint),
                _ => None,
            }
        }

        fn status_code(&self) -> Option<u16> {
            match self {
                TestError::Status(code) | TestError::Hinted(_, code) => Some(*code),
                TestError::Plain => None,
            }
        }
    }

    fn fast_config() -> RetryConfig {
        RetryConfig {
            base_delay_secs: 0.001,
            max_delay_secs: 0.001,
            jitter_factor: 0.0,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn test_compute_delay_without_jitter() {
        let config = RetryConfig {
            base_delay_secs: 1.0,
            max_delay_secs: 60.0,
            jitter_factor: 0.0,
            ..RetryConfig::default()
        };
        assert_eq!(config.compute_delay(0), Duration::from_secs(1));
        assert_eq!(config.compute_delay(1), Duration::from_secs(2));
        assert_eq!(config.compute_delay(2), Duration::from_secs(4));
        assert_eq!(config.compute_delay(10), Duration::from_secs(60));
    }

    #[test]
    fn test_compute_delay_jitter_bounds() {
        let config = RetryConfig {
            base_delay_secs: 1.0,
            jitter_factor: 0.5,
            ..RetryConfig::default()
        };
        for _ in 0..50 {
            let delay = config.compute_delay(0);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_sanitized() {
        let config = RetryConfig {
            base_delay_secs: 0.0,
            max_delay_secs: 0.5,
            jitter_factor: 3.0,
            retryable_status_codes: Vec::new(),
            ..RetryConfig::default()
        }
        .sanitized();
        assert_eq!(config.base_delay_secs, 0.1);
        assert_eq!(config.max_delay_secs, 1.0);
        assert_eq!(config.jitter_factor, 1.0);
        assert_eq!(config.retryable_status_codes, DEFAULT_RETRYABLE_STATUS_CODES.to_vec());
    }

    #[test]
    fn test_retries_retryable_status_until_success() {
        let calls = Cell::new(0);
        let result = with_retry(&fast_config(), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(TestError::Status(503))
            } else {
                Ok("done")
            }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(&fast_config(), || {
            calls.set(calls.get() + 1);
            Err(TestError::Status(429))
        });
        assert!(matches!(result, Err(TestError::Status(429))));
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn test_non_retryable_errors_propagate_immediately() {
        for error in [TestError::Status(404), TestError::Plain, TestError::Hinted(false, 503)] {
            let calls = Cell::new(0);
            let mut pending = Some(error);
            let result: Result<(), _> = with_retry(&fast_config(), || {
                calls.set(calls.get() + 1);
                Err(pending.take().unwrap_or(TestError::Plain))
            });
            assert!(result.is_err());
            assert_eq!(calls.get(), 1);
        }
    }

    #[test]
    fn test_hint_overrides_status() {
        let calls = Cell::new(0);
        let result = with_retry(&fast_config(), || {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                Err(TestError::Hinted(true, 404))
            } else {
                Ok(())
            }
        });
        assert!(result.is_ok());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_disabled_runs_once() {
        let config = RetryConfig {
            enabled: false,
            ..fast_config()
        };
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(&config, || {
            calls.set(calls.get() + 1);
            Err(TestError::Status(503))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_async_retry() {
        let counter = std::sync::atomic::AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry_async(&fast_config(), || async move {
            let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == 0 { Err(TestError::Status(500)) } else { Ok(n) }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
    }
}
