//! Request throttling
//!
//! Spaces outgoing requests by a minimum interval plus random jitter.
//! The very first request only pays the jitter. All waits are serialized
//! through one lock so concurrent callers queue up behind each other.

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

/// Throttle settings, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub enabled: bool,
    pub min_interval_secs: f64,
    pub jitter_max_secs: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_secs: 1.5,
            jitter_max_secs: 1.0,
        }
    }
}

impl ThrottleConfig {
    /// Clamp negative and non-finite values to zero.
    pub fn sanitized(mut self) -> Self {
        self.min_interval_secs = non_negative(self.min_interval_secs);
        self.jitter_max_secs = non_negative(self.jitter_max_secs);
        self
    }

    /// Delay owed before the next request, excluding jitter.
    ///
    /// `elapsed` is the time since the previous request, `None` if there
    /// was none.
    pub fn base_delay(&self, elapsed: Option<Duration>) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        let Some(elapsed) = elapsed else {
            return Duration::ZERO;
        };
        Duration::from_secs_f64(self.min_interval_secs).saturating_sub(elapsed)
    }

    fn sample_jitter(&self) -> Duration {
        if !self.enabled || self.jitter_max_secs <= 0.0 {
            return Duration::ZERO;
        }
        let secs = rand::rng().random_range(0.0..=self.jitter_max_secs);
        Duration::from_secs_f64(secs)
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 { value } else { 0.0 }
}

/// Shared request throttle
#[derive(Debug)]
pub struct Throttle {
    config: ThrottleConfig,
    last_request: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config: config.sanitized(),
            last_request: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    fn next_delay(&self, last_request: Option<Instant>) -> Duration {
        let elapsed = last_request.map(|at| at.elapsed());
        self.config.base_delay(elapsed) + self.config.sample_jitter()
    }

    /// Sleep until the next request may go out. Returns the time slept.
    pub async fn wait(&self) -> Duration {
        if !self.config.enabled {
            return Duration::ZERO;
        }

        let mut last_request = self.last_request.lock().await;
        let delay = self.next_delay(*last_request);
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "Throttling request");
            tokio::time::sleep(delay).await;
        }
        *last_request = Some(Instant::now());
        delay
    }

    /// Blocking variant of [`Throttle::wait`] for worker threads.
    ///
    /// Must not be called from inside an async context.
    pub fn wait_blocking(&self) -> Duration {
        if !self.config.enabled {
            return Duration::ZERO;
        }

        let mut last_request = self.last_request.blocking_lock();
        let delay = self.next_delay(*last_request);
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "Throttling request");
            std::thread::sleep(delay);
        }
        *last_request = Some(Instant::now());
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(min_interval_secs: f64) -> ThrottleConfig {
        ThrottleConfig {
            enabled: true,
            min_interval_secs,
            jitter_max_secs: 0.0,
        }
    }

    #[test]
    fn test_base_delay() {
        let config = no_jitter(1.5);
        assert_eq!(config.base_delay(None), Duration::ZERO);
        assert_eq!(
            config.base_delay(Some(Duration::from_millis(500))),
            Duration::from_secs(1)
        );
        assert_eq!(config.base_delay(Some(Duration::from_secs(2))), Duration::ZERO);
    }

    #[test]
    fn test_disabled_never_waits() {
        let config = ThrottleConfig {
            enabled: false,
            ..ThrottleConfig::default()
        };
        assert_eq!(config.base_delay(Some(Duration::ZERO)), Duration::ZERO);
        assert_eq!(config.sample_jitter(), Duration::ZERO);
    }

    #[test]
    fn test_jitter_bounds() {
        let config = ThrottleConfig {
            enabled: true,
            min_interval_secs: 0.0,
            jitter_max_secs: 0.05,
        };
        for _ in 0..100 {
            assert!(config.sample_jitter() <= Duration::from_millis(50));
        }
    }

    #[test]
    fn test_sanitized_clamps_negatives() {
        let config = ThrottleConfig {
            enabled: true,
            min_interval_secs: -1.0,
            jitter_max_secs: f64::NAN,
        }
        .sanitized();
        assert_eq!(config.min_interval_secs, 0.0);
        assert_eq!(config.jitter_max_secs, 0.0);
    }

    #[tokio::test]
    async fn test_wait_spaces_requests() {
        let throttle = Throttle::new(no_jitter(0.05));
        assert_eq!(throttle.wait().await, Duration::ZERO);

        let started = Instant::now();
        throttle.wait().await;
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 3)]
    async fn test_concurrent_callers_are_serialized() {
        let throttle = std::sync::Arc::new(Throttle::new(no_jitter(0.05)));
        let started = Instant::now();

        let callers: Vec<_> = (0..3)
            .map(|_| {
                let throttle = throttle.clone();
                tokio::spawn(async move {
                    throttle.wait().await;
                    Instant::now()
                })
            })
            .collect();

        let mut released = Vec::new();
        for caller in callers {
            released.push(caller.await.unwrap());
        }
        released.sort();

        assert!(started.elapsed() >= Duration::from_millis(90));
        for pair in released.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(40));
        }
    }

    #[test]
    fn test_wait_blocking_spaces_requests() {
        let throttle = Throttle::new(no_jitter(0.05));
        throttle.wait_blocking();
        let started = Instant::now();
        throttle.wait_blocking();
        assert!(started.elapsed() >= Duration::from_millis(40));
    }
}
