//! Retry classification and exponential backoff schedules
//!
//! The status layer never retries on its own. Callers that want to ride out transient
//! failures while waiting on a submission or job opt in through
//! [`PollConfig::retry`](crate::config::PollConfig::retry); the polling loop then asks a
//! [`Backoff`] how long to wait before the next attempt.
//!
//! # Example
//!
//! ```
//! use astrometry_client::config::RetryConfig;
//! use astrometry_client::retry::Backoff;
//! use std::time::Duration;
//!
//! let config = RetryConfig {
//!     max_attempts: 2,
//!     initial_delay: Duration::from_millis(10),
//!     jitter: false,
//!     ..Default::default()
//! };
//! let mut backoff = Backoff::new(&config);
//! assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
//! assert_eq!(backoff.next_delay(), Some(Duration::from_millis(20)));
//! assert_eq!(backoff.next_delay(), None);
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, server busy, connection reset) should return `true`.
/// Permanent failures (rejected key, failed job, malformed reply) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Server overloaded or briefly unavailable
            Error::HttpStatus { status, .. } => *status == 429 || (500..=599).contains(status),
            Error::MissingApiKey { .. }
            | Error::LoginFailed(_)
            | Error::NoSession(_)
            | Error::InvalidSession(_)
            | Error::RequestFailed(_)
            | Error::UnknownContentType { .. }
            | Error::StillProcessing { .. }
            | Error::StatusFailed { .. }
            | Error::Timeout { .. }
            | Error::ExhaustedAttempts { .. }
            | Error::Settings(_)
            | Error::Config { .. }
            | Error::MalformedResponse(_)
            | Error::Fits(_)
            | Error::Serialization(_) => false,
        }
    }
}

/// Delay schedule for one retried operation
///
/// Yields `max_attempts` delays growing by `backoff_multiplier`, each capped at `max_delay`,
/// then `None`.
#[derive(Debug, Clone)]
pub struct Backoff {
    delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
    max_attempts: u32,
    attempts: u32,
}

impl Backoff {
    /// Start a fresh schedule
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            delay: config.initial_delay.min(config.max_delay),
            max_delay: config.max_delay,
            multiplier: config.backoff_multiplier,
            jitter: config.jitter,
            max_attempts: config.max_attempts,
            attempts: 0,
        }
    }

    /// Delay before the next retry, or None once the retries are used up
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;

        let current = self.delay;
        let next = Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max_delay);
        self.delay = next.min(self.max_delay);

        Some(if self.jitter {
            add_jitter(current)
        } else {
            current
        })
    }

    /// Retries handed out so far
    pub fn retries(&self) -> u32 {
        self.attempts
    }

    /// Forget past failures (after a successful attempt)
    pub fn reset(&mut self, config: &RetryConfig) {
        *self = Self::new(config);
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::try_from_secs_f64(jittered_secs).unwrap_or(delay)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: u32, initial_ms: u64, max_ms: u64, multiplier: f64) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            backoff_multiplier: multiplier,
            jitter: false,
        }
    }

    #[test]
    fn delays_grow_exponentially() {
        let mut backoff = Backoff::new(&config(4, 50, 10_000, 2.0));

        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(50),
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]
        );
        assert_eq!(backoff.retries(), 4);
    }

    #[test]
    fn huge_delays_saturate_at_max_delay() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::MAX,
            max_delay: Duration::MAX,
            backoff_multiplier: 2.0,
            jitter: true,
        };
        let mut backoff = Backoff::new(&config);

        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(delays, vec![Duration::MAX; 3]);
    }

    #[test]
    fn invalid_multiplier_does_not_panic() {
        for multiplier in [-1.0, f64::NAN] {
            let mut backoff = Backoff::new(&config(2, 10, 100, multiplier));
            assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
            assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        }
    }

    #[test]
    fn delays_never_exceed_max_delay() {
        // Without the cap: 50ms, 500ms, 5000ms, 50000ms
        let mut backoff = Backoff::new(&config(4, 50, 200, 10.0));

        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(delays[0], Duration::from_millis(50));
        for delay in &delays[1..] {
            assert_eq!(*delay, Duration::from_millis(200));
        }
    }

    #[test]
    fn initial_delay_above_cap_is_clamped() {
        let mut backoff = Backoff::new(&config(1, 500, 100, 2.0));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn zero_max_attempts_never_retries() {
        let mut backoff = Backoff::new(&config(0, 1, 1000, 2.0));
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.retries(), 0);
    }

    #[test]
    fn reset_restarts_the_schedule() {
        let cfg = config(2, 10, 1000, 2.0);
        let mut backoff = Backoff::new(&cfg);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.next_delay(), None);

        backoff.reset(&cfg);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn jittered_delays_stay_within_bounds() {
        let cfg = RetryConfig {
            jitter: true,
            ..config(200, 50, 50, 1.0)
        };
        let mut backoff = Backoff::new(&cfg);
        let base = Duration::from_millis(50);

        while let Some(delay) = backoff.next_delay() {
            assert!(delay >= base, "jittered {delay:?} < base delay {base:?}");
            assert!(delay <= base * 2, "jittered {delay:?} > 2x base delay");
        }
    }

    #[test]
    fn add_jitter_on_zero_delay_returns_zero() {
        assert_eq!(add_jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn server_side_statuses_are_retryable() {
        let status = |status| Error::HttpStatus {
            status,
            url: "http://example.com".to_string(),
        };

        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(403).is_retryable());
    }

    #[test]
    fn transient_io_kinds_are_retryable() {
        for kind in [
            std::io::ErrorKind::TimedOut,
            std::io::ErrorKind::ConnectionReset,
            std::io::ErrorKind::BrokenPipe,
        ] {
            assert!(Error::Io(std::io::Error::new(kind, "transient")).is_retryable());
        }

        let denied = Error::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        assert!(!denied.is_retryable(), "PermissionDenied is permanent");
    }

    #[test]
    fn protocol_and_lifecycle_errors_are_permanent() {
        assert!(!Error::LoginFailed("bad apikey".to_string()).is_retryable());
        assert!(!Error::InvalidSession("no session with key x".to_string()).is_retryable());
        assert!(!Error::RequestFailed("boom".to_string()).is_retryable());
        assert!(!Error::StatusFailed { id: 1 }.is_retryable());
        assert!(
            !Error::UnknownContentType {
                url: "u".to_string(),
                content_type: Some("text/html".to_string()),
            }
            .is_retryable()
        );
        let parse = Error::Serialization(serde_json::from_str::<String>("bad json").unwrap_err());
        assert!(!parse.is_retryable());
    }
}
