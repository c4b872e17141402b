//! Retry logic for device requests.
//!
//! This module provides configurable retry functionality with exponential
//! backoff for handling transient HTTP failures. Every retry loop observes a
//! [`CancellationToken`]: cancelling it aborts the in-flight attempt or the
//! backoff sleep at once and yields [`Error::Cancelled`].
//!
//! # Example
//!
//! ```
//! use soildash_core::{RetryConfig, with_retry, Error};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Error> {
//! // 3 retries: 500 ms, 750 ms, 1125 ms
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//!
//! let result = with_retry(&config, "fetch_telemetry", &cancel, || async {
//!     // Your HTTP request here
//!     Ok::<_, Error>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 means no retries).
    pub max_retries: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries (for exponential backoff).
    pub max_delay: Duration,
    /// Backoff multiplier (1.0 = constant delay, 2.0 = double each time).
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// No retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Single quick attempt with one short retry, used for connection probes.
    pub fn for_probe() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 1.5,
            jitter: false,
        }
    }

    /// Set maximum number of retries.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Calculate the delay before retry number `attempt` (0-based).
    ///
    /// ```
    /// use soildash_core::RetryConfig;
    /// use std::time::Duration;
    ///
    /// let config = RetryConfig::default();
    /// assert_eq!(config.delay_for_attempt(0), Duration::from_millis(500));
    /// assert_eq!(config.delay_for_attempt(1), Duration::from_millis(750));
    /// assert_eq!(config.delay_for_attempt(2), Duration::from_millis(1125));
    /// ```
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter {
            // Up to 25% extra
            let jitter_factor = 1.0 + (rand::rng().random::<f64>() * 0.25);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }
}

/// Execute an async operation with retry logic.
///
/// # Arguments
///
/// * `config` - Retry configuration
/// * `operation_name` - Name for logging purposes
/// * `cancel` - Token that aborts the operation and any pending backoff
/// * `operation` - The async operation to retry
///
/// # Returns
///
/// The result of the operation, the last error if all retries failed, or
/// [`Error::Cancelled`] as soon as `cancel` fires.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..=config.max_retries {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            outcome = operation() => outcome,
        };

        match outcome {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) => {
                if !is_retryable(&e) {
                    return Err(e);
                }

                last_error = Some(e);

                if attempt < config.max_retries {
                    let delay = config.delay_for_attempt(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}",
                        operation_name,
                        attempt + 1,
                        config.max_retries + 1,
                        delay
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::invalid_config("retry loop ran no attempts")))
}

/// Check if an error is retryable.
///
/// Transport, HTTP status and payload errors are all retried; the device is
/// assumed to recover from truncated bodies as well as from dropped links.
pub fn is_retryable(error: &Error) -> bool {
    match error {
        Error::Network { .. } => true,
        Error::Timeout { .. } => true,
        Error::Protocol { .. } => true,
        Error::Validation(_) => true,
        Error::Io(_) => true,
        Error::Cancelled => false,
        Error::InvalidConfig(_) => false,
        Error::Serialization(_) => false,
        Error::Csv(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soildash_types::ParseError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert!(!config.jitter);
    }

    #[test]
    fn test_retry_config_none() {
        let config = RetryConfig::none();
        assert_eq!(config.max_retries, 0);
    }

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig::default();

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(750));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(1125));
        assert_eq!(config.delay_for_attempt(3), Duration::from_micros(1_687_500));
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(30), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let config = RetryConfig::default().jitter(true);
        for _ in 0..50 {
            let delay = config.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(625));
        }
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&Error::network("http://x/data", "refused")));
        assert!(is_retryable(&Error::protocol(500, "Internal Server Error")));
        assert!(is_retryable(&Error::Validation(ParseError::MissingField(
            "temp"
        ))));
        assert!(!is_retryable(&Error::Cancelled));
        assert!(!is_retryable(&Error::invalid_config("bad url")));
    }

    #[tokio::test]
    async fn test_with_retry_immediate_success() {
        let config = RetryConfig::new(3);
        let cancel = CancellationToken::new();
        let result = with_retry(&config, "test", &cancel, || async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_eventual_success() {
        let config = RetryConfig::default();
        let cancel = CancellationToken::new();

        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result: Result<i32> = with_retry(&config, "test", &cancel, || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                let count = attempts.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(Error::network("http://device/data", "transient error"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_all_fail_returns_last_error() {
        let config = RetryConfig::default();
        let cancel = CancellationToken::new();

        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result: Result<i32> = with_retry(&config, "test", &cancel, || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(Error::protocol(500 + n as u16, "persistent error"))
            }
        })
        .await;

        // 1 initial + 3 retries, last error surfaced
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert!(matches!(result, Err(Error::Protocol { status: 503, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sequence_observed() {
        let config = RetryConfig::default();
        let cancel = CancellationToken::new();
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let stamps_clone = Arc::clone(&stamps);

        let _: Result<()> = with_retry(&config, "test", &cancel, || {
            let stamps = Arc::clone(&stamps_clone);
            async move {
                stamps.lock().unwrap().push(Instant::now());
                Err(Error::network("http://device/data", "down"))
            }
        })
        .await;

        let stamps = stamps.lock().unwrap();
        let gaps: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(750),
                Duration::from_millis(1125),
            ]
        );
    }

    #[tokio::test]
    async fn test_with_retry_non_retryable_error() {
        let config = RetryConfig::new(3);
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result: Result<i32> = with_retry(&config, "test", &cancel, || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(Error::invalid_config("not retryable"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_runs() {
        let config = RetryConfig::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let attempts = AtomicU32::new(0);

        let result: Result<i32> = with_retry(&config, "test", &cancel, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Ok(1) }
        })
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_retries() {
        let config = RetryConfig::default();
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let result: Result<i32> = with_retry(&config, "test", &cancel, || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(Error::network("http://device/data", "down"))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_request_aborts() {
        let config = RetryConfig::default();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result: Result<i32> = with_retry(&config, "test", &cancel, || async {
            sleep(Duration::from_secs(60)).await;
            Ok(1)
        })
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
