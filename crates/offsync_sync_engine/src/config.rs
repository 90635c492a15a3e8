//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Configuration for drain passes and automatic sync.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Per-record retry configuration.
    pub retry: RetryConfig,
    /// Permanent-failure passes after which a record is dead-lettered.
    /// `None` keeps permanently failing records queued forever.
    pub dead_letter_after: Option<u32>,
    /// Timeout applied to each remote write attempt.
    pub request_timeout: Option<Duration>,
    /// Interval for periodic drains while reachable. A zero interval is
    /// treated as unset.
    pub sync_interval: Option<Duration>,
}

impl SyncConfig {
    /// Creates a configuration with the default retry schedule.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            dead_letter_after: Some(3),
            request_timeout: None,
            sync_interval: None,
        }
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the dead-letter threshold.
    #[must_use]
    pub fn with_dead_letter_after(mut self, passes: u32) -> Self {
        self.dead_letter_after = Some(passes.max(1));
        self
    }

    /// Never dead-letter records.
    #[must_use]
    pub fn without_dead_letters(mut self) -> Self {
        self.dead_letter_after = None;
        self
    }

    /// Sets the per-attempt request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the sync interval for automatic sync. Zero disables it.
    #[must_use]
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval).filter(|i| !i.is_zero());
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for per-record retry behavior.
///
/// The default schedule makes 5 attempts with no delay before the first and
/// 2s, 4s, 8s, 16s before the rest.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts per record, including the first.
    pub max_attempts: u32,
    /// Base delay; the delay before attempt `n` is `initial_delay * multiplier^n`.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Option<Duration>,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_secs(1),
            max_delay: None,
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }

    /// Creates a configuration with a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: None,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let mut delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if let Some(max) = self.max_delay {
            delay_secs = delay_secs.min(max.as_secs_f64());
        }

        if self.add_jitter {
            delay_secs += delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
        }

        Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}
