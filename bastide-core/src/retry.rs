//! Retry policies with backoff
//!
//! [`RetryConfig`] drives both the bounded session-create retry and the
//! outer "fullauto" restart loop. [`AuthBudget`] counts tunnel
//! authorization failures.

use std::time::Duration;

/// Default maximum number of retry attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Default initial delay between retries in milliseconds
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;

/// Default maximum delay between retries in milliseconds
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Default backoff multiplier (delay doubles each retry)
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default number of authorization failures tolerated per tunnel
pub const DEFAULT_AUTH_BUDGET: u32 = 10;

/// Configuration for retry behavior
///
/// The delay before retry `n` (0-indexed) is
/// `min(initial_delay * multiplier^n, max_delay)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (0 = no retries)
    pub max_attempts: u32,
    /// Initial delay between retries in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether retry is enabled
    pub enabled: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            enabled: true,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a retry configuration with no retries (single attempt)
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            enabled: false,
            ..Self::default()
        }
    }

    /// Session creation: three attempts in total, one second apart
    #[must_use]
    pub fn session_create() -> Self {
        Self {
            max_attempts: 2,
            initial_delay_ms: 1000,
            max_delay_ms: 1000,
            backoff_multiplier: 1.0,
            enabled: true,
        }
    }

    /// Outer restart loop: unbounded, 1s doubling up to 30s
    #[must_use]
    pub fn fullauto() -> Self {
        Self {
            max_attempts: u32::MAX,
            initial_delay_ms: 1000,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            backoff_multiplier: 2.0,
            enabled: true,
        }
    }

    /// Sets the maximum number of retry attempts
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the initial delay between retries
    #[must_use]
    pub const fn with_initial_delay_ms(mut self, delay_ms: u64) -> Self {
        self.initial_delay_ms = delay_ms;
        self
    }

    /// Sets the maximum delay between retries
    #[must_use]
    pub const fn with_max_delay_ms(mut self, delay_ms: u64) -> Self {
        self.max_delay_ms = delay_ms;
        self
    }

    /// Sets the backoff multiplier
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay for a given attempt number (0-indexed)
    ///
    /// Returns `None` if retry is disabled or attempt exceeds `max_attempts`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if !self.enabled || attempt >= self.max_attempts {
            return None;
        }

        let exponent = attempt.min(64) as i32;
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped_delay_ms = if delay_ms.is_finite() {
            (delay_ms as u64).min(self.max_delay_ms)
        } else {
            self.max_delay_ms
        };

        Some(Duration::from_millis(capped_delay_ms))
    }

    /// Returns whether another retry should be attempted
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && attempt < self.max_attempts
    }

    /// Returns the total number of attempts (initial + retries)
    #[must_use]
    pub const fn total_attempts(&self) -> u32 {
        if self.enabled {
            self.max_attempts.saturating_add(1)
        } else {
            1
        }
    }
}

/// State tracker for retry operations
#[derive(Debug, Clone)]
pub struct RetryState {
    current_attempt: u32,
    config: RetryConfig,
    last_error: Option<String>,
}

impl RetryState {
    /// Creates a new retry state with the given configuration
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            current_attempt: 0,
            config,
            last_error: None,
        }
    }

    /// Returns the current attempt number (0-indexed)
    #[must_use]
    pub const fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    /// Returns whether another retry should be attempted
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.should_retry(self.current_attempt)
    }

    /// Returns the delay before the next retry attempt
    #[must_use]
    pub fn next_delay(&self) -> Option<Duration> {
        self.config.delay_for_attempt(self.current_attempt)
    }

    /// Records a failed attempt and advances to the next retry
    ///
    /// Returns `true` if another retry will be attempted, `false` if exhausted.
    /// Read [`Self::next_delay`] before recording the failure.
    pub fn record_failure(&mut self, error: impl Into<String>) -> bool {
        let retry = self.should_retry();
        self.last_error = Some(error.into());
        self.current_attempt = self.current_attempt.saturating_add(1);
        retry
    }

    /// Resets the retry state after a success
    pub fn reset(&mut self) {
        self.current_attempt = 0;
        self.last_error = None;
    }

    /// Returns the last error message
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Returns the retry configuration
    #[must_use]
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }
}

/// Counter of tunnel authorization failures
///
/// Every authorization failure consumes one unit. A connected marker
/// restores the full budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthBudget {
    budget: u32,
    remaining: u32,
}

impl Default for AuthBudget {
    fn default() -> Self {
        Self::new(DEFAULT_AUTH_BUDGET)
    }
}

impl AuthBudget {
    /// Creates a full budget (at least one)
    #[must_use]
    pub fn new(budget: u32) -> Self {
        let budget = budget.max(1);
        Self {
            budget,
            remaining: budget,
        }
    }

    /// Configured size of the budget
    #[must_use]
    pub const fn budget(&self) -> u32 {
        self.budget
    }

    /// Failures still tolerated
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Returns true once every unit has been consumed
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Consumes one unit, returning the units left
    pub fn consume(&mut self) -> u32 {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining
    }

    /// Restores the full budget
    pub fn reset(&mut self) {
        self.remaining = self.budget;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_create_policy() {
        let config = RetryConfig::session_create();
        assert_eq!(config.total_attempts(), 3);
        assert_eq!(config.delay_for_attempt(0), Some(Duration::from_secs(1)));
        assert_eq!(config.delay_for_attempt(1), Some(Duration::from_secs(1)));
        assert_eq!(config.delay_for_attempt(2), None);
    }

    #[test]
    fn test_fullauto_backoff_is_capped() {
        let config = RetryConfig::fullauto();
        assert_eq!(config.delay_for_attempt(0), Some(Duration::from_secs(1)));
        assert_eq!(config.delay_for_attempt(3), Some(Duration::from_secs(8)));
        assert_eq!(config.delay_for_attempt(10), Some(Duration::from_secs(30)));
        assert_eq!(config.delay_for_attempt(5000), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_retry_state_exhausts() {
        let mut state = RetryState::new(RetryConfig::session_create());
        assert!(state.record_failure("malformed"));
        assert!(state.record_failure("malformed"));
        assert!(!state.record_failure("malformed"));
        assert_eq!(state.last_error(), Some("malformed"));
        assert_eq!(state.current_attempt(), 3);

        state.reset();
        assert_eq!(state.current_attempt(), 0);
        assert!(state.last_error().is_none());
    }

    #[test]
    fn test_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.total_attempts(), 1);
        assert!(config.delay_for_attempt(0).is_none());
    }

    #[test]
    fn test_auth_budget_reset_restores_full_value() {
        let mut budget = AuthBudget::default();
        for _ in 0..9 {
            budget.consume();
        }
        assert_eq!(budget.remaining(), 1);
        budget.reset();
        assert_eq!(budget.remaining(), DEFAULT_AUTH_BUDGET);
    }

    #[test]
    fn test_auth_budget_exhaustion() {
        let mut budget = AuthBudget::new(2);
        assert_eq!(budget.consume(), 1);
        assert!(!budget.is_exhausted());
        assert_eq!(budget.consume(), 0);
        assert!(budget.is_exhausted());
        assert_eq!(budget.consume(), 0);
    }

    #[test]
    fn test_zero_budget_is_clamped() {
        assert_eq!(AuthBudget::new(0).budget(), 1);
    }
}
