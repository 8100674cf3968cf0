//! Property-based tests for retry backoff

use std::time::Duration;

use bastide_core::{RetryConfig, RetryState};
use proptest::prelude::*;

fn arb_config() -> impl Strategy<Value = RetryConfig> {
    (0u32..20, 1u64..5_000, 1u64..60_000, 1.0f64..4.0).prop_map(
        |(attempts, initial, max, multiplier)| {
            RetryConfig::new()
                .with_max_attempts(attempts)
                .with_initial_delay_ms(initial)
                .with_max_delay_ms(max.max(initial))
                .with_backoff_multiplier(multiplier)
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Delays never exceed the cap and never shrink between attempts
    #[test]
    fn prop_delay_is_capped_and_monotonic(config in arb_config()) {
        let max = Duration::from_millis(config.max_delay_ms);
        let mut previous = Duration::ZERO;
        for attempt in 0..config.max_attempts {
            let delay = config.delay_for_attempt(attempt).unwrap();
            prop_assert!(delay <= max);
            prop_assert!(delay >= previous);
            previous = delay;
        }
        prop_assert!(config.delay_for_attempt(config.max_attempts).is_none());
    }

    /// A retry state allows exactly `total_attempts` failures
    #[test]
    fn prop_retry_state_allows_total_attempts(config in arb_config()) {
        let total = config.total_attempts();
        let mut state = RetryState::new(config);
        let mut failures = 1;
        while state.record_failure("boom") {
            failures += 1;
            prop_assert!(failures <= total);
        }
        prop_assert_eq!(failures, total);
    }

    /// The fullauto policy never gives up and stays within 30 seconds
    #[test]
    fn prop_fullauto_never_exhausts(attempt in 0u32..100_000) {
        let config = RetryConfig::fullauto();
        let delay = config.delay_for_attempt(attempt).unwrap();
        prop_assert!(delay <= Duration::from_secs(30));
        prop_assert!(delay >= Duration::from_secs(1));
    }
}
