//! Property-based tests for the tunnel authorization budget

use bastide_core::AuthBudget;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Exhaustion happens after exactly `budget` consecutive failures
    #[test]
    fn prop_exhausts_after_budget(budget in 1u32..50) {
        let mut auth = AuthBudget::new(budget);
        for _ in 1..budget {
            auth.consume();
            prop_assert!(!auth.is_exhausted());
        }
        auth.consume();
        prop_assert!(auth.is_exhausted());
    }

    /// Any sequence of failures and connections exhausts only on a run of
    /// `budget` failures since the last connection
    #[test]
    fn prop_connection_resets_budget(
        budget in 1u32..20,
        events in prop::collection::vec(any::<bool>(), 0..200),
    ) {
        let mut auth = AuthBudget::new(budget);
        let mut streak = 0u32;
        for connected in events {
            if auth.is_exhausted() {
                break;
            }
            if connected {
                auth.reset();
                streak = 0;
            } else {
                auth.consume();
                streak += 1;
            }
            prop_assert_eq!(auth.is_exhausted(), streak >= budget);
            prop_assert_eq!(auth.remaining(), budget.saturating_sub(streak));
        }
    }
}
