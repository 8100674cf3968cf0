//! Property-based tests for status record merging

use bastide_core::StatusRecord;
use proptest::prelude::*;

fn arb_record() -> impl Strategy<Value = StatusRecord> {
    (
        proptest::option::of("[a-z]{2}-[a-z]{3,9}-[1-3]"),
        proptest::option::of("[a-z ]{1,20}"),
        proptest::option::of(1u16..),
        proptest::option::of("[a-z]{1,8}"),
    )
        .prop_map(|(region, status, port, username)| StatusRecord {
            region,
            status,
            port,
            username,
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Merging keeps stored fields the update leaves out and takes the rest
    #[test]
    fn prop_merge_overlays_present_fields(base in arb_record(), update in arb_record()) {
        let mut merged = base.clone();
        merged.merge(&update);

        prop_assert_eq!(merged.region, update.region.or(base.region));
        prop_assert_eq!(merged.status, update.status.or(base.status));
        prop_assert_eq!(merged.port, update.port.or(base.port));
        prop_assert_eq!(merged.username, update.username.or(base.username));
    }

    /// Merging the same update twice changes nothing further
    #[test]
    fn prop_merge_is_idempotent(base in arb_record(), update in arb_record()) {
        let mut once = base;
        once.merge(&update);
        let mut twice = once.clone();
        twice.merge(&update);
        prop_assert_eq!(once, twice);
    }
}
