//! Property-based tests for the reconnect decision

use bastide_core::{ReconnectDecision, RemoteSession, RemoteState, decide_reconnect};
use chrono::{Duration, Utc};
use proptest::prelude::*;

fn session(state: RemoteState, age: i64, ttl: u64) -> (RemoteSession, chrono::DateTime<Utc>) {
    let now = Utc::now();
    let session = RemoteSession {
        id: "ocid1.bastionsession.prop".to_string(),
        lifecycle_state: state,
        time_created: Some(now - Duration::seconds(age)),
        session_ttl_in_seconds: Some(ttl),
        target_resource_details: None,
        bastion_name: None,
        display_name: None,
    };
    (session, now)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// An active session reconnects exactly while its age is below the TTL
    #[test]
    fn prop_reconnect_iff_ttl_remains(age in 0i64..400_000, ttl in 1u64..200_000) {
        let (s, now) = session(RemoteState::Active, age, ttl);
        let decision = decide_reconnect(&s, now, false);
        let ttl = i64::try_from(ttl).unwrap();
        if age < ttl {
            prop_assert_eq!(
                decision,
                ReconnectDecision::Reconnect {
                    remaining_seconds: ttl - age
                }
            );
        } else {
            prop_assert_eq!(decision, ReconnectDecision::Expired);
        }
    }

    /// A stop always wins over every other outcome
    #[test]
    fn prop_stop_wins(age in 0i64..400_000, ttl in 1u64..200_000, active in any::<bool>()) {
        let state = if active { RemoteState::Active } else { RemoteState::Deleted };
        let (s, now) = session(state, age, ttl);
        prop_assert_eq!(decide_reconnect(&s, now, true), ReconnectDecision::Stopped);
    }

    /// A session that is not active is never reconnected
    #[test]
    fn prop_inactive_never_reconnects(age in 0i64..1_000, ttl in 1_000u64..2_000) {
        for state in [RemoteState::Deleting, RemoteState::Deleted, RemoteState::Failed] {
            let (s, now) = session(state, age, ttl);
            prop_assert_eq!(decide_reconnect(&s, now, false), ReconnectDecision::Deleted);
        }
    }
}
