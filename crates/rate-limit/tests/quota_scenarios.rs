use std::sync::Arc;
use std::time::Duration;

use tollgate_common::LimitScope;
use tollgate_rate_limit::{Decision, FixedWindowLimiter, LimitKey, LimitPolicy};

use tollgate_counter::MockStore;

fn setup() -> (FixedWindowLimiter, Arc<MockStore>) {
    let store = Arc::new(MockStore::new());
    (FixedWindowLimiter::new(store.clone()), store)
}

#[tokio::test]
async fn burst_of_six_from_one_ip_denies_the_sixth() {
    let (limiter, _) = setup();
    let policy = LimitPolicy::new(5, Duration::from_secs(60));
    let key = LimitKey::new(LimitScope::Ip, "203.0.113.7", "/api/auth");

    for n in 1..=5u32 {
        match limiter.check(&key, &policy).await {
            Decision::Allow { remaining, .. } => assert_eq!(remaining, 5 - n),
            other => panic!("request {} should pass, got {:?}", n, other),
        }
    }

    match limiter.check(&key, &policy).await {
        Decision::Deny { retry_after, .. } => {
            assert!(retry_after <= Duration::from_secs(60));
        }
        other => panic!("6th request should be denied, got {:?}", other),
    }
}

#[tokio::test]
async fn quota_is_tracked_per_caller() {
    let (limiter, _) = setup();
    let policy = LimitPolicy::new(2, Duration::from_secs(60));

    let first = LimitKey::new(LimitScope::Ip, "203.0.113.7", "/api/auth");
    let second = LimitKey::new(LimitScope::Ip, "203.0.113.8", "/api/auth");

    limiter.check(&first, &policy).await;
    limiter.check(&first, &policy).await;
    assert!(matches!(
        limiter.check(&first, &policy).await,
        Decision::Deny { .. }
    ));

    // The neighbor is untouched.
    assert!(matches!(
        limiter.check(&second, &policy).await,
        Decision::Allow { .. }
    ));
}

#[tokio::test]
async fn store_outage_is_reported_not_guessed() {
    let (limiter, store) = setup();
    let policy = LimitPolicy::new(1, Duration::from_secs(60));
    let key = LimitKey::new(LimitScope::Identity, "user-42", "/api/transfers");

    // Exhaust the quota, then take the store down: the limiter must not
    // manufacture a deny from state it can no longer see. The pipeline's
    // fail-open policy turns this into an admit.
    limiter.check(&key, &policy).await;
    limiter.check(&key, &policy).await;
    store.set_failing(true);

    assert_eq!(
        limiter.check(&key, &policy).await,
        Decision::StoreUnavailable
    );

    store.set_failing(false);
    assert!(matches!(
        limiter.check(&key, &policy).await,
        Decision::Deny { .. }
    ));
}

#[tokio::test]
async fn remaining_is_monotonically_non_increasing_within_a_window() {
    let (limiter, _) = setup();
    let policy = LimitPolicy::new(10, Duration::from_secs(60));
    let key = LimitKey::new(LimitScope::Identity, "user-42", "/api/users");

    let mut last_remaining = u32::MAX;
    for _ in 0..10 {
        match limiter.check(&key, &policy).await {
            Decision::Allow { remaining, .. } => {
                assert!(remaining < last_remaining);
                last_remaining = remaining;
            }
            other => panic!("expected allow, got {:?}", other),
        }
    }
    assert_eq!(last_remaining, 0);
}
