//! Rate Limiter Integration Tests
//!
//! Tests for fixed-window behaviour driven by a manual clock.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use capturekit::core::{Clock, ManualClock, RateLimiter, DEFAULT_REQUESTS_PER_WINDOW};

fn limiter() -> (RateLimiter, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
    ));
    let shared: Arc<dyn Clock> = clock.clone();
    (
        RateLimiter::with_clock(DEFAULT_REQUESTS_PER_WINDOW, Duration::hours(1), shared),
        clock,
    )
}

#[test]
fn test_eleventh_request_denied_until_reset() {
    let (limiter, clock) = limiter();
    let window_start = clock.now();

    for remaining in (0..10).rev() {
        clock.advance(Duration::minutes(1));
        let decision = limiter.try_acquire();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, remaining);
    }

    let denied = limiter.try_acquire();
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    // Window opened on the first acquisition
    assert_eq!(denied.reset_at, window_start + Duration::minutes(1) + Duration::hours(1));
}

#[test]
fn test_denials_do_not_extend_window() {
    let (limiter, clock) = limiter();
    for _ in 0..10 {
        limiter.try_acquire();
    }

    clock.advance(Duration::minutes(59));
    assert!(!limiter.try_acquire().allowed);
    assert_eq!(limiter.snapshot().count, 10);

    clock.advance(Duration::minutes(1));
    let decision = limiter.try_acquire();
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 9);
    assert_eq!(limiter.snapshot().window_start, clock.now());
}

#[test]
fn test_idle_limiter_opens_window_on_demand() {
    let (limiter, clock) = limiter();

    clock.advance(Duration::hours(5));
    let decision = limiter.try_acquire();

    assert!(decision.allowed);
    assert_eq!(decision.reset_at, clock.now() + Duration::hours(1));
}
