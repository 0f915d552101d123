use lendguard_control::{InMemoryRateLimiter, RateLimitRule, RateLimiter};

#[test]
fn allows_up_to_max_attempts_then_blocks() {
    let limiter = InMemoryRateLimiter::new();
    let rule = RateLimitRule::new(3, 60, 120);
    let now = 1_700_000_000_000;

    for expected_remaining in [2, 1, 0] {
        let decision = limiter.check_at("u1", "login", &rule, now);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, expected_remaining);
    }

    let denied = limiter.check_at("u1", "login", &rule, now + 1_000);
    assert!(!denied.allowed);
    assert!(denied.blocked);
    assert_eq!(denied.retry_after_seconds, 120);
}

#[test]
fn block_outlasts_window_and_then_clears() {
    let limiter = InMemoryRateLimiter::new();
    let rule = RateLimitRule::new(1, 10, 60);
    let now = 1_700_000_000_000;

    assert!(limiter.check_at("ip", "form_submit", &rule, now).allowed);
    assert!(!limiter.check_at("ip", "form_submit", &rule, now + 1_000).allowed);
    // window over, block still running
    assert!(!limiter.check_at("ip", "form_submit", &rule, now + 30_000).allowed);
    assert!(limiter.check_at("ip", "form_submit", &rule, now + 62_000).allowed);
}

#[test]
fn scopes_are_independent_per_action_and_identifier() {
    let limiter = InMemoryRateLimiter::new();
    let rule = RateLimitRule::new(1, 60, 60);
    let now = 1_700_000_000_000;

    assert!(limiter.check_at("u1", "login", &rule, now).allowed);
    assert!(limiter.check_at("u2", "login", &rule, now).allowed);
    assert!(limiter.check_at("u1", "password_reset", &rule, now).allowed);
    assert!(!limiter.check_at("u1", "login", &rule, now).allowed);
}

#[test]
fn reset_and_unlimited_rules() {
    let limiter = InMemoryRateLimiter::new();
    let rule = RateLimitRule::new(1, 60, 60);
    let now = 1_700_000_000_000;

    assert!(limiter.check_at("u1", "login", &rule, now).allowed);
    assert!(!limiter.check_at("u1", "login", &rule, now).allowed);
    limiter.reset("u1", "login");
    assert!(limiter.check_at("u1", "login", &rule, now).allowed);

    let unlimited = RateLimitRule::unlimited();
    for _ in 0..1_000 {
        assert!(limiter.check_at("u1", "api_call", &unlimited, now).allowed);
    }
}

#[test]
fn prune_drops_stale_scopes() {
    let limiter = InMemoryRateLimiter::new();
    let rule = RateLimitRule::new(5, 10, 10);
    let now = 1_700_000_000_000;
    limiter.check_at("a", "login", &rule, now);
    limiter.check_at("b", "login", &rule, now + 9_000);
    assert_eq!(limiter.prune_at(now + 12_000), 1);
    assert_eq!(limiter.tracked_scopes(), 1);
}
