use llm_key_gateway::rate_limit::{
    rate_limit_category, Identity, RateLimitError, RateLimitManager, RateLimiter, RatePolicy,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

fn key(name: &str) -> Identity {
    Identity::ApiKey(format!("fingerprint-{}", name))
}

#[test]
fn test_rate_limit_basic_functionality() {
    let limiter = RateLimiter::new();
    let policy = RatePolicy::per_minute(5);
    let client = key("basic");
    let t0 = Instant::now();

    for i in 0..5 {
        let admission = limiter
            .check_at("generate", &client, policy, t0 + Duration::from_secs(i))
            .expect("request within the limit was rejected");
        assert_eq!(admission.remaining, 4 - i as u32);
    }

    // 6th request in the same window
    assert!(limiter
        .check_at("generate", &client, policy, t0 + Duration::from_secs(10))
        .is_err());
}

#[test]
fn test_rate_limit_window_reset() {
    let limiter = RateLimiter::new();
    let policy = RatePolicy::per_minute(5);
    let client = key("reset");
    let t0 = Instant::now();

    for _ in 0..5 {
        assert!(limiter.check_at("generate", &client, policy, t0).is_ok());
    }
    assert!(limiter.check_at("generate", &client, policy, t0).is_err());

    // Window has fully elapsed, counter starts again
    let later = t0 + Duration::from_secs(60);
    for _ in 0..5 {
        assert!(limiter.check_at("generate", &client, policy, later).is_ok());
    }
    assert!(limiter.check_at("generate", &client, policy, later).is_err());
}

#[test]
fn test_rejections_do_not_move_the_window() {
    let limiter = RateLimiter::new();
    let policy = RatePolicy::new(1, Duration::from_secs(60));
    let client = key("frozen");
    let t0 = Instant::now();

    assert!(limiter.check_at("summarize", &client, policy, t0).is_ok());

    // Repeated rejects report a shrinking wait against the original window
    let err = limiter
        .check_at("summarize", &client, policy, t0 + Duration::from_secs(20))
        .unwrap_err();
    assert_eq!(err, RateLimitError::LimitExceeded { retry_after: Duration::from_secs(40) });

    let err = limiter
        .check_at("summarize", &client, policy, t0 + Duration::from_secs(59))
        .unwrap_err();
    assert_eq!(err, RateLimitError::LimitExceeded { retry_after: Duration::from_secs(1) });

    assert!(limiter
        .check_at("summarize", &client, policy, t0 + Duration::from_secs(60))
        .is_ok());
}

#[test]
fn test_rate_limit_different_identifiers() {
    let limiter = RateLimiter::new();
    let policy = RatePolicy::per_minute(5);
    let a = key("a");
    let b = key("b");
    let t0 = Instant::now();

    for _ in 0..6 {
        let _ = limiter.check_at("generate", &a, policy, t0);
    }
    assert!(limiter.check_at("generate", &a, policy, t0).is_err());

    // B is unaffected by A exhausting its window
    assert!(limiter.check_at("generate", &b, policy, t0).is_ok());

    // Same address string as a key fingerprint is still a different bucket
    let addr = Identity::Address("fingerprint-a".to_string());
    assert!(limiter.check_at("generate", &addr, policy, t0).is_ok());
}

#[test]
fn test_routes_are_counted_separately() {
    let limiter = RateLimiter::new();
    let client = key("routes");
    let t0 = Instant::now();

    assert!(limiter.check_at("ticket", &client, RatePolicy::per_minute(1), t0).is_ok());
    assert!(limiter.check_at("ticket", &client, RatePolicy::per_minute(1), t0).is_err());
    assert!(limiter.check_at("generate", &client, RatePolicy::per_minute(1), t0).is_ok());
}

#[test]
fn test_zero_limit_rejects_everything() {
    let limiter = RateLimiter::new();
    assert!(!limiter.admit("generate", &key("zero"), RatePolicy::per_minute(0)));
}

#[test]
fn test_admit_matches_check() {
    let limiter = RateLimiter::new();
    let client = Identity::Address("10.0.0.7".to_string());
    let policy = RatePolicy::per_minute(2);

    assert!(limiter.admit("default", &client, policy));
    assert!(limiter.admit("default", &client, policy));
    assert!(!limiter.admit("default", &client, policy));
}

#[test]
fn test_concurrent_requests_never_exceed_limit() {
    let limiter = RateLimiter::new();
    let policy = RatePolicy::per_minute(100);
    let client = key("busy");
    let admitted = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for _ in 0..50 {
                    if limiter.admit("generate", &client, policy) {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });
        }
    });

    assert_eq!(admitted.load(Ordering::SeqCst), 100);
}

#[test]
fn test_stale_windows_are_swept() {
    let limiter = RateLimiter::new();
    let policy = RatePolicy::per_minute(5);
    let t0 = Instant::now();

    assert!(limiter.check_at("generate", &key("old-1"), policy, t0).is_ok());
    assert!(limiter.check_at("generate", &key("old-2"), policy, t0).is_ok());
    assert_eq!(limiter.tracked_windows(), 2);

    let much_later = t0 + Duration::from_secs(600);
    assert!(limiter.check_at("generate", &key("new"), policy, much_later).is_ok());
    assert_eq!(limiter.tracked_windows(), 1);
}

#[test]
fn test_rate_limit_config_presets() {
    assert_eq!(RatePolicy::generate(), RatePolicy::per_minute(30));
    assert_eq!(RatePolicy::summarize(), RatePolicy::per_minute(10));
    assert_eq!(RatePolicy::ticket_resolve(), RatePolicy::per_minute(5));
    assert_eq!(RatePolicy::per_minute(7).window, Duration::from_secs(60));
}

#[test]
fn test_rate_limit_manager_categories() {
    let mut manager = RateLimitManager::new();
    assert_eq!(manager.policy("generate").limit, 30);
    assert_eq!(manager.policy("summarize").limit, 10);
    assert_eq!(manager.policy("ticket").limit, 5);
    assert_eq!(manager.policy("no-such-category"), RatePolicy::fallback());

    manager.set_policy("generate", RatePolicy::per_minute(1));
    let client = key("manager");
    assert!(manager.check("generate", &client).is_ok());
    assert!(manager.check("generate", &client).is_err());
    assert!(manager.check("summarize", &client).is_ok());
}

#[test]
fn test_route_categories() {
    assert_eq!(rate_limit_category("/health"), None);
    assert_eq!(rate_limit_category("/generate"), Some("generate"));
    assert_eq!(rate_limit_category("/summarize"), Some("summarize"));
    assert_eq!(rate_limit_category("/ticket/resolve"), Some("ticket"));
    assert_eq!(rate_limit_category("/admin/keys"), Some("admin"));
    assert_eq!(rate_limit_category("/admin/keys/3"), Some("admin"));
    assert_eq!(rate_limit_category("/administrator"), Some("default"));
    assert_eq!(rate_limit_category("/whatever"), Some("default"));
}

#[test]
fn test_identity_display_masks_fingerprint() {
    let identity = Identity::ApiKey("0123456789abcdef0123456789abcdef".to_string());
    let shown = identity.to_string();
    assert!(shown.starts_with("api_key:01234567"));
    assert!(!shown.contains("89abcdef0123"));
    assert_eq!(Identity::Address("1.2.3.4".into()).to_string(), "ip:1.2.3.4");
}
