use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::auth::presented_token;
use crate::errors::ApiError;
use crate::models::mask_fingerprint;
use crate::routes::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub limit: u32,
    pub window: Duration,
}

impl RatePolicy {
    pub const fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    pub const fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub const fn generate() -> Self {
        Self::per_minute(30)
    }

    pub const fn summarize() -> Self {
        Self::per_minute(10)
    }

    pub const fn ticket_resolve() -> Self {
        Self::per_minute(5)
    }

    pub const fn admin() -> Self {
        Self::per_minute(30)
    }

    pub const fn fallback() -> Self {
        Self::per_minute(60)
    }
}

/// Rate limit bucket owner: a stored key's fingerprint, else the peer address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    ApiKey(String),
    Address(String),
}

impl Identity {
    pub fn kind(&self) -> &'static str {
        match self {
            Identity::ApiKey(_) => "api_key",
            Identity::Address(_) => "address",
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::ApiKey(fp) => write!(f, "api_key:{}", mask_fingerprint(fp)),
            Identity::Address(addr) => write!(f, "ip:{}", addr),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateWindow {
    pub window_start: Instant,
    pub count: u32,
    window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub remaining: u32,
    pub reset_in: Duration,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Rate limit exceeded")]
    LimitExceeded { retry_after: Duration },
}

impl From<RateLimitError> for ApiError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::LimitExceeded { retry_after } => ApiError::RateLimited { retry_after },
        }
    }
}

type WindowKey = (&'static str, Identity);

// Fixed windows keyed by (route, identity), one mutex per window
#[derive(Debug)]
pub struct RateLimiter {
    windows: RwLock<HashMap<WindowKey, Arc<Mutex<RateWindow>>>>,
    last_sweep: Mutex<Instant>,
    sweep_interval: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            last_sweep: Mutex::new(Instant::now()),
            sweep_interval: Duration::from_secs(300),
        }
    }

    pub fn admit(&self, route: &'static str, identity: &Identity, policy: RatePolicy) -> bool {
        self.check_rate_limit(route, identity, policy).is_ok()
    }

    pub fn check_rate_limit(
        &self,
        route: &'static str,
        identity: &Identity,
        policy: RatePolicy,
    ) -> Result<Admission, RateLimitError> {
        self.check_at(route, identity, policy, Instant::now())
    }

    pub fn check_at(
        &self,
        route: &'static str,
        identity: &Identity,
        policy: RatePolicy,
        now: Instant,
    ) -> Result<Admission, RateLimitError> {
        self.maybe_sweep(now);

        let slot = self.slot(route, identity, now);
        let mut window = slot.lock().unwrap_or_else(PoisonError::into_inner);

        if now.saturating_duration_since(window.window_start) >= policy.window {
            window.window_start = now;
            window.count = 0;
        }
        window.window = policy.window;

        let reset_in = policy
            .window
            .saturating_sub(now.saturating_duration_since(window.window_start));

        // Rejections leave both the count and the window start untouched.
        if window.count >= policy.limit {
            return Err(RateLimitError::LimitExceeded { retry_after: reset_in });
        }

        window.count += 1;
        Ok(Admission {
            remaining: policy.limit - window.count,
            reset_in,
        })
    }

    pub fn tracked_windows(&self) -> usize {
        self.windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn slot(&self, route: &'static str, identity: &Identity, now: Instant) -> Arc<Mutex<RateWindow>> {
        let key = (route, identity.clone());
        if let Some(slot) = self
            .windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Arc::clone(slot);
        }

        let mut windows = self.windows.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(windows.entry(key).or_insert_with(|| {
            Arc::new(Mutex::new(RateWindow {
                window_start: now,
                count: 0,
                window: Duration::ZERO,
            }))
        }))
    }

    fn maybe_sweep(&self, now: Instant) {
        {
            let mut last = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
            if now.saturating_duration_since(*last) < self.sweep_interval {
                return;
            }
            *last = now;
        }

        let mut windows = self.windows.write().unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(w) => now.saturating_duration_since(w.window_start) < w.window,
                Err(_) => true,
            }
        });
        tracing::debug!(removed = before - windows.len(), "swept rate windows");
    }
}

#[derive(Debug)]
pub struct RateLimitManager {
    policies: HashMap<&'static str, RatePolicy>,
    limiter: RateLimiter,
}

impl RateLimitManager {
    pub fn new() -> Self {
        let mut policies = HashMap::new();
        policies.insert("default", RatePolicy::fallback());
        policies.insert("generate", RatePolicy::generate());
        policies.insert("summarize", RatePolicy::summarize());
        policies.insert("ticket", RatePolicy::ticket_resolve());
        policies.insert("admin", RatePolicy::admin());

        Self {
            policies,
            limiter: RateLimiter::new(),
        }
    }

    pub fn set_policy(&mut self, category: &'static str, policy: RatePolicy) {
        self.policies.insert(category, policy);
    }

    pub fn policy(&self, category: &str) -> RatePolicy {
        self.policies
            .get(category)
            .copied()
            .unwrap_or_else(RatePolicy::fallback)
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn check(&self, category: &'static str, identity: &Identity) -> Result<Admission, RateLimitError> {
        self.limiter
            .check_rate_limit(category, identity, self.policy(category))
    }
}

impl Default for RateLimitManager {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(category) = rate_limit_category(request.uri().path()) else {
        return Ok(next.run(request).await);
    };

    let identity = extract_client_identity(&request, &state);
    match state.rate_limits.check(category, &identity) {
        Ok(admission) => {
            let mut response = next.run(request).await;
            if let Ok(value) = HeaderValue::from_str(&admission.remaining.to_string()) {
                response.headers_mut().insert("x-ratelimit-remaining", value);
            }
            Ok(response)
        }
        Err(err) => {
            tracing::warn!(
                identity_kind = identity.kind(),
                identity = %identity,
                category,
                "rate limit exceeded"
            );
            Err(err.into())
        }
    }
}

pub fn extract_client_identity(request: &Request<Body>, state: &AppState) -> Identity {
    // Unknown tokens fall through to the address bucket.
    if let Some(token) = presented_token(request.headers()) {
        let fingerprint = state.keys.fingerprint(token);
        match state.keys.db.get_key_by_fingerprint(&fingerprint) {
            Ok(Some(_)) => return Identity::ApiKey(fingerprint),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "key lookup failed during rate limiting"),
        }
    }

    if state.trust_forwarded_for {
        if let Some(forwarded_for) = request.headers().get("x-forwarded-for") {
            if let Ok(value) = forwarded_for.to_str() {
                if let Some(ip) = value.split(',').next().map(str::trim).filter(|ip| !ip.is_empty()) {
                    return Identity::Address(ip.to_string());
                }
            }
        }
    }

    match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => Identity::Address(addr.ip().to_string()),
        None => Identity::Address("unknown".to_string()),
    }
}

/// `None` means the route is not rate limited.
pub fn rate_limit_category(path: &str) -> Option<&'static str> {
    match path {
        "/health" => None,
        "/generate" => Some("generate"),
        "/summarize" => Some("summarize"),
        "/ticket/resolve" => Some("ticket"),
        p if p == "/admin" || p.starts_with("/admin/") => Some("admin"),
        _ => Some("default"),
    }
}
