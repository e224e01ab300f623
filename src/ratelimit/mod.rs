//! Fixed-window rate limiting for routes.

use crate::dispatch::RequestContext;
use axum::{
    Json,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

pub const DEFAULT_MAX: u32 = 100;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// How often `hit` drops expired windows.
const SWEEP_INTERVAL_MS: i64 = 60_000;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max: u32,
    pub window: Duration,
    pub message: Option<String>,
    /// Requests carrying this header bypass the limit.
    pub skip_header: Option<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max: DEFAULT_MAX,
            window: DEFAULT_WINDOW,
            message: None,
            skip_header: None,
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max(mut self, max: u32) -> Self {
        self.max = max;
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn skip_header(mut self, header: impl Into<String>) -> Self {
        self.skip_header = Some(header.into().to_ascii_lowercase());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let mut put = |name: &'static str, value: String| {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(HeaderName::from_static(name), value);
            }
        };

        put("x-ratelimit-limit", self.limit.to_string());
        put("x-ratelimit-remaining", self.remaining.to_string());
        put("x-ratelimit-reset", ceil_secs(self.reset_at.timestamp_millis()).to_string());
        if !self.allowed {
            let wait = self.reset_at.timestamp_millis() - Utc::now().timestamp_millis();
            put("retry-after", ceil_secs(wait).max(0).to_string());
        }
        headers
    }

    pub fn rejection(&self, config: &RateLimitConfig) -> Response {
        let message = config.message.clone().unwrap_or_else(|| {
            format!(
                "Rate limit exceeded. Limit: {}. Retry after {}",
                self.limit,
                self.reset_at.to_rfc3339()
            )
        });
        let status = StatusCode::TOO_MANY_REQUESTS;
        (
            status,
            self.headers(),
            Json(json!({ "statusCode": status.as_u16(), "message": message })),
        )
            .into_response()
    }
}

fn ceil_secs(millis: i64) -> i64 {
    (millis + 999).div_euclid(1000)
}

#[derive(Debug, Clone)]
struct Window {
    hits: u32,
    reset_at: DateTime<Utc>,
}

/// In-memory hit counters shared by every rate-limited route of an application.
#[derive(Clone, Default)]
pub struct RateLimiter {
    windows: Arc<DashMap<String, Window>>,
    next_sweep: Arc<AtomicI64>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a request against `config`. Returns `None` when the limit does not apply.
    pub fn check(&self, request: &RequestContext, config: &RateLimitConfig) -> Option<RateLimitDecision> {
        if !config.enabled {
            return None;
        }
        if let Some(header) = &config.skip_header {
            if request.headers().contains_key(header.as_str()) {
                return None;
            }
        }
        Some(self.hit(&Self::key_for(request), config))
    }

    pub fn hit(&self, key: &str, config: &RateLimitConfig) -> RateLimitDecision {
        let now = Utc::now();
        self.maybe_sweep(now);
        let window = chrono::Duration::from_std(config.window).unwrap_or(chrono::Duration::seconds(60));
        let mut entry = self.windows.entry(key.to_string()).or_insert_with(|| Window {
            hits: 0,
            reset_at: now + window,
        });
        if entry.reset_at <= now {
            entry.hits = 0;
            entry.reset_at = now + window;
        }
        entry.hits += 1;

        RateLimitDecision {
            allowed: entry.hits <= config.max,
            limit: config.max,
            remaining: config.max.saturating_sub(entry.hits),
            reset_at: entry.reset_at,
        }
    }

    /// Drop every window whose reset time has passed.
    pub fn purge_expired(&self) {
        let now = Utc::now();
        self.windows.retain(|_, window| window.reset_at > now);
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    fn maybe_sweep(&self, now: DateTime<Utc>) {
        let now_ms = now.timestamp_millis();
        let due = self.next_sweep.load(Ordering::Relaxed);
        if now_ms < due {
            return;
        }
        let claimed = self
            .next_sweep
            .compare_exchange(due, now_ms + SWEEP_INTERVAL_MS, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok();
        if claimed {
            self.windows.retain(|_, window| window.reset_at > now);
        }
    }

    /// Client address (first `x-forwarded-for` entry, then `x-real-ip`, then the
    /// peer socket address) joined with method and path.
    pub fn key_for(request: &RequestContext) -> String {
        let ip = request
            .header("x-forwarded-for")
            .and_then(|forwarded| forwarded.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .or_else(|| request.header("x-real-ip"))
            .map(str::to_string)
            .or_else(|| request.peer_addr().map(|addr| addr.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        format!("{ip}:{}:{}", request.method(), request.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    fn request(headers: &[(&'static str, &'static str)]) -> RequestContext {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, HeaderValue::from_static(value));
        }
        RequestContext::builder(Method::GET, "/items")
            .headers(map)
            .build()
            .unwrap()
    }

    #[test]
    fn test_window_blocks_after_max() {
        let limiter = RateLimiter::new();
        let config = RateLimitConfig::new().max(2);
        let req = request(&[]);
        assert!(limiter.check(&req, &config).unwrap().allowed);
        let second = limiter.check(&req, &config).unwrap();
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);
        let third = limiter.check(&req, &config).unwrap();
        assert!(!third.allowed);
        assert!(third.headers().contains_key("retry-after"));
    }

    #[test]
    fn test_key_prefers_forwarded_for() {
        let req = request(&[("x-forwarded-for", "10.0.0.1, 10.0.0.2"), ("x-real-ip", "10.9.9.9")]);
        assert_eq!(RateLimiter::key_for(&req), "10.0.0.1:GET:/items");
        let req = request(&[("x-real-ip", "10.9.9.9")]);
        assert_eq!(RateLimiter::key_for(&req), "10.9.9.9:GET:/items");
        assert_eq!(RateLimiter::key_for(&request(&[])), "unknown:GET:/items");
    }

    #[test]
    fn test_direct_clients_get_separate_windows() {
        let limiter = RateLimiter::new();
        let config = RateLimitConfig::new().max(1);
        let client = |addr: &str| {
            RequestContext::builder(Method::GET, "/items")
                .peer_addr(addr.parse().unwrap())
                .build()
                .unwrap()
        };
        let first = client("192.168.0.10:50001");
        let second = client("192.168.0.11:50002");
        assert_eq!(RateLimiter::key_for(&first), "192.168.0.10:GET:/items");
        assert!(limiter.check(&first, &config).unwrap().allowed);
        assert!(limiter.check(&second, &config).unwrap().allowed);
        assert!(!limiter.check(&first, &config).unwrap().allowed);
    }

    #[test]
    fn test_expired_windows_are_evicted() {
        let limiter = RateLimiter::new();
        let short = RateLimitConfig::new().window(Duration::from_millis(10));
        limiter.hit("a:GET:/items/1", &short);
        limiter.hit("a:GET:/items/2", &short);
        limiter.hit("a:GET:/items/3", &RateLimitConfig::new());
        assert_eq!(limiter.len(), 3);

        std::thread::sleep(Duration::from_millis(20));
        limiter.purge_expired();
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_first_hit_sweeps_expired_windows() {
        let limiter = RateLimiter::new();
        let short = RateLimitConfig::new().window(Duration::from_millis(10));
        limiter.hit("a:GET:/items/1", &short);
        std::thread::sleep(Duration::from_millis(20));
        limiter.next_sweep.store(0, Ordering::Relaxed);
        limiter.hit("b:GET:/items/2", &short);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_skip_header_and_disabled() {
        let limiter = RateLimiter::new();
        let config = RateLimitConfig::new().max(1).skip_header("X-Internal");
        let req = request(&[("x-internal", "1")]);
        assert!(limiter.check(&req, &config).is_none());
        assert!(limiter.check(&request(&[]), &RateLimitConfig::new().disabled()).is_none());
    }
}
