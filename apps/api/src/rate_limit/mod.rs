//! Rate Limit Guard: fixed-window request counting per (caller, route).
//!
//! Each key holds `{count, window_start, window_end}`. The first request after
//! a window ends replaces the entry with a fresh one. The counter is
//! incremented *before* the limit check, so the request that trips the limit
//! is itself counted.
//!
//! Fixed windows let a caller burst up to 2× the limit across a window
//! boundary. Callers only see `check`, so the algorithm can change without
//! touching the middleware.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

pub mod middleware;

pub use middleware::rate_limit;

/// Limit for one route (or the global default).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl RateLimitRule {
    pub const fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }

    fn window(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.window_ms).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMatch {
    Exact,
    Prefix,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub path: String,
    pub matching: RouteMatch,
    pub rule: RateLimitRule,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub default_rule: RateLimitRule,
    pub routes: Vec<RouteRule>,
    /// Minimum time between sweeps of elapsed windows.
    pub sweep_interval: Duration,
    /// Identity from `X-User-Id` / `X-Forwarded-For` instead of the socket
    /// peer. Off unless a trusted proxy in front sets those headers.
    pub trust_forwarded: bool,
}

impl RateLimitConfig {
    pub fn new(default_rule: RateLimitRule) -> Self {
        Self {
            default_rule,
            routes: Vec::new(),
            sweep_interval: Duration::seconds(60),
            trust_forwarded: false,
        }
    }

    pub fn trust_forwarded(mut self, trust: bool) -> Self {
        self.trust_forwarded = trust;
        self
    }

    pub fn exact(mut self, path: &str, rule: RateLimitRule) -> Self {
        self.routes.push(RouteRule {
            path: path.to_string(),
            matching: RouteMatch::Exact,
            rule,
        });
        self
    }

    pub fn prefix(mut self, path: &str, rule: RateLimitRule) -> Self {
        self.routes.push(RouteRule {
            path: path.to_string(),
            matching: RouteMatch::Prefix,
            rule,
        });
        self
    }

    /// Built-in route rules for the AI endpoints on top of `default_rule`.
    pub fn with_default_routes(self) -> Self {
        self.prefix("/api/v1/ai", RateLimitRule::new(30, 60_000))
            .exact("/api/v1/ai/analyze", RateLimitRule::new(10, 60_000))
            .exact(
                "/api/v1/ai/providers/health/reset",
                RateLimitRule::new(5, 300_000),
            )
    }

    /// Exact match, else longest matching prefix, else the global default.
    pub fn rule_for(&self, path: &str) -> RateLimitRule {
        if let Some(route) = self
            .routes
            .iter()
            .find(|r| r.matching == RouteMatch::Exact && r.path == path)
        {
            return route.rule;
        }

        self.routes
            .iter()
            .filter(|r| r.matching == RouteMatch::Prefix && path.starts_with(r.path.as_str()))
            .max_by_key(|r| r.path.len())
            .map(|r| r.rule)
            .unwrap_or(self.default_rule)
    }
}

#[derive(Debug, Clone)]
struct WindowEntry {
    count: u32,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
}

impl WindowEntry {
    fn fresh(now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            count: 0,
            window_start: now,
            window_end: now + window,
        }
    }
}

/// Outcome of one admission check. Header values are exposed either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// Seconds until the window resets; `Some` only when rejected.
    pub retry_after: Option<u64>,
}

pub struct RateLimitGuard {
    config: RateLimitConfig,
    entries: DashMap<String, WindowEntry>,
    last_sweep: Mutex<DateTime<Utc>>,
}

impl RateLimitGuard {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            last_sweep: Mutex::new(Utc::now()),
        }
    }

    pub fn trusts_forwarded(&self) -> bool {
        self.config.trust_forwarded
    }

    /// Counts one request from `identity` on `path` and decides admission.
    pub fn check(&self, identity: &str, path: &str) -> RateLimitDecision {
        self.check_at(identity, path, Utc::now())
    }

    fn check_at(&self, identity: &str, path: &str, now: DateTime<Utc>) -> RateLimitDecision {
        self.sweep_if_due(now);

        let rule = self.config.rule_for(path);
        let key = format!("{identity}:{path}");

        // The shard lock is held from lookup through increment, so concurrent
        // requests on one key can never both see `count` below the limit.
        let (count, window_start, window_end) = {
            let mut entry = self
                .entries
                .entry(key)
                .or_insert_with(|| WindowEntry::fresh(now, rule.window()));
            if now > entry.window_end {
                *entry = WindowEntry::fresh(now, rule.window());
            }
            entry.count += 1;
            (entry.count, entry.window_start, entry.window_end)
        };

        let remaining = rule.max_requests.saturating_sub(count);
        if count <= rule.max_requests {
            return RateLimitDecision {
                limit: rule.max_requests,
                remaining,
                reset_at: window_end,
                retry_after: None,
            };
        }

        let wait_ms = (window_end - now).num_milliseconds().max(0) as u64;
        let retry_after = wait_ms.div_ceil(1000).max(1);
        warn!(
            identity,
            path,
            count,
            limit = rule.max_requests,
            window_start = %window_start,
            retry_after,
            "Rate limit exceeded"
        );
        RateLimitDecision {
            limit: rule.max_requests,
            remaining,
            reset_at: window_end,
            retry_after: Some(retry_after),
        }
    }

    /// Drops elapsed windows, at most once per `sweep_interval`. Runs on the
    /// request path; there is no background timer.
    fn sweep_if_due(&self, now: DateTime<Utc>) {
        {
            let mut last = self.last_sweep.lock();
            if now - *last < self.config.sweep_interval {
                return;
            }
            *last = now;
        }

        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.window_end >= now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "Swept expired rate limit windows");
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}
