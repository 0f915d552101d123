use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::policy::RateLimitRule;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after_seconds: u64,
    /// Set when the scope sits in its post-violation block period.
    pub blocked: bool,
}

impl RateLimitDecision {
    fn allow(remaining: u32) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after_seconds: 0,
            blocked: false,
        }
    }

    fn deny(retry_after_ms: i64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after_seconds: ((retry_after_ms.max(0) + 999) / 1000) as u64,
            blocked: true,
        }
    }
}

pub trait RateLimiter: Send + Sync {
    fn check(&self, identifier: &str, action: &str, rule: &RateLimitRule) -> RateLimitDecision;
    fn reset(&self, identifier: &str, action: &str);
    /// Drops scopes whose window and block have both elapsed.
    fn prune(&self) -> usize;
}

#[derive(Clone)]
pub struct InMemoryRateLimiter {
    state: Arc<Mutex<HashMap<String, RateState>>>,
}

#[derive(Clone, Debug)]
struct RateState {
    window_start: i64,
    window_ms: i64,
    count: u32,
    blocked_until: Option<i64>,
}

impl RateState {
    fn is_stale(&self, now: i64) -> bool {
        let window_over = now - self.window_start >= self.window_ms;
        let block_over = self.blocked_until.map_or(true, |until| now >= until);
        window_over && block_over
    }
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn now_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    fn scope(identifier: &str, action: &str) -> String {
        format!("{action}:{identifier}")
    }

    pub fn check_at(
        &self,
        identifier: &str,
        action: &str,
        rule: &RateLimitRule,
        now: i64,
    ) -> RateLimitDecision {
        if rule.max_attempts == 0 {
            return RateLimitDecision::allow(u32::MAX);
        }
        let window_ms = (rule.window_seconds.max(1) as i64) * 1000;
        let mut state = self.state.lock();
        let entry = state
            .entry(Self::scope(identifier, action))
            .or_insert_with(|| RateState {
                window_start: now,
                window_ms,
                count: 0,
                blocked_until: None,
            });
        entry.window_ms = window_ms;

        if let Some(until) = entry.blocked_until {
            if now < until {
                return RateLimitDecision::deny(until - now);
            }
            entry.blocked_until = None;
            entry.window_start = now;
            entry.count = 0;
        }

        if now - entry.window_start >= window_ms {
            entry.window_start = now;
            entry.count = 0;
        }

        if entry.count >= rule.max_attempts {
            let until = if rule.block_seconds > 0 {
                now + (rule.block_seconds as i64) * 1000
            } else {
                entry.window_start + window_ms
            };
            entry.blocked_until = Some(until);
            tracing::warn!(identifier, action, "rate limit exceeded");
            return RateLimitDecision::deny(until - now);
        }

        entry.count += 1;
        RateLimitDecision::allow(rule.max_attempts - entry.count)
    }

    pub fn prune_at(&self, now: i64) -> usize {
        let mut state = self.state.lock();
        let before = state.len();
        state.retain(|_, entry| !entry.is_stale(now));
        before - state.len()
    }

    pub fn tracked_scopes(&self) -> usize {
        self.state.lock().len()
    }
}

impl Default for InMemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn check(&self, identifier: &str, action: &str, rule: &RateLimitRule) -> RateLimitDecision {
        self.check_at(identifier, action, rule, Self::now_ms())
    }

    fn reset(&self, identifier: &str, action: &str) {
        self.state.lock().remove(&Self::scope(identifier, action));
    }

    fn prune(&self) -> usize {
        self.prune_at(Self::now_ms())
    }
}
