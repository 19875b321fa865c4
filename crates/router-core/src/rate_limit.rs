//! Per-principal fixed-window rate limiting (spec.md §4.2).

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Default request allowance per window.
pub const DEFAULT_MAX_REQUESTS: u32 = 100;
/// Default window length, in milliseconds (one hour).
pub const DEFAULT_WINDOW_MS: u64 = 3_600_000;

/// Configuration for a [`RateLimiter`].
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Requests allowed per window, per principal.
    pub max_requests: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window_ms: DEFAULT_WINDOW_MS,
        }
    }
}

/// The outcome of a [`RateLimiter::check`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The call is allowed; `remaining` requests are left in this window.
    Allowed {
        /// Requests remaining in the current window, after this one.
        remaining: u32,
    },
    /// The call is denied.
    Denied {
        /// Seconds until the window resets and the principal may retry.
        retry_after_secs: u64,
    },
}

impl RateLimitDecision {
    /// `true` for [`RateLimitDecision::Allowed`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at_ms: u64,
    count: u32,
}

/// Current state of one principal's window, for `status`/admin use.
#[derive(Debug, Clone, Copy)]
pub struct WindowStatus {
    /// Requests counted in the current window.
    pub count: u32,
    /// Epoch milliseconds the current window started.
    pub window_start_ms: u64,
}

/// A fixed-window rate limiter keyed on the task's `rate_limit_principal()`.
///
/// Each principal gets an independent window. A window starts on a
/// principal's first request after the previous window expired (or at
/// process start) and resets entirely — not a sliding average — once
/// `window_ms` has elapsed since `window_start_ms`.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    /// Build a limiter with the given configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Check and record a request for `principal`. Requests with no
    /// rate-limit principal (fully anonymous tasks) are always allowed and
    /// not tracked.
    pub fn check(&self, principal: Option<&str>) -> RateLimitDecision {
        let Some(principal) = principal else {
            return RateLimitDecision::Allowed {
                remaining: self.config.max_requests,
            };
        };

        let now = now_ms();
        let mut windows = self.windows.lock();
        let window = windows
            .entry(principal.to_string())
            .or_insert(Window {
                started_at_ms: now,
                count: 0,
            });

        if now.saturating_sub(window.started_at_ms) >= self.config.window_ms {
            window.started_at_ms = now;
            window.count = 0;
        }

        if window.count >= self.config.max_requests {
            let elapsed = now.saturating_sub(window.started_at_ms);
            let remaining_ms = self.config.window_ms.saturating_sub(elapsed);
            return RateLimitDecision::Denied {
                retry_after_secs: remaining_ms.div_ceil(1000),
            };
        }

        window.count += 1;
        RateLimitDecision::Allowed {
            remaining: self.config.max_requests - window.count,
        }
    }

    /// Reset one principal's window, discarding its recorded count.
    pub fn clear(&self, principal: &str) {
        self.windows.lock().remove(principal);
    }

    /// Reset every tracked principal's window.
    pub fn clear_all(&self) {
        self.windows.lock().clear();
    }

    /// Current window state for a principal, if it has made a request in
    /// the active window.
    #[must_use]
    pub fn status(&self, principal: &str) -> Option<WindowStatus> {
        let windows = self.windows.lock();
        let window = windows.get(principal)?;
        let now = now_ms();
        if now.saturating_sub(window.started_at_ms) >= self.config.window_ms {
            return None;
        }
        Some(WindowStatus {
            count: window.count,
            window_start_ms: window.started_at_ms,
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_limiter() -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests: 3,
            window_ms: 60_000,
        })
    }

    #[test]
    fn allows_up_to_the_limit_then_denies() {
        let limiter = small_limiter();
        for i in 0..3 {
            let decision = limiter.check(Some("tenant-a"));
            assert!(decision.is_allowed(), "request {i} should be allowed");
        }
        let denied = limiter.check(Some("tenant-a"));
        assert!(!denied.is_allowed());
        match denied {
            RateLimitDecision::Denied { retry_after_secs } => {
                assert!(retry_after_secs > 0 && retry_after_secs <= 60);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn remaining_counts_down() {
        let limiter = small_limiter();
        assert_eq!(
            limiter.check(Some("tenant-b")),
            RateLimitDecision::Allowed { remaining: 2 }
        );
        assert_eq!(
            limiter.check(Some("tenant-b")),
            RateLimitDecision::Allowed { remaining: 1 }
        );
        assert_eq!(
            limiter.check(Some("tenant-b")),
            RateLimitDecision::Allowed { remaining: 0 }
        );
    }

    #[test]
    fn principals_are_independent() {
        let limiter = small_limiter();
        for _ in 0..3 {
            assert!(limiter.check(Some("a")).is_allowed());
        }
        assert!(!limiter.check(Some("a")).is_allowed());
        assert!(limiter.check(Some("b")).is_allowed());
    }

    #[test]
    fn anonymous_principal_is_never_limited() {
        let limiter = small_limiter();
        for _ in 0..10 {
            assert!(limiter.check(None).is_allowed());
        }
    }

    #[test]
    fn clear_resets_a_single_principal() {
        let limiter = small_limiter();
        for _ in 0..3 {
            limiter.check(Some("a"));
        }
        assert!(!limiter.check(Some("a")).is_allowed());
        limiter.clear("a");
        assert!(limiter.check(Some("a")).is_allowed());
    }

    #[test]
    fn clear_all_resets_every_principal() {
        let limiter = small_limiter();
        for _ in 0..3 {
            limiter.check(Some("a"));
            limiter.check(Some("b"));
        }
        limiter.clear_all();
        assert!(limiter.check(Some("a")).is_allowed());
        assert!(limiter.check(Some("b")).is_allowed());
    }

    #[test]
    fn status_reports_current_count() {
        let limiter = small_limiter();
        assert!(limiter.status("a").is_none());
        limiter.check(Some("a"));
        limiter.check(Some("a"));
        let status = limiter.status("a").expect("window should be active");
        assert_eq!(status.count, 2);
    }
}
