//! Sliding-window rate limiting (C9).
//!
//! Two-window weighted estimation per `(caller, endpoint class)` key, with
//! an LRU bound on tracked keys. Limits are per-instance; cluster-wide
//! coordination is best-effort by design.

use std::num::NonZeroUsize;
use std::time::Duration;
use std::time::Instant;

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::RegistryError;
use crate::error::Result;

// ============================================================================
// Constants (fixed limits)
// ============================================================================

/// Window length for every class.
const WINDOW: Duration = Duration::from_secs(60);

/// Maximum distinct `(caller, class)` keys tracked before LRU eviction.
const MAX_TRACKED_KEYS: usize = 10_000;

/// Endpoint classes with independent budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    /// Unauthenticated discovery reads.
    PublicRead,
    /// Authenticated discovery reads and search.
    AuthRead,
    /// Publish and entitlement mutations.
    Write,
    /// Peer administration and manual sync triggers.
    SyncAdmin,
}

/// Requests allowed per minute, per class.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    /// Budget for [`EndpointClass::PublicRead`].
    pub public_read_per_min: u32,
    /// Budget for [`EndpointClass::AuthRead`].
    pub auth_read_per_min: u32,
    /// Budget for [`EndpointClass::Write`].
    pub write_per_min: u32,
    /// Budget for [`EndpointClass::SyncAdmin`].
    pub sync_admin_per_min: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            public_read_per_min: 100,
            auth_read_per_min: 1000,
            write_per_min: 60,
            sync_admin_per_min: 10,
        }
    }
}

impl RateLimits {
    fn limit_for(&self, class: EndpointClass) -> u32 {
        match class {
            EndpointClass::PublicRead => self.public_read_per_min,
            EndpointClass::AuthRead => self.auth_read_per_min,
            EndpointClass::Write => self.write_per_min,
            EndpointClass::SyncAdmin => self.sync_admin_per_min,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    window_start: Instant,
    current: u32,
    previous: u32,
}

/// Per-caller sliding-window limiter.
pub struct RateLimiter {
    windows: Mutex<LruCache<(String, EndpointClass), WindowState>>,
    limits: RateLimits,
}

impl RateLimiter {
    /// Limiter with the given per-class budgets.
    pub fn new(limits: RateLimits) -> Self {
        let capacity = NonZeroUsize::new(MAX_TRACKED_KEYS).expect("capacity is non-zero");
        Self {
            windows: Mutex::new(LruCache::new(capacity)),
            limits,
        }
    }

    /// Admit or reject one request from `caller` in `class`.
    ///
    /// Rejections carry a `retry_after` hint that never increases within a
    /// window: it is the time until the current window rolls over.
    pub fn check(&self, caller: &str, class: EndpointClass) -> Result<()> {
        self.check_at(caller, class, Instant::now())
    }

    fn check_at(&self, caller: &str, class: EndpointClass, now: Instant) -> Result<()> {
        let limit = self.limits.limit_for(class);
        if limit == 0 {
            return Err(RegistryError::RateLimited {
                retry_after_ms: WINDOW.as_millis() as u64,
            });
        }

        let mut windows = self.windows.lock();
        let state = windows.get_or_insert_mut((caller.to_string(), class), || WindowState {
            window_start: now,
            current: 0,
            previous: 0,
        });

        // Roll windows forward.
        let mut elapsed = now.saturating_duration_since(state.window_start);
        if elapsed >= WINDOW * 2 {
            state.window_start = now;
            state.current = 0;
            state.previous = 0;
            elapsed = Duration::ZERO;
        } else if elapsed >= WINDOW {
            state.window_start += WINDOW;
            state.previous = state.current;
            state.current = 0;
            elapsed -= WINDOW;
        }

        // Weighted estimate over the sliding 60s window.
        let previous_weight = 1.0 - elapsed.as_secs_f64() / WINDOW.as_secs_f64();
        let estimate = state.current as f64 + state.previous as f64 * previous_weight;
        if estimate >= limit as f64 {
            let retry_after = WINDOW.saturating_sub(elapsed);
            return Err(RegistryError::RateLimited {
                retry_after_ms: retry_after.as_millis().max(1) as u64,
            });
        }

        state.current += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(write: u32) -> RateLimits {
        RateLimits {
            public_read_per_min: 100,
            auth_read_per_min: 1000,
            write_per_min: write,
            sync_admin_per_min: 10,
        }
    }

    #[test]
    fn test_budget_is_enforced() {
        let limiter = RateLimiter::new(limits(5));
        let now = Instant::now();
        for _ in 0..5 {
            assert!(limiter.check_at("alice", EndpointClass::Write, now).is_ok());
        }
        let err = limiter.check_at("alice", EndpointClass::Write, now);
        assert!(matches!(err, Err(RegistryError::RateLimited { .. })));
    }

    #[test]
    fn test_callers_are_independent() {
        let limiter = RateLimiter::new(limits(1));
        let now = Instant::now();
        assert!(limiter.check_at("alice", EndpointClass::Write, now).is_ok());
        assert!(limiter.check_at("bob", EndpointClass::Write, now).is_ok());
        assert!(limiter.check_at("alice", EndpointClass::Write, now).is_err());
    }

    #[test]
    fn test_classes_are_independent() {
        let limiter = RateLimiter::new(limits(1));
        let now = Instant::now();
        assert!(limiter.check_at("alice", EndpointClass::Write, now).is_ok());
        assert!(limiter
            .check_at("alice", EndpointClass::AuthRead, now)
            .is_ok());
    }

    #[test]
    fn test_retry_after_is_non_increasing_within_window() {
        let limiter = RateLimiter::new(limits(1));
        let now = Instant::now();
        assert!(limiter.check_at("alice", EndpointClass::Write, now).is_ok());

        let hint = |at| match limiter.check_at("alice", EndpointClass::Write, at) {
            Err(RegistryError::RateLimited { retry_after_ms }) => retry_after_ms,
            other => panic!("expected rate limit, got {other:?}"),
        };
        let first = hint(now + Duration::from_secs(1));
        let second = hint(now + Duration::from_secs(10));
        let third = hint(now + Duration::from_secs(30));
        assert!(first >= second && second >= third);
    }

    #[test]
    fn test_budget_recovers_after_window() {
        let limiter = RateLimiter::new(limits(2));
        let now = Instant::now();
        assert!(limiter.check_at("alice", EndpointClass::Write, now).is_ok());
        assert!(limiter.check_at("alice", EndpointClass::Write, now).is_ok());
        assert!(limiter.check_at("alice", EndpointClass::Write, now).is_err());
        // Two idle windows later the budget is fully restored.
        let later = now + WINDOW * 2;
        assert!(limiter.check_at("alice", EndpointClass::Write, later).is_ok());
    }

    #[test]
    fn test_sliding_window_carries_previous_load() {
        let limiter = RateLimiter::new(limits(10));
        let now = Instant::now();
        for _ in 0..10 {
            assert!(limiter.check_at("alice", EndpointClass::Write, now).is_ok());
        }
        // Right at rollover the previous window still weighs in fully.
        let shortly_after = now + WINDOW;
        assert!(limiter
            .check_at("alice", EndpointClass::Write, shortly_after)
            .is_err());
        // Near the end of the next window the weight has decayed.
        let much_later = now + WINDOW + Duration::from_secs(59);
        assert!(limiter
            .check_at("alice", EndpointClass::Write, much_later)
            .is_ok());
    }
}
