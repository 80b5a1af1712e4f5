//! Fixed-window rate limiter for externally triggered calls.
//!
//! One counter per key, reset entirely at window boundaries. The counter is
//! O(1) in time and memory per key; the cost is that a burst straddling a
//! window edge can see up to `2 * max_requests` calls. That looseness is
//! part of the contract here and tests pin it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-key window state.
#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    window_start: Instant,
}

/// Fixed-window call budget, keyed per caller+action.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    entries: Mutex<HashMap<String, WindowEntry>>,
}

impl RateLimiter {
    /// Create a limiter allowing `max_requests` per `window` per key.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Consume one request slot for `key`. Returns whether the call is
    /// allowed.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();

        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.window_start) <= self.window => {
                if entry.count < self.max_requests {
                    entry.count += 1;
                    true
                } else {
                    false
                }
            }
            _ => {
                entries.insert(
                    key.to_string(),
                    WindowEntry {
                        count: 1,
                        window_start: now,
                    },
                );
                true
            }
        }
    }

    /// Slots left for `key` in the current window, without consuming one.
    pub fn remaining(&self, key: &str) -> u32 {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap();

        match entries.get(key) {
            Some(entry) if now.duration_since(entry.window_start) <= self.window => {
                self.max_requests.saturating_sub(entry.count)
            }
            _ => self.max_requests,
        }
    }

    /// Time until the key's window resets. Zero when no window is open.
    pub fn reset_time(&self, key: &str) -> Duration {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap();

        match entries.get(key) {
            Some(entry) => self
                .window
                .saturating_sub(now.duration_since(entry.window_start)),
            None => Duration::ZERO,
        }
    }

    /// Remove the key's entry entirely, opening a fresh window on next use.
    pub fn reset(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    /// Drop every tracked key.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Number of tracked keys.
    pub fn key_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// The named limiter set used by the engine, one per action class.
///
/// All classes share the same fixed-window algorithm; only the budgets
/// differ. Constructed at session start and cleared at sign-out.
#[derive(Debug)]
pub struct RateLimiters {
    pub ai_query: RateLimiter,
    pub social_post: RateLimiter,
    pub generic_write: RateLimiter,
}

/// Action classes with distinct budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionClass {
    AiQuery,
    SocialPost,
    GenericWrite,
}

impl RateLimiters {
    pub fn new(
        ai_query: (u32, Duration),
        social_post: (u32, Duration),
        generic_write: (u32, Duration),
    ) -> Self {
        Self {
            ai_query: RateLimiter::new(ai_query.0, ai_query.1),
            social_post: RateLimiter::new(social_post.0, social_post.1),
            generic_write: RateLimiter::new(generic_write.0, generic_write.1),
        }
    }

    pub fn for_class(&self, class: ActionClass) -> &RateLimiter {
        match class {
            ActionClass::AiQuery => &self.ai_query,
            ActionClass::SocialPost => &self.social_post,
            ActionClass::GenericWrite => &self.generic_write,
        }
    }

    pub fn clear_all(&self) {
        self.ai_query.clear();
        self.social_post.clear();
        self.generic_write.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_budget_then_denies() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));

        assert!(limiter.check("user1:water"));
        assert!(limiter.check("user1:water"));
        assert!(limiter.check("user1:water"));
        assert!(!limiter.check("user1:water"));
    }

    #[test]
    fn test_separate_keys_have_separate_budgets() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));

        assert!(limiter.check("user1:post"));
        assert!(!limiter.check("user1:post"));
        assert!(limiter.check("user2:post"));
    }

    #[test]
    fn test_window_expiry_reopens_budget() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));

        assert!(limiter.check("key"));
        assert!(!limiter.check("key"));

        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check("key"));
    }

    #[test]
    fn test_fixed_window_boundary_burst() {
        // Fixed-window, not sliding-log: a full budget immediately before
        // the boundary plus a full budget immediately after is allowed.
        let limiter = RateLimiter::new(2, Duration::from_millis(25));

        assert!(limiter.check("key"));
        assert!(limiter.check("key"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check("key"));
        assert!(limiter.check("key"));
    }

    #[test]
    fn test_remaining_does_not_consume() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));

        assert_eq!(limiter.remaining("key"), 2);
        assert_eq!(limiter.remaining("key"), 2);

        limiter.check("key");
        assert_eq!(limiter.remaining("key"), 1);

        limiter.check("key");
        limiter.check("key");
        assert_eq!(limiter.remaining("key"), 0);
    }

    #[test]
    fn test_reset_time_counts_down() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));

        assert_eq!(limiter.reset_time("key"), Duration::ZERO);

        limiter.check("key");
        let reset = limiter.reset_time("key");
        assert!(reset > Duration::ZERO);
        assert!(reset <= Duration::from_secs(60));
    }

    #[test]
    fn test_reset_removes_entry() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));

        limiter.check("key");
        assert!(!limiter.check("key"));

        limiter.reset("key");
        assert!(limiter.check("key"));
    }

    #[test]
    fn test_clear_drops_all_keys() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        limiter.check("a");
        limiter.check("b");
        assert_eq!(limiter.key_count(), 2);

        limiter.clear();
        assert_eq!(limiter.key_count(), 0);
    }

    #[test]
    fn test_named_set_budgets_are_independent() {
        let limiters = RateLimiters::new(
            (1, Duration::from_secs(60)),
            (1, Duration::from_secs(60)),
            (2, Duration::from_secs(60)),
        );

        assert!(limiters.for_class(ActionClass::AiQuery).check("u"));
        assert!(!limiters.for_class(ActionClass::AiQuery).check("u"));

        // Same key, different class: untouched budget.
        assert!(limiters.for_class(ActionClass::SocialPost).check("u"));
        assert!(limiters.for_class(ActionClass::GenericWrite).check("u"));
    }
}
