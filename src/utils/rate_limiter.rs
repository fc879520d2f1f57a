//! Cooldown gate keyed by (category, key) with optional per-category daily caps

use dashmap::DashMap;
use std::collections::HashMap;

const DAY_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy)]
struct DailyWindow {
    started_at: i64,
    count: u32,
}

/// Prevents alert storms.
///
/// A (category, key) pair is allowed at most once per cooldown. Categories
/// registered with a daily cap are additionally limited to `cap` allowed calls
/// per rolling 24 hours, the window opening at the first call after a reset.
#[derive(Debug, Default)]
pub struct RateLimiter {
    last_allowed: DashMap<(String, String), i64>,
    daily_caps: HashMap<String, u32>,
    daily: DashMap<String, DailyWindow>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit `category` to `cap` allowed calls per rolling day
    pub fn with_daily_cap(mut self, category: &str, cap: u32) -> Self {
        self.daily_caps.insert(category.to_string(), cap);
        self
    }

    /// Returns true and records `now` when the pair is outside its cooldown
    /// and the category is under its daily cap.
    pub fn allow(&self, category: &str, key: &str, cooldown: i64, now: i64) -> bool {
        let cap = self.daily_caps.get(category).copied();

        // Hold the daily entry for the whole decision so the cap and the
        // cooldown are updated together.
        let mut daily = cap.map(|_| {
            self.daily.entry(category.to_string()).or_insert(DailyWindow {
                started_at: now,
                count: 0,
            })
        });

        if let (Some(cap), Some(window)) = (cap, daily.as_mut()) {
            if now - window.started_at >= DAY_SECS {
                window.started_at = now;
                window.count = 0;
            }
            if window.count >= cap {
                return false;
            }
        }

        let mut last = self
            .last_allowed
            .entry((category.to_string(), key.to_string()))
            .or_insert(i64::MIN);

        if *last != i64::MIN && now - *last < cooldown {
            return false;
        }

        *last = now;
        if let Some(window) = daily.as_mut() {
            window.count += 1;
        }
        true
    }

    /// Calls allowed in the current daily window for `category`
    pub fn daily_count(&self, category: &str) -> u32 {
        self.daily.get(category).map(|w| w.count).unwrap_or(0)
    }

    /// Drop cooldown records older than `max_age`
    pub fn prune(&self, max_age: i64, now: i64) {
        self.last_allowed.retain(|_, last| now - *last < max_age);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_per_key() {
        let limiter = RateLimiter::new();
        assert!(limiter.allow("honeypot", "mint1", 60, 1000));
        assert!(!limiter.allow("honeypot", "mint1", 60, 1059));
        assert!(limiter.allow("honeypot", "mint2", 60, 1059));
        assert!(limiter.allow("phishing", "mint1", 60, 1059));
        assert!(limiter.allow("honeypot", "mint1", 60, 1060));
    }

    #[test]
    fn test_consecutive_allows_respect_cooldown() {
        let limiter = RateLimiter::new();
        let cooldown = 7;
        let mut last_true: Option<i64> = None;

        for now in (0..200).step_by(3) {
            if limiter.allow("cat", "key", cooldown, now) {
                if let Some(prev) = last_true {
                    assert!(now - prev >= cooldown);
                }
                last_true = Some(now);
            }
        }
        assert!(last_true.is_some());
    }

    #[test]
    fn test_daily_cap_rolls_from_first_call() {
        let limiter = RateLimiter::new().with_daily_cap("telegram", 2);
        let start = 50_000;

        assert!(limiter.allow("telegram", "a", 0, start));
        assert!(limiter.allow("telegram", "b", 0, start + 10));
        assert!(!limiter.allow("telegram", "c", 0, start + 20));
        assert_eq!(limiter.daily_count("telegram"), 2);

        // Still capped just before 24h after the first call
        assert!(!limiter.allow("telegram", "c", 0, start + DAY_SECS - 1));
        assert!(limiter.allow("telegram", "c", 0, start + DAY_SECS));
        assert_eq!(limiter.daily_count("telegram"), 1);
    }

    #[test]
    fn test_denied_call_does_not_consume_cap() {
        let limiter = RateLimiter::new().with_daily_cap("telegram", 2);
        assert!(limiter.allow("telegram", "a", 100, 0));
        assert!(!limiter.allow("telegram", "a", 100, 10));
        assert!(limiter.allow("telegram", "b", 100, 10));
        assert_eq!(limiter.daily_count("telegram"), 2);
    }

    #[test]
    fn test_uncapped_category_unlimited() {
        let limiter = RateLimiter::new().with_daily_cap("telegram", 1);
        for i in 0..50 {
            assert!(limiter.allow("suspicious_activity", &format!("k{}", i), 300, 0));
        }
    }
}
