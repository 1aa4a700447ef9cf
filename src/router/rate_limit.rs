//! §4.7 Dial Rate Limiter: a plain sliding window per session, not a token
//! bucket — the spec calls for "window resets when a new attempt arrives
//! after window expiry", which is a fixed-window-with-reset algorithm, not
//! what `governor` (used elsewhere in the teacher for per-IP HTTP limits)
//! implements. Hand-written here so the semantics match exactly.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

struct Window {
    count: u32,
    started_at: Instant,
}

pub struct DialRateLimiter {
    max_attempts: u32,
    window: Duration,
    windows: HashMap<Uuid, Window>,
}

impl DialRateLimiter {
    pub fn new(max_attempts: u32, window_ms: u64) -> Self {
        DialRateLimiter {
            max_attempts,
            window: Duration::from_millis(window_ms),
            windows: HashMap::new(),
        }
    }

    /// Returns `true` if this attempt is within the limit (and is recorded);
    /// `false` if it should be rejected with `rate_limited`.
    pub fn try_attempt(&mut self, session_id: Uuid) -> bool {
        let now = Instant::now();
        let entry = self.windows.entry(session_id).or_insert_with(|| Window {
            count: 0,
            started_at: now,
        });

        if now.duration_since(entry.started_at) >= self.window {
            entry.count = 0;
            entry.started_at = now;
        }

        if entry.count >= self.max_attempts {
            return false;
        }

        entry.count += 1;
        true
    }

    pub fn clear(&mut self, session_id: Uuid) {
        self.windows.remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_max_attempts() {
        let mut limiter = DialRateLimiter::new(2, 60_000);
        let session = Uuid::new_v4();
        assert!(limiter.try_attempt(session));
        assert!(limiter.try_attempt(session));
        assert!(!limiter.try_attempt(session));
    }

    #[test]
    fn different_sessions_have_independent_windows() {
        let mut limiter = DialRateLimiter::new(1, 60_000);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(limiter.try_attempt(a));
        assert!(limiter.try_attempt(b));
        assert!(!limiter.try_attempt(a));
    }

    #[test]
    fn clear_resets_the_window() {
        let mut limiter = DialRateLimiter::new(1, 60_000);
        let session = Uuid::new_v4();
        assert!(limiter.try_attempt(session));
        limiter.clear(session);
        assert!(limiter.try_attempt(session));
    }
}
