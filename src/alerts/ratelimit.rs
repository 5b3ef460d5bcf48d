//! Fixed-window rate limiting, one window per alert fingerprint: a map of
//! last-sent timestamps and a single fixed window (no token bucket, no
//! backoff curve) — once a fingerprint has fired, it is silent for the
//! rest of the window and then fires again on the very next call.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(600);

pub struct RateLimiter {
    window: Duration,
    last_sent: HashMap<String, Instant>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_sent: HashMap::new(),
        }
    }

    /// Returns `true` if an alert with this fingerprint may be sent now,
    /// recording the attempt either way is not this method's job — call
    /// `record` only when the caller actually sends.
    pub fn allow(&self, fingerprint: &str) -> bool {
        match self.last_sent.get(fingerprint) {
            Some(last) => last.elapsed() >= self.window,
            None => true,
        }
    }

    pub fn record(&mut self, fingerprint: &str) {
        self.last_sent.insert(fingerprint.to_string(), Instant::now());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RATE_LIMIT_WINDOW)
    }
}

/// Canonicalize a call's positional arguments into a stable fingerprint
/// string for the rate limiter's keying.
pub fn fingerprint(tunnel_name: &str, message: Option<&str>, fail_loudly: bool) -> String {
    format!("{tunnel_name}\u{0}{}\u{0}{fail_loudly}", message.unwrap_or(""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_for_a_fingerprint_is_always_allowed() {
        let limiter = RateLimiter::default();
        assert!(limiter.allow("db-tunnel"));
    }

    #[test]
    fn repeat_within_window_is_suppressed() {
        let mut limiter = RateLimiter::new(Duration::from_secs(60));
        assert!(limiter.allow("db-tunnel"));
        limiter.record("db-tunnel");
        assert!(!limiter.allow("db-tunnel"));
    }

    #[test]
    fn fingerprints_are_independent() {
        let mut limiter = RateLimiter::new(Duration::from_secs(60));
        limiter.record("a");
        assert!(!limiter.allow("a"));
        assert!(limiter.allow("b"));
    }
}
