//! Token-bucket rate limiting keyed by `user_id || ip` (spec §4.7). Three
//! independently configured profiles (`auth`, `api`, `public`) each own
//! their own keyed bucket map.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use pgai_settings::LimiterProfile;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Clone)]
pub struct RateLimiter {
    profile: LimiterProfile,
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
}

impl RateLimiter {
    pub fn new(profile: LimiterProfile) -> Self {
        RateLimiter {
            profile,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn refill_rate_per_sec(&self) -> f64 {
        self.profile.max_requests as f64 / self.profile.window_secs.max(1) as f64
    }

    /// Attempts to consume one token for `key`. Returns `true` if admitted.
    pub fn try_consume(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();
        let capacity = self.profile.max_requests as f64;
        let rate = self.refill_rate_per_sec();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: capacity,
            last_refill: now,
        });
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Refunds a token; used by the `auth` profile, which "skips successful
    /// requests from the counter" (§4.7).
    pub fn refund(&self, key: &str) {
        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets.get_mut(key) {
            bucket.tokens = (bucket.tokens + 1.0).min(self.profile.max_requests as f64);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn admits_up_to_capacity_then_rejects() {
        let limiter = RateLimiter::new(LimiterProfile {
            window_secs: 60,
            max_requests: 3,
        });
        assert!(limiter.try_consume("k"));
        assert!(limiter.try_consume("k"));
        assert!(limiter.try_consume("k"));
        assert!(!limiter.try_consume("k"));
    }

    #[test]
    fn refund_restores_a_token() {
        let limiter = RateLimiter::new(LimiterProfile {
            window_secs: 60,
            max_requests: 1,
        });
        assert!(limiter.try_consume("k"));
        assert!(!limiter.try_consume("k"));
        limiter.refund("k");
        assert!(limiter.try_consume("k"));
    }

    #[test]
    fn distinct_keys_have_independent_buckets() {
        let limiter = RateLimiter::new(LimiterProfile {
            window_secs: 60,
            max_requests: 1,
        });
        assert!(limiter.try_consume("a"));
        assert!(limiter.try_consume("b"));
    }
}
