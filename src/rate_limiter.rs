use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as TokenBucket};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Error;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    pub global_rps: f64,
    pub global_burst: u32,
    pub per_sender_rps: f64,
    pub per_sender_burst: u32,
}

/// Token-bucket admission control applied both globally and per sender.
///
/// Per-sender buckets are created on first use and never evicted.
pub struct RateLimiter {
    global: DefaultDirectRateLimiter,
    per_sender: Mutex<HashMap<String, Arc<DefaultDirectRateLimiter>>>,
    per_sender_quota: Quota,
}

fn make_quota(rps: f64, burst: u32, name: &str) -> crate::Result<Quota> {
    if !(rps > 0.0) || !rps.is_finite() {
        return Err(Error::Config(format!("{} rps must be positive, got {}", name, rps)));
    }
    let burst = NonZeroU32::new(burst)
        .ok_or_else(|| Error::Config(format!("{} burst must be positive", name)))?;
    let period = Duration::try_from_secs_f64(1.0 / rps)
        .map_err(|_| Error::Config(format!("{} rps {} is too small", name, rps)))?;
    let quota = Quota::with_period(period)
        .ok_or_else(|| Error::Config(format!("{} rps {} is too large", name, rps)))?;
    Ok(quota.allow_burst(burst))
}

impl RateLimiter {
    pub fn new(config: &RateLimiterConfig) -> crate::Result<RateLimiter> {
        let global_quota = make_quota(config.global_rps, config.global_burst, "global")?;
        let per_sender_quota =
            make_quota(config.per_sender_rps, config.per_sender_burst, "per-sender")?;
        Ok(RateLimiter {
            global: TokenBucket::direct(global_quota),
            per_sender: Mutex::new(HashMap::new()),
            per_sender_quota,
        })
    }

    fn sender_bucket(&self, sender: &str) -> Arc<DefaultDirectRateLimiter> {
        // the map stays consistent across a poisoning panic
        let mut per_sender = self
            .per_sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        per_sender
            .entry(String::from(sender))
            .or_insert_with(|| Arc::new(TokenBucket::direct(self.per_sender_quota)))
            .clone()
    }

    /// True iff both the sender's bucket and the global bucket admit one more call.
    pub fn allow(&self, sender: &str) -> bool {
        let bucket = self.sender_bucket(sender);
        let allowed = bucket.check().is_ok() && self.global.check().is_ok();
        if !allowed {
            warn!("rate limit exceeded for sender {}", sender);
        }
        allowed
    }

    pub fn tracked_senders(&self) -> usize {
        self.per_sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(global_burst: u32, per_sender_burst: u32) -> RateLimiterConfig {
        RateLimiterConfig {
            global_rps: 1.0,
            global_burst,
            per_sender_rps: 1.0,
            per_sender_burst,
        }
    }

    #[test]
    fn global_and_per_sender_burst_test() {
        let rate_limiter = RateLimiter::new(&config(3, 2)).unwrap();
        assert!(rate_limiter.allow("user1"));
        assert!(rate_limiter.allow("user2"));
        assert!(rate_limiter.allow("user1"));
        assert!(!rate_limiter.allow("user1"));
        assert!(!rate_limiter.allow("user3"));
    }

    #[test]
    fn per_sender_limit_leaves_others_alone_test() {
        let rate_limiter = RateLimiter::new(&config(100, 1)).unwrap();
        assert!(rate_limiter.allow("a"));
        assert!(!rate_limiter.allow("a"));
        assert!(rate_limiter.allow("b"));
        assert!(rate_limiter.allow("c"));
        assert_eq!(rate_limiter.tracked_senders(), 3);
    }

    #[test]
    fn tokens_replenish_test() {
        let rate_limiter = RateLimiter::new(&RateLimiterConfig {
            global_rps: 100.0,
            global_burst: 1,
            per_sender_rps: 100.0,
            per_sender_burst: 1,
        })
        .unwrap();
        assert!(rate_limiter.allow("a"));
        assert!(!rate_limiter.allow("a"));
        std::thread::sleep(Duration::from_millis(50));
        assert!(rate_limiter.allow("a"));
    }

    #[test]
    fn invalid_config_test() {
        let invalid = vec![
            RateLimiterConfig { global_rps: 0.0, ..config(1, 1) },
            RateLimiterConfig { global_rps: -1.0, ..config(1, 1) },
            RateLimiterConfig { per_sender_rps: 0.0, ..config(1, 1) },
            RateLimiterConfig { per_sender_rps: f64::NAN, ..config(1, 1) },
            RateLimiterConfig { global_rps: 1e-20, ..config(1, 1) },
            RateLimiterConfig { per_sender_rps: f64::MIN_POSITIVE, ..config(1, 1) },
            RateLimiterConfig { global_rps: f64::INFINITY, ..config(1, 1) },
            config(0, 1),
            config(1, 0),
        ];
        for config in invalid.iter() {
            assert!(matches!(RateLimiter::new(config), Err(Error::Config(_))));
        }
    }

    #[test]
    fn concurrent_allow_respects_global_burst_test() {
        let rate_limiter = Arc::new(RateLimiter::new(&config(10, 10)).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let rate_limiter = rate_limiter.clone();
                std::thread::spawn(move || {
                    (0..5)
                        .filter(|_| rate_limiter.allow(&format!("sender-{}", i)))
                        .count()
                })
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 10);
    }
}
