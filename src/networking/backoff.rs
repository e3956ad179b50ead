use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;
use crate::error::Error;

/// Exponential redial delay.
///
/// Jitter adds up to half of the undithered delay, so successive delays never shrink
/// until `reset` is called.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    jitter: bool,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> crate::Result<Backoff> {
        if config.min_millis == 0 || config.max_millis < config.min_millis {
            return Err(Error::Config(format!(
                "invalid backoff range {}..{}ms",
                config.min_millis, config.max_millis
            )));
        }
        Ok(Backoff {
            min: Duration::from_millis(config.min_millis),
            max: Duration::from_millis(config.max_millis),
            jitter: config.jitter,
            attempt: 0,
        })
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.checked_pow(self.attempt).unwrap_or(u32::MAX);
        let base = self.min.saturating_mul(factor).min(self.max);
        let jitter = if self.jitter {
            let half = (base.as_millis() / 2) as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=half))
        } else {
            Duration::from_millis(0)
        };
        self.attempt = self.attempt.saturating_add(1);
        (base + jitter).min(self.max)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}
