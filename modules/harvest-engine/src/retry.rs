//! Backoff machine shared by the HTTP and browser engines.

use std::time::Duration;

use rand::Rng;

use harvest_core::config::{BackoffMode, RetryConfig};

/// Fraction of the computed delay used as symmetric jitter.
const JITTER_FRACTION: f64 = 0.25;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub mode: BackoffMode,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retry_on_status: Vec<u16>,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            mode: config.backoff_mode,
            base_delay: Duration::from_secs_f64(config.base_delay_s.max(0.0)),
            max_delay: Duration::from_secs_f64(config.max_delay_s.max(0.0)),
            retry_on_status: config.retry_on_status.clone(),
        }
    }

    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_on_status.contains(&status)
    }

    /// Delay before retry number `attempt` (1-based):
    /// `base * 2^(attempt-1)` for exp, constant for fixed, zero for none,
    /// jittered by ±25 % and capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = match self.mode {
            BackoffMode::None => return Duration::ZERO,
            BackoffMode::Fixed => self.base_delay,
            BackoffMode::Exp => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1)).min(1 << 16);
                self.base_delay.saturating_mul(factor)
            }
        };
        let capped = base.min(self.max_delay);
        if capped.is_zero() {
            return capped;
        }
        let jitter = rand::rng().random_range(-JITTER_FRACTION..JITTER_FRACTION);
        capped.mul_f64((1.0 + jitter).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(mode: BackoffMode) -> RetryPolicy {
        RetryPolicy::from_config(&RetryConfig {
            max_retries: 3,
            backoff_mode: mode,
            base_delay_s: 1.0,
            max_delay_s: 30.0,
            retry_on_status: vec![429, 500, 502, 503, 504],
        })
    }

    #[test]
    fn none_mode_never_sleeps() {
        let p = policy(BackoffMode::None);
        for attempt in 1..=5 {
            assert_eq!(p.backoff(attempt), Duration::ZERO);
        }
    }

    #[test]
    fn fixed_mode_stays_near_base() {
        let p = policy(BackoffMode::Fixed);
        for attempt in 1..=5 {
            let d = p.backoff(attempt).as_secs_f64();
            assert!((0.74..=1.26).contains(&d), "attempt {attempt}: {d}");
        }
    }

    #[test]
    fn exp_mode_doubles_per_attempt() {
        let p = policy(BackoffMode::Exp);
        let first = p.backoff(1).as_secs_f64();
        let third = p.backoff(3).as_secs_f64();
        assert!((0.74..=1.26).contains(&first));
        assert!((2.9..=5.1).contains(&third), "third: {third}");
    }

    #[test]
    fn exp_mode_respects_cap() {
        let p = RetryPolicy::from_config(&RetryConfig {
            max_retries: 10,
            backoff_mode: BackoffMode::Exp,
            base_delay_s: 1.0,
            max_delay_s: 4.0,
            retry_on_status: vec![],
        });
        assert!(p.backoff(10) <= Duration::from_secs(5));
    }

    #[test]
    fn status_membership() {
        let p = policy(BackoffMode::Exp);
        assert!(p.should_retry_status(503));
        assert!(!p.should_retry_status(404));
    }
}
