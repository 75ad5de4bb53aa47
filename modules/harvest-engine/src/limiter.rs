//! Per-domain token-bucket rate limiting.
//!
//! One [`RateLimiter`] guards one host; [`HostLimiters`] hands out a shared
//! limiter per host so all workers fetching the same domain within a source
//! share a single token budget. State never outlives the engine that owns it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use harvest_core::config::RateLimitPolicy;

use crate::cancel::CancelToken;

/// Poll cadence while waiting for a token.
const POLL: Duration = Duration::from_millis(50);

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    rps: Option<f64>,
    burst: f64,
    min_delay: Duration,
    jitter: Duration,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(policy: &RateLimitPolicy) -> Self {
        let burst = policy.burst.unwrap_or(1).max(1) as f64;
        Self {
            rps: policy.rps.filter(|rps| *rps > 0.0),
            burst,
            min_delay: Duration::from_secs_f64(policy.min_delay_s.unwrap_or(0.0).max(0.0)),
            jitter: Duration::from_secs_f64(policy.jitter_s.unwrap_or(0.0).max(0.0)),
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Acquire one token, waiting as needed, then insert the pacing delay
    /// `max(min_delay, uniform(0, jitter))`. Returns false when cancelled.
    pub async fn acquire(&self, cancel: &CancelToken) -> bool {
        if let Some(rps) = self.rps {
            loop {
                if cancel.is_cancelled() {
                    return false;
                }
                {
                    let mut state = self.state.lock().await;
                    let now = Instant::now();
                    let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                    state.tokens = (state.tokens + elapsed * rps).min(self.burst);
                    state.last_refill = now;
                    if state.tokens >= 1.0 {
                        state.tokens -= 1.0;
                        break;
                    }
                }
                if !cancel.sleep(POLL).await {
                    return false;
                }
            }
        } else if cancel.is_cancelled() {
            return false;
        }

        let pacing = self.pacing_delay();
        if pacing > Duration::ZERO && !cancel.sleep(pacing).await {
            return false;
        }
        true
    }

    fn pacing_delay(&self) -> Duration {
        let jittered = if self.jitter > Duration::ZERO {
            self.jitter.mul_f64(rand::rng().random_range(0.0..1.0))
        } else {
            Duration::ZERO
        };
        self.min_delay.max(jittered)
    }
}

/// Shared per-host limiter registry for one engine instance.
pub struct HostLimiters {
    policy: RateLimitPolicy,
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl HostLimiters {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// The shared limiter for a URL's host. Unparseable URLs share a
    /// catch-all bucket so they are still rate limited.
    pub async fn limiter_for(&self, url: &str) -> Arc<RateLimiter> {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
            .unwrap_or_else(|| "<unknown>".to_string());

        let mut limiters = self.limiters.lock().await;
        limiters
            .entry(host)
            .or_insert_with(|| Arc::new(RateLimiter::new(&self.policy)))
            .clone()
    }
}
