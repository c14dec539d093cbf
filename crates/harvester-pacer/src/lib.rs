//! Per-retailer request pacing (spec §4.2). Stateless except for an atomic
//! request counter, the same shape as `BudgetTracker` in the teacher's
//! scheduling module: one `Pacer` is owned by exactly one retailer's run,
//! so `Ordering::Relaxed` atomics are enough — no cross-task contention to
//! serialize against.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use harvester_common::ProxyMode;
use rand::Rng;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct DelayRange {
    pub min: f64,
    pub max: f64,
}

impl DelayRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    fn sample(&self) -> Duration {
        if self.max <= self.min {
            return Duration::from_secs_f64(self.min.max(0.0));
        }
        let secs = rand::thread_rng().gen_range(self.min..=self.max);
        Duration::from_secs_f64(secs.max(0.0))
    }
}

#[derive(Debug, Clone)]
pub struct PacerConfig {
    pub direct: DelayRange,
    pub proxied: DelayRange,
    pub pause_50_requests: DelayRange,
    pub pause_200_requests: DelayRange,
    pub rate_limit_base_wait: f64,
}

pub struct Pacer {
    config: PacerConfig,
    retailer: String,
    request_count: AtomicU64,
}

impl Pacer {
    pub fn new(retailer: impl Into<String>, config: PacerConfig) -> Self {
        Self {
            config,
            retailer: retailer.into(),
            request_count: AtomicU64::new(0),
        }
    }

    /// Sample the inter-request delay for `mode` and, if the running
    /// request count crosses a pause threshold, the long pause on top of
    /// it. Returns the total duration the caller should sleep before
    /// issuing the next request.
    pub fn before_request(&self, mode: ProxyMode) -> Duration {
        let range = match mode {
            ProxyMode::Direct => &self.config.direct,
            ProxyMode::Residential | ProxyMode::WebScraperApi => &self.config.proxied,
        };
        let base = range.sample();

        let count = self.request_count.fetch_add(1, Ordering::Relaxed) + 1;
        let long_pause = if count % 200 == 0 {
            Some(self.config.pause_200_requests.sample())
        } else if count % 50 == 0 {
            Some(self.config.pause_50_requests.sample())
        } else {
            None
        };

        match long_pause {
            Some(pause) => base + pause,
            None => base,
        }
    }

    /// Exponential backoff for HTTP 429/403 (spec §4.2): `2^attempt *
    /// rate_limit_base_wait`. Applies equally to both statuses — a 403 is
    /// not given a fixed five-minute wall, only the same curve as 429.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let secs = 2f64.powi(attempt as i32) * self.config.rate_limit_base_wait;
        Duration::from_secs_f64(secs)
    }

    pub fn on_response(&self, status: u16, url: &str, attempt: u32) -> Option<Duration> {
        match status {
            429 => Some(self.backoff_for(attempt)),
            403 => {
                warn!(retailer = %self.retailer, url, attempt, "403 response, backing off");
                Some(self.backoff_for(attempt))
            }
            _ => None,
        }
    }

    pub fn requests_made(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PacerConfig {
        PacerConfig {
            direct: DelayRange::new(1.0, 1.0),
            proxied: DelayRange::new(0.5, 0.5),
            pause_50_requests: DelayRange::new(10.0, 10.0),
            pause_200_requests: DelayRange::new(60.0, 60.0),
            rate_limit_base_wait: 30.0,
        }
    }

    #[test]
    fn backoff_never_exceeds_300s_within_max_retries_3() {
        let pacer = Pacer::new("acme", cfg());
        let total: f64 = (0..3).map(|a| pacer.backoff_for(a).as_secs_f64()).sum();
        assert!(total < 300.0, "total backoff {total} should stay under 300s");
        for a in 0..3 {
            assert!(pacer.backoff_for(a).as_secs_f64() < 300.0);
        }
    }

    #[test]
    fn pause_50_triggers_at_multiples_of_50() {
        let pacer = Pacer::new("acme", cfg());
        for _ in 0..49 {
            pacer.before_request(ProxyMode::Direct);
        }
        let fiftieth = pacer.before_request(ProxyMode::Direct);
        // base (1.0) + pause_50 (10.0)
        assert!(fiftieth.as_secs_f64() >= 10.9);
    }

    #[test]
    fn on_response_backs_off_for_403_and_429_identically() {
        let pacer = Pacer::new("acme", cfg());
        let d403 = pacer.on_response(403, "https://example.com", 1).unwrap();
        let d429 = pacer.on_response(429, "https://example.com", 1).unwrap();
        assert_eq!(d403, d429);
    }

    #[test]
    fn on_response_is_none_for_success() {
        let pacer = Pacer::new("acme", cfg());
        assert!(pacer.on_response(200, "https://example.com", 0).is_none());
    }
}
