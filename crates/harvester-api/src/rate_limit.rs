//! Per-IP token bucket for log polling (spec §4.9: "the server may enforce
//! a simple per-IP token bucket"). Grounded on the teacher's
//! `AppState::rate_limiter: Mutex<HashMap<IpAddr, Vec<Instant>>>` field
//! (`main.rs`), reimplemented here as its own small type instead of a bare
//! field so the eviction logic has one place to live.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct RateLimiter {
    window: Duration,
    max_requests: usize,
    hits: Mutex<HashMap<IpAddr, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self { window, max_requests, hits: Mutex::new(HashMap::new()) }
    }

    /// Returns `true` if this request is allowed, recording it either way
    /// isn't needed on rejection since the caller should back off.
    pub fn check(&self, ip: IpAddr) -> bool {
        let mut hits = self.hits.lock().expect("rate limiter poisoned");
        let now = Instant::now();
        let entry = hits.entry(ip).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);
        if entry.len() >= self.max_requests {
            return false;
        }
        entry.push(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_configured_burst_then_rejects() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(!limiter.check(ip));
    }

    #[test]
    fn distinct_ips_have_independent_buckets() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let a: IpAddr = "127.0.0.1".parse().unwrap();
        let b: IpAddr = "127.0.0.2".parse().unwrap();
        assert!(limiter.check(a));
        assert!(limiter.check(b));
    }
}
