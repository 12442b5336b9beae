//! Per-IP sliding-window rate limiting (§5, invariant 5 in §8).

use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

pub struct RateLimiter {
    hits: DashMap<IpAddr, Vec<Instant>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            hits: DashMap::new(),
            max_requests,
            window,
        }
    }

    /// Record a request from `ip` and report whether it is within the limit.
    /// Returns `false` (and does not count the request) once the window is
    /// already at capacity.
    pub fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut entry = self.hits.entry(ip).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);
        if entry.len() as u32 >= self.max_requests {
            return false;
        }
        entry.push(now);
        true
    }

    /// Drop IP entries with no hits left in the window; keeps the table
    /// from growing unbounded.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let window = self.window;
        let stale: Vec<IpAddr> = self
            .hits
            .iter()
            .filter_map(|e| {
                let fresh = e.value().iter().any(|t| now.duration_since(*t) < window);
                if fresh {
                    None
                } else {
                    Some(*e.key())
                }
            })
            .collect();
        let count = stale.len();
        for ip in stale {
            self.hits.remove(&ip);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn allows_up_to_the_cap() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.check(ip()));
        assert!(limiter.check(ip()));
        assert!(limiter.check(ip()));
        assert!(!limiter.check(ip()));
    }

    #[test]
    fn window_slides() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));
        let t0 = Instant::now();
        assert!(limiter.check_at(ip(), t0));
        assert!(!limiter.check_at(ip(), t0 + Duration::from_millis(5)));
        assert!(limiter.check_at(ip(), t0 + Duration::from_millis(30)));
    }

    #[test]
    fn sweep_drops_idle_ips() {
        let limiter = RateLimiter::new(5, Duration::from_millis(10));
        limiter.check(ip());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(limiter.sweep(), 1);
    }
}
