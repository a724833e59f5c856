//! Per-IP sliding-window rate limiting for the read API.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::{ReverieError, ReverieResult};

/// Sliding-window request counter keyed by client IP.
///
/// Each IP keeps the timestamps of its requests inside the window; a request
/// that would exceed the limit is rejected without being recorded.
pub struct RateLimiter {
    buckets: DashMap<IpAddr, VecDeque<Instant>>,
    limit: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            limit,
            window,
        }
    }

    /// Records a request from `ip`, or rejects it when the window is full.
    pub fn check(&self, ip: IpAddr) -> ReverieResult<()> {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(ip).or_default();

        while bucket.front().is_some_and(|t| now.duration_since(*t) >= self.window) {
            bucket.pop_front();
        }

        if bucket.len() >= self.limit {
            tracing::debug!(client = %ip, "rate limit exceeded");
            return Err(ReverieError::RateLimited {
                limit: self.limit,
                window_secs: self.window.as_secs(),
            });
        }

        bucket.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    use tokio::time::{self};

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[tokio::test]
    async fn allows_up_to_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.check(ip(1)).is_ok());
        }
        assert!(limiter.check(ip(1)).is_err());
    }

    #[tokio::test]
    async fn limits_are_per_ip() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(2)).is_ok());
        assert!(limiter.check(ip(1)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(1)).is_err());

        time::advance(Duration::from_secs(61)).await;
        assert!(limiter.check(ip(1)).is_ok(), "old entries expire");
    }

    #[tokio::test]
    async fn rejected_requests_are_not_recorded() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check(ip(1)).is_ok());
        for _ in 0..10 {
            assert!(limiter.check(ip(1)).is_err());
        }
        // Still exactly one recorded request
        assert_eq!(limiter.buckets.get(&ip(1)).unwrap().len(), 1);
    }
}
