//! Sliding-window rate limiter for the ingestor.
//!
//! Two windows: a 1-second window capped at `max_per_second` plus a burst
//! allowance, and a 60-second window capped at `max_per_minute`. Denied
//! events are counted and dropped, never queued.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use magpie_core::config::EventBusConfig;

#[derive(Debug)]
pub struct RateLimiter {
    per_second_cap: usize,
    per_minute_cap: usize,
    second_window: VecDeque<Instant>,
    minute_window: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(config: &EventBusConfig) -> Self {
        Self {
            per_second_cap: config.max_events_per_second + config.burst_allowance,
            per_minute_cap: config.max_events_per_minute,
            second_window: VecDeque::new(),
            minute_window: VecDeque::new(),
        }
    }

    /// Whether an event may pass right now. Allowed events are recorded.
    pub fn is_allowed(&mut self) -> bool {
        self.is_allowed_at(Instant::now())
    }

    /// Deterministic variant for tests.
    pub fn is_allowed_at(&mut self, now: Instant) -> bool {
        self.evict(now);
        if self.second_window.len() >= self.per_second_cap {
            return false;
        }
        if self.minute_window.len() >= self.per_minute_cap {
            return false;
        }
        self.second_window.push_back(now);
        self.minute_window.push_back(now);
        true
    }

    fn evict(&mut self, now: Instant) {
        let second_ago = now.checked_sub(Duration::from_secs(1));
        let minute_ago = now.checked_sub(Duration::from_secs(60));
        if let Some(cutoff) = second_ago {
            while self.second_window.front().is_some_and(|t| *t <= cutoff) {
                self.second_window.pop_front();
            }
        }
        if let Some(cutoff) = minute_ago {
            while self.minute_window.front().is_some_and(|t| *t <= cutoff) {
                self.minute_window.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(per_second: usize, per_minute: usize, burst: usize) -> EventBusConfig {
        EventBusConfig {
            buffer_capacity: 1000,
            publish_timeout_ms: 250,
            max_events_per_second: per_second,
            max_events_per_minute: per_minute,
            burst_allowance: burst,
            batch_max_size: 10,
            batch_max_age_secs: 1,
            health_check_interval_secs: 30,
            max_consecutive_failures: 3,
            reconnect_base_secs: 1,
            reconnect_cap_secs: 60,
            reconnect_max_attempts: 10,
            stats_port: 0,
        }
    }

    #[test]
    fn one_second_window_caps_at_rate_plus_burst() {
        let mut limiter = RateLimiter::new(&config(50, 100_000, 10));
        let now = Instant::now();

        let mut allowed = 0;
        for _ in 0..1000 {
            if limiter.is_allowed_at(now) {
                allowed += 1;
            }
        }
        // P4: at most max_per_second + burst_allowance in any 1-second window.
        assert_eq!(allowed, 60);
    }

    #[test]
    fn window_slides() {
        let mut limiter = RateLimiter::new(&config(2, 100, 0));
        let t0 = Instant::now();
        assert!(limiter.is_allowed_at(t0));
        assert!(limiter.is_allowed_at(t0));
        assert!(!limiter.is_allowed_at(t0));

        // A second later the window has drained.
        let t1 = t0 + Duration::from_millis(1100);
        assert!(limiter.is_allowed_at(t1));
    }

    #[test]
    fn minute_cap_applies_across_seconds() {
        let mut limiter = RateLimiter::new(&config(10, 15, 0));
        let t0 = Instant::now();

        let mut allowed = 0;
        // 3 seconds x 10/s would be 30 events, but the minute cap is 15.
        for s in 0..3 {
            let t = t0 + Duration::from_secs(s);
            for _ in 0..10 {
                if limiter.is_allowed_at(t) {
                    allowed += 1;
                }
            }
        }
        assert_eq!(allowed, 15);

        // After the minute window passes, events flow again.
        assert!(limiter.is_allowed_at(t0 + Duration::from_secs(61)));
    }
}
