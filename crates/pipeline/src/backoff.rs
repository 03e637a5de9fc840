//! Exponential retry backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// `min(cap, base * 2^(attempt-1))`, no jitter. `attempt` is 1-based.
pub fn raw_backoff(attempt: u32, base: Duration, cap: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let exponent = (attempt - 1).min(32);
    let factor = 2u64.saturating_pow(exponent);
    let scaled = base.saturating_mul(factor.min(u32::MAX as u64) as u32);
    scaled.min(cap)
}

/// Backoff with ±20% jitter applied to the raw delay.
pub fn backoff_with_jitter(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let raw = raw_backoff(attempt, base, cap);
    if raw.is_zero() {
        return raw;
    }
    let jitter: f64 = rand::thread_rng().gen_range(0.8..=1.2);
    raw.mul_f64(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(1);
    const CAP: Duration = Duration::from_secs(60);

    #[test]
    fn doubles_until_the_cap() {
        assert_eq!(raw_backoff(1, BASE, CAP), Duration::from_secs(1));
        assert_eq!(raw_backoff(2, BASE, CAP), Duration::from_secs(2));
        assert_eq!(raw_backoff(3, BASE, CAP), Duration::from_secs(4));
        assert_eq!(raw_backoff(6, BASE, CAP), Duration::from_secs(32));
        assert_eq!(raw_backoff(7, BASE, CAP), Duration::from_secs(60));
        assert_eq!(raw_backoff(20, BASE, CAP), Duration::from_secs(60));
    }

    #[test]
    fn monotone_nondecreasing_until_cap() {
        let mut previous = Duration::ZERO;
        for attempt in 1..30 {
            let delay = raw_backoff(attempt, BASE, CAP);
            assert!(delay >= previous, "attempt {attempt} regressed");
            previous = delay;
        }
    }

    #[test]
    fn large_attempts_do_not_overflow() {
        assert_eq!(raw_backoff(1000, BASE, CAP), CAP);
        let huge_cap = Duration::from_secs(3600);
        assert!(raw_backoff(64, Duration::from_millis(1), huge_cap) <= huge_cap);
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        for attempt in 1..8 {
            let raw = raw_backoff(attempt, BASE, CAP);
            for _ in 0..200 {
                let jittered = backoff_with_jitter(attempt, BASE, CAP);
                assert!(jittered >= raw.mul_f64(0.8) && jittered <= raw.mul_f64(1.2));
            }
        }
    }

    #[test]
    fn zero_base_means_immediate_retry() {
        assert_eq!(
            backoff_with_jitter(3, Duration::ZERO, CAP),
            Duration::ZERO
        );
    }
}
