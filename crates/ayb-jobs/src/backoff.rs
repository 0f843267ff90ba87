//! Exponential backoff with jitter for job retries.
//!
//! Base 5s, cap 5min, per-attempt random jitter ≤ 1s. `attempt < 1` is
//! clamped to the first-attempt delay.

use rand::Rng;
use std::time::Duration;

const BASE_SECS: f64 = 5.0;
const CAP_SECS: f64 = 300.0;
const MAX_JITTER_SECS: f64 = 1.0;

#[must_use]
pub fn backoff(attempt: i32) -> Duration {
    let attempt = attempt.max(1);
    let exp = BASE_SECS * 2f64.powi(attempt - 1);
    let capped = exp.min(CAP_SECS);
    let jitter = rand::thread_rng().gen_range(0.0..=MAX_JITTER_SECS);
    Duration::from_secs_f64(capped + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_is_near_base() {
        let d = backoff(1);
        assert!(d.as_secs_f64() >= BASE_SECS && d.as_secs_f64() <= BASE_SECS + MAX_JITTER_SECS);
    }

    #[test]
    fn grows_exponentially_then_caps() {
        assert!(backoff(2).as_secs_f64() < backoff(3).as_secs_f64() + MAX_JITTER_SECS);
        let far = backoff(20);
        assert!(far.as_secs_f64() <= CAP_SECS + MAX_JITTER_SECS);
    }

    #[test]
    fn zero_and_negative_attempts_clamp_to_first() {
        let zero = backoff(0);
        let negative = backoff(-5);
        assert!(zero.as_secs_f64() >= BASE_SECS);
        assert!(negative.as_secs_f64() >= BASE_SECS);
    }
}
