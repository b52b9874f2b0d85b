//! Retry scheduling
//!
//! Failed fetches, verifications and deliveries are rescheduled with a
//! table-driven delay. The attempt counter indexes into the table (clamped to
//! the last entry) and the result is stretched by a random jitter factor so
//! that a burst of failures against one endpoint does not come back as a
//! synchronized burst of retries.

use rand::Rng;

/// Default retry delay table, in seconds: 1m, 2m, 6m, 24m, 2h, 12h, 1d.
pub const DEFAULT_RETRY_DELAYS: &[u64] = &[60, 120, 360, 1440, 7200, 43200, 86400];

/// Default jitter factor applied on top of the table value.
pub const DEFAULT_JITTER: f64 = 0.618;

/// Seconds to wait before retrying after `attempts` consecutive failures.
///
/// `attempts` is the post-increment failure count, so the first failure
/// (attempts = 1) maps to `delays[0]`. Indexes past the end of the table are
/// clamped to the last entry. The base delay is multiplied by
/// `1 + uniform(0, jitter)`.
pub fn attempt_retry_seconds(attempts: u32, delays: &[u64], jitter: f64) -> u64 {
    let delays = if delays.is_empty() {
        DEFAULT_RETRY_DELAYS
    } else {
        delays
    };

    let index = (attempts.max(1) as usize - 1).min(delays.len() - 1);
    let base = delays[index];

    if jitter <= 0.0 {
        return base;
    }

    let factor = 1.0 + rand::rng().random_range(0.0..jitter);
    (base as f64 * factor).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_uses_first_entry() {
        let delay = attempt_retry_seconds(1, DEFAULT_RETRY_DELAYS, 0.0);
        assert_eq!(delay, 60);
    }

    #[test]
    fn attempts_clamp_to_last_entry() {
        let delay = attempt_retry_seconds(100, DEFAULT_RETRY_DELAYS, 0.0);
        assert_eq!(delay, 86400);
    }

    #[test]
    fn zero_attempts_treated_as_first() {
        let delay = attempt_retry_seconds(0, &[10, 20], 0.0);
        assert_eq!(delay, 10);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let delay = attempt_retry_seconds(1, &[100], DEFAULT_JITTER);
            assert!((100..=162).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn empty_table_falls_back_to_default() {
        let delay = attempt_retry_seconds(2, &[], 0.0);
        assert_eq!(delay, 120);
    }
}
