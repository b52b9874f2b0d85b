//! Small shared helpers

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the unix epoch
pub fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_time_is_monotonic_enough() {
        let a = unix_time();
        let b = unix_time();
        assert!(b >= a);
        // Sometime after 2020
        assert!(a > 1_577_836_800);
    }
}
