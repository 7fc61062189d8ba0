//! Microsecond clocks.
//!
//! Journal timestamps are microseconds since the epoch. The registry also needs
//! a monotonic stamp to tell scan cycles apart; it is measured from the first
//! time any clock in this module is used.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub const USEC_PER_SEC: u64 = 1_000_000;

fn process_start() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

/// Microseconds since the unix epoch.
pub fn now_realtime_usec() -> u64 {
    system_time_to_usec(SystemTime::now())
}

/// Monotonic microseconds. Never returns zero, so zero can mean "never".
pub fn now_monotonic_usec() -> u64 {
    let elapsed = process_start().elapsed().as_micros() as u64;
    elapsed.saturating_add(1)
}

pub fn system_time_to_usec(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn monotonic_is_non_zero_and_non_decreasing() {
        let a = now_monotonic_usec();
        let b = now_monotonic_usec();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn realtime_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(now_realtime_usec() > 1_577_836_800 * USEC_PER_SEC);
    }

    #[test]
    fn pre_epoch_time_is_zero() {
        let before_epoch = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(system_time_to_usec(before_epoch), 0);
    }
}
