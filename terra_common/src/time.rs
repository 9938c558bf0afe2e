//! Monotonic clock and sleep helpers.
//!
//! Pulse pacing needs sleeps against an absolute deadline rather than a
//! relative delay, otherwise scheduling jitter accumulates across a
//! move. `sleep_until_us` uses `clock_nanosleep(TIMER_ABSTIME)` on
//! `CLOCK_MONOTONIC`; everything reading the clock uses the same base.

use std::time::Duration;

use nix::sys::time::TimeSpec;
use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};

const CLOCK: ClockId = ClockId::CLOCK_MONOTONIC;
const NANOS_PER_MICRO: i64 = 1_000;
const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Current monotonic time in microseconds.
pub fn micros() -> u64 {
    let ts = clock_gettime(CLOCK).unwrap_or(TimeSpec::new(0, 0));
    (ts.tv_sec() as u64) * 1_000_000 + (ts.tv_nsec() as u64) / 1_000
}

/// Current monotonic time in milliseconds.
pub fn millis() -> u64 {
    micros() / 1_000
}

/// Current wall-clock time as seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Sleep for a relative number of microseconds.
pub fn sleep_for_us(us: u64) {
    std::thread::sleep(Duration::from_micros(us));
}

/// Sleep for a relative number of milliseconds.
pub fn sleep_for_ms(ms: u64) {
    std::thread::sleep(Duration::from_millis(ms));
}

/// Sleep until an absolute monotonic deadline in microseconds.
///
/// Returns immediately when the deadline is already in the past.
/// Restarts the sleep when interrupted by a signal.
pub fn sleep_until_us(deadline_us: u64) {
    let secs = (deadline_us / 1_000_000) as i64;
    let nanos = (deadline_us % 1_000_000) as i64 * NANOS_PER_MICRO;
    debug_assert!(nanos < NANOS_PER_SEC);
    let deadline = TimeSpec::new(secs, nanos);

    while let Err(nix::errno::Errno::EINTR) =
        clock_nanosleep(CLOCK, ClockNanosleepFlags::TIMER_ABSTIME, &deadline)
    {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_is_monotonic() {
        let a = micros();
        let b = micros();
        assert!(b >= a);
    }

    #[test]
    fn sleep_until_reaches_deadline() {
        let start = micros();
        sleep_until_us(start + 2_000);
        assert!(micros() >= start + 2_000);
    }

    #[test]
    fn sleep_until_past_deadline_returns_immediately() {
        let start = micros();
        sleep_until_us(start.saturating_sub(1_000_000));
        // Well under the 2ms we would observe if it slept.
        assert!(micros() - start < 2_000);
    }
}
