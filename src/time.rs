//! Host time sources in signed 64-bit nanoseconds.
//!
//! The engine works on plain `i64` nanosecond values ("time64") the way
//! the kernel hands them out: `CLOCK_REALTIME` for packet timestamps and
//! virtual clocks, `CLOCK_MONOTONIC` for deadlines.
#![allow(unsafe_code)]

/// Nanoseconds per second.
pub const NSEC_PER_SEC: i64 = 1_000_000_000;

/// Nanoseconds per millisecond.
pub const NSEC_PER_MSEC: i64 = 1_000_000;

fn clock_ns(clock: libc::clockid_t) -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY:
    // - &mut ts is a valid pointer to a properly initialized timespec on the stack
    // - CLOCK_REALTIME and CLOCK_MONOTONIC are always available on Linux
    unsafe {
        libc::clock_gettime(clock, &mut ts);
    }
    timespec_to_ns(&ts)
}

/// Current `CLOCK_REALTIME` in nanoseconds.
#[must_use]
pub fn realtime_ns() -> i64 {
    clock_ns(libc::CLOCK_REALTIME)
}

/// Current `CLOCK_MONOTONIC` in nanoseconds.
#[must_use]
pub fn monotonic_ns() -> i64 {
    clock_ns(libc::CLOCK_MONOTONIC)
}

/// Convert a kernel `timespec` to nanoseconds.
#[must_use]
#[allow(clippy::useless_conversion, reason = "time_t and c_long widths vary by target")]
pub fn timespec_to_ns(ts: &libc::timespec) -> i64 {
    i64::from(ts.tv_sec) * NSEC_PER_SEC + i64::from(ts.tv_nsec)
}

/// Convert a kernel `timeval` to nanoseconds.
#[must_use]
#[allow(clippy::useless_conversion, reason = "time_t and suseconds_t widths vary by target")]
pub fn timeval_to_ns(tv: &libc::timeval) -> i64 {
    i64::from(tv.tv_sec) * NSEC_PER_SEC + i64::from(tv.tv_usec) * 1_000
}

/// Convert nanoseconds to a kernel `timespec`, keeping `tv_nsec` positive.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    reason = "tv_nsec is always below one second after rem_euclid"
)]
pub fn ns_to_timespec(ns: i64) -> libc::timespec {
    libc::timespec {
        tv_sec: ns.div_euclid(NSEC_PER_SEC) as libc::time_t,
        tv_nsec: ns.rem_euclid(NSEC_PER_SEC) as libc::c_long,
    }
}
