//! The delay primitive used by the perturbation engine (component C5):
//! a bounded sleep on the monotonic clock that resumes across spurious
//! wake-ups and reports the actual elapsed time.
//!
//! `clock_nanosleep` is async-signal-safe and allocates nothing, which is
//! why it is used here rather than `std::thread::sleep` (whose
//! implementation is not documented as signal-safe): this is the
//! primitive the overflow handler calls directly to realize a round's
//! perturbation.

use std::time::Instant;

/// Sleeps for approximately `nanos` nanoseconds on `CLOCK_MONOTONIC`,
/// retrying the remaining duration if a signal interrupts the sleep
/// early, and returns the actual elapsed nanoseconds.
pub fn wait_nanos(nanos: u64) -> u64 {
    let start = Instant::now();
    let mut remaining = libc::timespec {
        tv_sec: (nanos / 1_000_000_000) as libc::time_t,
        tv_nsec: (nanos % 1_000_000_000) as i64,
    };

    loop {
        let mut rem = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // `clock_nanosleep` returns 0 on success or a positive error
        // number directly (unlike `nanosleep`, it does not use `errno`).
        let ret = unsafe {
            libc::clock_nanosleep(libc::CLOCK_MONOTONIC, 0, &remaining, &mut rem)
        };
        if ret == 0 {
            break;
        }
        if ret == libc::EINTR {
            remaining = rem;
            continue;
        }
        break;
    }

    start.elapsed().as_nanos() as u64
}
