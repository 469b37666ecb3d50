//! PTP hardware clocks (`/dev/ptpN`).
//!
//! The kernel exposes each PHC as a character device whose fd maps to a
//! dynamic POSIX clock id, so the usual `clock_*` calls work on it.
#![allow(unsafe_code)]

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::error::{NetError, Result};
use crate::time::{ns_to_timespec, timespec_to_ns};

const CLOCKFD: libc::clockid_t = 3;

/// Scaled ppm units per ppb used by `timex.freq` (2^16 / 1000).
const FREQ_SCALE: f64 = 65.536;

/// Dynamic clock id of a PHC file descriptor.
#[must_use]
pub fn fd_to_clockid(fd: RawFd) -> libc::clockid_t {
    (!fd << 3) | CLOCKFD
}

/// `timex.freq` value for a frequency offset in ppb.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    reason = "kernel accepts at most +-32768000 ppb"
)]
pub fn ppb_to_timex_freq(ppb: i64) -> libc::c_long {
    (ppb as f64 * FREQ_SCALE) as libc::c_long
}

/// An open PTP hardware clock.
#[derive(Debug)]
pub struct PhcClock {
    path: String,
    fd: OwnedFd,
    writable: bool,
}

impl PhcClock {
    /// Open a clock device read-write, falling back to read-only.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Clock` if the device can't be opened at all.
    pub fn open(path: &str) -> Result<Self> {
        let c_path = CString::new(path)
            .map_err(|_| NetError::clock(path, "path contains a NUL byte"))?;

        let (raw, writable) = match open_raw(&c_path, libc::O_RDWR) {
            Ok(fd) => (fd, true),
            Err(e) if e.raw_os_error() == Some(libc::EACCES) => {
                let fd = open_raw(&c_path, libc::O_RDONLY)
                    .map_err(|e| NetError::clock(path, e.to_string()))?;
                tracing::info!(path, "clock opened read-only");
                (fd, false)
            }
            Err(e) => return Err(NetError::clock(path, e.to_string())),
        };

        // SAFETY:
        // - raw was just returned by a successful open(2) and is owned by nobody else
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(Self {
            path: path.to_string(),
            fd,
            writable,
        })
    }

    /// Device path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the device was opened read-write.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Raw descriptor, also the numeric clock handle.
    #[must_use]
    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn clockid(&self) -> libc::clockid_t {
        fd_to_clockid(self.fd.as_raw_fd())
    }

    /// Read the clock in nanoseconds.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Clock` if `clock_gettime` fails.
    pub fn read(&self) -> Result<i64> {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY:
        // - &mut ts points to a valid timespec on the stack
        // - the clock id is derived from an fd we own for the lifetime of self
        let ret = unsafe { libc::clock_gettime(self.clockid(), &mut ts) };
        if ret < 0 {
            return Err(self.os_error("clock_gettime"));
        }
        Ok(timespec_to_ns(&ts))
    }

    /// Step the clock to `value` nanoseconds.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Clock` if the clock is read-only or the call fails.
    pub fn write(&self, value: i64) -> Result<()> {
        if !self.writable {
            return Err(NetError::clock(&self.path, "clock is read-only"));
        }
        let ts = ns_to_timespec(value);
        // SAFETY:
        // - &ts points to a valid, initialized timespec
        // - the clock id is derived from an fd we own
        let ret = unsafe { libc::clock_settime(self.clockid(), &ts) };
        if ret < 0 {
            return Err(self.os_error("clock_settime"));
        }
        Ok(())
    }

    /// Set the frequency offset in ppb.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Clock` if the clock is read-only or the call fails.
    pub fn adjust_frequency(&self, ppb: i64) -> Result<()> {
        if !self.writable {
            return Err(NetError::clock(&self.path, "clock is read-only"));
        }
        // SAFETY:
        // - timex is a plain C struct, all-zero is a valid "no modes" value
        let mut tx: libc::timex = unsafe { std::mem::zeroed() };
        tx.modes = libc::ADJ_FREQUENCY;
        tx.freq = ppb_to_timex_freq(ppb);
        // SAFETY:
        // - &mut tx points to a valid timex on the stack
        // - the clock id is derived from an fd we own
        let ret = unsafe { libc::clock_adjtime(self.clockid(), &mut tx) };
        if ret < 0 {
            return Err(self.os_error("clock_adjtime"));
        }
        Ok(())
    }

    fn os_error(&self, call: &str) -> NetError {
        NetError::clock(&self.path, format!("{call}: {}", io::Error::last_os_error()))
    }
}

fn open_raw(path: &CString, flags: libc::c_int) -> io::Result<RawFd> {
    // SAFETY:
    // - path is a valid NUL-terminated string that outlives the call
    let fd = unsafe { libc::open(path.as_ptr(), flags | libc::O_CLOEXEC) };
    if fd < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(fd)
    }
}
