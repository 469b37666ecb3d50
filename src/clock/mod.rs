//! Clock access for the engine: PTP hardware clocks and virtual clocks.
//!
//! Callers hold a [`ClockHandle`] and go through a [`ClockTable`], which
//! dispatches to a [`PhcClock`] or to the virtual clock table. Virtual
//! handles keep their historical numeric range so they can never collide
//! with a real descriptor.

pub mod phc;
pub mod virtual_clock;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fmt;
use std::os::fd::RawFd;

pub use phc::PhcClock;
pub use virtual_clock::{
    HostClock, MAX_VIRTUAL_CLOCKS, RealtimeHost, VIRTUAL_CLOCK_HANDLE_BASE,
    VIRTUAL_CLOCK_HANDLE_MAX, VirtualClockTable, is_virtual_handle,
};

use crate::error::{NetError, Result};
use crate::protocol::ethernet::is_virtual_ptpdev;

/// Handle to an open clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockHandle {
    /// A PTP hardware clock, keyed by its descriptor
    Hardware(RawFd),
    /// A virtual clock, keyed by its table handle
    Virtual(i32),
}

impl ClockHandle {
    /// Numeric value of the handle.
    #[must_use]
    pub fn raw(&self) -> i32 {
        match *self {
            Self::Hardware(fd) => fd,
            Self::Virtual(h) => h,
        }
    }

    /// Whether this is a virtual clock.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        matches!(self, Self::Virtual(_))
    }
}

impl fmt::Display for ClockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hardware(fd) => write!(f, "phc:{fd}"),
            Self::Virtual(h) => write!(f, "virtual:{h}"),
        }
    }
}

/// All clocks opened by one engine.
#[derive(Debug)]
pub struct ClockTable<H: HostClock = RealtimeHost> {
    virtuals: VirtualClockTable<H>,
    hardware: HashMap<RawFd, PhcClock>,
}

impl Default for ClockTable<RealtimeHost> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ClockTable<RealtimeHost> {
    /// Table using `CLOCK_REALTIME` for virtual clocks.
    #[must_use]
    pub fn new(virtual_rate_ppb: i64) -> Self {
        Self::with_host(RealtimeHost, virtual_rate_ppb)
    }
}

impl<H: HostClock> ClockTable<H> {
    /// Table with a custom host time source for virtual clocks.
    pub fn with_host(host: H, virtual_rate_ppb: i64) -> Self {
        Self {
            virtuals: VirtualClockTable::new(host, virtual_rate_ppb),
            hardware: HashMap::new(),
        }
    }

    /// Open a clock. Names starting with `cbptp` are virtual, anything
    /// else is a PHC device path.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Clock` if the clock can't be opened.
    pub fn open(&mut self, name: &str) -> Result<ClockHandle> {
        if is_virtual_ptpdev(name) {
            return self.virtuals.open(name).map(ClockHandle::Virtual);
        }
        let phc = PhcClock::open(name)?;
        let fd = phc.raw_fd();
        self.hardware.insert(fd, phc);
        Ok(ClockHandle::Hardware(fd))
    }

    /// Close a clock handle.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Clock` if the handle is not open.
    pub fn close(&mut self, handle: ClockHandle) -> Result<()> {
        match handle {
            ClockHandle::Virtual(h) => self.virtuals.close(h),
            ClockHandle::Hardware(fd) => self
                .hardware
                .remove(&fd)
                .map(drop)
                .ok_or_else(|| not_open(handle)),
        }
    }

    /// Read the clock in nanoseconds.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Clock` if the handle is not open or the read fails.
    pub fn read(&mut self, handle: ClockHandle) -> Result<i64> {
        match handle {
            ClockHandle::Virtual(h) => self.virtuals.read(h),
            ClockHandle::Hardware(fd) => self.phc(fd)?.read(),
        }
    }

    /// Set the clock.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Clock` if the handle is not open or read-only.
    pub fn write(&mut self, handle: ClockHandle, value: i64) -> Result<()> {
        match handle {
            ClockHandle::Virtual(h) => self.virtuals.write(h, value),
            ClockHandle::Hardware(fd) => self.phc(fd)?.write(value),
        }
    }

    /// Set the frequency offset in ppb.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Clock` if the handle is not open or read-only.
    pub fn adjust_frequency(&mut self, handle: ClockHandle, ppb: i64) -> Result<()> {
        match handle {
            ClockHandle::Virtual(h) => self.virtuals.set_rate(h, ppb),
            ClockHandle::Hardware(fd) => self.phc(fd)?.adjust_frequency(ppb),
        }
    }

    /// The virtual clock table.
    #[must_use]
    pub fn virtuals(&self) -> &VirtualClockTable<H> {
        &self.virtuals
    }

    /// Number of open hardware clocks.
    #[must_use]
    pub fn hardware_count(&self) -> usize {
        self.hardware.len()
    }

    fn phc(&self, fd: RawFd) -> Result<&PhcClock> {
        self.hardware
            .get(&fd)
            .ok_or_else(|| not_open(ClockHandle::Hardware(fd)))
    }
}

fn not_open(handle: ClockHandle) -> NetError {
    NetError::clock(handle.to_string(), "clock is not opened")
}
