//! Simulated PTP clocks for interfaces without clock hardware.
//!
//! A virtual clock keeps only the last host sample `h0` and the clock
//! value `c0` computed for it. Each read applies the *current* rate to the
//! interval since the previous read:
//!
//! ```text
//! dh = h1 - h0
//! c1 = c0 + dh + dh * rate_ppb / 1e9
//! ```
//!
//! so changing the rate never rewrites time that has already elapsed.

use std::collections::BTreeMap;

use crate::error::{NetError, Result};
use crate::protocol::ethernet::VIRTUAL_PTPDEV_PREFIX;
use crate::time::{self, NSEC_PER_SEC};

/// First handle given to a virtual clock.
pub const VIRTUAL_CLOCK_HANDLE_BASE: i32 = 3018;

/// Last handle given to a virtual clock.
pub const VIRTUAL_CLOCK_HANDLE_MAX: i32 = 3117;

/// Number of virtual clocks that can be open at once.
pub const MAX_VIRTUAL_CLOCKS: usize = (VIRTUAL_CLOCK_HANDLE_MAX - VIRTUAL_CLOCK_HANDLE_BASE + 1) as usize;

/// Source of host time for virtual clocks.
pub trait HostClock {
    /// Current host time in nanoseconds.
    fn now_ns(&self) -> i64;
}

/// `CLOCK_REALTIME` as the host time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealtimeHost;

impl HostClock for RealtimeHost {
    fn now_ns(&self) -> i64 {
        time::realtime_ns()
    }
}

/// Whether a handle value lies in the virtual clock range.
#[must_use]
pub fn is_virtual_handle(handle: i32) -> bool {
    (VIRTUAL_CLOCK_HANDLE_BASE..=VIRTUAL_CLOCK_HANDLE_MAX).contains(&handle)
}

/// Whether a virtual clock name grants write access (`cbptpw*`).
#[must_use]
pub fn is_writable_name(name: &str) -> bool {
    name.strip_prefix(VIRTUAL_PTPDEV_PREFIX)
        .is_some_and(|rest| rest.starts_with('w'))
}

#[derive(Debug, Clone)]
struct VirtualClockEntry {
    name: String,
    rate_ppb: i64,
    // (host time, clock value) of the last sample; None until the first read
    baseline: Option<(i64, i64)>,
    writable: bool,
    users: usize,
}

/// Reference counted table of virtual clocks keyed by handle.
#[derive(Debug)]
pub struct VirtualClockTable<H: HostClock = RealtimeHost> {
    host: H,
    base_rate_ppb: i64,
    entries: BTreeMap<i32, VirtualClockEntry>,
}

impl Default for VirtualClockTable<RealtimeHost> {
    fn default() -> Self {
        Self::new(RealtimeHost, 0)
    }
}

impl<H: HostClock> VirtualClockTable<H> {
    /// Create an empty table.
    ///
    /// `base_rate_ppb` is added to the rate of every clock.
    pub fn new(host: H, base_rate_ppb: i64) -> Self {
        Self {
            host,
            base_rate_ppb,
            entries: BTreeMap::new(),
        }
    }

    /// Open a clock by name.
    ///
    /// Opening a name that is already open returns the same handle and
    /// bumps its reference count.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Clock` when every handle in the range is taken.
    pub fn open(&mut self, name: &str) -> Result<i32> {
        if let Some((&handle, entry)) = self.entries.iter_mut().find(|(_, e)| e.name == name) {
            entry.users += 1;
            tracing::trace!(name, handle, users = entry.users, "virtual clock reopened");
            return Ok(handle);
        }

        let handle = (VIRTUAL_CLOCK_HANDLE_BASE..=VIRTUAL_CLOCK_HANDLE_MAX)
            .find(|h| !self.entries.contains_key(h))
            .ok_or_else(|| {
                NetError::clock(name, format!("more than {MAX_VIRTUAL_CLOCKS} virtual clocks"))
            })?;

        let writable = is_writable_name(name);
        self.entries.insert(
            handle,
            VirtualClockEntry {
                name: name.to_string(),
                rate_ppb: 0,
                baseline: None,
                writable,
                users: 1,
            },
        );
        tracing::debug!(name, handle, writable, "virtual clock opened");
        Ok(handle)
    }

    /// Drop one reference; the entry is freed when the last one goes.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Clock` if the handle is not open.
    pub fn close(&mut self, handle: i32) -> Result<()> {
        let entry = self.entry_mut(handle)?;
        entry.users -= 1;
        if entry.users == 0 {
            let name = entry.name.clone();
            self.entries.remove(&handle);
            tracing::debug!(name, handle, "virtual clock freed");
        }
        Ok(())
    }

    /// Read the clock and advance its baseline.
    ///
    /// The first read after opening returns the host time.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Clock` if the handle is not open.
    pub fn read(&mut self, handle: i32) -> Result<i64> {
        let now = self.host.now_ns();
        let base_rate = self.base_rate_ppb;
        let entry = self.entry_mut(handle)?;

        let Some((h0, c0)) = entry.baseline else {
            entry.baseline = Some((now, now));
            return Ok(now);
        };

        let rate = if entry.writable {
            entry.rate_ppb + base_rate
        } else {
            base_rate
        };
        let dh = now - h0;
        let c1 = c0 + dh + scale_ppb(dh, rate);
        entry.baseline = Some((now, c1));
        Ok(c1)
    }

    /// Set the clock to `value`, restarting the rate interval now.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Clock` if the handle is not open or read-only.
    pub fn write(&mut self, handle: i32, value: i64) -> Result<()> {
        let now = self.host.now_ns();
        let entry = self.writable_entry_mut(handle)?;
        entry.baseline = Some((now, value));
        Ok(())
    }

    /// Set the frequency offset in parts per billion.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Clock` if the handle is not open or read-only.
    pub fn set_rate(&mut self, handle: i32, ppb: i64) -> Result<()> {
        let entry = self.writable_entry_mut(handle)?;
        entry.rate_ppb = ppb;
        Ok(())
    }

    /// Number of open entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no clock is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reference count of a handle, 0 if it is not open.
    #[must_use]
    pub fn users(&self, handle: i32) -> usize {
        self.entries.get(&handle).map_or(0, |e| e.users)
    }

    fn entry_mut(&mut self, handle: i32) -> Result<&mut VirtualClockEntry> {
        self.entries
            .get_mut(&handle)
            .ok_or_else(|| NetError::clock(handle.to_string(), "virtual clock is not opened"))
    }

    fn writable_entry_mut(&mut self, handle: i32) -> Result<&mut VirtualClockEntry> {
        let entry = self.entry_mut(handle)?;
        if entry.writable {
            Ok(entry)
        } else {
            Err(NetError::clock(entry.name.clone(), "virtual clock is read-only"))
        }
    }
}

/// `dh * ppb / 1e9`, truncated toward zero.
#[allow(
    clippy::cast_possible_truncation,
    reason = "the product of an interval and a ppb rate divided by 1e9 fits in i64"
)]
fn scale_ppb(dh: i64, ppb: i64) -> i64 {
    (i128::from(dh) * i128::from(ppb) / i128::from(NSEC_PER_SEC)) as i64
}
