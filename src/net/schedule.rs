//! Loop deadline computation.

/// How long the next wait may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// The deadline already passed; fire the timeout now
    Missed,
    /// Block for at most this many nanoseconds
    For(i64),
}

/// Periodic tick plus extra timeouts requested between ticks.
#[derive(Debug, Clone)]
pub struct Deadline {
    interval: i64,
    next: Option<i64>,
}

impl Deadline {
    /// Create a schedule with a periodic `interval_ns`.
    #[must_use]
    pub fn new(interval_ns: i64) -> Self {
        Self {
            interval: interval_ns.max(1),
            next: None,
        }
    }

    /// The next multiple of the interval strictly after `now`.
    #[must_use]
    pub fn next_tick(&self, now: i64) -> i64 {
        (now.div_euclid(self.interval) + 1) * self.interval
    }

    /// Compute the wait at `now`, arming the periodic tick if nothing is set.
    ///
    /// A missed deadline is cleared and reported as [`Wait::Missed`].
    pub fn wait(&mut self, now: i64) -> Wait {
        match self.next {
            Some(next) if next < now => {
                tracing::debug!(missed_ns = now - next, "deadline already passed");
                self.next = None;
                Wait::Missed
            }
            Some(next) => Wait::For(next - now),
            None => {
                let next = self.next_tick(now);
                self.next = Some(next);
                Wait::For(next - now)
            }
        }
    }

    /// Pull the deadline in to `now + delay_ns`; never pushes it out.
    ///
    /// With no deadline armed, the periodic tick is armed first.
    pub fn extra_timeout(&mut self, now: i64, delay_ns: i64) {
        let wanted = now + delay_ns;
        let current = self.next.unwrap_or_else(|| self.next_tick(now));
        self.next = Some(current.min(wanted));
    }

    /// Forget the deadline; the next wait re-arms the periodic tick.
    pub fn clear(&mut self) {
        self.next = None;
    }

    /// The armed deadline, if any.
    #[must_use]
    pub fn next(&self) -> Option<i64> {
        self.next
    }

    /// Periodic interval in nanoseconds.
    #[must_use]
    pub fn interval(&self) -> i64 {
        self.interval
    }
}
