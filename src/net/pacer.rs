//! Per-device send pacing.
//!
//! Many NICs hold a single TX timestamp slot, so a second event message sent
//! before the first one's timestamp is collected loses a timestamp. The pacer
//! enforces a guard window after every send and keeps event messages back
//! while a TX timestamp is outstanding.

use crate::error::DeferReason;
use crate::protocol::message::is_event_type;
use crate::time::NSEC_PER_MSEC;

/// Observable pacer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerState {
    /// Sends are accepted
    Idle,
    /// The guard window of the last send is open
    GuardWait,
    /// An event message is waiting for its TX timestamp
    AwaitingTxTimestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Awaiting {
    msgtype: u8,
    deadline: i64,
}

/// Guard time and outstanding TX timestamp of one device.
#[derive(Debug, Clone)]
pub struct SendPacer {
    guard_ns: i64,
    txts_lost_ns: i64,
    guard_until: i64,
    awaiting: Option<Awaiting>,
}

impl SendPacer {
    /// Create a pacer.
    ///
    /// `txts_lost_ns` is the time after which a missing TX timestamp is
    /// given up; the pacer stops waiting one millisecond earlier so the
    /// protocol layer can still resend within its own timeout.
    #[must_use]
    pub fn new(guard_ns: i64, txts_lost_ns: i64) -> Self {
        Self {
            guard_ns,
            txts_lost_ns,
            guard_until: 0,
            awaiting: None,
        }
    }

    /// Decide whether a frame of `msgtype` may go out at `now`.
    ///
    /// An expired wait for a TX timestamp is abandoned here, with a log.
    ///
    /// # Errors
    ///
    /// Returns the reason the send has to be retried later.
    pub fn check(&mut self, now: i64, msgtype: u8) -> Result<(), DeferReason> {
        if is_event_type(msgtype) {
            if let Some(awaiting) = self.awaiting {
                if now > awaiting.deadline {
                    tracing::info!(
                        msgtype = awaiting.msgtype,
                        overdue_ns = now - awaiting.deadline,
                        "TX timestamp never arrived, sending anyway"
                    );
                    self.awaiting = None;
                } else {
                    tracing::debug!(msgtype, "waiting for TX timestamp");
                    return Err(DeferReason::AwaitingTxTimestamp);
                }
            }
        }
        if now < self.guard_until {
            tracing::debug!(msgtype, remaining_ns = self.guard_until - now, "in guard time");
            return Err(DeferReason::GuardTime);
        }
        Ok(())
    }

    /// Record a successful send at `now`.
    pub fn on_sent(&mut self, now: i64, msgtype: u8) {
        self.guard_until = now + self.guard_ns;
        if is_event_type(msgtype) {
            self.awaiting = Some(Awaiting {
                msgtype,
                deadline: now + self.txts_lost_ns - NSEC_PER_MSEC,
            });
        }
    }

    /// Close the guard window early; any error-queue completion does this.
    pub fn release_guard(&mut self) {
        self.guard_until = 0;
    }

    /// A TX timestamp arrived: stop waiting and release the guard.
    pub fn on_tx_timestamp(&mut self) {
        self.awaiting = None;
        self.release_guard();
    }

    /// State at `now`; awaiting takes precedence over the guard window.
    #[must_use]
    pub fn state(&self, now: i64) -> PacerState {
        match self.awaiting {
            Some(a) if now <= a.deadline => PacerState::AwaitingTxTimestamp,
            _ if now < self.guard_until => PacerState::GuardWait,
            _ => PacerState::Idle,
        }
    }

    /// End of the current guard window (0 if none was set).
    #[must_use]
    pub fn guard_until(&self) -> i64 {
        self.guard_until
    }

    /// Deadline of the outstanding TX timestamp, if any.
    #[must_use]
    pub fn awaiting_deadline(&self) -> Option<i64> {
        self.awaiting.map(|a| a.deadline)
    }
}
