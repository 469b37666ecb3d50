use std::io;
use thiserror::Error;

/// Why a send was refused by the pacer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// The after-send guard window of the previous frame is still open
    GuardTime,
    /// An event message is still waiting for its TX timestamp
    AwaitingTxTimestamp,
}

impl std::fmt::Display for DeferReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GuardTime => write!(f, "guard time"),
            Self::AwaitingTxTimestamp => write!(f, "awaiting TX timestamp"),
        }
    }
}

/// Errors that can occur in the network/timestamp engine
#[derive(Debug, Error)]
pub enum NetError {
    // ===== Initialization Errors =====
    /// None of the configured interfaces resolved a PTP clock
    #[error("a PTP clock device is needed for at least one network device")]
    NoClockDevice,

    /// Zero or too many interfaces were requested
    #[error("invalid number of network devices: {count} (allowed 1..={max})")]
    InvalidDeviceCount {
        /// Number of requested interfaces
        count: usize,
        /// Upper limit
        max: usize,
    },

    /// An interface could not be bound
    #[error("network device {device} can't be opened: {message}")]
    DeviceOpen {
        /// Interface name
        device: String,
        /// Description of the failure
        message: String,
        /// The underlying source of the error
        #[source]
        source: Option<io::Error>,
    },

    /// A device index outside the registry was used
    #[error("device index {index} doesn't exist")]
    NoSuchDevice {
        /// The offending index
        index: usize,
    },

    // ===== Send Path Errors =====
    /// The pacer refused the send, retry shortly
    #[error("send on device {index} deferred by {reason}")]
    SendDeferred {
        /// Device index
        index: usize,
        /// Why the send was refused
        reason: DeferReason,
    },

    /// The requested frame does not fit in the send buffer
    #[error("frame length {length} is too big (max {max})")]
    FrameTooLarge {
        /// Requested payload length
        length: usize,
        /// Maximum payload length
        max: usize,
    },

    /// The simulated peer of an overlay device is not listening
    #[error("peer of device {index} is down")]
    PeerDown {
        /// Device index
        index: usize,
    },

    // ===== Receive Path Errors =====
    /// A received or looped-back frame could not be used
    #[error("malformed frame: {message}")]
    MalformedFrame {
        /// Description of the problem
        message: String,
    },

    /// An event message arrived without any usable timestamp
    #[error("no timestamp for message type {msgtype}")]
    NoTimestamp {
        /// PTP message type
        msgtype: u8,
    },

    // ===== Side Channel Errors =====
    /// The link monitor socket reported an error or unreadable data
    #[error("netlink error: {message}")]
    Netlink {
        /// Description of the error
        message: String,
    },

    /// IPC server or client error
    #[error("IPC error: {message}")]
    Ipc {
        /// Description of the error
        message: String,
        /// The underlying source of the error
        #[source]
        source: Option<io::Error>,
    },

    // ===== Clock Errors =====
    /// A clock operation failed
    #[error("clock error on {device}: {message}")]
    Clock {
        /// Clock device name or handle
        device: String,
        /// Description of the error
        message: String,
    },

    // ===== Other =====
    /// Invalid configuration value or file
    #[error("configuration error: {message}")]
    Config {
        /// Description of the error
        message: String,
    },

    /// The event handler reported a failure
    #[error("event handler failed: {message}")]
    Handler {
        /// Description of the failure
        message: String,
    },

    /// Socket I/O error
    #[error("network error: {0}")]
    Io(#[from] io::Error),
}

impl NetError {
    /// Check if this error only means "no data now"
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Check if this error is a pacing deferral the caller should retry
    #[must_use]
    pub fn is_deferral(&self) -> bool {
        matches!(self, Self::SendDeferred { .. })
    }

    /// Check if this error belongs to a single frame and can be skipped
    #[must_use]
    pub fn is_frame_fault(&self) -> bool {
        matches!(
            self,
            Self::MalformedFrame { .. } | Self::NoTimestamp { .. }
        )
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    pub(crate) fn clock(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Clock {
            device: device.into(),
            message: message.into(),
        }
    }

    pub(crate) fn ipc(message: impl Into<String>, source: Option<io::Error>) -> Self {
        Self::Ipc {
            message: message.into(),
            source,
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, NetError>;
