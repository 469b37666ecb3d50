use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{NetError, Result};

/// Default path of the Unix domain IPC server node
pub const DEFAULT_IPC_NODE: &str = "/tmp/gptp2d_ipc";

/// Hard limit on the number of network ports
pub const MAX_PORT_NUMBER_LIMIT: usize = 33;

/// Configuration for the network/timestamp engine.
///
/// Time values are nanoseconds, matching the daemon's configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Give up waiting for a TX timestamp after this time (default: 20ms)
    pub txts_lost_time_ns: i64,

    /// Quiet period after every send on a device (default: 300us)
    pub aftersend_guard_time_ns: i64,

    /// Delay of the retry timeout scheduled by a deferred send (default: 1ms)
    pub extra_timeout_ns: i64,

    /// Period of the TIMEOUT event (default: 125ms)
    pub interval_timeout_ns: i64,

    /// First UDP port used by overlay devices (default: 5018)
    pub ovip_start_port: u16,

    /// Non-zero selects a UDP IPC server on this port (default: 0)
    pub ipc_udp_port: u16,

    /// Path of the Unix domain IPC server node
    pub ipc_node: PathBuf,

    /// Maximum number of registered IPC clients (default: 8)
    pub max_ipc_clients: usize,

    /// Prefer the interface whose PTP clock has this path as device 0
    pub master_ptpdev: Option<String>,

    /// Rate offset applied to every virtual clock, in ppb (default: 0)
    pub virtual_clock_rate_ppb: i64,

    /// Maximum number of network devices (default: 33)
    pub max_ports: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            txts_lost_time_ns: 20_000_000,
            aftersend_guard_time_ns: 300_000,
            extra_timeout_ns: 1_000_000,
            interval_timeout_ns: 125_000_000,
            ovip_start_port: 5018,
            ipc_udp_port: 0,
            ipc_node: PathBuf::from(DEFAULT_IPC_NODE),
            max_ipc_clients: 8,
            master_ptpdev: None,
            virtual_clock_rate_ppb: 0,
            max_ports: MAX_PORT_NUMBER_LIMIT,
        }
    }
}

impl NetConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> NetConfigBuilder {
        NetConfigBuilder::default()
    }

    /// Parse a JSON document; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Config` if the document is malformed or a value is
    /// out of range.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| NetError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Config` if the file can't be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| NetError::Config {
            message: format!("{}: {e}", path.display()),
        })?;
        Self::from_json_str(&text)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Config` naming the first bad value.
    pub fn validate(&self) -> Result<()> {
        let bad = |message: String| Err(NetError::Config { message });
        if self.interval_timeout_ns <= 0 {
            return bad(format!(
                "interval_timeout_ns must be positive, got {}",
                self.interval_timeout_ns
            ));
        }
        if self.extra_timeout_ns <= 0 {
            return bad(format!(
                "extra_timeout_ns must be positive, got {}",
                self.extra_timeout_ns
            ));
        }
        if self.aftersend_guard_time_ns < 0 {
            return bad(format!(
                "aftersend_guard_time_ns must not be negative, got {}",
                self.aftersend_guard_time_ns
            ));
        }
        // the pacer gives up 1ms earlier than this
        if self.txts_lost_time_ns <= 1_000_000 {
            return bad(format!(
                "txts_lost_time_ns must be above 1ms, got {}",
                self.txts_lost_time_ns
            ));
        }
        if self.max_ports == 0 || self.max_ports > MAX_PORT_NUMBER_LIMIT {
            return bad(format!(
                "max_ports must be in 1..={MAX_PORT_NUMBER_LIMIT}, got {}",
                self.max_ports
            ));
        }
        if self.max_ipc_clients == 0 {
            return bad("max_ipc_clients must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Builder for `NetConfig`
#[derive(Debug, Clone, Default)]
pub struct NetConfigBuilder {
    config: NetConfig,
}

impl NetConfigBuilder {
    /// Set the TX timestamp loss time
    #[must_use]
    pub fn txts_lost_time_ns(mut self, ns: i64) -> Self {
        self.config.txts_lost_time_ns = ns;
        self
    }

    /// Set the after-send guard time
    #[must_use]
    pub fn aftersend_guard_time_ns(mut self, ns: i64) -> Self {
        self.config.aftersend_guard_time_ns = ns;
        self
    }

    /// Set the retry timeout used after a deferred send
    #[must_use]
    pub fn extra_timeout_ns(mut self, ns: i64) -> Self {
        self.config.extra_timeout_ns = ns;
        self
    }

    /// Set the periodic TIMEOUT interval
    #[must_use]
    pub fn interval_timeout_ns(mut self, ns: i64) -> Self {
        self.config.interval_timeout_ns = ns;
        self
    }

    /// Set the first overlay UDP port
    #[must_use]
    pub fn ovip_start_port(mut self, port: u16) -> Self {
        self.config.ovip_start_port = port;
        self
    }

    /// Use a UDP IPC server on `port` (0 selects the Unix domain server)
    #[must_use]
    pub fn ipc_udp_port(mut self, port: u16) -> Self {
        self.config.ipc_udp_port = port;
        self
    }

    /// Set the Unix domain IPC node path
    #[must_use]
    pub fn ipc_node(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ipc_node = path.into();
        self
    }

    /// Set the IPC client limit
    #[must_use]
    pub fn max_ipc_clients(mut self, max: usize) -> Self {
        self.config.max_ipc_clients = max;
        self
    }

    /// Prefer the interface with this PTP clock as device 0
    #[must_use]
    pub fn master_ptpdev(mut self, ptpdev: impl Into<String>) -> Self {
        self.config.master_ptpdev = Some(ptpdev.into());
        self
    }

    /// Set the rate offset applied to every virtual clock
    #[must_use]
    pub fn virtual_clock_rate_ppb(mut self, ppb: i64) -> Self {
        self.config.virtual_clock_rate_ppb = ppb;
        self
    }

    /// Set the device limit
    #[must_use]
    pub fn max_ports(mut self, max: usize) -> Self {
        self.config.max_ports = max;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> NetConfig {
        self.config
    }
}
