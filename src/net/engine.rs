//! The event loop.
//!
//! [`Engine`] owns a [`Transport`] (devices, link monitor, IPC server,
//! clocks, loop deadline) and an [`EventHandler`]. Every callback gets the
//! transport back, so a handler can send frames or answer IPC requests
//! from inside an event.
//!
//! Device indices in the [`Transport`] API are 0-based. The `port_index`
//! passed to callbacks is the device index plus one; 0 is reserved for
//! timeouts.

use std::os::fd::{AsFd, BorrowedFd};
use std::sync::atomic::{AtomicBool, Ordering};

use super::device::{self, ClockPathResolver, Device, ReadStatus, SysfsResolver};
use super::event::{LinkState, NetEvent};
use super::netlink::{self, LinkMonitor};
use super::schedule::{Deadline, Wait};
use super::socket;
use crate::clock::{ClockHandle, ClockTable};
use crate::error::{NetError, Result};
use crate::ipc::{IPC_MAX_DATAGRAM, IpcAddr, IpcServer};
use crate::protocol::ethernet::{GPTP_FRAME_SIZE, clock_id_for_domain, is_virtual_ethdev};
use crate::time::{monotonic_ns, realtime_ns};
use crate::types::NetConfig;

/// What to do with an IPC client after its request was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpcVerdict {
    /// Keep the client registered
    #[default]
    Keep,
    /// Forget the client
    Reject,
}

/// Receiver of engine events, typically the protocol state machines.
pub trait EventHandler {
    /// Handle one event.
    ///
    /// # Errors
    ///
    /// A failure is logged for device events and returned from
    /// [`Engine::run_once`] for timeouts and link events.
    fn on_event(
        &mut self,
        transport: &mut Transport,
        port_index: usize,
        event: &NetEvent,
        event_ts: i64,
    ) -> Result<()>;

    /// Handle one IPC datagram from `from`.
    fn on_ipc(&mut self, _transport: &mut Transport, _data: &[u8], _from: &IpcAddr) -> IpcVerdict {
        IpcVerdict::Keep
    }
}

/// Everything the engine owns except the handler.
#[derive(Debug)]
pub struct Transport {
    config: NetConfig,
    devices: Vec<Device>,
    clocks: ClockTable,
    sync_clock: Option<ClockHandle>,
    deadline: Deadline,
    link_monitor: Option<LinkMonitor>,
    ipc: Option<IpcServer>,
    event_ts: i64,
    pending: Vec<(usize, NetEvent)>,
}

impl Transport {
    fn open(names: &[&str], config: NetConfig, resolver: &dyn ClockPathResolver) -> Result<Self> {
        config.validate()?;
        if names.is_empty() || names.len() > config.max_ports {
            tracing::error!(count = names.len(), max = config.max_ports, "bad number of network devices");
            return Err(NetError::InvalidDeviceCount {
                count: names.len(),
                max: config.max_ports,
            });
        }

        let mut devices = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let overlay_port = if is_virtual_ethdev(name) {
                let port = usize::from(config.ovip_start_port) + 2 * i;
                Some(u16::try_from(port).map_err(|_| NetError::Config {
                    message: format!("overlay port {port} for {name} is out of range"),
                })?)
            } else {
                None
            };
            devices.push(Device::open(name, overlay_port, resolver, &config));
        }

        let clock_paths = devices
            .iter()
            .map(|d| d.has_clock().then(|| d.link().ptpdev.as_str()));
        let Some(first) = device::pick_clock_device(clock_paths, config.master_ptpdev.as_deref())
        else {
            tracing::error!("a PTP device is needed for at least one network device");
            return Err(NetError::NoClockDevice);
        };
        if first > 0 {
            devices.swap(0, first);
        }
        device::inherit_clock_path(&mut devices);

        let mut clocks = ClockTable::new(config.virtual_clock_rate_ppb);
        let sync_clock = if devices.iter().any(Device::is_overlay) {
            let ptpdev = devices[0].link().ptpdev.clone();
            clocks
                .open(&ptpdev)
                .inspect_err(|e| tracing::warn!(%ptpdev, error = %e, "can't open device 0 clock"))
                .ok()
        } else {
            None
        };

        let ipc = IpcServer::from_config(&config)
            .inspect_err(|e| tracing::warn!(error = %e, "IPC server is not available"))
            .ok();

        Ok(Self {
            deadline: Deadline::new(config.interval_timeout_ns),
            config,
            devices,
            clocks,
            sync_clock,
            link_monitor: None,
            ipc,
            event_ts: monotonic_ns(),
            pending: Vec::new(),
        })
    }

    fn device(&self, index: usize) -> Result<&Device> {
        self.devices.get(index).ok_or(NetError::NoSuchDevice { index })
    }

    fn device_mut(&mut self, index: usize) -> Result<&mut Device> {
        self.devices.get_mut(index).ok_or(NetError::NoSuchDevice { index })
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Number of devices.
    #[must_use]
    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }

    /// All devices, clock device first.
    #[must_use]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Payload area of a device's send buffer, after the Ethernet header.
    ///
    /// # Errors
    ///
    /// Returns `NetError::NoSuchDevice` for a bad index.
    pub fn send_buffer_mut(&mut self, index: usize) -> Result<&mut [u8]> {
        Ok(self.device_mut(index)?.payload_mut())
    }

    /// Send `len` payload bytes from the send buffer of device `index`.
    ///
    /// Returns the number of frame bytes written, Ethernet header included.
    ///
    /// A deferred send pulls the loop deadline in so the caller gets a
    /// timeout to retry on.
    ///
    /// # Errors
    ///
    /// `SendDeferred` when the pacer refuses, `PeerDown` when an overlay
    /// peer refuses, `FrameTooLarge` or the OS error.
    pub fn send(&mut self, index: usize, len: usize) -> Result<usize> {
        let now = monotonic_ns();
        let mut events = Vec::new();
        let result = self.device_mut(index)?.send(index, now, len, &mut events);
        self.pending.extend(events.into_iter().map(|e| (index + 1, e)));
        if result.as_ref().is_err_and(NetError::is_deferral) {
            self.deadline.extra_timeout(now, self.config.extra_timeout_ns);
        }
        result
    }

    /// Clock path of device `index`.
    #[must_use]
    pub fn ptpdev(&self, index: usize) -> Option<&str> {
        self.devices.get(index).map(|d| d.link().ptpdev.as_str())
    }

    /// Port identity of device `index`.
    #[must_use]
    pub fn port_id(&self, index: usize) -> Option<[u8; 8]> {
        self.devices.get(index).map(|d| d.link().port_id)
    }

    /// Clock identity of device `index` in `domain`.
    #[must_use]
    pub fn clock_id(&self, index: usize, domain: u8) -> Option<[u8; 8]> {
        self.port_id(index).map(|id| clock_id_for_domain(&id, domain))
    }

    /// Cached link snapshot of device `index`.
    ///
    /// # Errors
    ///
    /// Returns `NetError::NoSuchDevice` for a bad index.
    pub fn link_state(&self, index: usize) -> Result<LinkState> {
        Ok(self.device(index)?.link().clone())
    }

    /// Time after which a missing TX timestamp of device `index` is lost.
    #[must_use]
    pub fn txts_lost_time(&self, index: usize) -> Option<i64> {
        self.devices.get(index).map(Device::txts_lost_time)
    }

    /// Ask for a timeout within `delay_ns` (the configured extra timeout
    /// when `None`).
    pub fn extra_timeout(&mut self, delay_ns: Option<i64>) {
        let delay = delay_ns.unwrap_or(self.config.extra_timeout_ns);
        self.deadline.extra_timeout(monotonic_ns(), delay);
    }

    /// The armed loop deadline, monotonic nanoseconds.
    #[must_use]
    pub fn next_deadline(&self) -> Option<i64> {
        self.deadline.next()
    }

    /// Monotonic time of the last loop wakeup.
    #[must_use]
    pub fn event_ts(&self) -> i64 {
        self.event_ts
    }

    /// Broadcast to every IPC client; returns how many were reached.
    pub fn ipc_notify(&mut self, data: &[u8]) -> usize {
        self.ipc.as_mut().map_or(0, |ipc| ipc.notify(data))
    }

    /// Send to one IPC client.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Ipc` if there is no server or the send fails.
    pub fn ipc_respond(&self, addr: &IpcAddr, data: &[u8]) -> Result<()> {
        self.ipc
            .as_ref()
            .ok_or_else(|| NetError::ipc("no IPC server", None))?
            .respond(addr, data)
    }

    /// Forget an IPC client; returns whether it was registered.
    pub fn ipc_remove(&mut self, addr: &IpcAddr) -> bool {
        self.ipc.as_mut().is_some_and(|ipc| ipc.remove(addr))
    }

    /// The IPC server, if it could be bound.
    #[must_use]
    pub fn ipc(&self) -> Option<&IpcServer> {
        self.ipc.as_ref()
    }

    /// Clock table shared by the protocol layer.
    pub fn clocks(&mut self) -> &mut ClockTable {
        &mut self.clocks
    }

    fn read_device(
        &mut self,
        index: usize,
        buf: &mut [u8],
        events: &mut Vec<NetEvent>,
    ) -> Result<ReadStatus> {
        let Self {
            devices,
            clocks,
            sync_clock,
            ..
        } = self;
        let device = devices.get_mut(index).ok_or(NetError::NoSuchDevice { index })?;
        let mut sync_offset = || {
            sync_clock.map_or(0, |h| match clocks.read(h) {
                Ok(c) => c - realtime_ns(),
                Err(e) => {
                    tracing::warn!(error = %e, "can't read device 0 clock");
                    0
                }
            })
        };
        device.read(buf, events, &mut sync_offset)
    }

    fn link_changes(&mut self) -> Result<Vec<(usize, NetEvent)>> {
        let Some(monitor) = self.link_monitor.as_ref() else {
            return Ok(Vec::new());
        };
        let mut changes = Vec::new();
        for msg in monitor.read_links()? {
            let Some(name) = msg.name() else { continue };
            tracing::debug!(%name, flags = msg.flags, "netlink link message");
            let Some(index) = self.devices.iter().position(|d| d.name() == name) else {
                continue;
            };
            let device = &mut self.devices[index];
            let candidate = netlink::candidate_state(device.link(), msg.is_running(), &*device);
            if let Some(event) = netlink::apply_state(device.link_mut(), candidate) {
                changes.push((index + 1, event));
            }
        }
        Ok(changes)
    }
}

/// The network transport and timestamping engine.
pub struct Engine<H: EventHandler> {
    transport: Transport,
    handler: H,
    rx_buf: Vec<u8>,
}

impl<H: EventHandler> std::fmt::Debug for Engine<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl<H: EventHandler> Engine<H> {
    /// Open every interface in `names`, resolving clocks through sysfs.
    ///
    /// # Errors
    ///
    /// `Config` for out-of-range configuration values,
    /// `InvalidDeviceCount` for zero or too many names, `NoClockDevice`
    /// when no opened interface has a clock.
    pub fn open(names: &[&str], config: NetConfig, handler: H) -> Result<Self> {
        Self::open_with_resolver(names, config, handler, &SysfsResolver::default())
    }

    /// Open every interface in `names` with a custom clock resolver.
    ///
    /// # Errors
    ///
    /// See [`Engine::open`].
    pub fn open_with_resolver(
        names: &[&str],
        config: NetConfig,
        handler: H,
        resolver: &dyn ClockPathResolver,
    ) -> Result<Self> {
        let transport = Transport::open(names, config, resolver)?;
        Ok(Self {
            transport,
            handler,
            rx_buf: vec![0; GPTP_FRAME_SIZE],
        })
    }

    /// Report the initial link state of every device, then start link
    /// monitoring.
    ///
    /// # Errors
    ///
    /// Returns `NetError::Netlink` if the monitor socket can't be opened.
    pub fn activate(&mut self) -> Result<()> {
        for index in 0..self.transport.devices.len() {
            if let Some(event) = self.transport.devices[index].activate() {
                if let Err(e) = self.dispatch(index + 1, &event) {
                    tracing::warn!(index, error = %e, "DEVUP handler failed");
                }
            }
        }
        self.transport.link_monitor = Some(LinkMonitor::open()?);
        Ok(())
    }

    /// The handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// The handler, mutably.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// The transport.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// The transport, mutably.
    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    /// Consume the engine, closing every socket, and return the handler.
    pub fn into_handler(self) -> H {
        self.handler
    }

    fn dispatch(&mut self, port_index: usize, event: &NetEvent) -> Result<()> {
        tracing::trace!(port_index, kind = %event.kind(), "event");
        let ts = self.transport.event_ts;
        self.handler
            .on_event(&mut self.transport, port_index, event, ts)
    }

    fn dispatch_pending(&mut self) {
        for (port_index, event) in std::mem::take(&mut self.transport.pending) {
            if let Err(e) = self.dispatch(port_index, &event) {
                tracing::warn!(port_index, error = %e, "handler failed");
            }
        }
    }

    /// Run one loop iteration: wait, then dispatch whatever is ready.
    ///
    /// # Errors
    ///
    /// Errors of the timeout handler, the link monitor and the IPC path are
    /// returned. Device errors are logged and don't stop other devices.
    pub fn run_once(&mut self) -> Result<()> {
        self.dispatch_pending();

        let now = monotonic_ns();
        let timeout = match self.transport.deadline.wait(now) {
            Wait::Missed => {
                tracing::debug!("call missed or extra TIMEOUT");
                self.transport.event_ts = now;
                return self.dispatch(0, &NetEvent::Timeout);
            }
            Wait::For(ns) => ns,
        };

        let ready = {
            let t = &self.transport;
            let mut fds: Vec<BorrowedFd<'_>> =
                t.devices.iter().filter_map(Device::socket).collect();
            if let Some(monitor) = &t.link_monitor {
                fds.push(monitor.as_fd());
            }
            if let Some(ipc) = &t.ipc {
                fds.push(ipc.as_fd());
            }
            match socket::poll_readable(&fds, timeout) {
                Ok(ready) => ready,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return Ok(()),
                Err(e) => {
                    tracing::error!(error = %e, "poll failed");
                    return Err(e.into());
                }
            }
        };
        self.transport.event_ts = monotonic_ns();

        if !ready.iter().any(|&r| r) {
            self.transport.deadline.clear();
            return self.dispatch(0, &NetEvent::Timeout);
        }

        let open: Vec<usize> = (0..self.transport.devices.len())
            .filter(|&i| self.transport.devices[i].is_open())
            .collect();
        let mut slot = open.len();
        let link_ready = if self.transport.link_monitor.is_some() {
            slot += 1;
            ready[slot - 1]
        } else {
            false
        };
        let ipc_ready = self.transport.ipc.is_some() && ready[slot];

        let mut result = Ok(());
        if link_ready {
            match self.transport.link_changes() {
                Ok(changes) => {
                    for (port_index, event) in changes {
                        if let Err(e) = self.dispatch(port_index, &event) {
                            result = Err(e);
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "link monitor read failed");
                    result = Err(e);
                }
            }
        }

        for (slot, &index) in open.iter().enumerate() {
            if ready[slot] {
                self.drain_device(index);
            }
        }

        if ipc_ready {
            if let Err(e) = self.read_ipc() {
                result = Err(e);
            }
        }
        result
    }

    fn drain_device(&mut self, index: usize) {
        let mut buf = std::mem::take(&mut self.rx_buf);
        let mut events = Vec::new();
        loop {
            let status = self.transport.read_device(index, &mut buf, &mut events);
            for event in events.drain(..) {
                if let Err(e) = self.dispatch(index + 1, &event) {
                    tracing::warn!(index, kind = %event.kind(), error = %e, "handler failed");
                }
            }
            match status {
                Ok(ReadStatus::Data) => {}
                Ok(ReadStatus::Empty | ReadStatus::PeerWaiting) => break,
                Err(e) if e.is_frame_fault() => {
                    tracing::warn!(index, error = %e, "dropping frame");
                }
                Err(e) => {
                    tracing::error!(index, error = %e, "device read failed");
                    break;
                }
            }
        }
        self.rx_buf = buf;
    }

    fn read_ipc(&mut self) -> Result<()> {
        let mut buf = [0u8; IPC_MAX_DATAGRAM];
        let Some(ipc) = self.transport.ipc.as_mut() else {
            return Ok(());
        };
        let Some((len, from)) = ipc.recv(&mut buf)? else {
            return Ok(());
        };
        let verdict = self
            .handler
            .on_ipc(&mut self.transport, &buf[..len], &from);
        if verdict == IpcVerdict::Reject {
            self.transport.ipc_remove(&from);
        }
        Ok(())
    }

    /// Run until `stop` is set; checked once per iteration.
    ///
    /// Iteration errors are logged and the loop goes on.
    pub fn run(&mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            if let Err(e) = self.run_once() {
                tracing::error!(error = %e, "event loop iteration failed");
            }
        }
    }
}
