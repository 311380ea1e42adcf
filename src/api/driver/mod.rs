pub mod handle;
pub mod traits;

use anyhow::{anyhow, Result};
use std::{sync::Arc, time::Duration};

pub use handle::{AuroraDriver, DriverEvent, DriverHandle};
pub use traits::{
    BinaryTarget, ClimateTarget, LoggingTarget, NoOpTarget, NumericTarget, SwitchTarget,
    TextTarget,
};

use crate::protocol::{
    engine::{binding::BindingTableBuilder, scheduler::CycleReport, SchedulerConfig},
    transport::{FlowControl, FlowControlLine, FlowControlPin, SerialSettings, SerialTransport, Transport},
};

/// Default time between the start of two poll cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Builder for a polling driver.
///
/// # Middleware Pattern
///
/// Hooks added with `.add_hook()` run in order around every poll cycle. A
/// failing hook is logged and never stops polling.
///
/// # Example
///
/// ```no_run
/// use aurora_link::api::driver::{DriverBuilder, LoggingTarget};
/// use aurora_link::protocol::aurora::RegisterEncoding;
/// use std::sync::Arc;
///
/// let driver = DriverBuilder::new()
///     .with_port("/dev/ttyUSB0")
///     .with_bindings(|b| {
///         b.add_numeric(
///             "entering_water_temperature",
///             1111,
///             RegisterEncoding::SignedTenths,
///             Arc::new(LoggingTarget::new("ewt")),
///         );
///     })
///     .build()?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct DriverBuilder {
    port_name: Option<String>,
    serial: SerialSettings,
    flow_control: FlowControl,
    poll_interval: Duration,
    scheduler: SchedulerConfig,
    hooks: Vec<Arc<dyn DriverHook>>,
    bindings: BindingTableBuilder,
}

impl Default for DriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverBuilder {
    pub fn new() -> Self {
        Self {
            port_name: None,
            serial: SerialSettings::default(),
            flow_control: FlowControl::None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            scheduler: SchedulerConfig::default(),
            hooks: Vec::new(),
            bindings: BindingTableBuilder::new(),
        }
    }

    /// Set the serial port name.
    pub fn with_port(mut self, port_name: &str) -> Self {
        self.port_name = Some(port_name.to_string());
        self
    }

    /// Override the 19200 8E1 line settings.
    pub fn with_serial_settings(mut self, settings: SerialSettings) -> Self {
        self.serial = settings;
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.serial.baud_rate = baud_rate;
        self
    }

    /// Drive an RS-485 transceiver's enable input from a modem line.
    pub fn with_flow_control(mut self, line: FlowControlLine) -> Self {
        self.flow_control = FlowControl::Line(line);
        self
    }

    /// Drive the transceiver's enable input from an external pin.
    pub fn with_flow_control_pin(mut self, pin: Box<dyn FlowControlPin>) -> Self {
        self.flow_control = FlowControl::Pin(pin);
        self
    }

    /// Time between the start of two poll cycles. Default: 10 s.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bound on the wait for a single reply. Default: 2 s.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.scheduler.response_timeout = timeout;
        self
    }

    /// Consecutive failed cycles before the link counts as faulted. Default: 3.
    pub fn with_fault_threshold(mut self, threshold: u32) -> Self {
        self.scheduler.fault_threshold = threshold.max(1);
        self
    }

    /// Delay between reconnect attempts while faulted. Default: 5 s.
    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.scheduler.reconnect_backoff = backoff;
        self
    }

    /// Unused registers tolerated inside one read range. Default: 2.
    pub fn with_max_gap(mut self, max_gap: u16) -> Self {
        self.scheduler.plan.max_gap = max_gap;
        self
    }

    /// Pack several ranges into each request. Default: on.
    pub fn with_coalescing(mut self, enabled: bool) -> Self {
        self.scheduler.plan.coalesce_batches = enabled;
        self
    }

    /// Identify the controller and skip registers of absent components. Default: on.
    pub fn with_identification(mut self, enabled: bool) -> Self {
        self.scheduler.identify = enabled;
        self
    }

    /// Add a hook to the middleware chain (can be called multiple times)
    pub fn add_hook(mut self, hook: Arc<dyn DriverHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Register endpoint bindings.
    pub fn with_bindings(mut self, configure: impl FnOnce(&mut BindingTableBuilder)) -> Self {
        configure(&mut self.bindings);
        self
    }

    /// Validate the bindings, open the configured serial port and start polling.
    pub fn build(mut self) -> Result<AuroraDriver> {
        let port_name = self
            .port_name
            .clone()
            .ok_or_else(|| anyhow!("Port name is required. Use with_port()"))?;
        let flow_control = std::mem::replace(&mut self.flow_control, FlowControl::None);
        let transport = SerialTransport::new(&port_name, self.serial, flow_control);
        self.build_with_transport(transport)
    }

    /// Validate the bindings and start polling over `transport`.
    ///
    /// Configuration errors are returned before the transport is touched.
    pub fn build_with_transport<T: Transport + 'static>(self, transport: T) -> Result<AuroraDriver> {
        let table = Arc::new(self.bindings.build()?);
        log::info!(
            "Starting driver on {} with {} bindings",
            transport.describe(),
            table.len()
        );
        AuroraDriver::start(transport, table, self.scheduler, self.poll_interval, self.hooks)
    }
}

/// Middleware around poll cycles.
pub trait DriverHook: Send + Sync {
    fn before_cycle(&self) -> Result<()> {
        Ok(())
    }
    fn after_cycle(&self, _report: &CycleReport) -> Result<()> {
        Ok(())
    }
    fn on_error(&self, _error: &anyhow::Error) {}
}

/// Hook that logs every cycle.
pub struct LoggingHook;

impl DriverHook for LoggingHook {
    fn after_cycle(&self, report: &CycleReport) -> Result<()> {
        log::info!(
            "Cycle: {} ok, {} failed, {} updates, {} writes ({} ms)",
            report.succeeded,
            report.failed,
            report.pushed,
            report.writes,
            report.elapsed_ms
        );
        Ok(())
    }

    fn on_error(&self, error: &anyhow::Error) {
        log::error!("Driver error: {error}");
    }
}
