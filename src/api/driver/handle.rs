use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::{
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, Instant},
};

use super::DriverHook;
use crate::protocol::{
    aurora::{
        climate::{climate_writes, ClimateCall},
        decode::RegisterValue,
        registers::{MAX_ZONES, WRITABLE_SWITCH_REGISTERS},
    },
    engine::{
        binding::BindingTable,
        dispatch::{evaluate, Published},
        scheduler::{CycleReport, PollScheduler, SchedulerConfig, SharedState},
        ConnectionState, SystemInfo,
    },
    error::ConfigurationError,
    transport::Transport,
};

/// Events beyond this many unread are dropped.
const EVENT_BUFFER: usize = 256;

/// Observable driver activity.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DriverEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
        at: DateTime<Local>,
    },
    CycleCompleted {
        report: CycleReport,
        at: DateTime<Local>,
    },
    Identified {
        info: SystemInfo,
        at: DateTime<Local>,
    },
}

#[derive(Debug)]
enum Command {
    Write(Vec<(u16, u16)>),
    Switch { address: u16, on: bool },
    PollNow,
    Stop,
}

/// Clonable, non-owning access to a running driver.
#[derive(Clone)]
pub struct DriverHandle {
    commands: flume::Sender<Command>,
    events: flume::Receiver<DriverEvent>,
    shared: SharedState,
    table: Arc<BindingTable>,
}

impl DriverHandle {
    /// Last committed value of `address`.
    pub fn get(&self, address: u16) -> RegisterValue {
        self.shared.store.get(address)
    }

    pub fn raw(&self, address: u16) -> Option<u16> {
        self.shared.store.raw(address)
    }

    /// Current value of the named endpoint, computed from the store.
    pub fn value(&self, name: &str) -> Option<Published> {
        self.table
            .find(name)
            .and_then(|binding| evaluate(binding, &self.shared.store))
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    pub fn system_info(&self) -> Option<SystemInfo> {
        self.shared.system_info.read().clone()
    }

    pub fn table(&self) -> &BindingTable {
        &self.table
    }

    /// Turn a writable switch register on or off. Sent at the start of the next
    /// cycle; the switch endpoints see the requested state right away and are
    /// corrected by the next poll if the controller disagrees.
    pub fn request_switch_write(&self, address: u16, on: bool) -> Result<()> {
        if !WRITABLE_SWITCH_REGISTERS.contains(&address) {
            return Err(ConfigurationError::NotWritable { address }.into());
        }
        self.send(Command::Switch { address, on })
    }

    /// Apply a thermostat control call to `zone`.
    pub fn request_climate(&self, zone: u8, call: &ClimateCall) -> Result<()> {
        if zone > MAX_ZONES {
            return Err(ConfigurationError::ZoneOutOfRange { zone }.into());
        }
        let writes = climate_writes(zone, call);
        if writes.is_empty() {
            return Ok(());
        }
        self.send(Command::Write(writes))
    }

    /// Write a raw register value.
    pub fn write_register(&self, address: u16, value: u16) -> Result<()> {
        self.send(Command::Write(vec![(address, value)]))
    }

    /// Run a cycle now instead of waiting for the poll interval.
    pub fn poll_now(&self) -> Result<()> {
        self.send(Command::PollNow)
    }

    pub fn events(&self) -> flume::Receiver<DriverEvent> {
        self.events.clone()
    }

    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|e| anyhow!("Driver is not running: {e}"))
    }
}

/// A driver polling on its own thread. Dropping it stops the thread.
pub struct AuroraDriver {
    handle: DriverHandle,
    thread: Option<JoinHandle<()>>,
}

impl AuroraDriver {
    pub(crate) fn start<T: Transport + 'static>(
        transport: T,
        table: Arc<BindingTable>,
        config: SchedulerConfig,
        poll_interval: Duration,
        hooks: Vec<Arc<dyn DriverHook>>,
    ) -> Result<Self> {
        let (command_tx, command_rx) = flume::unbounded();
        let (event_tx, event_rx) = flume::bounded(EVENT_BUFFER);

        let backoff = config.reconnect_backoff;
        let scheduler = PollScheduler::new(transport, Arc::clone(&table), config);
        let handle = DriverHandle {
            commands: command_tx,
            events: event_rx,
            shared: scheduler.shared(),
            table,
        };

        let worker = Worker {
            scheduler,
            commands: command_rx,
            events: event_tx,
            hooks,
            poll_interval,
            backoff,
            last_state: ConnectionState::Disconnected,
            identified: false,
        };
        let thread = std::thread::Builder::new()
            .name("aurora-poll".to_string())
            .spawn(move || worker.run())
            .map_err(|e| anyhow!("Failed to spawn poll thread: {e}"))?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> DriverHandle {
        self.handle.clone()
    }

    pub fn events(&self) -> flume::Receiver<DriverEvent> {
        self.handle.events()
    }

    /// Stop polling and wait for the poll thread to exit.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        // The thread may already have exited; joining is what matters
        let _ = self.handle.commands.send(Command::Stop);
        thread
            .join()
            .map_err(|_| anyhow!("Poll thread panicked"))
    }
}

impl Drop for AuroraDriver {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("{err}");
        }
    }
}

struct Worker<T: Transport> {
    scheduler: PollScheduler<T>,
    commands: flume::Receiver<Command>,
    events: flume::Sender<DriverEvent>,
    hooks: Vec<Arc<dyn DriverHook>>,
    poll_interval: Duration,
    backoff: Duration,
    last_state: ConnectionState,
    identified: bool,
}

impl<T: Transport> Worker<T> {
    fn run(mut self) {
        log::info!("Poll loop started");
        loop {
            self.cycle();

            let wait = match self.scheduler.state() {
                ConnectionState::Faulted => self.poll_interval.min(self.backoff),
                _ => self.poll_interval,
            };
            if !self.wait_for_next(Instant::now() + wait) {
                break;
            }
        }
        self.scheduler.shutdown();
        self.publish_state();
        log::info!("Poll loop stopped");
    }

    fn cycle(&mut self) {
        for hook in &self.hooks {
            if let Err(err) = hook.before_cycle() {
                log::warn!("Hook before_cycle failed: {err}");
            }
        }

        let report = self.scheduler.tick();
        self.publish_state();

        if !self.identified {
            if let Some(info) = self.scheduler.system_info() {
                self.identified = true;
                self.emit(DriverEvent::Identified {
                    info,
                    at: Local::now(),
                });
            }
        }

        let Some(report) = report else {
            return;
        };
        let error = if report.is_total_failure() {
            Some(anyhow!(
                "poll cycle failed: {} of {} requests",
                report.failed,
                report.failed + report.succeeded
            ))
        } else if report.empty_plan {
            Some(anyhow!("no supported endpoints to poll"))
        } else {
            None
        };
        if let Some(error) = error {
            for hook in &self.hooks {
                hook.on_error(&error);
            }
        }
        for hook in &self.hooks {
            if let Err(err) = hook.after_cycle(&report) {
                log::warn!("Hook after_cycle failed: {err}");
            }
        }
        self.emit(DriverEvent::CycleCompleted {
            report,
            at: Local::now(),
        });
    }

    /// Handle commands until `deadline`. Returns false once the driver should stop.
    fn wait_for_next(&mut self, deadline: Instant) -> bool {
        match self.commands.recv_deadline(deadline) {
            Ok(Command::Write(writes)) => {
                self.scheduler.queue_writes(writes);
                true
            }
            Ok(Command::Switch { address, on }) => {
                self.scheduler.request_switch(address, on);
                true
            }
            Ok(Command::PollNow) => true,
            Ok(Command::Stop) => false,
            Err(flume::RecvTimeoutError::Timeout) => true,
            // Every handle is gone
            Err(flume::RecvTimeoutError::Disconnected) => false,
        }
    }

    fn publish_state(&mut self) {
        let state = self.scheduler.state();
        if state != self.last_state {
            self.emit(DriverEvent::StateChanged {
                from: self.last_state,
                to: state,
                at: Local::now(),
            });
            self.last_state = state;
        }
    }

    fn emit(&self, event: DriverEvent) {
        if let Err(flume::TrySendError::Full(event)) = self.events.try_send(event) {
            log::trace!("Event buffer full, dropping {event:?}");
        }
    }
}
