//! Poll scheduler: owns the transport and walks the poll plan once per cycle.
//!
//! One request is outstanding at a time. A failed batch is counted and the
//! cycle moves on; retries happen on the next cycle. Cycles that fail as a
//! whole escalate to `Faulted` after `fault_threshold` in a row, and the
//! scheduler then reconnects after `reconnect_backoff`.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use serde::Serialize;

use super::{
    binding::BindingTable,
    dispatch::Dispatcher,
    identify::SystemInfo,
    plan::{PlanOptions, PollBatch, PollPlan},
    store::RegisterStore,
    ConnectionState,
};
use crate::protocol::{
    aurora::frame::{
        encode_write_registers, format_hex_bytes, scan_response, Expect, Response, Scan,
        MAX_QUAD_ENTRIES,
    },
    error::{FrameError, ProtocolError, TransportError},
    transport::Transport,
};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Bound on the wait for one reply.
    pub response_timeout: Duration,
    /// Consecutive whole-cycle failures before the link is declared faulted.
    pub fault_threshold: u32,
    pub reconnect_backoff: Duration,
    pub plan: PlanOptions,
    /// Read the system id and detect components before the first cycle.
    pub identify: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(2),
            fault_threshold: 3,
            reconnect_backoff: Duration::from_secs(5),
            plan: PlanOptions::default(),
            identify: true,
        }
    }
}

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Addresses committed this cycle.
    pub updated: Vec<u16>,
    /// Endpoint updates pushed.
    pub pushed: usize,
    /// Register writes acknowledged by the controller.
    pub writes: usize,
    /// The link broke and the remaining batches were not attempted.
    pub aborted: bool,
    /// Nothing was polled: the detected hardware supports none of the bindings.
    pub empty_plan: bool,
    pub elapsed_ms: u64,
}

impl CycleReport {
    /// No batch succeeded (and there was at least one to try).
    pub fn is_total_failure(&self) -> bool {
        self.aborted || (self.succeeded == 0 && self.failed > 0)
    }

    /// Every planned request succeeded and there was something to poll.
    pub fn is_clean(&self) -> bool {
        !self.empty_plan && !self.aborted && self.failed == 0
    }
}

/// State the scheduler shares with handles on other threads.
#[derive(Clone, Default)]
pub struct SharedState {
    pub state: Arc<RwLock<ConnectionState>>,
    pub store: Arc<RegisterStore>,
    pub system_info: Arc<RwLock<Option<SystemInfo>>>,
}

pub struct PollScheduler<T: Transport> {
    transport: T,
    table: Arc<BindingTable>,
    config: SchedulerConfig,
    shared: SharedState,
    plan: PollPlan,
    dispatcher: Dispatcher,
    batch_failures: Vec<u32>,
    consecutive_failures: u32,
    pending_writes: Vec<(u16, u16)>,
    faulted_at: Option<Instant>,
}

impl<T: Transport> PollScheduler<T> {
    pub fn new(transport: T, table: Arc<BindingTable>, config: SchedulerConfig) -> Self {
        let shared = SharedState {
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            store: Arc::new(RegisterStore::new(table.encodings().clone())),
            system_info: Arc::new(RwLock::new(None)),
        };
        let plan = PollPlan::build(&table, None, config.plan);
        log::debug!(
            "Poll plan: {} registers in {} requests",
            plan.register_count(),
            plan.batches().len()
        );
        Self {
            batch_failures: vec![0; plan.batches().len()],
            dispatcher: Dispatcher::new(table.len()),
            transport,
            table,
            config,
            shared,
            plan,
            consecutive_failures: 0,
            pending_writes: Vec::new(),
            faulted_at: None,
        }
    }

    pub fn shared(&self) -> SharedState {
        self.shared.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    pub fn store(&self) -> &RegisterStore {
        &self.shared.store
    }

    pub fn plan(&self) -> &PollPlan {
        &self.plan
    }

    pub fn table(&self) -> &BindingTable {
        &self.table
    }

    pub fn system_info(&self) -> Option<SystemInfo> {
        self.shared.system_info.read().clone()
    }

    pub fn batch_failures(&self) -> &[u32] {
        &self.batch_failures
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Queue register writes for the start of the next cycle.
    pub fn queue_writes(&mut self, writes: impl IntoIterator<Item = (u16, u16)>) {
        self.pending_writes.extend(writes);
    }

    /// Queue a switch write and show the requested state on its endpoints now.
    pub fn request_switch(&mut self, address: u16, on: bool) {
        self.pending_writes.push((address, u16::from(on)));
        self.dispatcher.publish_switch(&self.table, address, on);
    }

    pub fn pending_writes(&self) -> usize {
        self.pending_writes.len()
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.shared.state.write();
        if *state != next {
            match next {
                ConnectionState::AwaitingResponse => {}
                _ if *state == ConnectionState::AwaitingResponse => {}
                _ => log::info!("Connection state {} -> {next}", *state),
            }
            *state = next;
        }
    }

    fn enter_faulted(&mut self) {
        self.faulted_at = Some(Instant::now());
        self.set_state(ConnectionState::Faulted);
    }

    /// Drive the connection one step: connect or reconnect when needed,
    /// identify once, then run a poll cycle. Returns the cycle's report if one ran.
    pub fn tick(&mut self) -> Option<CycleReport> {
        match self.state() {
            ConnectionState::Disconnected => {
                if let Err(err) = self.transport.open() {
                    log::warn!("Failed to open {}: {err}", self.transport.describe());
                    self.enter_faulted();
                    return None;
                }
                self.set_state(ConnectionState::Connecting);
            }
            ConnectionState::Faulted => {
                let waited = self.faulted_at.map_or(Duration::MAX, |at| at.elapsed());
                if waited < self.config.reconnect_backoff {
                    return None;
                }
                log::info!("Reconnecting {}", self.transport.describe());
                if let Err(err) = self.transport.reconnect() {
                    log::warn!("Reconnect failed: {err}");
                    self.faulted_at = Some(Instant::now());
                    return None;
                }
            }
            _ => {}
        }

        if self.needs_identification() {
            if let Err(err) = self.identify() {
                log::warn!("Identification failed: {err}");
                self.consecutive_failures += 1;
                if self.state() == ConnectionState::Faulted
                    || self.consecutive_failures >= self.config.fault_threshold
                {
                    self.enter_faulted();
                }
                return None;
            }
        }
        if self.state() == ConnectionState::Connecting {
            self.set_state(ConnectionState::Idle);
        }
        Some(self.run_cycle())
    }

    /// Close the link. Committed values stay in the store.
    pub fn shutdown(&mut self) {
        self.transport.close();
        self.set_state(ConnectionState::Disconnected);
    }

    fn needs_identification(&self) -> bool {
        self.config.identify && self.shared.system_info.read().is_none()
    }

    /// Read the system id and component status, gate the plan on what was found
    /// and publish the identity bindings.
    pub fn identify(&mut self) -> Result<SystemInfo, ProtocolError> {
        let mut committed = Vec::new();
        for ranges in SystemInfo::identification_requests() {
            let batch = PollBatch::new(ranges);
            let words = self.read_batch(&batch)?;
            let summary = self.shared.store.commit_batch(&batch.addresses(), &words)?;
            committed.extend(summary.committed);
        }

        let store = &self.shared.store;
        let info = SystemInfo::from_registers(|a| store.raw(a));
        log::info!(
            "Identified {} (program {}, serial {}, ABC v{:.2}), features: {:?}",
            info.model,
            info.program,
            info.serial,
            info.abc_version,
            info.features
        );

        self.plan = PollPlan::build(&self.table, Some(&info), self.config.plan);
        self.batch_failures = vec![0; self.plan.batches().len()];
        if self.plan.is_empty() {
            log::warn!("No endpoint is supported by the detected hardware, nothing to poll");
        } else {
            log::debug!(
                "Poll plan: {} registers in {} requests",
                self.plan.register_count(),
                self.plan.batches().len()
            );
        }
        *self.shared.system_info.write() = Some(info.clone());

        self.dispatcher
            .dispatch(&self.table, &self.shared.store, &committed);
        Ok(info)
    }

    /// One pass over the queued writes and the poll plan.
    pub fn run_cycle(&mut self) -> CycleReport {
        let started = Instant::now();
        let resting = match self.state() {
            ConnectionState::Faulted => ConnectionState::Faulted,
            _ => ConnectionState::Idle,
        };
        let mut report = CycleReport {
            empty_plan: self.plan.is_empty(),
            ..Default::default()
        };

        if let Err(err) = self.flush_writes(resting, &mut report) {
            log::warn!("Write failed, link lost: {err}");
            report.aborted = true;
        }

        for index in 0..self.plan.batches().len() {
            if report.aborted {
                break;
            }
            let batch = self.plan.batches()[index].clone();
            if resting == ConnectionState::Idle {
                self.set_state(ConnectionState::AwaitingResponse);
            }
            let outcome = self.read_batch(&batch).and_then(|words| {
                self.shared
                    .store
                    .commit_batch(&batch.addresses(), &words)
                    .map_err(ProtocolError::from)
            });
            self.set_state(resting);

            match outcome {
                Ok(summary) => {
                    self.batch_failures[index] = 0;
                    report.succeeded += 1;
                    report.updated.extend(summary.committed);
                }
                Err(err) => {
                    self.batch_failures[index] += 1;
                    report.failed += 1;
                    log::warn!(
                        "Request {} failed ({} in a row): {err}",
                        batch.describe(),
                        self.batch_failures[index]
                    );
                    if err.is_link_failure() {
                        report.aborted = true;
                    }
                }
            }
        }

        if report.is_total_failure() {
            self.consecutive_failures += 1;
            if resting == ConnectionState::Faulted
                || self.consecutive_failures >= self.config.fault_threshold
            {
                self.enter_faulted();
            }
        } else {
            self.consecutive_failures = 0;
            if report.failed == 0 {
                self.faulted_at = None;
                self.set_state(ConnectionState::Idle);
            }
        }

        report.pushed = self
            .dispatcher
            .dispatch(&self.table, &self.shared.store, &report.updated)
            .pushed;
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        log::debug!(
            "Cycle done: {} ok, {} failed, {} registers, {} updates in {} ms",
            report.succeeded,
            report.failed,
            report.updated.len(),
            report.pushed,
            report.elapsed_ms
        );
        report
    }

    /// Send queued writes, several per frame. A rejected frame's writes are
    /// dropped; only a broken link is returned as an error.
    fn flush_writes(
        &mut self,
        resting: ConnectionState,
        report: &mut CycleReport,
    ) -> Result<(), ProtocolError> {
        let writes = std::mem::take(&mut self.pending_writes);
        for chunk in writes.chunks(MAX_QUAD_ENTRIES) {
            if resting == ConnectionState::Idle {
                self.set_state(ConnectionState::AwaitingResponse);
            }
            let result = encode_write_registers(chunk)
                .map_err(ProtocolError::from)
                .and_then(|frame| self.exchange(&frame, Expect::WriteAck));
            self.set_state(resting);

            match result {
                Ok(_) => {
                    log::info!("Wrote {chunk:?}");
                    report.writes += chunk.len();
                }
                Err(err) if err.is_link_failure() => return Err(err),
                Err(err) => log::warn!("Dropping writes {chunk:?}: {err}"),
            }
        }
        Ok(())
    }

    fn read_batch(&mut self, batch: &PollBatch) -> Result<Vec<u16>, ProtocolError> {
        let frame = batch.encode()?;
        match self.exchange(&frame, batch.expect())? {
            Response::Registers(words) => Ok(words),
            Response::WriteAck => Err(FrameError::Unexpected(
                "write acknowledgement to a read request".to_string(),
            )
            .into()),
        }
    }

    /// Send one request and wait for its reply, skipping bus noise in front of it.
    fn exchange(&mut self, frame: &[u8], expect: Expect) -> Result<Response, ProtocolError> {
        let stale = self.transport.read_available()?;
        if !stale.is_empty() {
            log::debug!("Discarding {} stale bytes: {}", stale.len(), format_hex_bytes(&stale));
        }

        log::trace!("TX {}", format_hex_bytes(frame));
        self.transport.write(frame)?;

        let deadline = Instant::now() + self.config.response_timeout;
        let mut buf: Vec<u8> = Vec::new();
        loop {
            let needed = match scan_response(&buf, expect) {
                Scan::Frame {
                    skipped,
                    consumed,
                    response,
                } => {
                    if skipped > 0 {
                        log::debug!("Skipped {skipped} noise bytes before reply");
                    }
                    log::trace!("RX {}", format_hex_bytes(&buf[..consumed]));
                    return Ok(response);
                }
                Scan::Error { error, .. } => return Err(error.into()),
                Scan::NeedMore { needed, .. } => needed,
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.transport.read_exact(needed, remaining) {
                Ok(bytes) => buf.extend_from_slice(&bytes),
                Err(err) if err.is_timeout() => {
                    buf.extend(self.transport.read_available()?);
                    return match scan_response(&buf, expect) {
                        Scan::Frame { response, .. } => Ok(response),
                        Scan::Error { error, .. } => Err(error.into()),
                        Scan::NeedMore {
                            pending: Some(error),
                            ..
                        } => Err(error.into()),
                        Scan::NeedMore { needed, .. } => Err(TransportError::Timeout {
                            waited: self.config.response_timeout,
                            expected: buf.len() + needed,
                            received: buf.len(),
                        }
                        .into()),
                    };
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
