//! In-process synthetic Aurora controller speaking the wire protocol.
//!
//! `AuroraSimulator` is a [`Transport`] whose far end is a register map;
//! `SimulatorControl` is a cloneable handle for changing that map and for
//! injecting faults while a driver owns the transport.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    path::Path,
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use serde::Deserialize;

use super::{
    frame::{
        encode_exception, encode_registers_response, encode_write_ack, format_hex_bytes,
        parse_request, Request,
    },
    registers::*,
    FUNC_READ_RANGES, FUNC_READ_REGISTERS, FUNC_WRITE_REGISTERS,
};
use crate::protocol::{error::TransportError, transport::Transport};

/// Modbus "illegal data address".
const EXCEPTION_ILLEGAL_ADDRESS: u8 = 0x02;

#[derive(Debug, Default)]
struct SimState {
    registers: HashMap<u16, u16>,
    /// Requests touching these addresses get no reply.
    silent_addresses: HashSet<u16>,
    /// Requests touching these addresses get an exception reply.
    rejected_addresses: HashSet<u16>,
    silent: bool,
    link_down: bool,
    fail_open: bool,
    noise: Vec<u8>,
    corrupt_next: bool,
    requests: Vec<Request>,
    writes: Vec<(u16, u16)>,
}

impl SimState {
    fn read(&self, address: u16) -> u16 {
        self.registers.get(&address).copied().unwrap_or(0)
    }

    fn touches(&self, set: &HashSet<u16>, request: &Request) -> bool {
        match request {
            Request::ReadRanges(ranges) => ranges
                .iter()
                .any(|r| r.addresses().any(|a| set.contains(&a))),
            Request::ReadRegisters(addresses) => addresses.iter().any(|a| set.contains(a)),
            Request::WriteRegisters(writes) => writes.iter().any(|(a, _)| set.contains(a)),
        }
    }

    /// Apply a write, mirroring thermostat write registers onto their read registers.
    fn apply_write(&mut self, address: u16, value: u16) {
        self.registers.insert(address, value);
        match address {
            REG_WRITE_MODE => {
                let config = self.read(REG_MODE_CONFIG) & !0x0700;
                self.registers
                    .insert(REG_MODE_CONFIG, config | ((value & 0x07) << 8));
            }
            REG_WRITE_HEATING_SP => {
                self.registers.insert(REG_HEATING_SETPOINT, value);
            }
            REG_WRITE_COOLING_SP => {
                self.registers.insert(REG_COOLING_SETPOINT, value);
            }
            REG_WRITE_FAN_MODE => {
                let config = self.read(REG_FAN_CONFIG) & !0x0180;
                let bits = match value {
                    FAN_CONTINUOUS => 0x80,
                    FAN_INTERMITTENT => 0x100,
                    _ => 0,
                };
                self.registers.insert(REG_FAN_CONFIG, config | bits);
            }
            _ => {}
        }
    }

    fn respond(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        if self.silent {
            return None;
        }
        let request = match parse_request(frame) {
            Ok(request) => request,
            Err(err) => {
                log::debug!("simulator ignoring bad request: {err}");
                return None;
            }
        };
        self.requests.push(request.clone());

        if self.touches(&self.silent_addresses, &request) {
            return None;
        }
        let function = match &request {
            Request::ReadRanges(_) => FUNC_READ_RANGES,
            Request::ReadRegisters(_) => FUNC_READ_REGISTERS,
            Request::WriteRegisters(_) => FUNC_WRITE_REGISTERS,
        };
        if self.touches(&self.rejected_addresses, &request) {
            return Some(encode_exception(function, EXCEPTION_ILLEGAL_ADDRESS));
        }
        if let Request::ReadRanges(ranges) = &request {
            if ranges.iter().any(|r| r.addresses().any(is_individual_read)) {
                return Some(encode_exception(function, EXCEPTION_ILLEGAL_ADDRESS));
            }
        }

        let mut reply = self.noise.clone();
        match request {
            Request::ReadRanges(ranges) => {
                let words: Vec<u16> = ranges
                    .iter()
                    .flat_map(|r| r.addresses())
                    .map(|a| self.read(a))
                    .collect();
                reply.extend(encode_registers_response(function, &words).ok()?);
            }
            Request::ReadRegisters(addresses) => {
                let words: Vec<u16> = addresses.iter().map(|a| self.read(*a)).collect();
                reply.extend(encode_registers_response(function, &words).ok()?);
            }
            Request::WriteRegisters(writes) => {
                for (address, value) in writes {
                    self.apply_write(address, value);
                    self.writes.push((address, value));
                }
                reply.extend(encode_write_ack());
            }
        }
        if std::mem::take(&mut self.corrupt_next) {
            if let Some(last) = reply.last_mut() {
                *last ^= 0xFF;
            }
        }
        Some(reply)
    }
}

/// Register fixture, loaded from TOML.
///
/// ```toml
/// [registers]
/// 30 = 5
/// 1111 = 480
///
/// [strings]
/// 92 = "NDV036"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SimulatorFixture {
    pub registers: BTreeMap<String, u16>,
    pub strings: BTreeMap<String, String>,
    /// Start from the built-in register set before applying this fixture.
    pub defaults: Option<bool>,
}

impl SimulatorFixture {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| anyhow!("Invalid simulator fixture: {e}"))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        Self::from_toml(&text)
    }
}

fn parse_address(key: &str) -> Result<u16> {
    key.trim()
        .parse::<u16>()
        .map_err(|e| anyhow!("Invalid register address '{key}': {e}"))
}

/// Pack `text` two characters per register, high byte first.
pub fn pack_ascii(text: &str, words: usize) -> Vec<u16> {
    let mut bytes: Vec<u8> = text.bytes().take(words * 2).collect();
    bytes.resize(words * 2, b' ');
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

/// Cloneable control surface for a running simulator.
#[derive(Clone)]
pub struct SimulatorControl {
    state: Arc<Mutex<SimState>>,
}

impl SimulatorControl {
    pub fn set_register(&self, address: u16, value: u16) {
        self.state.lock().registers.insert(address, value);
    }

    pub fn set_u32(&self, address: u16, value: u32) {
        let mut state = self.state.lock();
        state.registers.insert(address, (value >> 16) as u16);
        state.registers.insert(address.wrapping_add(1), value as u16);
    }

    pub fn set_string(&self, address: u16, words: usize, text: &str) {
        let mut state = self.state.lock();
        for (i, word) in pack_ascii(text, words).into_iter().enumerate() {
            state.registers.insert(address.wrapping_add(i as u16), word);
        }
    }

    pub fn register(&self, address: u16) -> u16 {
        self.state.lock().read(address)
    }

    /// Stop answering any request that touches `address`.
    pub fn silence_address(&self, address: u16) {
        self.state.lock().silent_addresses.insert(address);
    }

    /// Answer requests touching `address` with an exception.
    pub fn reject_address(&self, address: u16) {
        self.state.lock().rejected_addresses.insert(address);
    }

    pub fn clear_faults(&self) {
        let mut state = self.state.lock();
        state.silent_addresses.clear();
        state.rejected_addresses.clear();
        state.silent = false;
        state.link_down = false;
        state.fail_open = false;
        state.noise.clear();
        state.corrupt_next = false;
    }

    /// Stop answering entirely.
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    /// Make writes fail with an I/O error, as an unplugged adapter does.
    pub fn set_link_down(&self, down: bool) {
        self.state.lock().link_down = down;
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// Bytes sent ahead of every reply.
    pub fn set_noise(&self, noise: Vec<u8>) {
        self.state.lock().noise = noise;
    }

    /// Flip the CRC of the next reply.
    pub fn corrupt_next_reply(&self) {
        self.state.lock().corrupt_next = true;
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.state.lock().writes.clone()
    }

    pub fn apply_fixture(&self, fixture: &SimulatorFixture) -> Result<()> {
        for (key, value) in &fixture.registers {
            self.set_register(parse_address(key)?, *value);
        }
        for (key, text) in &fixture.strings {
            let words = text.len().div_ceil(2).max(1);
            self.set_string(parse_address(key)?, words, text);
        }
        Ok(())
    }

    /// A heat pump with an AWL thermostat, an AXB board and a variable-speed drive,
    /// currently heating.
    pub fn load_defaults(&self) {
        self.set_register(REG_ABC_VERSION, 305);
        self.set_string(REG_ABC_PROGRAM, ABC_PROGRAM_WORDS as usize, "ABCVSP");
        self.set_string(REG_MODEL_NUMBER, MODEL_NUMBER_WORDS as usize, "NVV036T12");
        self.set_string(REG_SERIAL_NUMBER, SERIAL_NUMBER_WORDS as usize, "1234567890");
        self.set_register(REG_BLOWER_TYPE, BLOWER_ECM_230);

        self.set_register(REG_THERMOSTAT_STATUS, COMPONENT_ACTIVE);
        self.set_register(REG_THERMOSTAT_STATUS + 1, 305);
        self.set_register(REG_AXB_STATUS, COMPONENT_ACTIVE);
        self.set_register(REG_AXB_STATUS + 1, 210);
        for reg in [
            REG_IZ2_STATUS,
            REG_AOC_STATUS,
            REG_MOC_STATUS,
            REG_EEV2_STATUS,
            REG_AWL_STATUS,
        ] {
            self.set_register(reg, COMPONENT_MISSING);
        }

        self.set_register(REG_LINE_VOLTAGE, 240);
        self.set_register(REG_FP1_TEMP, 0xFFEC);
        self.set_register(REG_FP2_TEMP, 412);
        self.set_register(REG_LAST_FAULT, 0);
        self.set_register(REG_SYSTEM_OUTPUTS, OUTPUT_CC | OUTPUT_BLOWER);
        self.set_register(REG_DEMAND, 30);

        self.set_register(REG_ENTERING_AIR, 705);
        self.set_register(REG_HUMIDITY, 45);
        self.set_register(REG_OUTDOOR_TEMP, 350);
        self.set_register(REG_HEATING_SETPOINT, 680);
        self.set_register(REG_COOLING_SETPOINT, 760);
        self.set_register(REG_AMBIENT_TEMP, 712);
        self.set_register(REG_FAN_CONFIG, 0);
        self.set_register(REG_MODE_CONFIG, MODE_HEAT << 8);

        self.set_register(REG_DHW_ENABLE, 1);
        self.set_register(REG_DHW_SETPOINT, 1300);
        self.set_register(REG_LEAVING_AIR, 925);
        self.set_register(REG_COMPRESSOR_AMPS, 82);
        self.set_register(REG_LEAVING_WATER, 440);
        self.set_register(REG_ENTERING_WATER, 480);
        self.set_register(REG_SUCTION_TEMP, 380);
        self.set_register(REG_DHW_TEMP, 1215);
        self.set_register(REG_DISCHARGE_PRESSURE, 2850);
        self.set_register(REG_SUCTION_PRESSURE, 1050);
        self.set_register(REG_WATERFLOW, 95);
        self.set_register(REG_LOOP_PRESSURE, 420);
        self.set_register(REG_SUPERHEAT, 85);

        self.set_u32(REG_COMPRESSOR_WATTS, 1850);
        self.set_u32(REG_BLOWER_WATTS, 210);
        self.set_u32(REG_AUX_HEAT_WATTS, 0);
        self.set_u32(REG_TOTAL_WATTS, 2140);
        self.set_u32(REG_HEAT_EXTRACTION, 21500);
        self.set_u32(REG_HEAT_REJECTION, 0);
        self.set_u32(REG_PUMP_WATTS, 80);

        self.set_register(REG_VS_SPEED_DESIRED, 7);
        self.set_register(REG_VS_SPEED_ACTUAL, 7);
        self.set_register(REG_VS_DISCHARGE_TEMP, 1402);
        self.set_register(REG_VS_INVERTER_TEMP, 985);
    }
}

/// Synthetic controller behind the [`Transport`] interface.
pub struct AuroraSimulator {
    state: Arc<Mutex<SimState>>,
    outbound: VecDeque<u8>,
    open: bool,
}

impl Default for AuroraSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl AuroraSimulator {
    /// An empty register map; every register reads 0.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
            outbound: VecDeque::new(),
            open: false,
        }
    }

    pub fn with_defaults() -> Self {
        let sim = Self::new();
        sim.control().load_defaults();
        sim
    }

    pub fn from_fixture(fixture: &SimulatorFixture) -> Result<Self> {
        let sim = if fixture.defaults.unwrap_or(true) {
            Self::with_defaults()
        } else {
            Self::new()
        };
        sim.control().apply_fixture(fixture)?;
        Ok(sim)
    }

    pub fn control(&self) -> SimulatorControl {
        SimulatorControl {
            state: Arc::clone(&self.state),
        }
    }
}

impl Transport for AuroraSimulator {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.state.lock().fail_open {
            return Err(TransportError::Open {
                port: "simulator".to_string(),
                reason: "simulated open failure".to_string(),
            });
        }
        self.open = true;
        self.outbound.clear();
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let mut state = self.state.lock();
        if state.link_down {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated link failure",
            )));
        }
        if let Some(reply) = state.respond(bytes) {
            log::trace!("simulator reply: {}", format_hex_bytes(&reply));
            self.outbound.extend(reply);
        }
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        Ok(self.outbound.drain(..).collect())
    }

    fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        if self.outbound.len() >= n {
            return Ok(self.outbound.drain(..n).collect());
        }
        std::thread::sleep(timeout);
        Err(TransportError::Timeout {
            waited: timeout,
            expected: n,
            received: self.outbound.len(),
        })
    }

    fn close(&mut self) {
        self.open = false;
        self.outbound.clear();
    }

    fn describe(&self) -> String {
        "simulator".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::aurora::{decode_response, encode_request, Expect, RegisterRange};

    #[test]
    fn test_simulator_answers_read_ranges() {
        let mut sim = AuroraSimulator::with_defaults();
        sim.open().unwrap();
        let request = encode_request(REG_HEATING_SETPOINT, 3).unwrap();
        sim.write(&request).unwrap();
        let reply = sim.read_available().unwrap();
        let words = decode_response(
            &reply,
            Expect::read_ranges(&[RegisterRange::new(REG_HEATING_SETPOINT, 3)]),
        )
        .unwrap();
        assert_eq!(words, vec![680, 760, 712]);
    }

    #[test]
    fn test_simulator_mirrors_thermostat_writes() {
        let sim = AuroraSimulator::new();
        let control = sim.control();
        let mut state = sim.state.lock();
        state.apply_write(REG_WRITE_MODE, MODE_COOL);
        state.apply_write(REG_WRITE_FAN_MODE, FAN_INTERMITTENT);
        drop(state);
        assert_eq!(control.register(REG_MODE_CONFIG), MODE_COOL << 8);
        assert_eq!(control.register(REG_FAN_CONFIG), 0x100);
    }

    #[test]
    fn test_fixture_parsing() {
        let fixture = SimulatorFixture::from_toml(
            "defaults = false\n[registers]\n30 = 5\n[strings]\n92 = \"ABCD\"\n",
        )
        .unwrap();
        let sim = AuroraSimulator::from_fixture(&fixture).unwrap();
        let control = sim.control();
        assert_eq!(control.register(30), 5);
        assert_eq!(control.register(92), 0x4142);
        assert_eq!(control.register(93), 0x4344);
        assert_eq!(control.register(REG_ABC_VERSION), 0);
    }

    #[test]
    fn test_pack_ascii_pads_with_spaces() {
        assert_eq!(pack_ascii("ABC", 2), vec![0x4142, 0x4320]);
    }

    #[test]
    fn test_silent_simulator_times_out() {
        let mut sim = AuroraSimulator::with_defaults();
        sim.control().set_silent(true);
        sim.open().unwrap();
        sim.write(&encode_request(30, 1).unwrap()).unwrap();
        let err = sim.read_exact(7, Duration::from_millis(1)).unwrap_err();
        assert!(err.is_timeout());
    }
}
