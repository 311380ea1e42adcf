use std::{
    io::{Read, Write},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use serialport::{DataBits, SerialPort, StopBits};
use strum::{Display, EnumString};

use super::{aurora::DEFAULT_BAUD_RATE, error::TransportError};
use crate::api::utils::open_serial_port;

/// Byte link to the controller. Only one request is ever outstanding.
pub trait Transport: Send {
    fn open(&mut self) -> Result<(), TransportError>;

    /// Send a whole frame, toggling the flow-control line around it when configured.
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Whatever input is buffered right now, without blocking.
    fn read_available(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Block up to `timeout` for exactly `n` bytes. On timeout the bytes that
    /// did arrive stay buffered for the next `read_available`.
    fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    fn close(&mut self) {}

    fn reconnect(&mut self) -> Result<(), TransportError> {
        self.close();
        self.open()
    }

    fn describe(&self) -> String;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> Result<(), TransportError> {
        (**self).open()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).write(bytes)
    }

    fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        (**self).read_available()
    }

    fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        (**self).read_exact(n, timeout)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn reconnect(&mut self) -> Result<(), TransportError> {
        (**self).reconnect()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ParityMode {
    None,
    Odd,
    #[default]
    Even,
}

impl From<ParityMode> for serialport::Parity {
    fn from(value: ParityMode) -> Self {
        match value {
            ParityMode::None => serialport::Parity::None,
            ParityMode::Odd => serialport::Parity::Odd,
            ParityMode::Even => serialport::Parity::Even,
        }
    }
}

/// Line settings; the Aurora bus runs 19200 8E1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: ParityMode,
    pub stop_bits: u8,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: ParityMode::Even,
            stop_bits: 1,
        }
    }
}

impl SerialSettings {
    pub fn apply_builder(&self, b: serialport::SerialPortBuilder) -> serialport::SerialPortBuilder {
        let b = b.baud_rate(self.baud_rate);
        let b = b.data_bits(match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        });
        let b = b.stop_bits(match self.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        });
        b.parity(self.parity.into())
    }

    /// Time for one character on the wire (start, data, parity, stop bits).
    pub fn char_time(&self) -> Duration {
        let bits = 1
            + self.data_bits as u64
            + u64::from(self.parity != ParityMode::None)
            + self.stop_bits as u64;
        Duration::from_micros(bits * 1_000_000 / self.baud_rate.max(1) as u64)
    }
}

/// Modem line used as the RS-485 driver-enable signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FlowControlLine {
    Rts,
    Dtr,
}

/// External driver-enable pin, e.g. a GPIO line.
pub trait FlowControlPin: Send {
    fn set_transmit(&mut self, active: bool) -> Result<(), TransportError>;
}

pub enum FlowControl {
    None,
    Line(FlowControlLine),
    Pin(Box<dyn FlowControlPin>),
}

impl std::fmt::Debug for FlowControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowControl::None => write!(f, "None"),
            FlowControl::Line(line) => write!(f, "Line({line})"),
            FlowControl::Pin(_) => write!(f, "Pin"),
        }
    }
}

fn io_err(err: serialport::Error) -> TransportError {
    TransportError::Io(err.into())
}

/// Serial-port transport.
pub struct SerialTransport {
    port_name: String,
    settings: SerialSettings,
    flow_control: FlowControl,
    port: Option<Box<dyn SerialPort>>,
    pending: Vec<u8>,
}

impl SerialTransport {
    pub fn new(port_name: &str, settings: SerialSettings, flow_control: FlowControl) -> Self {
        Self {
            port_name: port_name.to_string(),
            settings,
            flow_control,
            port: None,
            pending: Vec::new(),
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }

    fn set_transmit(&mut self, active: bool) -> Result<(), TransportError> {
        match &mut self.flow_control {
            FlowControl::None => Ok(()),
            FlowControl::Pin(pin) => pin.set_transmit(active),
            FlowControl::Line(line) => {
                let line = *line;
                let port = self.port.as_mut().ok_or(TransportError::Closed)?;
                match line {
                    FlowControlLine::Rts => port.write_request_to_send(active).map_err(io_err),
                    FlowControlLine::Dtr => port.write_data_terminal_ready(active).map_err(io_err),
                }
            }
        }
    }

    fn transmit(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        // Each blocking read waits about one inter-frame gap (3.5 characters)
        let poll = (self.settings.char_time() * 4).max(Duration::from_millis(5));
        let port = open_serial_port(&self.port_name, &self.settings, poll)
            .map_err(|err| TransportError::Open {
                port: self.port_name.clone(),
                reason: err.to_string(),
            })?;
        self.port = Some(port);
        self.pending.clear();
        // Receive mode until the first frame goes out
        self.set_transmit(false)?;
        log::info!("Opened {} ({:?})", self.describe(), self.settings);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.set_transmit(true)?;
        let sent = self.transmit(bytes);
        // Always release the bus, even when the write failed
        let released = self.set_transmit(false);
        sent.and(released)
    }

    fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut out = std::mem::take(&mut self.pending);
        let port = self.port()?;
        let waiting = port.bytes_to_read().map_err(io_err)? as usize;
        if waiting > 0 {
            let mut buf = vec![0u8; waiting];
            let n = port.read(&mut buf)?;
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }

    fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut out = std::mem::take(&mut self.pending);
        let mut buf = [0u8; 256];

        while out.len() < n {
            if Instant::now() >= deadline {
                let received = out.len();
                self.pending = out;
                return Err(TransportError::Timeout {
                    waited: timeout,
                    expected: n,
                    received,
                });
            }
            let want = (n - out.len()).min(buf.len());
            let port = self.port()?;
            match port.read(&mut buf[..want]) {
                Ok(0) => {}
                Ok(read) => out.extend_from_slice(&buf[..read]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    self.pending = out;
                    return Err(e.into());
                }
            }
        }

        if out.len() > n {
            self.pending = out.split_off(n);
        }
        Ok(out)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            log::info!("Closed {}", self.port_name);
        }
        self.pending.clear();
    }

    fn describe(&self) -> String {
        match &self.flow_control {
            FlowControl::Line(line) => format!("{} (flow control: {line})", self.port_name),
            FlowControl::Pin(_) => format!("{} (flow control: pin)", self.port_name),
            FlowControl::None => self.port_name.clone(),
        }
    }
}
