use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::protocol::transport::SerialSettings;

/// Open a serial port with the requested line settings and read timeout, enabling exclusive
/// access on Unix systems.
pub fn open_serial_port(
    port: &str,
    settings: &SerialSettings,
    timeout: Duration,
) -> Result<Box<dyn serialport::SerialPort>> {
    let builder = settings.apply_builder(serialport::new(port, settings.baud_rate).timeout(timeout));

    #[cfg(unix)]
    {
        let mut handle = builder
            .open_native()
            .map_err(|err| anyhow!("Failed to open port {port}: {err}"))?;
        handle
            .set_exclusive(true)
            .map_err(|err| anyhow!("Failed to acquire exclusive access to {port}: {err}"))?;
        Ok(Box::new(handle))
    }

    #[cfg(not(unix))]
    {
        builder
            .open()
            .map_err(|err| anyhow!("Failed to open port {port}: {err}"))
    }
}

/// Names of the serial ports the OS reports.
pub fn available_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports().map_err(|err| anyhow!("Failed to list ports: {err}"))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
