use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

use super::catalog;
use crate::{
    api::driver::DriverBuilder,
    protocol::{
        aurora::registers::MAX_ZONES,
        error::ConfigurationError,
        transport::{FlowControlLine, SerialSettings},
    },
};

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_timeout_ms() -> u64 {
    2_000
}

fn default_fault_threshold() -> u32 {
    3
}

fn default_reconnect_backoff_ms() -> u64 {
    5_000
}

fn default_max_gap() -> u16 {
    2
}

fn default_true() -> bool {
    true
}

fn default_zones() -> Vec<u8> {
    vec![0]
}

/// Root configuration of the `aurora-link` binary, read from TOML or JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Serial port name
    #[serde(default)]
    pub port: Option<String>,
    /// Line settings (baud_rate, data_bits, parity, stop_bits)
    #[serde(flatten)]
    pub serial: SerialSettings,
    /// RS-485 driver-enable line
    #[serde(default)]
    pub flow_control: Option<FlowControlLine>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_fault_threshold")]
    pub fault_threshold: u32,
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
    #[serde(default = "default_max_gap")]
    pub max_gap: u16,
    /// Pack several ranges into one request
    #[serde(default = "default_true")]
    pub coalesce: bool,
    /// Detect components and skip absent ones
    #[serde(default = "default_true")]
    pub identify: bool,
    /// Catalog endpoints to enable; empty enables all of them
    #[serde(default)]
    pub endpoints: Vec<String>,
    /// Thermostat zones to publish (0 = single zone, 1-6 = IZ2 zones)
    #[serde(default = "default_zones")]
    pub climate_zones: Vec<u8>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            port: None,
            serial: SerialSettings::default(),
            flow_control: None,
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_timeout_ms(),
            fault_threshold: default_fault_threshold(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            max_gap: default_max_gap(),
            coalesce: true,
            identify: true,
            endpoints: Vec::new(),
            climate_zones: default_zones(),
        }
    }
}

impl DriverConfig {
    /// Parse configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).map_err(|e| anyhow!("Invalid JSON configuration: {e}"))
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| anyhow!("Invalid TOML configuration: {e}"))
    }

    /// Read configuration from a file; `.json` files are JSON, anything else TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content)?,
            _ => Self::from_toml(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Convert to a JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| anyhow!("Failed to serialize: {e}"))
    }

    /// Reject unknown endpoint names and zones before anything is opened.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(name) = self.endpoints.iter().find(|n| !catalog::contains(n)) {
            return Err(ConfigurationError::UnknownEndpoint(name.clone()));
        }
        if let Some(zone) = self.climate_zones.iter().find(|z| **z > MAX_ZONES) {
            return Err(ConfigurationError::ZoneOutOfRange { zone: *zone });
        }
        Ok(())
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.endpoints.is_empty() || self.endpoints.iter().any(|n| n == name)
    }

    /// A builder carrying every setting except the port and the bindings.
    pub fn apply(&self, builder: DriverBuilder) -> DriverBuilder {
        let builder = builder
            .with_serial_settings(self.serial)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_fault_threshold(self.fault_threshold)
            .with_reconnect_backoff(Duration::from_millis(self.reconnect_backoff_ms))
            .with_max_gap(self.max_gap)
            .with_coalescing(self.coalesce)
            .with_identification(self.identify);
        match self.flow_control {
            Some(line) => builder.with_flow_control(line),
            None => builder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::transport::ParityMode;

    #[test]
    fn test_toml_config() {
        let config = DriverConfig::from_toml(
            r#"
port = "/dev/ttyUSB0"
baud_rate = 19200
parity = "none"
flow_control = "rts"
poll_interval_ms = 5000
endpoints = ["compressor", "entering_water_temperature"]
climate_zones = [0, 2]
"#,
        )
        .unwrap();
        assert_eq!(config.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.serial.parity, ParityMode::None);
        assert_eq!(config.serial.stop_bits, 1);
        assert_eq!(config.flow_control, Some(FlowControlLine::Rts));
        assert_eq!(config.timeout_ms, 2_000);
        assert!(config.is_enabled("compressor"));
        assert!(!config.is_enabled("blower"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_round_trip() {
        let config = DriverConfig {
            port: Some("COM3".to_string()),
            ..Default::default()
        };
        let json = config.to_json().unwrap();
        assert_eq!(DriverConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_validation() {
        let config = DriverConfig {
            endpoints: vec!["flux_capacitor".to_string()],
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::UnknownEndpoint("flux_capacitor".to_string()))
        );

        let config = DriverConfig {
            climate_zones: vec![7],
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::ZoneOutOfRange { zone: 7 })
        );

        let config = DriverConfig::from_toml("").unwrap();
        assert_eq!(config, DriverConfig::default());
        assert!(config.is_enabled("blower"));
    }
}
