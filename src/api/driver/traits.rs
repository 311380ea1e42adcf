/// Endpoint target traits - the interface the driver pushes updates into
///
/// Endpoints implement one of these and are registered as bindings on the
/// `DriverBuilder`. The driver holds them behind `Arc` and never manages their
/// lifetime beyond the binding table.
///
/// A target returning `Err` is logged by the driver; it does not stop polling
/// and does not suppress later updates.
use anyhow::Result;

use crate::protocol::aurora::climate::ClimateState;

/// Numeric sensor endpoint.
pub trait NumericTarget: Send + Sync {
    fn on_numeric_update(&self, value: f64) -> Result<()>;
}

/// Binary flag endpoint.
pub trait BinaryTarget: Send + Sync {
    fn on_binary_update(&self, flag: bool) -> Result<()>;
}

/// Text endpoint.
pub trait TextTarget: Send + Sync {
    fn on_text_update(&self, text: &str) -> Result<()>;
}

/// Writable switch endpoint. Writes go through `DriverHandle::request_switch_write`.
pub trait SwitchTarget: Send + Sync {
    fn on_switch_state(&self, state: bool) -> Result<()>;
}

/// Thermostat endpoint. Control calls go through `DriverHandle::request_climate`.
pub trait ClimateTarget: Send + Sync {
    fn on_climate_update(&self, state: &ClimateState) -> Result<()>;
}

/// Target that discards every update (useful for testing)
pub struct NoOpTarget;

impl NumericTarget for NoOpTarget {
    fn on_numeric_update(&self, _value: f64) -> Result<()> {
        Ok(())
    }
}

impl BinaryTarget for NoOpTarget {
    fn on_binary_update(&self, _flag: bool) -> Result<()> {
        Ok(())
    }
}

impl TextTarget for NoOpTarget {
    fn on_text_update(&self, _text: &str) -> Result<()> {
        Ok(())
    }
}

impl SwitchTarget for NoOpTarget {
    fn on_switch_state(&self, _state: bool) -> Result<()> {
        Ok(())
    }
}

impl ClimateTarget for NoOpTarget {
    fn on_climate_update(&self, _state: &ClimateState) -> Result<()> {
        Ok(())
    }
}

/// Target that logs every update under the endpoint's name
pub struct LoggingTarget {
    name: String,
}

impl LoggingTarget {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl NumericTarget for LoggingTarget {
    fn on_numeric_update(&self, value: f64) -> Result<()> {
        log::info!("{} = {value}", self.name);
        Ok(())
    }
}

impl BinaryTarget for LoggingTarget {
    fn on_binary_update(&self, flag: bool) -> Result<()> {
        log::info!("{} = {}", self.name, if flag { "ON" } else { "OFF" });
        Ok(())
    }
}

impl TextTarget for LoggingTarget {
    fn on_text_update(&self, text: &str) -> Result<()> {
        log::info!("{} = {text}", self.name);
        Ok(())
    }
}

impl SwitchTarget for LoggingTarget {
    fn on_switch_state(&self, state: bool) -> Result<()> {
        log::info!("{} = {}", self.name, if state { "ON" } else { "OFF" });
        Ok(())
    }
}

impl ClimateTarget for LoggingTarget {
    fn on_climate_update(&self, state: &ClimateState) -> Result<()> {
        log::info!("{} = {state:?}", self.name);
        Ok(())
    }
}
