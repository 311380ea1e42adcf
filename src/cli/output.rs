use anyhow::Result;
use chrono::Local;
use serde::Serialize;
use serde_json::json;

use crate::{
    api::driver::{BinaryTarget, ClimateTarget, NumericTarget, SwitchTarget, TextTarget},
    protocol::aurora::climate::ClimateState,
};

/// Endpoint that prints every update, as JSON lines with `--json` or as log lines otherwise.
pub struct ConsoleTarget {
    name: String,
    unit: Option<&'static str>,
    json: bool,
}

impl ConsoleTarget {
    pub fn new(name: &str, unit: Option<&'static str>, json: bool) -> Self {
        Self {
            name: name.to_string(),
            unit,
            json,
        }
    }

    fn emit<V: Serialize + std::fmt::Display>(&self, value: V) -> Result<()> {
        if self.json {
            let line = json!({
                "timestamp": Local::now().to_rfc3339(),
                "endpoint": self.name,
                "value": value,
                "unit": self.unit,
            });
            println!("{}", serde_json::to_string(&line)?);
        } else {
            match self.unit {
                Some(unit) => log::info!("{} = {value} {unit}", self.name),
                None => log::info!("{} = {value}", self.name),
            }
        }
        Ok(())
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "ON"
    } else {
        "OFF"
    }
}

impl NumericTarget for ConsoleTarget {
    fn on_numeric_update(&self, value: f64) -> Result<()> {
        self.emit(value)
    }
}

impl BinaryTarget for ConsoleTarget {
    fn on_binary_update(&self, flag: bool) -> Result<()> {
        if self.json {
            self.emit(flag)
        } else {
            self.emit(on_off(flag))
        }
    }
}

impl TextTarget for ConsoleTarget {
    fn on_text_update(&self, text: &str) -> Result<()> {
        self.emit(text)
    }
}

impl SwitchTarget for ConsoleTarget {
    fn on_switch_state(&self, state: bool) -> Result<()> {
        if self.json {
            self.emit(state)
        } else {
            self.emit(on_off(state))
        }
    }
}

impl ClimateTarget for ConsoleTarget {
    fn on_climate_update(&self, state: &ClimateState) -> Result<()> {
        if self.json {
            let line = json!({
                "timestamp": Local::now().to_rfc3339(),
                "endpoint": self.name,
                "value": state,
            });
            println!("{}", serde_json::to_string(&line)?);
        } else {
            log::info!(
                "{} = {} (heat {}, cool {}, mode {}, fan {})",
                self.name,
                format_temperature(state.current_temperature),
                format_temperature(state.target_low),
                format_temperature(state.target_high),
                state.mode.map(|m| m.to_string()).unwrap_or_else(|| "?".into()),
                state
                    .fan_mode
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "?".into()),
            );
        }
        Ok(())
    }
}

fn format_temperature(celsius: Option<f64>) -> String {
    match celsius {
        Some(c) => format!("{c:.1} °C"),
        None => "?".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_temperature() {
        assert_eq!(format_temperature(Some(22.333)), "22.3 °C");
        assert_eq!(format_temperature(None), "?");
    }

    #[test]
    fn test_console_target_accepts_updates() {
        let target = ConsoleTarget::new("entering_water_temperature", Some("°F"), false);
        assert!(target.on_numeric_update(48.0).is_ok());
        assert!(target.on_binary_update(true).is_ok());
        assert!(target.on_climate_update(&ClimateState::default()).is_ok());
    }
}
