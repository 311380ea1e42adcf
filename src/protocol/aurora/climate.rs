//! Thermostat view over the single-zone and IZ2 zone registers.
//!
//! The controller works in °F (setpoints and ambient in tenths for the single
//! zone, whole degrees packed into config words for IZ2 zones); everything
//! published here is °C.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::registers::{
    self, iz2_zone_read_base, iz2_zone_write_base, FAN_AUTO, FAN_CONTINUOUS, FAN_INTERMITTENT,
    MODE_AUTO, MODE_COOL, MODE_EHEAT, MODE_HEAT, MODE_OFF, REG_AMBIENT_TEMP,
    REG_COOLING_SETPOINT, REG_FAN_CONFIG, REG_HEATING_SETPOINT, REG_MODE_CONFIG,
    REG_WRITE_COOLING_SP, REG_WRITE_FAN_MODE, REG_WRITE_HEATING_SP, REG_WRITE_MODE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ClimateMode {
    Off,
    HeatCool,
    Cool,
    Heat,
}

/// `Boost` stands for emergency heat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ClimatePreset {
    None,
    Boost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FanMode {
    Auto,
    On,
    /// Custom fan mode, shown as "Intermittent".
    Intermittent,
}

/// Published thermostat state. Fields stay `None` until their registers are read.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClimateState {
    pub current_temperature: Option<f64>,
    pub target_low: Option<f64>,
    pub target_high: Option<f64>,
    pub mode: Option<ClimateMode>,
    pub preset: Option<ClimatePreset>,
    pub fan_mode: Option<FanMode>,
}

impl ClimateState {
    pub fn is_empty(&self) -> bool {
        *self == ClimateState::default()
    }
}

/// A control request; unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClimateCall {
    pub mode: Option<ClimateMode>,
    pub preset: Option<ClimatePreset>,
    pub target_low: Option<f64>,
    pub target_high: Option<f64>,
    pub fan_mode: Option<FanMode>,
}

impl ClimateCall {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: ClimateMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_preset(mut self, preset: ClimatePreset) -> Self {
        self.preset = Some(preset);
        self
    }

    pub fn with_target_low(mut self, celsius: f64) -> Self {
        self.target_low = Some(celsius);
        self
    }

    pub fn with_target_high(mut self, celsius: f64) -> Self {
        self.target_high = Some(celsius);
        self
    }

    pub fn with_fan_mode(mut self, fan_mode: FanMode) -> Self {
        self.fan_mode = Some(fan_mode);
        self
    }
}

pub fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

pub fn celsius_to_fahrenheit(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

/// °C to the controller's tenths of °F.
fn setpoint_word(celsius: f64) -> u16 {
    (celsius_to_fahrenheit(celsius) * 10.0)
        .round()
        .clamp(0.0, u16::MAX as f64) as u16
}

/// Registers a climate binding for `zone` reads.
pub fn climate_registers(zone: u8) -> Vec<u16> {
    if zone == 0 {
        vec![
            REG_AMBIENT_TEMP,
            REG_HEATING_SETPOINT,
            REG_COOLING_SETPOINT,
            REG_MODE_CONFIG,
            REG_FAN_CONFIG,
        ]
    } else {
        let base = iz2_zone_read_base(zone);
        vec![base, base + 1, base + 2]
    }
}

fn mode_from_raw(raw: u16) -> Option<(ClimateMode, ClimatePreset)> {
    match raw {
        MODE_OFF => Some((ClimateMode::Off, ClimatePreset::None)),
        MODE_AUTO => Some((ClimateMode::HeatCool, ClimatePreset::None)),
        MODE_COOL => Some((ClimateMode::Cool, ClimatePreset::None)),
        MODE_HEAT => Some((ClimateMode::Heat, ClimatePreset::None)),
        MODE_EHEAT => Some((ClimateMode::Heat, ClimatePreset::Boost)),
        _ => None,
    }
}

fn fan_from_raw(raw: u16) -> FanMode {
    match raw {
        FAN_CONTINUOUS => FanMode::On,
        FAN_INTERMITTENT => FanMode::Intermittent,
        _ => FanMode::Auto,
    }
}

/// Build the state for `zone` from raw register words.
pub fn climate_state(zone: u8, word: impl Fn(u16) -> Option<u16>) -> ClimateState {
    let mut state = ClimateState::default();

    if zone == 0 {
        state.current_temperature =
            word(REG_AMBIENT_TEMP).map(|w| fahrenheit_to_celsius(w as i16 as f64 / 10.0));
        state.target_low =
            word(REG_HEATING_SETPOINT).map(|w| fahrenheit_to_celsius(w as f64 / 10.0));
        state.target_high =
            word(REG_COOLING_SETPOINT).map(|w| fahrenheit_to_celsius(w as f64 / 10.0));
        if let Some((mode, preset)) =
            word(REG_MODE_CONFIG).and_then(|w| mode_from_raw(registers::thermostat_mode(w)))
        {
            state.mode = Some(mode);
            state.preset = Some(preset);
        }
        state.fan_mode = word(REG_FAN_CONFIG).map(|w| fan_from_raw(registers::thermostat_fan_mode(w)));
        return state;
    }

    let base = iz2_zone_read_base(zone);
    let config1 = word(base + 1);
    let config2 = word(base + 2);
    state.current_temperature =
        word(base).map(|w| fahrenheit_to_celsius(w as i16 as f64 / 10.0));
    if let Some(c1) = config1 {
        state.fan_mode = Some(fan_from_raw(registers::iz2_extract_fan_mode(c1)));
        state.target_high = Some(fahrenheit_to_celsius(
            registers::iz2_extract_cooling_setpoint(c1) as f64,
        ));
    }
    if let Some(c2) = config2 {
        if let Some((mode, preset)) = mode_from_raw(registers::iz2_extract_mode(c2)) {
            state.mode = Some(mode);
            state.preset = Some(preset);
        }
    }
    if let (Some(c1), Some(c2)) = (config1, config2) {
        state.target_low = Some(fahrenheit_to_celsius(
            registers::iz2_extract_heating_setpoint(c1, c2) as f64,
        ));
    }
    state
}

/// Register writes carrying out `call` on `zone`, in the order they should be sent.
pub fn climate_writes(zone: u8, call: &ClimateCall) -> Vec<(u16, u16)> {
    let (mode_reg, heat_reg, cool_reg, fan_reg) = if zone == 0 {
        (
            REG_WRITE_MODE,
            REG_WRITE_HEATING_SP,
            REG_WRITE_COOLING_SP,
            REG_WRITE_FAN_MODE,
        )
    } else {
        let base = iz2_zone_write_base(zone);
        (base, base + 1, base + 2, base + 3)
    };

    let mut writes = Vec::new();
    if let Some(mode) = call.mode {
        let raw = match mode {
            ClimateMode::Off => MODE_OFF,
            ClimateMode::HeatCool => MODE_AUTO,
            ClimateMode::Cool => MODE_COOL,
            ClimateMode::Heat => MODE_HEAT,
        };
        writes.push((mode_reg, raw));
    }
    if call.preset == Some(ClimatePreset::Boost) {
        writes.push((mode_reg, MODE_EHEAT));
    }
    if let Some(low) = call.target_low {
        writes.push((heat_reg, setpoint_word(low)));
    }
    if let Some(high) = call.target_high {
        writes.push((cool_reg, setpoint_word(high)));
    }
    if let Some(fan) = call.fan_mode {
        let raw = match fan {
            FanMode::Auto => FAN_AUTO,
            FanMode::On => FAN_CONTINUOUS,
            FanMode::Intermittent => FAN_INTERMITTENT,
        };
        writes.push((fan_reg, raw));
    }
    writes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn approx(a: Option<f64>, b: f64) -> bool {
        a.map(|a| (a - b).abs() < 1e-6).unwrap_or(false)
    }

    #[test]
    fn test_single_zone_state() {
        let regs: HashMap<u16, u16> = [
            (REG_AMBIENT_TEMP, 680),
            (REG_HEATING_SETPOINT, 680),
            (REG_COOLING_SETPOINT, 770),
            (REG_MODE_CONFIG, MODE_EHEAT << 8),
            (REG_FAN_CONFIG, 0x100),
        ]
        .into_iter()
        .collect();
        let state = climate_state(0, |a| regs.get(&a).copied());
        assert!(approx(state.current_temperature, 20.0));
        assert!(approx(state.target_low, 20.0));
        assert!(approx(state.target_high, 25.0));
        assert_eq!(state.mode, Some(ClimateMode::Heat));
        assert_eq!(state.preset, Some(ClimatePreset::Boost));
        assert_eq!(state.fan_mode, Some(FanMode::Intermittent));
    }

    #[test]
    fn test_zone_state_needs_both_configs_for_heating() {
        let base = iz2_zone_read_base(2);
        let only_config1: HashMap<u16, u16> = [(base + 1, 0x4C)].into_iter().collect();
        let state = climate_state(2, |a| only_config1.get(&a).copied());
        assert!(state.target_high.is_some());
        assert!(state.target_low.is_none());
        assert_eq!(state.fan_mode, Some(FanMode::Auto));

        let both: HashMap<u16, u16> = [(base, 0xFFEC), (base + 1, 0x4D), (base + 2, MODE_HEAT << 8)]
            .into_iter()
            .collect();
        let state = climate_state(2, |a| both.get(&a).copied());
        assert!(approx(state.target_low, 20.0));
        assert!(approx(state.current_temperature, fahrenheit_to_celsius(-2.0)));
        assert_eq!(state.mode, Some(ClimateMode::Heat));
    }

    #[test]
    fn test_writes_single_zone() {
        let call = ClimateCall::new()
            .with_mode(ClimateMode::Cool)
            .with_target_low(20.0)
            .with_target_high(25.0)
            .with_fan_mode(FanMode::On);
        assert_eq!(
            climate_writes(0, &call),
            vec![
                (REG_WRITE_MODE, MODE_COOL),
                (REG_WRITE_HEATING_SP, 680),
                (REG_WRITE_COOLING_SP, 770),
                (REG_WRITE_FAN_MODE, FAN_CONTINUOUS),
            ]
        );
    }

    #[test]
    fn test_writes_zone_boost() {
        let call = ClimateCall::new()
            .with_mode(ClimateMode::Heat)
            .with_preset(ClimatePreset::Boost);
        assert_eq!(
            climate_writes(3, &call),
            vec![(21220, MODE_HEAT), (21220, MODE_EHEAT)]
        );
    }

    #[test]
    fn test_mode_names() {
        assert_eq!("heat_cool".parse::<ClimateMode>().unwrap(), ClimateMode::HeatCool);
        assert_eq!(FanMode::Intermittent.to_string(), "intermittent");
    }
}
