//! Built-in endpoint catalog of the `aurora-link` binary.

use std::sync::Arc;

use super::{config::DriverConfig, output::ConsoleTarget};
use crate::protocol::{
    aurora::{registers::*, RegisterEncoding},
    engine::{BindingTableBuilder, Feature, TextSource},
};

pub struct SensorSpec {
    pub name: &'static str,
    pub address: u16,
    pub encoding: RegisterEncoding,
    pub unit: &'static str,
    pub requires: Option<Feature>,
}

const fn sensor(
    name: &'static str,
    address: u16,
    encoding: RegisterEncoding,
    unit: &'static str,
    requires: Option<Feature>,
) -> SensorSpec {
    SensorSpec {
        name,
        address,
        encoding,
        unit,
        requires,
    }
}

use RegisterEncoding::{SignedInt32, SignedTenths, UnsignedInt16, UnsignedInt32, UnsignedTenths};

const AXB: Option<Feature> = Some(Feature::Axb);
const ENERGY: Option<Feature> = Some(Feature::EnergyMonitoring);

pub const SENSORS: &[SensorSpec] = &[
    sensor("entering_water_temperature", REG_ENTERING_WATER, SignedTenths, "°F", AXB),
    sensor("leaving_water_temperature", REG_LEAVING_WATER, SignedTenths, "°F", AXB),
    sensor("outdoor_temperature", REG_OUTDOOR_TEMP, SignedTenths, "°F", None),
    sensor("entering_air_temperature", REG_ENTERING_AIR, SignedTenths, "°F", None),
    sensor("leaving_air_temperature", REG_LEAVING_AIR, SignedTenths, "°F", None),
    sensor("suction_temperature", REG_SUCTION_TEMP, SignedTenths, "°F", AXB),
    sensor("dhw_temperature", REG_DHW_TEMP, SignedTenths, "°F", AXB),
    sensor("discharge_pressure", REG_DISCHARGE_PRESSURE, UnsignedTenths, "psi", AXB),
    sensor("suction_pressure", REG_SUCTION_PRESSURE, UnsignedTenths, "psi", AXB),
    sensor("loop_pressure", REG_LOOP_PRESSURE, UnsignedTenths, "psi", AXB),
    sensor("waterflow", REG_WATERFLOW, UnsignedTenths, "gpm", AXB),
    sensor("compressor_power", REG_COMPRESSOR_WATTS, UnsignedInt32, "W", ENERGY),
    sensor("blower_power", REG_BLOWER_WATTS, UnsignedInt32, "W", ENERGY),
    sensor("aux_heat_power", REG_AUX_HEAT_WATTS, UnsignedInt32, "W", ENERGY),
    sensor("total_power", REG_TOTAL_WATTS, UnsignedInt32, "W", ENERGY),
    sensor("pump_power", REG_PUMP_WATTS, UnsignedInt32, "W", ENERGY),
    sensor("line_voltage", REG_LINE_VOLTAGE, UnsignedInt16, "V", None),
    sensor("compressor_amps", REG_COMPRESSOR_AMPS, UnsignedTenths, "A", AXB),
    sensor("blower_amps", REG_BLOWER_AMPS, UnsignedTenths, "A", AXB),
    sensor("relative_humidity", REG_HUMIDITY, UnsignedInt16, "%", None),
    sensor(
        "compressor_speed",
        REG_VS_SPEED_ACTUAL,
        UnsignedInt16,
        "",
        Some(Feature::VsDrive),
    ),
    sensor("heat_of_extraction", REG_HEAT_EXTRACTION, SignedInt32, "BTU/h", ENERGY),
    sensor("heat_of_rejection", REG_HEAT_REJECTION, SignedInt32, "BTU/h", ENERGY),
    sensor("ambient_temperature", REG_AMBIENT_TEMP, SignedTenths, "°F", None),
    sensor("fp1_temperature", REG_FP1_TEMP, SignedTenths, "°F", None),
    sensor("fp2_temperature", REG_FP2_TEMP, SignedTenths, "°F", None),
    sensor("subcooling", REG_SUBCOOLING, SignedTenths, "°F", AXB),
    sensor("superheat", REG_SUPERHEAT, SignedTenths, "°F", AXB),
];

/// Flags of the system outputs register.
pub const BINARY_FLAGS: &[(&str, u16)] = &[
    ("compressor", OUTPUT_CC),
    ("compressor_stage2", OUTPUT_CC2),
    ("reversing_valve", OUTPUT_RV),
    ("blower", OUTPUT_BLOWER),
    ("aux_heat_stage1", OUTPUT_EH1),
    ("aux_heat_stage2", OUTPUT_EH2),
    ("accessory", OUTPUT_ACCESSORY),
    ("lockout", OUTPUT_LOCKOUT),
    ("alarm", OUTPUT_ALARM),
];

pub const TEXTS: &[(&str, TextSource)] = &[
    ("current_fault", TextSource::Fault),
    ("model_number", TextSource::Model),
    ("serial_number", TextSource::SerialNumber),
    ("system_mode", TextSource::SystemMode),
];

pub const SWITCHES: &[(&str, u16)] = &[("dhw_enable", REG_DHW_ENABLE)];

/// Whether `name` is a catalog endpoint.
pub fn contains(name: &str) -> bool {
    SENSORS.iter().any(|s| s.name == name)
        || BINARY_FLAGS.iter().any(|(n, _)| *n == name)
        || TEXTS.iter().any(|(n, _)| *n == name)
        || SWITCHES.iter().any(|(n, _)| *n == name)
}

fn climate_name(zone: u8) -> String {
    match zone {
        0 => "thermostat".to_string(),
        n => format!("zone_{n}"),
    }
}

/// Add the enabled catalog endpoints to `builder`, each printing to the console.
pub fn register(builder: &mut BindingTableBuilder, config: &DriverConfig, json: bool) {
    for spec in SENSORS.iter().filter(|s| config.is_enabled(s.name)) {
        let unit = (!spec.unit.is_empty()).then_some(spec.unit);
        builder.add_numeric(
            spec.name,
            spec.address,
            spec.encoding,
            Arc::new(ConsoleTarget::new(spec.name, unit, json)),
        );
        if let Some(feature) = spec.requires {
            builder.requires(feature);
        }
    }
    for (name, mask) in BINARY_FLAGS.iter().filter(|(n, _)| config.is_enabled(n)) {
        builder.add_binary(
            name,
            REG_SYSTEM_OUTPUTS,
            *mask,
            Arc::new(ConsoleTarget::new(name, None, json)),
        );
    }
    for (name, source) in TEXTS.iter().filter(|(n, _)| config.is_enabled(n)) {
        builder.add_text(name, *source, Arc::new(ConsoleTarget::new(name, None, json)));
    }
    for (name, address) in SWITCHES.iter().filter(|(n, _)| config.is_enabled(n)) {
        builder.add_switch(name, *address, Arc::new(ConsoleTarget::new(name, None, json)));
        builder.requires(Feature::Axb);
    }
    for zone in &config.climate_zones {
        let name = climate_name(*zone);
        builder.add_climate(&name, *zone, Arc::new(ConsoleTarget::new(&name, None, json)));
        if *zone > 0 {
            builder.requires(Feature::Iz2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_sizes() {
        assert_eq!(SENSORS.len(), 28);
        assert_eq!(BINARY_FLAGS.len(), 9);
        assert_eq!(TEXTS.len(), 4);
        assert_eq!(SWITCHES.len(), 1);
    }

    #[test]
    fn test_full_catalog_builds() {
        let mut builder = BindingTableBuilder::new();
        register(&mut builder, &DriverConfig::default(), false);
        assert_eq!(builder.len(), 28 + 9 + 4 + 1 + 1);
        let table = builder.build().unwrap();
        assert!(table.find("thermostat").is_some());
        assert_eq!(
            table.encodings().get(&REG_AMBIENT_TEMP),
            Some(&RegisterEncoding::SignedTenths)
        );
        assert_eq!(table.bindings_for(REG_SYSTEM_OUTPUTS).len(), 10);
    }

    #[test]
    fn test_endpoint_filter() {
        let config = DriverConfig {
            endpoints: vec!["compressor".to_string(), "waterflow".to_string()],
            climate_zones: vec![1, 2],
            ..Default::default()
        };
        let mut builder = BindingTableBuilder::new();
        register(&mut builder, &config, true);
        let table = builder.build().unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.find("waterflow").unwrap().requires(), Some(Feature::Axb));
        assert_eq!(table.find("zone_2").unwrap().requires(), Some(Feature::Iz2));
        assert!(contains("dhw_enable"));
        assert!(!contains("zone_2"));
    }
}
