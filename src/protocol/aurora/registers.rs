//! Aurora register map.

use super::{decode::extract_field, frame::RegisterRange};

// Status
pub const REG_LINE_VOLTAGE: u16 = 16;
pub const REG_FP1_TEMP: u16 = 19;
pub const REG_FP2_TEMP: u16 = 20;
/// Bit 15 = lockout, bits 0-14 = fault code.
pub const REG_LAST_FAULT: u16 = 25;
pub const REG_LAST_LOCKOUT: u16 = 26;
pub const REG_SYSTEM_OUTPUTS: u16 = 30;
pub const REG_SYSTEM_INPUTS: u16 = 31;
pub const REG_DEMAND: u16 = 502;

pub const FAULT_LOCKOUT_BIT: u16 = 0x8000;
pub const FAULT_CODE_MASK: u16 = 0x7FFF;

// Register 30 bits
pub const OUTPUT_CC: u16 = 0x01;
pub const OUTPUT_CC2: u16 = 0x02;
pub const OUTPUT_RV: u16 = 0x04;
pub const OUTPUT_BLOWER: u16 = 0x08;
pub const OUTPUT_EH1: u16 = 0x10;
pub const OUTPUT_EH2: u16 = 0x20;
pub const OUTPUT_ACCESSORY: u16 = 0x200;
pub const OUTPUT_LOCKOUT: u16 = 0x400;
pub const OUTPUT_ALARM: u16 = 0x800;

// Thermostat (single zone)
pub const REG_ENTERING_AIR: u16 = 740;
pub const REG_HUMIDITY: u16 = 741;
pub const REG_OUTDOOR_TEMP: u16 = 742;
pub const REG_HEATING_SETPOINT: u16 = 745;
pub const REG_COOLING_SETPOINT: u16 = 746;
pub const REG_AMBIENT_TEMP: u16 = 747;
pub const REG_FAN_CONFIG: u16 = 12005;
pub const REG_MODE_CONFIG: u16 = 12006;

/// Thermostat config words sit across a device range breakpoint; the
/// controller only answers them through the individual-register read.
pub const INDIVIDUAL_READ_REGISTERS: &[u16] = &[REG_FAN_CONFIG, REG_MODE_CONFIG];

pub fn is_individual_read(address: u16) -> bool {
    INDIVIDUAL_READ_REGISTERS.contains(&address)
}

pub const REG_WRITE_MODE: u16 = 12606;
pub const REG_WRITE_HEATING_SP: u16 = 12619;
pub const REG_WRITE_COOLING_SP: u16 = 12620;
pub const REG_WRITE_FAN_MODE: u16 = 12621;
pub const REG_WRITE_FAN_ON_TIME: u16 = 12622;
pub const REG_WRITE_FAN_OFF_TIME: u16 = 12623;

// AXB
pub const REG_AXB_INPUTS: u16 = 1103;
pub const REG_AXB_OUTPUTS: u16 = 1104;
pub const REG_BLOWER_AMPS: u16 = 1105;
pub const REG_AUX_AMPS: u16 = 1106;
pub const REG_COMPRESSOR_AMPS: u16 = 1107;
pub const REG_AIR_COIL_AMPS: u16 = 1108;
pub const REG_LEAVING_AIR: u16 = 900;
pub const REG_OUTDOOR_TEMP2: u16 = 1109;
pub const REG_LEAVING_WATER: u16 = 1110;
pub const REG_ENTERING_WATER: u16 = 1111;
pub const REG_SUPERHEAT_TEMP: u16 = 1112;
pub const REG_SUCTION_TEMP: u16 = 1113;
pub const REG_DHW_TEMP: u16 = 1114;
pub const REG_DISCHARGE_PRESSURE: u16 = 1115;
pub const REG_SUCTION_PRESSURE: u16 = 1116;
pub const REG_WATERFLOW: u16 = 1117;
pub const REG_LOOP_PRESSURE: u16 = 1119;
pub const REG_SUBCOOLING: u16 = 1124;
pub const REG_SUPERHEAT: u16 = 1125;
pub const REG_APPROACH: u16 = 1134;
pub const REG_EEV_OPEN: u16 = 1135;
pub const REG_EEV_CALC: u16 = 1136;

// Power, each a 32-bit pair
pub const REG_COMPRESSOR_WATTS: u16 = 1146;
pub const REG_BLOWER_WATTS: u16 = 1148;
pub const REG_AUX_HEAT_WATTS: u16 = 1150;
pub const REG_TOTAL_WATTS: u16 = 1152;
pub const REG_HEAT_EXTRACTION: u16 = 1154;
pub const REG_HEAT_REJECTION: u16 = 1156;
pub const REG_PUMP_WATTS: u16 = 1164;

// VS drive
pub const REG_VS_SPEED_DESIRED: u16 = 3000;
pub const REG_VS_SPEED_ACTUAL: u16 = 3001;
pub const REG_VS_DRIVE_STATUS: u16 = 3220;
pub const REG_VS_DISCHARGE_PRESS: u16 = 3322;
pub const REG_VS_SUCTION_PRESS: u16 = 3323;
pub const REG_VS_DISCHARGE_TEMP: u16 = 3325;
pub const REG_VS_INVERTER_TEMP: u16 = 3522;
pub const REG_VS_FAN_SPEED: u16 = 3524;

// IZ2 zones
pub const REG_IZ2_ZONE_BASE: u16 = 31007;
pub const REG_IZ2_ZONE_CONFIG3_BASE: u16 = 31200;
pub const REG_IZ2_WRITE_BASE: u16 = 21202;
pub const IZ2_READ_STRIDE: u16 = 3;
pub const IZ2_WRITE_STRIDE: u16 = 9;
pub const MAX_ZONES: u8 = 6;

// DHW
pub const REG_DHW_ENABLE: u16 = 400;
pub const REG_DHW_SETPOINT: u16 = 401;

/// Registers a switch may be bound to.
pub const WRITABLE_SWITCH_REGISTERS: &[u16] = &[REG_DHW_ENABLE];

// System identification
pub const REG_ABC_VERSION: u16 = 2;
pub const REG_ABC_PROGRAM: u16 = 88;
pub const ABC_PROGRAM_WORDS: u8 = 4;
pub const REG_MODEL_NUMBER: u16 = 92;
pub const MODEL_NUMBER_WORDS: u8 = 12;
pub const REG_SERIAL_NUMBER: u16 = 105;
pub const SERIAL_NUMBER_WORDS: u8 = 5;
pub const REG_IZ2_ZONE_COUNT: u16 = 483;
pub const REG_BLOWER_TYPE: u16 = 404;
pub const REG_COMPRESSOR_HZ: u16 = 412;
pub const REG_PUMP_TYPE: u16 = 413;

// Component detection; version lives at status + 1 in hundredths
pub const REG_THERMOSTAT_STATUS: u16 = 800;
pub const REG_AXB_STATUS: u16 = 806;
pub const REG_IZ2_STATUS: u16 = 812;
pub const REG_AOC_STATUS: u16 = 815;
pub const REG_MOC_STATUS: u16 = 818;
pub const REG_EEV2_STATUS: u16 = 824;
pub const REG_AWL_STATUS: u16 = 827;

pub const COMPONENT_ACTIVE: u16 = 1;
pub const COMPONENT_ADDED: u16 = 2;
pub const COMPONENT_REMOVED: u16 = 3;
pub const COMPONENT_MISSING: u16 = 0xFFFF;

pub const VS_DRIVE_PROGRAMS: &[&str] = &["ABCVSP", "ABCVSPR", "ABCSPLVS"];

pub const MODE_OFF: u16 = 0;
pub const MODE_AUTO: u16 = 1;
pub const MODE_COOL: u16 = 2;
pub const MODE_HEAT: u16 = 3;
pub const MODE_EHEAT: u16 = 4;

pub const FAN_AUTO: u16 = 0;
pub const FAN_CONTINUOUS: u16 = 1;
pub const FAN_INTERMITTENT: u16 = 2;

pub const BLOWER_PSC: u16 = 0;
pub const BLOWER_ECM_230: u16 = 1;
pub const BLOWER_ECM_277: u16 = 2;
pub const BLOWER_5SPD_460: u16 = 3;

pub fn blower_type_name(value: u16) -> &'static str {
    match value {
        BLOWER_PSC => "PSC",
        BLOWER_ECM_230 => "ECM 230",
        BLOWER_ECM_277 => "ECM 277",
        BLOWER_5SPD_460 => "5-Speed 460",
        _ => "Unknown",
    }
}

const FAULT_TABLE: &[(u16, &str)] = &[
    (1, "Input Error"),
    (2, "High Pressure"),
    (3, "Low Pressure"),
    (4, "Freeze Detect FP2"),
    (5, "Freeze Detect FP1"),
    (7, "Condensate Overflow"),
    (8, "Over/Under Voltage"),
    (9, "AirF/RPM"),
    (10, "Compressor Monitor"),
    (11, "FP1/2 Sensor Error"),
    (12, "RefPerfrm Error"),
    (13, "Non-Critical AXB Sensor Error"),
    (14, "Critical AXB Sensor Error"),
    (15, "Hot Water Limit"),
    (16, "VS Pump Error"),
    (17, "Communicating Thermostat Error"),
    (18, "Non-Critical Comms Error"),
    (19, "Critical Comms Error"),
    (21, "Low Loop Pressure"),
    (22, "Communicating ECM Error"),
    (23, "HA Alarm 1"),
    (24, "HA Alarm 2"),
    (25, "AxbEev Error"),
    (41, "High Drive Temp"),
    (42, "High Discharge Temp"),
    (99, "System Reset"),
];

pub fn fault_description(code: u16) -> &'static str {
    FAULT_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, d)| *d)
        .unwrap_or("Unknown Fault")
}

/// Registers read once during identification.
pub fn system_id_ranges() -> Vec<RegisterRange> {
    vec![
        RegisterRange::new(REG_ABC_VERSION, 1),
        RegisterRange::new(REG_ABC_PROGRAM, ABC_PROGRAM_WORDS as u16),
        RegisterRange::new(REG_MODEL_NUMBER, MODEL_NUMBER_WORDS as u16),
        RegisterRange::new(REG_SERIAL_NUMBER, SERIAL_NUMBER_WORDS as u16),
        RegisterRange::new(REG_DHW_ENABLE, 2),
        RegisterRange::new(REG_BLOWER_TYPE, 1),
        RegisterRange::new(REG_COMPRESSOR_HZ, 2),
    ]
}

pub fn component_detect_ranges() -> Vec<RegisterRange> {
    vec![
        RegisterRange::new(REG_THERMOSTAT_STATUS, 3),
        RegisterRange::new(REG_AXB_STATUS, 3),
        RegisterRange::new(REG_IZ2_STATUS, 3),
        RegisterRange::new(REG_AOC_STATUS, 3),
        RegisterRange::new(REG_MOC_STATUS, 3),
        RegisterRange::new(REG_EEV2_STATUS, 3),
        RegisterRange::new(REG_AWL_STATUS, 3),
        RegisterRange::new(REG_IZ2_ZONE_COUNT, 1),
    ]
}

/// A status word of 0, removed or missing means the component is absent.
pub fn component_present(status: u16) -> bool {
    !matches!(status, 0 | COMPONENT_REMOVED | COMPONENT_MISSING)
}

pub fn iz2_zone_read_base(zone: u8) -> u16 {
    REG_IZ2_ZONE_BASE + (zone.saturating_sub(1) as u16) * IZ2_READ_STRIDE
}

pub fn iz2_zone_config3(zone: u8) -> u16 {
    REG_IZ2_ZONE_CONFIG3_BASE + (zone.saturating_sub(1) as u16) * IZ2_READ_STRIDE
}

pub fn iz2_zone_write_base(zone: u8) -> u16 {
    REG_IZ2_WRITE_BASE + (zone.saturating_sub(1) as u16) * IZ2_WRITE_STRIDE
}

pub fn iz2_extract_mode(config2: u16) -> u16 {
    extract_field(config2, 0x0300, 8)
}

pub fn iz2_extract_fan_mode(config1: u16) -> u16 {
    if config1 & 0x80 != 0 {
        FAN_CONTINUOUS
    } else if config1 & 0x100 != 0 {
        FAN_INTERMITTENT
    } else {
        FAN_AUTO
    }
}

/// Whole °F.
pub fn iz2_extract_cooling_setpoint(config1: u16) -> u16 {
    extract_field(config1, 0x7E, 1) + 36
}

/// Whole °F; bit 0 of config1 carries the high bit.
pub fn iz2_extract_heating_setpoint(config1: u16, config2: u16) -> u16 {
    let carry = config1 & 0x01;
    ((carry << 5) | ((config2 & 0xF800) >> 11)) + 36
}

pub fn iz2_damper_open(config2: u16) -> bool {
    config2 & 0x10 != 0
}

/// Single-zone mode configuration, bits 8-10.
pub fn thermostat_mode(mode_config: u16) -> u16 {
    extract_field(mode_config, 0x0700, 8)
}

pub fn thermostat_fan_mode(fan_config: u16) -> u16 {
    iz2_extract_fan_mode(fan_config)
}
