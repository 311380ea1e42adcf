use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::protocol::aurora::{
    decode::{decode, RegisterEncoding},
    frame::RegisterRange,
    registers::*,
};

/// Optional hardware a binding can depend on.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Feature {
    Thermostat,
    AwlThermostat,
    Axb,
    AwlAxb,
    Iz2,
    AwlIz2,
    EnergyMonitoring,
    VsDrive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentStatus {
    pub name: String,
    pub status: u16,
    pub present: bool,
    pub version: f64,
}

/// What the controller reported about itself during identification.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemInfo {
    pub abc_version: f64,
    pub program: String,
    pub model: String,
    pub serial: String,
    pub blower_type: String,
    pub components: Vec<ComponentStatus>,
    pub zone_count: u8,
    pub features: BTreeSet<Feature>,
}

const COMPONENTS: &[(&str, u16)] = &[
    ("thermostat", REG_THERMOSTAT_STATUS),
    ("axb", REG_AXB_STATUS),
    ("iz2", REG_IZ2_STATUS),
    ("aoc", REG_AOC_STATUS),
    ("moc", REG_MOC_STATUS),
    ("eev2", REG_EEV2_STATUS),
    ("awl", REG_AWL_STATUS),
];

fn read_text(word: &impl Fn(u16) -> Option<u16>, address: u16, words: u8) -> String {
    let raw: Vec<u16> = (0..words as u16).filter_map(|i| word(address + i)).collect();
    decode(address, &raw, RegisterEncoding::Ascii(words))
        .ok()
        .and_then(|v| v.as_text().map(str::to_string))
        .unwrap_or_default()
}

impl SystemInfo {
    /// The two identification requests: system id, then component detection.
    pub fn identification_requests() -> Vec<Vec<RegisterRange>> {
        vec![system_id_ranges(), component_detect_ranges()]
    }

    pub fn from_registers(word: impl Fn(u16) -> Option<u16>) -> Self {
        let mut info = SystemInfo {
            abc_version: word(REG_ABC_VERSION).map_or(0.0, |w| w as f64 / 100.0),
            program: read_text(&word, REG_ABC_PROGRAM, ABC_PROGRAM_WORDS),
            model: read_text(&word, REG_MODEL_NUMBER, MODEL_NUMBER_WORDS),
            serial: read_text(&word, REG_SERIAL_NUMBER, SERIAL_NUMBER_WORDS),
            blower_type: word(REG_BLOWER_TYPE)
                .map_or("Unknown", blower_type_name)
                .to_string(),
            ..Default::default()
        };

        for (name, status_reg) in COMPONENTS {
            let status = word(*status_reg).unwrap_or(COMPONENT_MISSING);
            info.components.push(ComponentStatus {
                name: name.to_string(),
                status,
                present: component_present(status),
                version: word(status_reg + 1).map_or(0.0, |w| w as f64 / 100.0),
            });
        }

        let component = |name: &str| info.components.iter().find(|c| c.name == name).cloned();
        let mut features = BTreeSet::new();
        if let Some(c) = component("thermostat").filter(|c| c.present) {
            features.insert(Feature::Thermostat);
            if c.version >= 3.0 {
                features.insert(Feature::AwlThermostat);
            }
        }
        if let Some(c) = component("axb").filter(|c| c.present) {
            features.insert(Feature::Axb);
            features.insert(Feature::EnergyMonitoring);
            if c.version >= 2.0 {
                features.insert(Feature::AwlAxb);
            }
        }
        if let Some(c) = component("iz2").filter(|c| c.present) {
            features.insert(Feature::Iz2);
            if c.version >= 2.0 {
                features.insert(Feature::AwlIz2);
            }
        }
        if VS_DRIVE_PROGRAMS.contains(&info.program.as_str()) {
            features.insert(Feature::VsDrive);
        }
        if features.contains(&Feature::AwlIz2) {
            if let Some(count) = word(REG_IZ2_ZONE_COUNT).filter(|c| (1..=MAX_ZONES as u16).contains(c)) {
                info.zone_count = count as u8;
            }
        }
        info.features = features;
        info
    }

    pub fn has(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    /// Zone 0 is always polled; zones 1-6 need an AWL IZ2 with that many zones.
    pub fn supports_zone(&self, zone: u8) -> bool {
        zone == 0 || (self.has(Feature::AwlIz2) && zone <= self.zone_count)
    }

    /// Whether the single-zone mode and fan config words (12005/12006) can be read.
    pub fn has_thermostat_config(&self) -> bool {
        self.has(Feature::AwlThermostat) && !self.has(Feature::Iz2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::aurora::simulator::pack_ascii;
    use std::collections::HashMap;

    fn base_registers() -> HashMap<u16, u16> {
        let mut regs = HashMap::new();
        regs.insert(REG_ABC_VERSION, 305);
        for (i, w) in pack_ascii("ABCVSP", 4).into_iter().enumerate() {
            regs.insert(REG_ABC_PROGRAM + i as u16, w);
        }
        for (i, w) in pack_ascii("NDV036", 12).into_iter().enumerate() {
            regs.insert(REG_MODEL_NUMBER + i as u16, w);
        }
        regs.insert(REG_THERMOSTAT_STATUS, COMPONENT_ACTIVE);
        regs.insert(REG_THERMOSTAT_STATUS + 1, 310);
        regs.insert(REG_AXB_STATUS, COMPONENT_ADDED);
        regs.insert(REG_AXB_STATUS + 1, 150);
        regs.insert(REG_IZ2_STATUS, COMPONENT_REMOVED);
        regs
    }

    #[test]
    fn test_identify_components() {
        let regs = base_registers();
        let info = SystemInfo::from_registers(|a| regs.get(&a).copied());
        assert_eq!(info.program, "ABCVSP");
        assert_eq!(info.model, "NDV036");
        assert!((info.abc_version - 3.05).abs() < 1e-9);
        assert!(info.has(Feature::AwlThermostat));
        assert!(info.has(Feature::Axb));
        assert!(info.has(Feature::EnergyMonitoring));
        assert!(!info.has(Feature::AwlAxb));
        assert!(!info.has(Feature::Iz2));
        assert!(info.has(Feature::VsDrive));
        assert!(info.supports_zone(0));
        assert!(info.has_thermostat_config());
        assert!(!info.supports_zone(1));
    }

    #[test]
    fn test_older_thermostat_has_no_config_words() {
        let mut regs = base_registers();
        regs.insert(REG_THERMOSTAT_STATUS + 1, 200);
        let info = SystemInfo::from_registers(|a| regs.get(&a).copied());
        assert!(info.has(Feature::Thermostat));
        assert!(!info.has(Feature::AwlThermostat));
        assert!(info.supports_zone(0));
        assert!(!info.has_thermostat_config());
    }

    #[test]
    fn test_identify_zone_count() {
        let mut regs = base_registers();
        regs.insert(REG_IZ2_STATUS, COMPONENT_ACTIVE);
        regs.insert(REG_IZ2_STATUS + 1, 200);
        regs.insert(REG_IZ2_ZONE_COUNT, 3);
        let info = SystemInfo::from_registers(|a| regs.get(&a).copied());
        assert_eq!(info.zone_count, 3);
        assert!(info.supports_zone(3));
        assert!(!info.supports_zone(4));

        regs.insert(REG_IZ2_ZONE_COUNT, 9);
        let info = SystemInfo::from_registers(|a| regs.get(&a).copied());
        assert_eq!(info.zone_count, 0);
    }

    #[test]
    fn test_missing_registers_mean_absent() {
        let info = SystemInfo::from_registers(|_| None);
        assert!(info.features.is_empty());
        assert_eq!(info.program, "");
        assert_eq!(info.components.len(), 7);
    }
}
