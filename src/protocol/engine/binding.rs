//! Endpoint bindings and setup-time validation.
//!
//! A binding ties a register source (an address plus encoding, a bitmask, a
//! derived text or a climate zone) to one endpoint target. The table is built
//! once, validated as a whole, and never changes afterwards.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use crate::{
    api::driver::traits::{BinaryTarget, ClimateTarget, NumericTarget, SwitchTarget, TextTarget},
    protocol::{
        aurora::{
            climate::climate_registers,
            decode::RegisterEncoding,
            registers::{
                ABC_PROGRAM_WORDS, MAX_ZONES, MODEL_NUMBER_WORDS, REG_ABC_PROGRAM,
                REG_FAN_CONFIG, REG_LAST_FAULT, REG_MODE_CONFIG, REG_MODEL_NUMBER,
                REG_SERIAL_NUMBER, REG_SYSTEM_OUTPUTS, SERIAL_NUMBER_WORDS,
                WRITABLE_SWITCH_REGISTERS,
            },
            MAX_REGISTERS_PER_REQUEST,
        },
        engine::identify::{Feature, SystemInfo},
        error::ConfigurationError,
    },
};

/// Derived text values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextSource {
    /// "No Fault" or "E<code> <description>", from register 25.
    Fault,
    /// Operating mode derived from the register 30 output bits.
    SystemMode,
    Model,
    SerialNumber,
    Program,
}

impl TextSource {
    /// Registers the text is derived from, and how they are interpreted.
    fn claims(&self) -> (u16, RegisterEncoding) {
        match self {
            TextSource::Fault => (REG_LAST_FAULT, RegisterEncoding::RawBits),
            TextSource::SystemMode => (REG_SYSTEM_OUTPUTS, RegisterEncoding::RawBits),
            TextSource::Model => (REG_MODEL_NUMBER, RegisterEncoding::Ascii(MODEL_NUMBER_WORDS)),
            TextSource::SerialNumber => (
                REG_SERIAL_NUMBER,
                RegisterEncoding::Ascii(SERIAL_NUMBER_WORDS),
            ),
            TextSource::Program => (REG_ABC_PROGRAM, RegisterEncoding::Ascii(ABC_PROGRAM_WORDS)),
        }
    }

    /// Identity strings are read once during identification, not every cycle.
    pub fn is_identity(&self) -> bool {
        matches!(
            self,
            TextSource::Model | TextSource::SerialNumber | TextSource::Program
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Numeric {
        address: u16,
        encoding: RegisterEncoding,
    },
    Binary {
        address: u16,
        mask: u16,
    },
    Text {
        source: TextSource,
    },
    Switch {
        address: u16,
    },
    Climate {
        zone: u8,
    },
}

#[derive(Clone)]
pub enum Target {
    Numeric(Arc<dyn NumericTarget>),
    Binary(Arc<dyn BinaryTarget>),
    Text(Arc<dyn TextTarget>),
    Switch(Arc<dyn SwitchTarget>),
    Climate(Arc<dyn ClimateTarget>),
}

/// When a binding's registers are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    EveryCycle,
    Identification,
}

#[derive(Clone)]
pub struct EndpointBinding {
    name: String,
    kind: BindingKind,
    target: Target,
    requires: Option<Feature>,
}

impl std::fmt::Debug for EndpointBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointBinding")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("requires", &self.requires)
            .finish_non_exhaustive()
    }
}

impl EndpointBinding {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &BindingKind {
        &self.kind
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn requires(&self) -> Option<Feature> {
        self.requires
    }

    pub fn refresh(&self) -> Refresh {
        match self.kind {
            BindingKind::Text { source } if source.is_identity() => Refresh::Identification,
            _ => Refresh::EveryCycle,
        }
    }

    /// Every register the binding's value depends on.
    pub fn addresses(&self) -> Vec<u16> {
        self.groups()
            .into_iter()
            .flat_map(|(start, width)| (0..width).map(move |i| start.wrapping_add(i)))
            .collect()
    }

    /// Atomic register groups `(start, width)`; a group is never split across requests.
    pub fn groups(&self) -> Vec<(u16, u16)> {
        self.claims()
            .into_iter()
            .map(|(address, encoding)| (address, encoding.width() as u16))
            .collect()
    }

    /// The groups the poll cycle reads given what identification found.
    ///
    /// The single-zone thermostat config words only exist on an AWL
    /// thermostat without an IZ2; ambient and setpoints are read regardless.
    pub fn polled_groups(&self, info: Option<&SystemInfo>) -> Vec<(u16, u16)> {
        let groups = self.groups();
        match (self.kind, info) {
            (BindingKind::Climate { zone: 0 }, Some(info)) if !info.has_thermostat_config() => groups
                .into_iter()
                .filter(|(start, _)| *start != REG_FAN_CONFIG && *start != REG_MODE_CONFIG)
                .collect(),
            _ => groups,
        }
    }

    /// Whether this binding is polled given what identification found.
    pub fn is_supported(&self, info: Option<&SystemInfo>) -> bool {
        let Some(info) = info else {
            return true;
        };
        if let BindingKind::Climate { zone } = self.kind {
            if !info.supports_zone(zone) {
                return false;
            }
        }
        self.requires.map_or(true, |feature| info.has(feature))
    }

    /// Head addresses with the encoding this binding reads them with.
    fn claims(&self) -> Vec<(u16, RegisterEncoding)> {
        match self.kind {
            BindingKind::Numeric { address, encoding } => vec![(address, encoding)],
            BindingKind::Binary { address, .. } | BindingKind::Switch { address } => {
                vec![(address, RegisterEncoding::RawBits)]
            }
            BindingKind::Text { source } => vec![source.claims()],
            BindingKind::Climate { zone } => {
                let regs = climate_registers(zone);
                regs.iter()
                    .enumerate()
                    .map(|(i, address)| {
                        // Ambient temperature is signed tenths; setpoints and configs are read raw
                        let encoding = if i == 0 {
                            RegisterEncoding::SignedTenths
                        } else {
                            RegisterEncoding::RawBits
                        };
                        (*address, encoding)
                    })
                    .collect()
            }
        }
    }
}

/// How an address is read by some binding: as the head of an encoding or as a
/// trailing word of a multi-word one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    Head(RegisterEncoding),
    Tail { head: u16, encoding: RegisterEncoding },
}

impl Claim {
    fn compatible(&self, other: &Claim) -> bool {
        matches!(self, Claim::Head(RegisterEncoding::RawBits))
            || matches!(other, Claim::Head(RegisterEncoding::RawBits))
            || self == other
    }

    fn label(&self) -> String {
        match self {
            Claim::Head(encoding) => encoding.to_string(),
            Claim::Tail { head, encoding } => format!("trailing word of {encoding} at {head}"),
        }
    }
}

/// Collects bindings; `build` validates them into a [`BindingTable`].
#[derive(Default)]
pub struct BindingTableBuilder {
    bindings: Vec<EndpointBinding>,
}

impl BindingTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, name: &str, kind: BindingKind, target: Target) -> &mut EndpointBinding {
        self.bindings.push(EndpointBinding {
            name: name.to_string(),
            kind,
            target,
            requires: None,
        });
        let last = self.bindings.len() - 1;
        &mut self.bindings[last]
    }

    pub fn add_numeric(
        &mut self,
        name: &str,
        address: u16,
        encoding: RegisterEncoding,
        target: Arc<dyn NumericTarget>,
    ) -> &mut Self {
        self.push(
            name,
            BindingKind::Numeric { address, encoding },
            Target::Numeric(target),
        );
        self
    }

    pub fn add_binary(
        &mut self,
        name: &str,
        address: u16,
        mask: u16,
        target: Arc<dyn BinaryTarget>,
    ) -> &mut Self {
        self.push(name, BindingKind::Binary { address, mask }, Target::Binary(target));
        self
    }

    pub fn add_text(
        &mut self,
        name: &str,
        source: TextSource,
        target: Arc<dyn TextTarget>,
    ) -> &mut Self {
        self.push(name, BindingKind::Text { source }, Target::Text(target));
        self
    }

    pub fn add_switch(
        &mut self,
        name: &str,
        address: u16,
        target: Arc<dyn SwitchTarget>,
    ) -> &mut Self {
        self.push(name, BindingKind::Switch { address }, Target::Switch(target));
        self
    }

    pub fn add_climate(
        &mut self,
        name: &str,
        zone: u8,
        target: Arc<dyn ClimateTarget>,
    ) -> &mut Self {
        self.push(name, BindingKind::Climate { zone }, Target::Climate(target));
        self
    }

    /// Gate the most recently added binding on an optional component.
    pub fn requires(&mut self, feature: Feature) -> &mut Self {
        if let Some(last) = self.bindings.last_mut() {
            last.requires = Some(feature);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn build(self) -> Result<BindingTable, ConfigurationError> {
        BindingTable::new(self.bindings)
    }
}

/// Immutable, validated binding table with an address index for dispatch.
#[derive(Debug)]
pub struct BindingTable {
    bindings: Vec<EndpointBinding>,
    by_address: HashMap<u16, Vec<usize>>,
    encodings: BTreeMap<u16, RegisterEncoding>,
}

impl BindingTable {
    fn new(bindings: Vec<EndpointBinding>) -> Result<Self, ConfigurationError> {
        if bindings.is_empty() {
            return Err(ConfigurationError::NoBindings);
        }

        let mut claims: BTreeMap<u16, Claim> = BTreeMap::new();
        let mut claim = |address: u16, new: Claim| -> Result<(), ConfigurationError> {
            match claims.get(&address).copied() {
                Some(existing) if !existing.compatible(&new) => {
                    Err(ConfigurationError::ConflictingEncoding {
                        address,
                        first: existing.label(),
                        second: new.label(),
                    })
                }
                Some(Claim::Head(RegisterEncoding::RawBits)) | None => {
                    claims.insert(address, new);
                    Ok(())
                }
                Some(_) => Ok(()),
            }
        };

        for binding in &bindings {
            match binding.kind {
                BindingKind::Binary { address, mask } if mask == 0 => {
                    return Err(ConfigurationError::InvalidBitmask { address });
                }
                BindingKind::Climate { zone } if zone > MAX_ZONES => {
                    return Err(ConfigurationError::ZoneOutOfRange { zone });
                }
                BindingKind::Switch { address } if !WRITABLE_SWITCH_REGISTERS.contains(&address) => {
                    return Err(ConfigurationError::NotWritable { address });
                }
                _ => {}
            }

            for (head, encoding) in binding.claims() {
                let width = encoding.width() as u32;
                if width as usize > MAX_REGISTERS_PER_REQUEST {
                    return Err(ConfigurationError::TooWide {
                        address: head,
                        words: width as usize,
                        limit: MAX_REGISTERS_PER_REQUEST,
                    });
                }
                if head as u32 + width > 0x1_0000 {
                    return Err(ConfigurationError::AddressOverflow { address: head });
                }
                claim(head, Claim::Head(encoding))?;
                for i in 1..width {
                    claim(head + i as u16, Claim::Tail { head, encoding })?;
                }
            }

            if let BindingKind::Numeric {
                address,
                encoding: RegisterEncoding::Ascii(_),
            } = binding.kind
            {
                return Err(ConfigurationError::TextEncoding {
                    name: binding.name.clone(),
                    address,
                });
            }
        }

        let encodings = claims
            .into_iter()
            .filter_map(|(address, claim)| match claim {
                Claim::Head(encoding) if !encoding.is_raw_bits() => Some((address, encoding)),
                _ => None,
            })
            .collect();

        let mut by_address: HashMap<u16, Vec<usize>> = HashMap::new();
        for (index, binding) in bindings.iter().enumerate() {
            let addresses: BTreeSet<u16> = binding.addresses().into_iter().collect();
            for address in addresses {
                by_address.entry(address).or_default().push(index);
            }
        }

        Ok(Self {
            bindings,
            by_address,
            encodings,
        })
    }

    pub fn bindings(&self) -> &[EndpointBinding] {
        &self.bindings
    }

    pub fn get(&self, index: usize) -> Option<&EndpointBinding> {
        self.bindings.get(index)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Indices of the bindings that depend on `address`.
    pub fn bindings_for(&self, address: u16) -> &[usize] {
        self.by_address
            .get(&address)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Head addresses decoded at commit time, with their encoding.
    pub fn encodings(&self) -> &BTreeMap<u16, RegisterEncoding> {
        &self.encodings
    }

    pub fn find(&self, name: &str) -> Option<&EndpointBinding> {
        self.bindings.iter().find(|b| b.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::driver::traits::NoOpTarget;

    fn noop() -> Arc<NoOpTarget> {
        Arc::new(NoOpTarget)
    }

    #[test]
    fn test_shared_register_flags() {
        let mut builder = BindingTableBuilder::new();
        builder
            .add_binary("compressor", 30, 0x01, noop())
            .add_binary("reversing_valve", 30, 0x04, noop())
            .add_text("system_mode", TextSource::SystemMode, noop())
            .add_numeric("outputs_raw", 30, RegisterEncoding::UnsignedInt16, noop());
        let table = builder.build().unwrap();
        assert_eq!(table.bindings_for(30), &[0, 1, 2, 3]);
        assert_eq!(
            table.encodings().get(&30),
            Some(&RegisterEncoding::UnsignedInt16)
        );
    }

    #[test]
    fn test_conflicting_encodings_rejected() {
        let mut builder = BindingTableBuilder::new();
        builder
            .add_numeric("a", 1111, RegisterEncoding::SignedTenths, noop())
            .add_numeric("b", 1111, RegisterEncoding::UnsignedTenths, noop());
        let err = builder.build().unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::ConflictingEncoding {
                address: 1111,
                first: "signed_tenths".to_string(),
                second: "unsigned_tenths".to_string(),
            }
        );
    }

    #[test]
    fn test_32_bit_tail_collision_rejected() {
        let mut builder = BindingTableBuilder::new();
        builder
            .add_numeric("watts", 1146, RegisterEncoding::UnsignedInt32, noop())
            .add_numeric("low_word", 1147, RegisterEncoding::UnsignedInt16, noop());
        assert!(matches!(
            builder.build(),
            Err(ConfigurationError::ConflictingEncoding { address: 1147, .. })
        ));

        let mut builder = BindingTableBuilder::new();
        builder
            .add_numeric("watts", 1146, RegisterEncoding::UnsignedInt32, noop())
            .add_numeric("watts_again", 1146, RegisterEncoding::UnsignedInt32, noop())
            .add_binary("low_bit", 1147, 0x01, noop());
        let table = builder.build().unwrap();
        assert_eq!(table.bindings_for(1147), &[0, 1, 2]);
    }

    #[test]
    fn test_setup_validation_errors() {
        let mut builder = BindingTableBuilder::new();
        builder.add_binary("bad", 30, 0, noop());
        assert_eq!(
            builder.build().unwrap_err(),
            ConfigurationError::InvalidBitmask { address: 30 }
        );

        let mut builder = BindingTableBuilder::new();
        builder.add_climate("zone7", 7, noop());
        assert_eq!(
            builder.build().unwrap_err(),
            ConfigurationError::ZoneOutOfRange { zone: 7 }
        );

        let mut builder = BindingTableBuilder::new();
        builder.add_switch("bad_switch", 401, noop());
        assert_eq!(
            builder.build().unwrap_err(),
            ConfigurationError::NotWritable { address: 401 }
        );

        assert_eq!(
            BindingTableBuilder::new().build().unwrap_err(),
            ConfigurationError::NoBindings
        );

        let mut builder = BindingTableBuilder::new();
        builder.add_numeric("edge", 0xFFFF, RegisterEncoding::UnsignedInt32, noop());
        assert_eq!(
            builder.build().unwrap_err(),
            ConfigurationError::AddressOverflow { address: 0xFFFF }
        );
    }

    #[test]
    fn test_unreadable_encodings_rejected() {
        let mut builder = BindingTableBuilder::new();
        builder.add_numeric("model_as_number", 92, RegisterEncoding::Ascii(12), noop());
        assert_eq!(
            builder.build().unwrap_err(),
            ConfigurationError::TextEncoding {
                name: "model_as_number".to_string(),
                address: 92,
            }
        );

        let mut builder = BindingTableBuilder::new();
        builder
            .add_binary("compressor", 30, 0x01, noop())
            .add_numeric("huge", 2000, RegisterEncoding::Ascii(101), noop());
        assert_eq!(
            builder.build().unwrap_err(),
            ConfigurationError::TooWide {
                address: 2000,
                words: 101,
                limit: 100,
            }
        );
    }

    #[test]
    fn test_refresh_and_gating() {
        let mut builder = BindingTableBuilder::new();
        builder
            .add_text("model", TextSource::Model, noop())
            .add_numeric("ewt", 1111, RegisterEncoding::SignedTenths, noop())
            .requires(Feature::Axb)
            .add_climate("zone2", 2, noop());
        let table = builder.build().unwrap();
        let model = &table.bindings()[0];
        assert_eq!(model.refresh(), Refresh::Identification);
        assert_eq!(model.addresses().len(), MODEL_NUMBER_WORDS as usize);

        let info = SystemInfo::default();
        assert!(table.bindings()[1].is_supported(None));
        assert!(!table.bindings()[1].is_supported(Some(&info)));
        assert!(!table.bindings()[2].is_supported(Some(&info)));
        assert_eq!(table.bindings()[2].addresses(), vec![31010, 31011, 31012]);
    }
}
