use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::protocol::{
    aurora::{
        frame::{encode_read_ranges, encode_read_registers, Expect, RegisterRange, MAX_QUAD_ENTRIES},
        registers::is_individual_read,
        FUNC_READ_RANGES, FUNC_READ_REGISTERS, MAX_REGISTERS_PER_REQUEST,
    },
    engine::{
        binding::{BindingTable, Refresh},
        identify::SystemInfo,
    },
    error::FrameError,
};

/// How addresses are grouped into requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanOptions {
    /// Unused registers tolerated between two bound addresses of one range.
    pub max_gap: u16,
    /// Pack several ranges into one multi-range request.
    pub coalesce_batches: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            max_gap: 2,
            coalesce_batches: true,
        }
    }
}

/// One request/response exchange of the poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollBatch {
    function: u8,
    ranges: Vec<RegisterRange>,
}

impl PollBatch {
    /// A batch over `ranges`; all-singleton batches use the individual-register read.
    pub fn new(ranges: Vec<RegisterRange>) -> Self {
        let function = if !ranges.is_empty() && ranges.iter().all(|r| r.count == 1) {
            FUNC_READ_REGISTERS
        } else {
            FUNC_READ_RANGES
        };
        Self { function, ranges }
    }

    pub fn function(&self) -> u8 {
        self.function
    }

    pub fn ranges(&self) -> &[RegisterRange] {
        &self.ranges
    }

    /// Addresses in the order the reply carries their words.
    pub fn addresses(&self) -> Vec<u16> {
        self.ranges.iter().flat_map(|r| r.addresses()).collect()
    }

    pub fn register_count(&self) -> usize {
        self.ranges.iter().map(|r| r.count as usize).sum()
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        if self.function == FUNC_READ_REGISTERS {
            encode_read_registers(&self.addresses())
        } else {
            encode_read_ranges(&self.ranges)
        }
    }

    pub fn expect(&self) -> Expect {
        if self.function == FUNC_READ_REGISTERS {
            Expect::read_registers(self.ranges.len())
        } else {
            Expect::read_ranges(&self.ranges)
        }
    }

    /// Short label for logs, e.g. `65[30+2, 740+8]`.
    pub fn describe(&self) -> String {
        let ranges: Vec<String> = self
            .ranges
            .iter()
            .map(|r| {
                if r.count == 1 {
                    r.start.to_string()
                } else {
                    format!("{}+{}", r.start, r.count)
                }
            })
            .collect();
        format!("{}[{}]", self.function, ranges.join(", "))
    }
}

/// The ordered requests of one poll cycle. Fixed once the bindings are known.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollPlan {
    ranges: Vec<RegisterRange>,
    batches: Vec<PollBatch>,
}

impl PollPlan {
    /// Plan the reads of every binding supported by `info`.
    ///
    /// Without identification (`None`) every binding is polled, including the
    /// identity texts that are otherwise read once during identification.
    pub fn build(table: &BindingTable, info: Option<&SystemInfo>, options: PlanOptions) -> Self {
        let groups = table
            .bindings()
            .iter()
            .filter(|b| b.is_supported(info))
            .filter(|b| info.is_none() || b.refresh() == Refresh::EveryCycle)
            .flat_map(|b| b.polled_groups(info));
        Self::from_groups(groups, options)
    }

    /// Plan over atomic `(start, width)` groups. Groups are never split, except
    /// that individual-read registers always become singletons outside any range.
    pub fn from_groups(groups: impl IntoIterator<Item = (u16, u16)>, options: PlanOptions) -> Self {
        let mut groups: Vec<(u32, u32)> = groups
            .into_iter()
            .filter(|(_, width)| *width > 0)
            .map(|(start, width)| (start as u32, start as u32 + width as u32))
            .collect();
        groups.sort_unstable();
        groups.dedup();

        let individual = |a: u32| is_individual_read(a as u16);
        let mut singles: BTreeSet<u32> = BTreeSet::new();
        let mut ranged: Vec<(u32, u32)> = Vec::new();
        for (start, end) in groups {
            if (start..end).any(individual) {
                singles.extend(start..end);
            } else {
                ranged.push((start, end));
            }
        }

        let limit = MAX_REGISTERS_PER_REQUEST as u32;
        let mut merged: Vec<(u32, u32)> = Vec::new();
        for (start, end) in ranged {
            if let Some(last) = merged.last_mut() {
                let joined_end = last.1.max(end);
                if start <= last.1 + options.max_gap as u32
                    && joined_end - last.0 <= limit
                    && !(last.1..start).any(individual)
                {
                    last.1 = joined_end;
                    continue;
                }
            }
            merged.push((start, end));
        }

        let mut ranges: Vec<RegisterRange> = merged
            .into_iter()
            .map(|(start, end)| RegisterRange::new(start as u16, (end - start) as u16))
            .chain(singles.into_iter().map(|a| RegisterRange::single(a as u16)))
            .collect();
        ranges.sort_by_key(|r| r.start);

        let batches = if options.coalesce_batches {
            pack(&ranges)
        } else {
            ranges.iter().map(|r| PollBatch::new(vec![*r])).collect()
        };
        Self { ranges, batches }
    }

    pub fn ranges(&self) -> &[RegisterRange] {
        &self.ranges
    }

    pub fn batches(&self) -> &[PollBatch] {
        &self.batches
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn register_count(&self) -> usize {
        self.ranges.iter().map(|r| r.count as usize).sum()
    }
}

/// Greedy packing in address order; a batch closes when the next range would
/// break the register or entry limit. Singletons and multi-register ranges are
/// packed separately so singleton runs can use the cheaper individual read.
fn pack(ranges: &[RegisterRange]) -> Vec<PollBatch> {
    let mut batches = Vec::new();
    let mut current: Vec<RegisterRange> = Vec::new();
    let mut registers = 0usize;

    let (singles, multis): (Vec<RegisterRange>, Vec<RegisterRange>) =
        ranges.iter().partition(|r| r.count == 1);

    for list in [multis, singles] {
        for range in list {
            let count = range.count as usize;
            let entry_limit = if range.count == 1 {
                MAX_REGISTERS_PER_REQUEST
            } else {
                MAX_QUAD_ENTRIES
            };
            if !current.is_empty()
                && (registers + count > MAX_REGISTERS_PER_REQUEST || current.len() >= entry_limit)
            {
                batches.push(PollBatch::new(std::mem::take(&mut current)));
                registers = 0;
            }
            current.push(range);
            registers += count;
        }
        if !current.is_empty() {
            batches.push(PollBatch::new(std::mem::take(&mut current)));
            registers = 0;
        }
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::driver::traits::NoOpTarget,
        protocol::{
            aurora::{decode::RegisterEncoding, registers::MODEL_NUMBER_WORDS},
            engine::{
                binding::{BindingTableBuilder, TextSource},
                identify::Feature,
            },
        },
    };
    use std::sync::Arc;

    fn opts(max_gap: u16, coalesce_batches: bool) -> PlanOptions {
        PlanOptions {
            max_gap,
            coalesce_batches,
        }
    }

    #[test]
    fn test_gap_coalescing() {
        let plan = PollPlan::from_groups(
            [(740, 1), (741, 1), (742, 1), (745, 1), (747, 1), (1111, 1)],
            opts(2, false),
        );
        assert_eq!(
            plan.ranges(),
            &[RegisterRange::new(740, 8), RegisterRange::single(1111)]
        );
        assert_eq!(plan.batches().len(), 2);
        assert_eq!(plan.batches()[1].function(), FUNC_READ_REGISTERS);

        let plan = PollPlan::from_groups([(740, 1), (745, 1)], opts(0, false));
        assert_eq!(plan.ranges().len(), 2);
    }

    #[test]
    fn test_32_bit_pairs_never_split() {
        let groups: Vec<(u16, u16)> = (0..51).map(|i| (1000 + i * 2, 2)).collect();
        let plan = PollPlan::from_groups(groups, opts(0, false));
        assert_eq!(plan.ranges()[0], RegisterRange::new(1000, 100));
        assert_eq!(plan.ranges()[1], RegisterRange::new(1100, 2));
    }

    #[test]
    fn test_batch_packing_limits() {
        let groups: Vec<(u16, u16)> = (0..70).map(|i| (i * 10, 1)).collect();
        let plan = PollPlan::from_groups(groups, opts(0, true));
        assert_eq!(plan.batches().len(), 1);
        assert_eq!(plan.batches()[0].function(), FUNC_READ_REGISTERS);
        assert_eq!(plan.batches()[0].expect(), Expect::read_registers(70));

        let groups: Vec<(u16, u16)> = (0..70).map(|i| (i * 10, 2)).collect();
        let plan = PollPlan::from_groups(groups, opts(0, true));
        assert_eq!(plan.batches().len(), 2);
        assert_eq!(plan.batches()[0].ranges().len(), 50);
        assert!(plan.batches().iter().all(|b| b.register_count() <= 100));
        assert!(plan.batches().iter().all(|b| b.encode().is_ok()));
    }

    #[test]
    fn test_batch_addresses_in_reply_order() {
        let batch = PollBatch::new(vec![RegisterRange::new(30, 2), RegisterRange::single(25)]);
        assert_eq!(batch.function(), FUNC_READ_RANGES);
        assert_eq!(batch.addresses(), vec![30, 31, 25]);
        assert_eq!(batch.describe(), "65[30+2, 25]");
    }

    #[test]
    fn test_thermostat_config_read_individually() {
        let groups = [(745, 3), (12005, 2), (12004, 1), (12008, 1)];
        for coalesce in [true, false] {
            let plan = PollPlan::from_groups(groups, opts(2, coalesce));
            assert_eq!(
                plan.ranges(),
                &[
                    RegisterRange::new(745, 3),
                    RegisterRange::single(12004),
                    RegisterRange::single(12005),
                    RegisterRange::single(12006),
                    RegisterRange::single(12008),
                ]
            );
            for batch in plan.batches() {
                if batch.addresses().iter().any(|a| is_individual_read(*a)) {
                    assert_eq!(batch.function(), FUNC_READ_REGISTERS);
                }
            }
        }

        let plan = PollPlan::from_groups(groups, opts(2, true));
        assert_eq!(plan.batches().len(), 2);
        assert_eq!(plan.batches()[0].describe(), "65[745+3]");
        assert_eq!(plan.batches()[1].describe(), "66[12004, 12005, 12006, 12008]");
    }

    #[test]
    fn test_identity_texts_polled_without_identification() {
        let mut builder = BindingTableBuilder::new();
        builder
            .add_text("model", TextSource::Model, Arc::new(NoOpTarget))
            .add_binary("compressor", 30, 0x01, Arc::new(NoOpTarget));
        let table = builder.build().unwrap();

        let unidentified = PollPlan::build(&table, None, PlanOptions::default());
        assert_eq!(unidentified.register_count(), 1 + MODEL_NUMBER_WORDS as usize);

        let identified = PollPlan::build(&table, Some(&SystemInfo::default()), PlanOptions::default());
        assert_eq!(identified.ranges(), &[RegisterRange::single(30)]);
    }

    #[test]
    fn test_older_thermostat_keeps_zone_zero_without_config_words() {
        let mut builder = BindingTableBuilder::new();
        builder.add_climate("thermostat", 0, Arc::new(NoOpTarget));
        let table = builder.build().unwrap();

        let mut info = SystemInfo::default();
        info.features.insert(Feature::Thermostat);
        let plan = PollPlan::build(&table, Some(&info), PlanOptions::default());
        assert_eq!(plan.ranges(), &[RegisterRange::new(745, 3)]);

        info.features.insert(Feature::AwlThermostat);
        let plan = PollPlan::build(&table, Some(&info), PlanOptions::default());
        assert_eq!(plan.register_count(), 5);

        info.features.insert(Feature::Iz2);
        let plan = PollPlan::build(&table, Some(&info), PlanOptions::default());
        assert_eq!(plan.register_count(), 3);
    }

    #[test]
    fn test_plan_respects_component_gating() {
        let target = Arc::new(NoOpTarget);
        let mut builder = BindingTableBuilder::new();
        builder
            .add_binary("compressor", 30, 0x01, target.clone())
            .add_numeric("watts", 1146, RegisterEncoding::UnsignedInt32, target.clone())
            .requires(Feature::EnergyMonitoring);
        let table = builder.build().unwrap();

        let all = PollPlan::build(&table, None, PlanOptions::default());
        assert_eq!(all.register_count(), 3);

        let gated = PollPlan::build(&table, Some(&SystemInfo::default()), PlanOptions::default());
        assert_eq!(gated.ranges(), &[RegisterRange::single(30)]);
    }
}
