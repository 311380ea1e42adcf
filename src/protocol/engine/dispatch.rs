//! Turn committed register words into endpoint updates.
//!
//! After each cycle the bindings touched by the committed addresses are
//! re-evaluated against the store and pushed to their target only when the
//! computed value differs from the last one delivered.

use std::collections::BTreeSet;

use anyhow::Result;

use crate::protocol::{
    aurora::{
        climate::{climate_state, ClimateState},
        decode::extract_bits,
        registers::{
            fault_description, FAULT_CODE_MASK, FAULT_LOCKOUT_BIT, OUTPUT_BLOWER, OUTPUT_CC,
            OUTPUT_EH1, OUTPUT_LOCKOUT, OUTPUT_RV, REG_LAST_FAULT, REG_SYSTEM_OUTPUTS,
        },
    },
    engine::{
        binding::{BindingKind, BindingTable, EndpointBinding, Target, TextSource},
        store::RegisterStore,
    },
};

/// A value as delivered to an endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Published {
    Numeric(f64),
    Binary(bool),
    Text(String),
    Switch(bool),
    Climate(ClimateState),
}

impl std::fmt::Display for Published {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Published::Numeric(v) => write!(f, "{v}"),
            Published::Binary(b) | Published::Switch(b) => {
                write!(f, "{}", if *b { "ON" } else { "OFF" })
            }
            Published::Text(s) => write!(f, "{s}"),
            Published::Climate(c) => write!(f, "{c:?}"),
        }
    }
}

/// Fault text for the last-fault register: bit 15 flags a lockout.
pub fn fault_text(raw: u16) -> String {
    let code = raw & FAULT_CODE_MASK;
    if code == 0 {
        return "No Fault".to_string();
    }
    let mut text = format!("E{code} {}", fault_description(code));
    if raw & FAULT_LOCKOUT_BIT != 0 {
        text.push_str(" (LOCKOUT)");
    }
    text
}

/// Operating mode from the system output bits, highest priority first.
pub fn system_mode_text(outputs: u16) -> &'static str {
    if outputs & OUTPUT_LOCKOUT != 0 {
        "Lockout"
    } else if outputs & OUTPUT_EH1 != 0 {
        "Emergency Heat"
    } else if outputs & OUTPUT_CC != 0 && outputs & OUTPUT_RV != 0 {
        "Cooling"
    } else if outputs & OUTPUT_CC != 0 {
        "Heating"
    } else if outputs & OUTPUT_BLOWER != 0 {
        "Fan Only"
    } else {
        "Idle"
    }
}

/// Current value of `binding`, or `None` while its inputs are not valid.
///
/// A climate binding is published as soon as any of its registers is valid;
/// fields whose registers are missing stay `None`.
pub fn evaluate(binding: &EndpointBinding, store: &RegisterStore) -> Option<Published> {
    if let BindingKind::Climate { zone } = binding.kind() {
        let state = climate_state(*zone, |a| store.raw(a));
        return (!state.is_empty()).then_some(Published::Climate(state));
    }
    if !binding.addresses().iter().all(|a| store.is_valid(*a)) {
        return None;
    }

    match *binding.kind() {
        BindingKind::Numeric { address, .. } => store.get(address).as_f64().map(Published::Numeric),
        BindingKind::Binary { address, mask } => store
            .raw(address)
            .map(|w| Published::Binary(extract_bits(w, mask))),
        BindingKind::Switch { address } => store.raw(address).map(|w| Published::Switch(w != 0)),
        BindingKind::Text { source } => match source {
            TextSource::Fault => store.raw(REG_LAST_FAULT).map(|w| Published::Text(fault_text(w))),
            TextSource::SystemMode => store
                .raw(REG_SYSTEM_OUTPUTS)
                .map(|w| Published::Text(system_mode_text(w).to_string())),
            TextSource::Model | TextSource::SerialNumber | TextSource::Program => binding
                .addresses()
                .first()
                .and_then(|head| store.get(*head).as_text().map(|s| Published::Text(s.to_string()))),
        },
        BindingKind::Climate { .. } => None,
    }
}

fn deliver(target: &Target, value: &Published) -> Result<()> {
    match (target, value) {
        (Target::Numeric(t), Published::Numeric(v)) => t.on_numeric_update(*v),
        (Target::Binary(t), Published::Binary(b)) => t.on_binary_update(*b),
        (Target::Text(t), Published::Text(s)) => t.on_text_update(s),
        (Target::Switch(t), Published::Switch(b)) => t.on_switch_state(*b),
        (Target::Climate(t), Published::Climate(c)) => t.on_climate_update(c),
        _ => Err(anyhow::anyhow!("value {value:?} does not match the endpoint kind")),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub evaluated: usize,
    pub pushed: usize,
    pub failed: usize,
}

/// Remembers the last value delivered to each binding.
#[derive(Debug, Default)]
pub struct Dispatcher {
    last: Vec<Option<Published>>,
}

impl Dispatcher {
    pub fn new(bindings: usize) -> Self {
        Self {
            last: vec![None; bindings],
        }
    }

    /// Re-evaluate the bindings that depend on `addresses` and push the changed ones.
    pub fn dispatch(
        &mut self,
        table: &BindingTable,
        store: &RegisterStore,
        addresses: &[u16],
    ) -> DispatchReport {
        if self.last.len() < table.len() {
            self.last.resize(table.len(), None);
        }

        let affected: BTreeSet<usize> = addresses
            .iter()
            .flat_map(|a| table.bindings_for(*a).iter().copied())
            .collect();

        let mut report = DispatchReport::default();
        for index in affected {
            let Some(binding) = table.get(index) else {
                continue;
            };
            report.evaluated += 1;
            let Some(value) = evaluate(binding, store) else {
                continue;
            };
            if self.last[index].as_ref() == Some(&value) {
                continue;
            }

            log::debug!("{} -> {value}", binding.name());
            if let Err(err) = deliver(binding.target(), &value) {
                log::warn!("Endpoint {} rejected update: {err}", binding.name());
                report.failed += 1;
            }
            // Delivered or not, the value is the current one; a failing target is not retried.
            self.last[index] = Some(value);
            report.pushed += 1;
        }
        report
    }

    /// Push a requested switch state to the switch bindings on `address` before
    /// the controller has confirmed it. Returns the number of updates pushed.
    pub fn publish_switch(&mut self, table: &BindingTable, address: u16, on: bool) -> usize {
        if self.last.len() < table.len() {
            self.last.resize(table.len(), None);
        }
        let value = Published::Switch(on);
        let mut pushed = 0;
        for &index in table.bindings_for(address) {
            let Some(binding) = table.get(index) else {
                continue;
            };
            if !matches!(binding.kind(), BindingKind::Switch { .. })
                || self.last[index].as_ref() == Some(&value)
            {
                continue;
            }
            log::debug!("{} -> {value} (requested)", binding.name());
            if let Err(err) = deliver(binding.target(), &value) {
                log::warn!("Endpoint {} rejected update: {err}", binding.name());
            }
            self.last[index] = Some(value.clone());
            pushed += 1;
        }
        pushed
    }

    /// Last value delivered to the binding at `index`.
    pub fn last(&self, index: usize) -> Option<&Published> {
        self.last.get(index).and_then(Option::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::driver::traits::{BinaryTarget, NoOpTarget, NumericTarget, SwitchTarget},
        protocol::{aurora::decode::RegisterEncoding, engine::binding::BindingTableBuilder},
    };
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        flags: Mutex<Vec<bool>>,
    }

    impl BinaryTarget for Recorder {
        fn on_binary_update(&self, flag: bool) -> Result<()> {
            self.flags.lock().push(flag);
            Ok(())
        }
    }

    struct Failing;

    impl NumericTarget for Failing {
        fn on_numeric_update(&self, _value: f64) -> Result<()> {
            Err(anyhow::anyhow!("endpoint offline"))
        }
    }

    #[test]
    fn test_fault_and_mode_text() {
        assert_eq!(fault_text(0), "No Fault");
        assert_eq!(fault_text(2), "E2 High Pressure");
        assert_eq!(fault_text(0x8002), "E2 High Pressure (LOCKOUT)");
        assert_eq!(system_mode_text(0x0000), "Idle");
        assert_eq!(system_mode_text(OUTPUT_CC | OUTPUT_BLOWER), "Heating");
        assert_eq!(system_mode_text(OUTPUT_CC | OUTPUT_RV), "Cooling");
        assert_eq!(system_mode_text(OUTPUT_BLOWER), "Fan Only");
        assert_eq!(system_mode_text(OUTPUT_EH1 | OUTPUT_CC), "Emergency Heat");
        assert_eq!(system_mode_text(OUTPUT_LOCKOUT | OUTPUT_EH1), "Lockout");
    }

    #[test]
    fn test_shared_register_flags_push_on_change() {
        let compressor = Arc::new(Recorder::default());
        let reversing = Arc::new(Recorder::default());
        let stage2 = Arc::new(Recorder::default());
        let mut builder = BindingTableBuilder::new();
        builder
            .add_binary("compressor", 30, 0x01, compressor.clone())
            .add_binary("stage2", 30, 0x02, stage2.clone())
            .add_binary("reversing_valve", 30, 0x04, reversing.clone());
        let table = builder.build().unwrap();
        let store = RegisterStore::new(table.encodings().clone());
        let mut dispatcher = Dispatcher::new(table.len());

        store.commit_batch(&[30], &[0x0005]).unwrap();
        let report = dispatcher.dispatch(&table, &store, &[30]);
        assert_eq!(report.pushed, 3);
        assert_eq!(*compressor.flags.lock(), vec![true]);
        assert_eq!(*stage2.flags.lock(), vec![false]);
        assert_eq!(*reversing.flags.lock(), vec![true]);

        let report = dispatcher.dispatch(&table, &store, &[30]);
        assert_eq!(report.pushed, 0);

        store.commit_batch(&[30], &[0x0001]).unwrap();
        let report = dispatcher.dispatch(&table, &store, &[30]);
        assert_eq!(report.pushed, 1);
        assert_eq!(*reversing.flags.lock(), vec![true, false]);
    }

    #[test]
    fn test_invalid_inputs_skipped_and_failures_contained() {
        let mut builder = BindingTableBuilder::new();
        builder
            .add_numeric("watts", 1146, RegisterEncoding::UnsignedInt32, Arc::new(NoOpTarget))
            .add_numeric("ewt", 1111, RegisterEncoding::SignedTenths, Arc::new(Failing));
        let table = builder.build().unwrap();
        let store = RegisterStore::new(table.encodings().clone());
        let mut dispatcher = Dispatcher::new(table.len());

        store.commit_batch(&[1111], &[480]).unwrap();
        let report = dispatcher.dispatch(&table, &store, &[1111, 1146]);
        assert_eq!(report.evaluated, 2);
        assert_eq!(report.pushed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(dispatcher.last(0), None);
        assert_eq!(dispatcher.last(1), Some(&Published::Numeric(48.0)));
    }

    #[derive(Default)]
    struct SwitchRecorder {
        states: Mutex<Vec<bool>>,
    }

    impl SwitchTarget for SwitchRecorder {
        fn on_switch_state(&self, on: bool) -> Result<()> {
            self.states.lock().push(on);
            Ok(())
        }
    }

    #[test]
    fn test_requested_switch_state_published_before_poll() {
        let dhw = Arc::new(SwitchRecorder::default());
        let mut builder = BindingTableBuilder::new();
        builder
            .add_switch("dhw_enable", 400, dhw.clone())
            .add_binary("dhw_flag", 400, 0x01, Arc::new(NoOpTarget));
        let table = builder.build().unwrap();
        let store = RegisterStore::new(table.encodings().clone());
        let mut dispatcher = Dispatcher::new(table.len());

        store.commit_batch(&[400], &[1]).unwrap();
        dispatcher.dispatch(&table, &store, &[400]);
        assert_eq!(*dhw.states.lock(), vec![true]);

        assert_eq!(dispatcher.publish_switch(&table, 400, false), 1);
        assert_eq!(dispatcher.publish_switch(&table, 400, false), 0);
        assert_eq!(dispatcher.last(1), Some(&Published::Binary(true)));

        // The controller confirms the write; only the flag changes
        store.commit_batch(&[400], &[0]).unwrap();
        let report = dispatcher.dispatch(&table, &store, &[400]);
        assert_eq!(report.pushed, 1);
        assert_eq!(*dhw.states.lock(), vec![true, false]);

        // The controller refused it: the polled state wins
        dispatcher.publish_switch(&table, 400, true);
        dispatcher.dispatch(&table, &store, &[400]);
        assert_eq!(*dhw.states.lock(), vec![true, false, true, false]);
    }

    #[test]
    fn test_climate_publishes_partial_state() {
        let mut builder = BindingTableBuilder::new();
        builder.add_climate("thermostat", 0, Arc::new(NoOpTarget));
        let table = builder.build().unwrap();
        let store = RegisterStore::new(table.encodings().clone());
        let mut dispatcher = Dispatcher::new(table.len());

        store.commit_batch(&[747], &[722]).unwrap();
        let report = dispatcher.dispatch(&table, &store, &[747]);
        assert_eq!(report.pushed, 1);
        let Some(Published::Climate(state)) = dispatcher.last(0) else {
            panic!("climate state not published");
        };
        assert!((state.current_temperature.unwrap() - 22.333).abs() < 0.01);
        assert_eq!(state.mode, None);
    }
}
