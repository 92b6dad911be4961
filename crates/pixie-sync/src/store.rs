//! Parameter store: the host-side mirror
//!
//! Each unit mirror holds the raw DSP word image of the unit plus the last
//! engineering value seen for every field instance, so reads echo the same
//! value a write produced. System values live only here.
//!
//! Keys are descriptor names (`&'static str`) so every slot corresponds to
//! a catalog entry.

use crate::catalog::Catalog;
use crate::descriptor::Storage;
use crate::request::{Scope, Target};
use crate::value::EngineeringValue;
use indexmap::IndexMap;
use pixie_regs::dsp;
use std::ops::Range;

type Values = IndexMap<&'static str, EngineeringValue>;

#[derive(Debug, Clone)]
struct UnitMirror {
    image: Vec<u16>,
    values: Values,
    channels: Vec<Values>,
}

impl UnitMirror {
    fn new() -> Self {
        Self {
            image: vec![0; dsp::N_DSP_PAR],
            values: Values::new(),
            channels: vec![Values::new(); dsp::NUMBER_OF_CHANNELS],
        }
    }
}

/// Host-side mirror of all register values
#[derive(Debug, Clone)]
pub struct ParameterStore {
    system: Values,
    units: Vec<UnitMirror>,
}

impl ParameterStore {
    /// Zeroed mirror for `max_units` units, with a slot for every system field
    #[must_use]
    pub fn new(catalog: &Catalog, max_units: usize) -> Self {
        let system = catalog
            .iter(Scope::System)
            .filter_map(|d| match d.storage {
                Storage::Host { len: 1 } => Some((d.name, EngineeringValue::Scalar(0.0))),
                Storage::Host { len } => Some((d.name, EngineeringValue::Words(vec![0.0; len]))),
                _ => None,
            })
            .collect();
        Self {
            system,
            units: (0..max_units).map(|_| UnitMirror::new()).collect(),
        }
    }

    /// Raw image of one unit (empty for an unknown unit)
    #[must_use]
    pub fn image(&self, unit: usize) -> &[u16] {
        self.units.get(unit).map_or(&[], |u| u.image.as_slice())
    }

    /// Raw words of a span
    #[must_use]
    pub fn words(&self, unit: usize, span: Range<usize>) -> Vec<u16> {
        self.image(unit).get(span).map(<[u16]>::to_vec).unwrap_or_default()
    }

    /// Overwrite raw words starting at `start`; returns whether any changed
    pub fn set_words(&mut self, unit: usize, start: usize, words: &[u16]) -> bool {
        let Some(slot) = self
            .units
            .get_mut(unit)
            .and_then(|u| u.image.get_mut(start..start + words.len()))
        else {
            return false;
        };
        if *slot == *words {
            return false;
        }
        slot.copy_from_slice(words);
        true
    }

    /// Last value of a field instance
    #[must_use]
    pub fn value(&self, target: Target, name: &str) -> Option<&EngineeringValue> {
        match target {
            Target::System => self.system.get(name),
            Target::Unit { unit } => self.units.get(unit)?.values.get(name),
            Target::Channel { unit, channel } => {
                self.units.get(unit)?.channels.get(channel)?.get(name)
            }
        }
    }

    /// Record the value of a field instance
    pub fn set_value(&mut self, target: Target, name: &'static str, value: EngineeringValue) {
        let slot = match target {
            Target::System => Some(&mut self.system),
            Target::Unit { unit } => self.units.get_mut(unit).map(|u| &mut u.values),
            Target::Channel { unit, channel } => self
                .units
                .get_mut(unit)
                .and_then(|u| u.channels.get_mut(channel)),
        };
        if let Some(values) = slot {
            values.insert(name, value);
        }
    }

    /// Scalar system value (0 if unset)
    #[must_use]
    pub fn system_scalar(&self, name: &str) -> f64 {
        self.system
            .get(name)
            .and_then(EngineeringValue::as_scalar)
            .unwrap_or(0.0)
    }

    /// Forget cached engineering values of one unit (raw image is kept)
    pub fn clear_values(&mut self, unit: usize) {
        if let Some(u) = self.units.get_mut(unit) {
            u.values.clear();
            u.channels.iter_mut().for_each(IndexMap::clear);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_slots_follow_catalog() {
        let store = ParameterStore::new(&Catalog::standard(), 4);
        assert_eq!(store.value(Target::System, "KEEP_CW"), Some(&0.0.into()));
        let slot = store.value(Target::System, "SLOT_WAVE").unwrap();
        assert_eq!(slot.as_words().unwrap().len(), dsp::PRESET_MAX_MODULES);
        assert!(store.value(Target::System, "MAX_NUMBER_MODULES").is_none());
    }

    #[test]
    fn set_words_reports_changes() {
        let mut store = ParameterStore::new(&Catalog::standard(), 2);
        assert!(store.set_words(1, dsp::FILTERRANGE, &[2]));
        assert!(!store.set_words(1, dsp::FILTERRANGE, &[2]));
        assert_eq!(store.words(1, dsp::FILTERRANGE..dsp::FILTERRANGE + 1), vec![2]);
        assert_eq!(store.image(0)[dsp::FILTERRANGE], 0);
    }

    #[test]
    fn out_of_bounds_writes_are_ignored() {
        let mut store = ParameterStore::new(&Catalog::standard(), 1);
        assert!(!store.set_words(5, 0, &[1]));
        assert!(!store.set_words(0, dsp::N_DSP_PAR - 1, &[1, 2]));
        assert!(store.words(3, 0..4).is_empty());
    }

    #[test]
    fn values_are_per_instance() {
        let mut store = ParameterStore::new(&Catalog::standard(), 2);
        let a = Target::Channel { unit: 1, channel: 2 };
        let b = Target::Channel { unit: 1, channel: 3 };
        store.set_value(a, "TAU", 40.0.into());
        assert_eq!(store.value(a, "TAU"), Some(&40.0.into()));
        assert!(store.value(b, "TAU").is_none());
        store.clear_values(1);
        assert!(store.value(a, "TAU").is_none());
    }
}
