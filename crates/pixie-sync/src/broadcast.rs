//! Broadcast coordinator
//!
//! Fans a changed field out to the other units. The engine computes the
//! per-unit words and updates every unit's mirror (present or not); the
//! coordinator then pushes the words to the present units, either one
//! unit after another or on one scoped thread per unit. A failing unit does not
//! stop the others. Failures are collected under a lock and the first one,
//! by unit index, is reported.

use crate::backend::RegisterTransport;
use crate::error::SyncError;
use crate::request::{Direction, Scope};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::thread;
use tracing::{debug, info};

/// Words to push to one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitPush {
    /// Target unit
    pub unit: usize,
    /// First word address
    pub address: usize,
    /// Words to write
    pub words: Vec<u16>,
}

/// Outcome of a broadcast push
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Units whose push succeeded, ascending
    pub pushed: Vec<usize>,
    /// Failed units with their errors, ascending by unit
    pub failures: Vec<(usize, SyncError)>,
}

impl BroadcastReport {
    /// First failure by unit index, if any
    #[must_use]
    pub fn into_first_error(self) -> Option<SyncError> {
        self.failures.into_iter().next().map(|(_, e)| e)
    }
}

/// Copy `shared` bits from `source` into `current`; if `source` sets any
/// `exclusive` bit, clear those bits in `current`
#[must_use]
pub const fn merge_shared_bits(current: u16, source: u16, shared: u16, exclusive: u16) -> u16 {
    let mut word = (current & !shared) | (source & shared);
    if source & exclusive != 0 {
        word &= !(source & exclusive);
    }
    word
}

/// Pushes per-unit words through a transport
#[derive(Debug)]
pub struct BroadcastCoordinator<'t, T: RegisterTransport> {
    transport: &'t T,
    parallel: bool,
}

impl<'t, T: RegisterTransport> BroadcastCoordinator<'t, T> {
    /// Coordinator over `transport`
    #[must_use]
    pub const fn new(transport: &'t T, parallel: bool) -> Self {
        Self {
            transport,
            parallel,
        }
    }

    /// Push every entry, collecting failures
    ///
    /// Entries for the same unit are written in order on one thread; a unit
    /// stops at its first failing write.
    pub fn push(&self, field: &str, scope: Scope, pushes: &[UnitPush]) -> BroadcastReport {
        let mut by_unit: BTreeMap<usize, Vec<&UnitPush>> = BTreeMap::new();
        for p in pushes {
            by_unit.entry(p.unit).or_default().push(p);
        }
        info!(
            "broadcast {scope}/{field} to {} unit(s){}",
            by_unit.len(),
            if self.parallel { " in parallel" } else { "" }
        );
        let failures = Mutex::new(Vec::new());
        let pushed = Mutex::new(Vec::new());
        let push_unit = |unit: usize, writes: &[&UnitPush]| {
            let result = writes.iter().try_for_each(|p| {
                debug!("broadcast {field}: unit {unit} {:#05x} <- {:?}", p.address, p.words);
                self.transport.hw_write(unit, p.address, &p.words)
            });
            match result {
                Ok(()) => pushed.lock().unwrap_or_else(PoisonError::into_inner).push(unit),
                Err(e) => failures
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((unit, SyncError::transport(field, scope, Direction::Write, unit, e))),
            }
        };
        if self.parallel && by_unit.len() > 1 {
            let push_unit = &push_unit;
            thread::scope(|s| {
                for (&unit, writes) in &by_unit {
                    s.spawn(move || push_unit(unit, writes.as_slice()));
                }
            });
        } else {
            for (&unit, writes) in &by_unit {
                push_unit(unit, writes.as_slice());
            }
        }
        let mut pushed = pushed.into_inner().unwrap_or_else(PoisonError::into_inner);
        let mut failures = failures.into_inner().unwrap_or_else(PoisonError::into_inner);
        pushed.sort_unstable();
        failures.sort_by_key(|(unit, _)| *unit);
        BroadcastReport { pushed, failures }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{Fault, SoftwareBackend};
    use pixie_regs::csr::{modcsra, modcsrb};
    use pixie_regs::dsp;
    use pixie_regs::BoardVariant;

    fn pushes(units: usize) -> Vec<UnitPush> {
        (0..units)
            .map(|unit| UnitPush {
                unit,
                address: dsp::FILTERRANGE,
                words: vec![3],
            })
            .collect()
    }

    #[test]
    fn shared_bits_are_copied() {
        let merged = merge_shared_bits(0, modcsrb::SHARED | 1, modcsrb::SHARED, 0);
        assert_eq!(merged, modcsrb::SHARED);
        let merged = merge_shared_bits(modcsrb::CLOCK_MASTER | 1, 0, modcsrb::SHARED, 0);
        assert_eq!(merged, 1);
    }

    #[test]
    fn exclusive_bit_is_cleared_elsewhere() {
        let merged = merge_shared_bits(modcsra::VETO_MASTER, modcsra::VETO_MASTER, modcsra::SHARED, modcsra::EXCLUSIVE);
        assert_eq!(merged & modcsra::VETO_MASTER, 0);
        let merged = merge_shared_bits(modcsra::VETO_MASTER, 0, modcsra::SHARED, modcsra::EXCLUSIVE);
        assert_eq!(merged, modcsra::VETO_MASTER);
    }

    #[test]
    fn failures_do_not_stop_other_units() {
        for parallel in [false, true] {
            let backend = SoftwareBackend::new(&[BoardVariant::Pixie4; 4]);
            backend.inject(1, Fault::Write);
            backend.inject(2, Fault::Write);
            let report = BroadcastCoordinator::new(&backend, parallel).push("FILTER_RANGE", Scope::Unit, &pushes(4));
            assert_eq!(report.pushed, vec![0, 3]);
            assert_eq!(report.failures.len(), 2);
            assert_eq!(backend.peek(3, dsp::FILTERRANGE, 1).unwrap(), vec![3]);
            let first = report.into_first_error().unwrap();
            assert!(matches!(first, SyncError::HardwareTransport { unit: 1, .. }));
        }
    }

    #[test]
    fn unit_writes_stay_in_order() {
        let backend = SoftwareBackend::new(&[BoardVariant::Pixie4; 2]);
        let batch: Vec<UnitPush> = [(0, 1), (1, 1), (0, 2), (1, 2)]
            .into_iter()
            .map(|(unit, v)| UnitPush {
                unit,
                address: dsp::XETDELAY,
                words: vec![v],
            })
            .collect();
        let report = BroadcastCoordinator::new(&backend, true).push("XET_DELAY", Scope::Unit, &batch);
        assert_eq!(report.pushed, vec![0, 1]);
        for unit in 0..2 {
            assert_eq!(backend.peek(unit, dsp::XETDELAY, 1).unwrap(), vec![2]);
            assert_eq!(backend.writes(unit).len(), 2);
        }
    }

    #[test]
    fn parallel_push_reaches_every_unit() {
        let backend = SoftwareBackend::new(&[BoardVariant::Pixie4e16x125; 8]);
        let report = BroadcastCoordinator::new(&backend, true).push("FILTER_RANGE", Scope::Unit, &pushes(8));
        assert_eq!(report.pushed, (0..8).collect::<Vec<_>>());
        assert!(report.failures.is_empty());
        assert_eq!(backend.write_count(), 8);
    }
}
