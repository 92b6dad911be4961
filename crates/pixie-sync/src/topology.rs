//! Unit/channel topology
//!
//! Units `0..max_units` always have a mirror; units `0..present` are
//! physically present and receive hardware traffic. The present count
//! changes only through [`Topology::set_present`], which the engine calls
//! between transfers.

use crate::error::{Result, SyncError};
use crate::request::{Direction, Target};
use pixie_regs::dsp::NUMBER_OF_CHANNELS;
use pixie_regs::BoardVariant;

/// Units, their variants and the present-unit count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    variants: Vec<BoardVariant>,
    present: usize,
}

impl Topology {
    /// Topology with one variant per unit slot
    ///
    /// `present` is capped at the number of slots.
    #[must_use]
    pub fn new(variants: Vec<BoardVariant>, present: usize) -> Self {
        let present = present.min(variants.len());
        Self { variants, present }
    }

    /// Unit capacity
    #[must_use]
    pub fn max_units(&self) -> usize {
        self.variants.len()
    }

    /// Units physically present
    #[must_use]
    pub const fn present(&self) -> usize {
        self.present
    }

    /// Channels per unit
    #[must_use]
    pub const fn channels(&self) -> usize {
        NUMBER_OF_CHANNELS
    }

    /// Whether `unit` receives hardware traffic
    #[must_use]
    pub const fn is_present(&self, unit: usize) -> bool {
        unit < self.present
    }

    /// Board variant of a unit slot
    #[must_use]
    pub fn variant(&self, unit: usize) -> BoardVariant {
        self.variants
            .get(unit)
            .or_else(|| self.variants.first())
            .copied()
            .unwrap_or(BoardVariant::Unknown(0))
    }

    /// Replace the variant of one unit slot
    pub fn set_variant(&mut self, unit: usize, variant: BoardVariant) {
        if let Some(slot) = self.variants.get_mut(unit) {
            *slot = variant;
        }
    }

    /// Change the present-unit count (capped at capacity); returns the new count
    pub fn set_present(&mut self, present: usize) -> usize {
        self.present = present.min(self.max_units());
        self.present
    }

    /// Check that a target addresses an existing unit and channel
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidIndex`] for a unit at or beyond capacity or
    /// a channel at or beyond the channel count.
    pub fn check(&self, target: Target, field: &str, direction: Direction) -> Result<()> {
        let invalid = |kind, index, count| SyncError::InvalidIndex {
            field: field.to_string(),
            scope: target.scope(),
            direction,
            kind,
            index,
            count,
        };
        if let Some(unit) = target.unit() {
            if unit >= self.max_units() {
                return Err(invalid("unit", unit, self.max_units()));
            }
        }
        if let Some(channel) = target.channel() {
            if channel >= self.channels() {
                return Err(invalid("channel", channel, self.channels()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> Topology {
        Topology::new(vec![BoardVariant::Pixie4; 4], 2)
    }

    #[test]
    fn present_is_capped() {
        let mut topo = Topology::new(vec![BoardVariant::Pixie4; 3], 7);
        assert_eq!(topo.present(), 3);
        assert_eq!(topo.set_present(10), 3);
        assert_eq!(topo.set_present(1), 1);
        assert!(topo.is_present(0));
        assert!(!topo.is_present(1));
    }

    #[test]
    fn check_rejects_bad_indices() {
        let topo = topology();
        assert!(topo
            .check(Target::Channel { unit: 3, channel: 3 }, "TAU", Direction::Read)
            .is_ok());
        let err = topo
            .check(Target::Unit { unit: 4 }, "FILTER_RANGE", Direction::Write)
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidIndex { kind: "unit", index: 4, count: 4, .. }));
        let err = topo
            .check(Target::Channel { unit: 0, channel: 4 }, "TAU", Direction::Read)
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidIndex { kind: "channel", .. }));
        assert!(topo.check(Target::System, "KEEP_CW", Direction::Read).is_ok());
    }

    #[test]
    fn absent_units_are_still_addressable() {
        let topo = topology();
        assert!(!topo.is_present(3));
        assert!(topo.check(Target::Unit { unit: 3 }, "FILTER_RANGE", Direction::Write).is_ok());
    }

    #[test]
    fn variant_falls_back_to_first_unit() {
        let mut topo = Topology::new(vec![BoardVariant::Pixie500e, BoardVariant::Pixie4], 1);
        assert_eq!(topo.variant(1), BoardVariant::Pixie4);
        assert_eq!(topo.variant(9), BoardVariant::Pixie500e);
        topo.set_variant(1, BoardVariant::Pixie4e14x500);
        assert_eq!(topo.variant(1), BoardVariant::Pixie4e14x500);
    }
}
