//! Register catalog
//!
//! Name-indexed descriptor tables, one per scope. Lookup is by exact,
//! case-sensitive name. Aggregate pseudo-names (`ALL_CHANNEL_STATISTICS`,
//! ...) are not entries; [`Catalog::resolve`] turns them into an iteration
//! over the scope's members instead.

mod channel;
mod system;
mod unit;

use crate::clamp::Limit;
use crate::convert::Conversion;
use crate::descriptor::{Access, Block, Category, Derived, RegisterDescriptor, Storage};
use crate::error::{Result, SyncError};
use crate::request::{Direction, Scope};
use indexmap::IndexMap;
use pixie_regs::dsp;

/// Aggregate pseudo-field class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Every parameter of the scope
    Parameters,
    /// Every run statistic of the scope
    Statistics,
}

impl Aggregate {
    /// Aggregate named by `name` in `scope`, if it is an alias
    #[must_use]
    pub fn from_alias(scope: Scope, name: &str) -> Option<Self> {
        match (scope, name) {
            (Scope::System, "ALL_SYSTEM_PARAMETERS")
            | (Scope::Unit, "ALL_MODULE_PARAMETERS" | "ALL_UNIT_PARAMETERS")
            | (Scope::Channel, "ALL_CHANNEL_PARAMETERS") => Some(Self::Parameters),
            (
                Scope::Unit,
                "ALL_MODULE_STATISTICS" | "ALL_UNIT_STATISTICS" | "MODULE_RUN_STATISTICS",
            )
            | (Scope::Channel, "ALL_CHANNEL_STATISTICS" | "CHANNEL_RUN_STATISTICS") => {
                Some(Self::Statistics)
            }
            _ => None,
        }
    }

    /// Descriptor category the aggregate covers
    #[must_use]
    pub const fn category(self) -> Category {
        match self {
            Self::Parameters => Category::Parameter,
            Self::Statistics => Category::Statistic,
        }
    }
}

/// A field name resolved within a scope
#[derive(Debug, Clone, Copy)]
pub enum Resolved<'c> {
    /// Concrete field
    Field(&'c RegisterDescriptor),
    /// Aggregate pseudo-field
    Aggregate(Aggregate),
}

/// Descriptor tables for all three scopes
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    system: IndexMap<&'static str, RegisterDescriptor>,
    unit: IndexMap<&'static str, RegisterDescriptor>,
    channel: IndexMap<&'static str, RegisterDescriptor>,
}

impl Catalog {
    /// Catalog of the Pixie-4/4e/500e parameter set
    #[must_use]
    pub fn standard() -> Self {
        let mut catalog = Self::default();
        for desc in system::descriptors()
            .into_iter()
            .chain(unit::descriptors())
            .chain(channel::descriptors())
        {
            catalog.table_mut(desc.scope).insert(desc.name, desc);
        }
        catalog
    }

    /// Build and validate a catalog from descriptors
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::OutOfRange`] for duplicate names, dangling
    /// dependent or partner names, and storage outside the parameter block.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = RegisterDescriptor>) -> Result<Self> {
        let mut catalog = Self::default();
        for desc in descriptors {
            if catalog.get(desc.scope, desc.name).is_some() {
                return Err(inconsistent(&desc, "duplicate field name"));
            }
            catalog.table_mut(desc.scope).insert(desc.name, desc);
        }
        catalog.validate()?;
        Ok(catalog)
    }

    fn table(&self, scope: Scope) -> &IndexMap<&'static str, RegisterDescriptor> {
        match scope {
            Scope::System => &self.system,
            Scope::Unit => &self.unit,
            Scope::Channel => &self.channel,
        }
    }

    fn table_mut(&mut self, scope: Scope) -> &mut IndexMap<&'static str, RegisterDescriptor> {
        match scope {
            Scope::System => &mut self.system,
            Scope::Unit => &mut self.unit,
            Scope::Channel => &mut self.channel,
        }
    }

    /// Descriptor by exact name, if present
    #[must_use]
    pub fn get(&self, scope: Scope, name: &str) -> Option<&RegisterDescriptor> {
        self.table(scope).get(name)
    }

    /// Descriptor by exact name
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownField`] if no field has this name in
    /// `scope`.
    pub fn lookup(&self, scope: Scope, name: &str) -> Result<&RegisterDescriptor> {
        self.get(scope, name)
            .ok_or_else(|| SyncError::unknown_field(name, scope, Direction::Read))
    }

    /// Resolve a name to a field or an aggregate
    #[must_use]
    pub fn resolve(&self, scope: Scope, name: &str) -> Option<Resolved<'_>> {
        if let Some(desc) = self.get(scope, name) {
            return Some(Resolved::Field(desc));
        }
        Aggregate::from_alias(scope, name).map(Resolved::Aggregate)
    }

    /// All descriptors of a scope, in declaration order
    pub fn iter(&self, scope: Scope) -> impl Iterator<Item = &RegisterDescriptor> {
        self.table(scope).values()
    }

    /// Readable members of an aggregate, in declaration order
    pub fn members(&self, scope: Scope, aggregate: Aggregate) -> impl Iterator<Item = &RegisterDescriptor> {
        self.iter(scope)
            .filter(move |d| d.category == aggregate.category() && d.access != Access::WriteOnly)
    }

    /// Number of descriptors in a scope
    #[must_use]
    pub fn len(&self, scope: Scope) -> usize {
        self.table(scope).len()
    }

    /// Whether a scope has no descriptors
    #[must_use]
    pub fn is_empty(&self, scope: Scope) -> bool {
        self.table(scope).is_empty()
    }

    /// Check cross-references and storage of every descriptor
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::OutOfRange`] describing the first inconsistency.
    pub fn validate(&self) -> Result<()> {
        for scope in [Scope::System, Scope::Unit, Scope::Channel] {
            for desc in self.iter(scope) {
                self.validate_one(desc)?;
            }
        }
        Ok(())
    }

    fn validate_one(&self, desc: &RegisterDescriptor) -> Result<()> {
        for dep in &desc.dependents {
            if self.get(dep.scope(desc.scope), dep.name).is_none() {
                return Err(inconsistent(desc, format!("dependent {} not in catalog", dep.name)));
            }
        }
        if let Limit::Pair(rule) = desc.limit {
            if self.get(desc.scope, rule.partner).is_none() {
                return Err(inconsistent(desc, format!("pair partner {} not in catalog", rule.partner)));
            }
        }
        if let Storage::Derived(Derived::Rate { count, time, dead }) = desc.storage {
            for input in [Some(count), Some(time), dead].into_iter().flatten() {
                if self.get(desc.scope, input).is_none() {
                    return Err(inconsistent(desc, format!("rate input {input} not in catalog")));
                }
            }
        }
        match (desc.scope, &desc.storage) {
            (Scope::System, Storage::Dsp { .. }) => {
                return Err(inconsistent(desc, "system fields have no DSP storage"));
            }
            (Scope::Unit | Scope::Channel, Storage::Host { .. }) => {
                return Err(inconsistent(desc, "host storage is system-only"));
            }
            _ => {}
        }
        if let Storage::Dsp { block, offset, words } = desc.storage {
            let size = match block {
                Block::Module => dsp::N_DSP_PAR,
                Block::ChannelInput => dsp::CHANNEL_INPUT_STRIDE,
                Block::ChannelOutput => dsp::CHANNEL_OUTPUT_STRIDE,
            };
            if words == 0 || offset + words > size {
                return Err(inconsistent(
                    desc,
                    format!("storage {offset}+{words} outside {block:?} block"),
                ));
            }
            if (block == Block::Module) != (desc.scope == Scope::Unit) {
                return Err(inconsistent(desc, "storage block does not match scope"));
            }
        }
        if let Conversion::Bits { shift, width } = desc.conversion {
            if width == 0 || u32::from(shift) + u32::from(width) > 16 {
                return Err(inconsistent(desc, "bit field does not fit one word"));
            }
        }
        Ok(())
    }
}

fn inconsistent(desc: &RegisterDescriptor, reason: impl Into<String>) -> SyncError {
    SyncError::out_of_range(desc.name, desc.scope, Direction::Read, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DependentTarget;

    #[test]
    fn standard_catalog_is_consistent() {
        Catalog::standard().validate().unwrap();
    }

    #[test]
    fn lookup_is_exact_and_case_sensitive() {
        let catalog = Catalog::standard();
        assert!(catalog.lookup(Scope::Channel, "GATE_DELAY").is_ok());
        let err = catalog.lookup(Scope::Channel, "gate_delay").unwrap_err();
        assert!(matches!(err, SyncError::UnknownField { .. }));
        assert!(catalog.lookup(Scope::Unit, "GATE_DELAY").is_err());
    }

    #[test]
    fn aggregate_aliases_resolve() {
        let catalog = Catalog::standard();
        for (scope, name, agg) in [
            (Scope::System, "ALL_SYSTEM_PARAMETERS", Aggregate::Parameters),
            (Scope::Unit, "ALL_MODULE_PARAMETERS", Aggregate::Parameters),
            (Scope::Unit, "ALL_UNIT_PARAMETERS", Aggregate::Parameters),
            (Scope::Unit, "MODULE_RUN_STATISTICS", Aggregate::Statistics),
            (Scope::Channel, "ALL_CHANNEL_STATISTICS", Aggregate::Statistics),
            (Scope::Channel, "CHANNEL_RUN_STATISTICS", Aggregate::Statistics),
        ] {
            assert!(
                matches!(catalog.resolve(scope, name), Some(Resolved::Aggregate(a)) if a == agg),
                "{name}"
            );
        }
        assert!(catalog.resolve(Scope::System, "ALL_CHANNEL_STATISTICS").is_none());
    }

    #[test]
    fn statistics_members_are_best_effort() {
        let catalog = Catalog::standard();
        let stats: Vec<_> = catalog.members(Scope::Channel, Aggregate::Statistics).collect();
        assert!(stats.len() >= 10);
        assert!(stats.iter().all(|d| d.best_effort && d.access == Access::ReadOnly));
        assert!(stats.iter().any(|d| d.name == "INPUT_COUNT_RATE"));
    }

    #[test]
    fn parameter_members_skip_write_only_fields() {
        let catalog = Catalog::standard();
        let params: Vec<_> = catalog.members(Scope::Unit, Aggregate::Parameters).collect();
        assert!(params.iter().all(|d| d.name != "RUN_STATS_CLEAR"));
        assert!(params.iter().any(|d| d.name == "FILTER_RANGE"));
    }

    #[test]
    fn dangling_dependent_is_rejected() {
        let desc = RegisterDescriptor::module("A", dsp::USERIN, Conversion::Identity)
            .dependent("MISSING", DependentTarget::Same);
        let err = Catalog::from_descriptors([desc]).unwrap_err();
        assert!(matches!(err, SyncError::OutOfRange { .. }));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let a = RegisterDescriptor::module("A", dsp::USERIN, Conversion::Identity);
        let b = RegisterDescriptor::module("A", dsp::USERIN + 1, Conversion::Identity);
        assert!(Catalog::from_descriptors([a, b]).is_err());
    }

    #[test]
    fn storage_beyond_block_is_rejected() {
        let desc = RegisterDescriptor::channel("WIDE", dsp::CHANNEL_INPUT_STRIDE - 1, Conversion::Words).words(4);
        assert!(Catalog::from_descriptors([desc]).is_err());
    }

    #[test]
    fn scopes_hold_their_own_tables() {
        let catalog = Catalog::standard();
        assert!(catalog.iter(Scope::System).all(|d| d.scope == Scope::System));
        assert!(catalog.iter(Scope::Unit).all(|d| d.scope == Scope::Unit));
        assert!(catalog.iter(Scope::Channel).all(|d| d.scope == Scope::Channel));
        assert!(!catalog.is_empty(Scope::Channel));
    }
}
