//! Sync engine
//!
//! Owns the catalog, the parameter store, the topology and the transport,
//! and runs every transfer through the same state machine:
//!
//! ```text
//! Idle → Validating → Converting → Mirroring → HardwareSyncing → Recomputing → (Broadcasting) → Idle
//! ```
//!
//! Validation and conversion finish before anything is mutated, so a
//! rejected write leaves the mirror and the hardware untouched. Control
//! tasks queued by the written fields run once, when the whole transfer
//! (or aggregate) has completed.

use crate::backend::{RegisterTransport, TaskKind};
use crate::broadcast::{merge_shared_bits, BroadcastCoordinator, UnitPush};
use crate::catalog::{Aggregate, Catalog, Resolved};
use crate::clamp::Clamper;
use crate::config::EngineConfig;
use crate::convert::ConvertContext;
use crate::descriptor::{
    Access, Dependent, DependentTarget, Derived, Effect, Propagation, RegisterDescriptor, Storage,
};
use crate::error::{Result, SyncError};
use crate::recompute;
use crate::request::{Direction, Scope, Target, TransferRequest};
use crate::store::ParameterStore;
use crate::topology::Topology;
use crate::value::{EngineeringValue, FieldFailure, Record};
use pixie_regs::dsp;
use pixie_regs::BoardVariant;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// State of the transfer state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No transfer in flight
    Idle,
    /// Direction, payload and range checks
    Validating,
    /// Engineering value to raw words
    Converting,
    /// Parameter store updated
    Mirroring,
    /// Raw words pushed to the unit
    HardwareSyncing,
    /// Dependents recomputed
    Recomputing,
    /// Change fanned out to the other units
    Broadcasting,
}

/// Address range read by [`SyncEngine::refresh`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshRange {
    /// The complete parameter block
    Full,
    /// Module run statistics only
    UnitStatistics,
    /// Channel statistics blocks only
    ChannelStatistics,
    /// Arbitrary word range
    Span(Range<usize>),
}

impl RefreshRange {
    /// Word range covered
    #[must_use]
    pub fn span(&self) -> Range<usize> {
        match self {
            Self::Full => dsp::FULL_BLOCK,
            Self::UnitStatistics => dsp::MODULE_STATISTICS,
            Self::ChannelStatistics => dsp::CHANNEL_STATISTICS,
            Self::Span(range) => range.clone(),
        }
    }
}

impl fmt::Display for RefreshRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full block"),
            Self::UnitStatistics => write!(f, "unit statistics"),
            Self::ChannelStatistics => write!(f, "channel statistics"),
            Self::Span(range) => write!(f, "words {:#05x}..{:#05x}", range.start, range.end),
        }
    }
}

/// Register synchronization engine
///
/// One engine owns the mirror of every unit. Transfers are strictly
/// sequential (`&mut self`); only the broadcast fan-out may use threads.
#[derive(Debug)]
pub struct SyncEngine<T: RegisterTransport> {
    catalog: Arc<Catalog>,
    store: ParameterStore,
    topology: Topology,
    transport: T,
    offline: bool,
    keep_coinc_wait: bool,
    parallel_broadcast: bool,
    pending: BTreeSet<(usize, TaskKind)>,
    state: EngineState,
    trail: Vec<EngineState>,
}

impl<T: RegisterTransport> SyncEngine<T> {
    /// Engine over the standard catalog
    ///
    /// Board variants of present units are read from the transport;
    /// absent units use their configured variant or unit 0's. Present units
    /// are refreshed in full unless the configuration starts offline.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or a present unit
    /// cannot be read.
    pub fn new(transport: T, config: &EngineConfig) -> Result<Self> {
        Self::with_catalog(transport, config, Catalog::standard())
    }

    /// Engine over a custom catalog
    ///
    /// # Errors
    ///
    /// Returns error if the configuration or the catalog is inconsistent,
    /// or a present unit cannot be read.
    pub fn with_catalog(transport: T, config: &EngineConfig, catalog: Catalog) -> Result<Self> {
        config.validate()?;
        catalog.validate()?;

        let mut variants: Vec<BoardVariant> = Vec::with_capacity(config.max_units);
        for unit in 0..config.max_units {
            let variant = if unit < config.present_units && !config.offline {
                transport.board_variant(unit).map_err(|e| {
                    SyncError::transport("BOARD_VERSION", Scope::Unit, Direction::Read, unit, e)
                })?
            } else {
                config
                    .unit_variant(unit)
                    .or_else(|| variants.first().copied())
                    .unwrap_or(BoardVariant::Pixie4)
            };
            variants.push(variant);
        }
        let topology = Topology::new(variants, config.present_units);

        let mut store = ParameterStore::new(&catalog, config.max_units);
        for desc in catalog.iter(Scope::System) {
            let value = match desc.effect {
                Some(Effect::PresentUnits) => topology.present() as f64,
                Some(Effect::Offline) => f64::from(u8::from(config.offline)),
                Some(Effect::KeepCoincWait) => f64::from(u8::from(config.keep_coinc_wait)),
                None => continue,
            };
            store.set_value(Target::System, desc.name, value.into());
        }

        info!(
            "sync engine: {}/{} unit(s) present{}",
            topology.present(),
            topology.max_units(),
            if config.offline { ", offline" } else { "" }
        );

        let mut engine = Self {
            catalog: Arc::new(catalog),
            store,
            topology,
            transport,
            offline: config.offline,
            keep_coinc_wait: config.keep_coinc_wait,
            parallel_broadcast: config.parallel_broadcast,
            pending: BTreeSet::new(),
            state: EngineState::Idle,
            trail: Vec::new(),
        };
        for unit in 0..engine.topology.present() {
            engine.refresh(unit, RefreshRange::Full)?;
        }
        Ok(engine)
    }

    /// Register catalog
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Parameter mirror
    #[must_use]
    pub const fn store(&self) -> &ParameterStore {
        &self.store
    }

    /// Units and their variants
    #[must_use]
    pub const fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Register transport
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Offline analysis mode: no hardware access
    #[must_use]
    pub const fn is_offline(&self) -> bool {
        self.offline
    }

    /// Coincidence-wait compensation on
    #[must_use]
    pub const fn keeps_coinc_wait(&self) -> bool {
        self.keep_coinc_wait
    }

    /// Current state (always `Idle` between transfers)
    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    /// States visited by the last transfer, in order
    #[must_use]
    pub fn last_trail(&self) -> &[EngineState] {
        &self.trail
    }

    /// Descriptor by exact name
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownField`] if no field has this name.
    pub fn lookup_descriptor(&self, scope: Scope, name: &str) -> Result<&RegisterDescriptor> {
        self.catalog.lookup(scope, name)
    }

    /// Run one transfer
    ///
    /// Reads return the mirrored value (refresh first, see
    /// [`read_through`](Self::read_through)); writes echo the effective,
    /// possibly clamped, value. Aggregate names return a [`Record`].
    ///
    /// # Errors
    ///
    /// Returns the first validation, conversion or transport failure. After
    /// a [`SyncError::HardwareTransport`] the mirror may be ahead of the
    /// hardware.
    pub fn transfer(&mut self, request: TransferRequest) -> Result<EngineeringValue> {
        self.trail.clear();
        self.enter(EngineState::Validating);
        let result = self.dispatch(&request);
        let result = match result {
            Ok(value) => self
                .run_pending(&request.field, request.scope())
                .map(|()| value),
            Err(e) => {
                self.pending.clear();
                debug!("{e}");
                Err(e)
            }
        };
        self.enter(EngineState::Idle);
        result
    }

    /// Refresh the mirror for a read, then run it
    ///
    /// # Errors
    ///
    /// Returns error if the refresh or the transfer fails.
    pub fn read_through(&mut self, request: TransferRequest) -> Result<EngineeringValue> {
        if let (Some(unit), Some(range)) = (request.target.unit(), self.refresh_for(&request)) {
            if unit < self.topology.max_units() {
                self.refresh(unit, range)?;
            }
        }
        self.transfer(request)
    }

    /// Address range a read needs refreshed first, if any
    #[must_use]
    pub fn refresh_for(&self, request: &TransferRequest) -> Option<RefreshRange> {
        let scope = request.scope();
        if request.direction == Direction::Write || scope == Scope::System {
            return None;
        }
        let statistics = if scope == Scope::Unit {
            RefreshRange::UnitStatistics
        } else {
            RefreshRange::ChannelStatistics
        };
        match self.catalog.resolve(scope, &request.field)? {
            Resolved::Aggregate(Aggregate::Statistics) => Some(statistics),
            Resolved::Aggregate(Aggregate::Parameters) => Some(RefreshRange::Full),
            Resolved::Field(desc) => match desc.storage {
                Storage::Dsp { .. } => desc.span(request.target.channel()).map(RefreshRange::Span),
                Storage::Derived(Derived::Rate { .. }) => Some(statistics),
                Storage::Derived(_) => Some(RefreshRange::Full),
                Storage::Host { .. } => None,
            },
        }
    }

    /// Read a range of one unit's words into the mirror
    ///
    /// A no-op offline and for absent units, whose mirror is authoritative.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidIndex`] for a unit beyond capacity and
    /// [`SyncError::HardwareTransport`] if the read fails.
    pub fn refresh(&mut self, unit: usize, range: RefreshRange) -> Result<()> {
        if unit >= self.topology.max_units() {
            return Err(SyncError::InvalidIndex {
                field: range.to_string(),
                scope: Scope::Unit,
                direction: Direction::Read,
                kind: "unit",
                index: unit,
                count: self.topology.max_units(),
            });
        }
        if !self.online(unit) {
            trace!("refresh unit {unit}: skipped");
            return Ok(());
        }
        let span = range.span();
        let words = self
            .transport
            .hw_read(unit, span.start, span.len())
            .map_err(|e| SyncError::transport(range.to_string(), Scope::Unit, Direction::Read, unit, e))?;
        debug!("refresh unit {unit}: {range}, {} words", words.len());
        self.store.set_words(unit, span.start, &words);
        Ok(())
    }

    /// Apply one engineering value to a unit field on every unit
    ///
    /// Every mirror is updated, present or not; only present units receive
    /// the words. The value is converted per unit but not re-validated.
    /// Dependents are recomputed on every unit.
    ///
    /// # Errors
    ///
    /// Returns the first failing unit's error after all units were tried.
    pub fn broadcast(&mut self, field: &str, source_unit: usize, value: &EngineeringValue) -> Result<()> {
        let catalog = Arc::clone(&self.catalog);
        self.trail.clear();
        let result = match self.broadcast_from(&catalog, field, source_unit, value) {
            Ok(()) => self.run_pending(field, Scope::Unit),
            Err(e) => {
                self.pending.clear();
                Err(e)
            }
        };
        self.enter(EngineState::Idle);
        result
    }

    fn broadcast_from(
        &mut self,
        catalog: &Catalog,
        field: &str,
        source_unit: usize,
        value: &EngineeringValue,
    ) -> Result<()> {
        let desc = catalog
            .get(Scope::Unit, field)
            .ok_or_else(|| SyncError::unknown_field(field, Scope::Unit, Direction::Write))?;
        let source = Target::Unit { unit: source_unit };
        self.topology.check(source, field, Direction::Write)?;
        check_access(desc, Direction::Write)?;
        info!("broadcast MODULE/{field} = {value} from unit {source_unit}");
        self.fan_out(catalog, desc, source, value, None, &desc.dependents)
    }

    fn enter(&mut self, state: EngineState) {
        trace!("{:?} -> {:?}", self.state, state);
        self.state = state;
        self.trail.push(state);
    }

    fn online(&self, unit: usize) -> bool {
        !self.offline && self.topology.is_present(unit)
    }

    fn context(&self, target: Target) -> ConvertContext<'_> {
        let unit = target.unit().unwrap_or(0);
        let image: &[u16] = match target.unit() {
            Some(unit) => self.store.image(unit),
            None => &[],
        };
        ConvertContext::new(self.topology.variant(unit), image)
            .with_channel(target.channel())
            .with_keep_coinc_wait(self.keep_coinc_wait)
            .with_max_units(self.topology.max_units())
    }

    fn dispatch(&mut self, request: &TransferRequest) -> Result<EngineeringValue> {
        let scope = request.scope();
        let target = request.target;
        let direction = request.direction;
        self.topology.check(target, &request.field, direction)?;

        let catalog = Arc::clone(&self.catalog);
        let resolved = catalog
            .resolve(scope, &request.field)
            .ok_or_else(|| SyncError::unknown_field(&request.field, scope, direction))?;

        match (resolved, direction) {
            (Resolved::Field(desc), Direction::Read) => self.read_field(&catalog, desc, target),
            (Resolved::Field(desc), Direction::Write) => {
                check_access(desc, direction)?;
                let value = request.value.as_ref().ok_or_else(|| {
                    SyncError::invalid_payload(desc.name, scope, direction, "a value to write")
                })?;
                self.write_field(&catalog, desc, target, value)
            }
            (Resolved::Aggregate(aggregate), Direction::Read) => {
                self.read_aggregate(&catalog, &request.field, aggregate, target)
            }
            (Resolved::Aggregate(aggregate), Direction::Write) => {
                let record = request
                    .value
                    .as_ref()
                    .and_then(EngineeringValue::as_record)
                    .ok_or_else(|| SyncError::invalid_payload(&request.field, scope, direction, "record"))?;
                self.write_aggregate(&catalog, &request.field, aggregate, target, record)
            }
        }
    }

    fn read_field(
        &mut self,
        catalog: &Catalog,
        desc: &RegisterDescriptor,
        target: Target,
    ) -> Result<EngineeringValue> {
        check_access(desc, Direction::Read)?;
        self.enter(EngineState::Converting);
        let value = self.current_value(catalog, desc, target)?;
        self.enter(EngineState::Mirroring);
        self.store.set_value(target, desc.name, value.clone());
        Ok(value)
    }

    fn current_value(
        &self,
        catalog: &Catalog,
        desc: &RegisterDescriptor,
        target: Target,
    ) -> Result<EngineeringValue> {
        match desc.storage {
            Storage::Host { len } => Ok(self.store.value(target, desc.name).cloned().unwrap_or_else(|| {
                if len == 1 {
                    EngineeringValue::Scalar(0.0)
                } else {
                    EngineeringValue::Words(vec![0.0; len])
                }
            })),
            Storage::Dsp { .. } => {
                let ctx = self.context(target);
                let span = desc
                    .span(target.channel())
                    .ok_or_else(|| SyncError::out_of_range(desc.name, desc.scope, Direction::Read, "no storage span"))?;
                Ok(desc.conversion.decode(&ctx.words(span.start, span.len()), &ctx))
            }
            Storage::Derived(derived) => {
                let ctx = self.context(target);
                recompute::derive(catalog, desc, derived, &ctx).map(EngineeringValue::Scalar)
            }
        }
    }

    fn write_field(
        &mut self,
        catalog: &Catalog,
        desc: &RegisterDescriptor,
        target: Target,
        value: &EngineeringValue,
    ) -> Result<EngineeringValue> {
        check_access(desc, Direction::Write)?;

        let (clamped, encoded, partner) = {
            let ctx = self.context(target);
            let clamped = Clamper::new(catalog).clamp(desc, value, &ctx)?;
            if let Storage::Host { .. } = desc.storage {
                (clamped, None, None)
            } else {
                let encoded = encode_at(desc, &clamped.value, target, &ctx)?;
                let partner = match clamped.partner {
                    Some(reset) => {
                        let pdesc = catalog.get(desc.scope, reset.name).ok_or_else(|| {
                            SyncError::out_of_range(desc.name, desc.scope, Direction::Write, "pair partner missing")
                        })?;
                        let value = EngineeringValue::Scalar(reset.value);
                        let (pstart, pwords) = encode_at(pdesc, &value, target, &ctx)?;
                        Some((pdesc, value, pstart, pwords))
                    }
                    None => None,
                };
                (clamped, Some(encoded), partner)
            }
        };

        let Some((start, words)) = encoded else {
            self.enter(EngineState::Mirroring);
            self.store.set_value(target, desc.name, clamped.value.clone());
            if let Some(effect) = desc.effect {
                self.apply_effect(desc, effect, &clamped.value)?;
            }
            return Ok(clamped.value);
        };
        self.enter(EngineState::Converting);
        let unit = target.unit().unwrap_or(0);

        self.enter(EngineState::Mirroring);
        self.store.set_words(unit, start, &words);
        self.store.set_value(target, desc.name, clamped.value.clone());
        let mut pushes = Vec::new();
        self.stage(unit, start, words.clone(), &desc.apply, &mut pushes);
        if let Some((pdesc, pvalue, pstart, pwords)) = &partner {
            info!("{} and {} reset to defaults", desc.name, pdesc.name);
            self.store.set_words(unit, *pstart, pwords);
            self.store.set_value(target, pdesc.name, pvalue.clone());
            self.stage(unit, *pstart, pwords.clone(), &pdesc.apply, &mut pushes);
        }

        if !pushes.is_empty() {
            self.enter(EngineState::HardwareSyncing);
            self.push_sequential(desc, &pushes)?;
        }

        let dependents = dependents_of(desc, partner.as_ref().map(|(pdesc, ..)| *pdesc));
        if !dependents.is_empty() {
            self.enter(EngineState::Recomputing);
            let mut pushes = Vec::new();
            self.recompute(catalog, desc.scope, &dependents, target, &mut pushes)?;
            self.push_sequential(desc, &pushes)?;
        }

        if desc.propagation != Propagation::Local {
            let source_word = words.first().copied();
            self.fan_out(catalog, desc, target, &clamped.value, source_word, &dependents)?;
        }
        Ok(clamped.value)
    }

    fn apply_effect(&mut self, desc: &RegisterDescriptor, effect: Effect, value: &EngineeringValue) -> Result<()> {
        let on = value.as_scalar().is_some_and(|v| v != 0.0);
        match effect {
            Effect::Offline => {
                info!("offline analysis {}", if on { "on" } else { "off" });
                self.offline = on;
            }
            Effect::KeepCoincWait => {
                info!("coincidence-wait compensation {}", if on { "on" } else { "off" });
                self.keep_coinc_wait = on;
            }
            Effect::PresentUnits => {
                let requested = value.as_scalar().map_or(0, unit_count);
                let before = self.topology.present();
                if self.offline || requested <= before {
                    let after = self.topology.set_present(requested);
                    info!("present units {before} -> {after}");
                    return Ok(());
                }
                let catalog = Arc::clone(&self.catalog);
                for unit in before..requested.min(self.topology.max_units()) {
                    if let Err(e) = self.bring_online(&catalog, desc, unit) {
                        warn!("present units {before} -> {unit}: unit {unit} not brought online");
                        self.topology.set_present(unit);
                        self.store.set_value(Target::System, desc.name, (unit as f64).into());
                        self.pending.retain(|&(u, _)| u < unit);
                        if let Err(task) = self.run_pending(desc.name, desc.scope) {
                            warn!("{task}");
                        }
                        return Err(e);
                    }
                }
                info!("present units {before} -> {}", self.topology.present());
            }
        }
        Ok(())
    }

    /// Read a unit that just came online, then give it unit 0's global and
    /// shared-bit fields and push them
    fn bring_online(&mut self, catalog: &Catalog, desc: &RegisterDescriptor, unit: usize) -> Result<()> {
        let variant = self
            .transport
            .board_variant(unit)
            .map_err(|e| SyncError::transport(desc.name, desc.scope, Direction::Write, unit, e))?;
        self.topology.set_variant(unit, variant);
        self.topology.set_present(unit + 1);
        self.store.clear_values(unit);
        self.refresh(unit, RefreshRange::Full)?;
        if unit == 0 {
            return Ok(());
        }

        let mut pushes = Vec::new();
        let propagated = [Scope::Unit, Scope::Channel]
            .into_iter()
            .flat_map(|scope| catalog.iter(scope))
            .filter(|d| d.propagation != Propagation::Local && matches!(d.storage, Storage::Dsp { .. }));
        for field in propagated {
            let channels = if field.scope == Scope::Channel { self.topology.channels() } else { 1 };
            for channel in 0..channels {
                self.adopt_field(catalog, field, unit, channel, &mut pushes)?;
            }
        }
        self.enter(EngineState::HardwareSyncing);
        self.push_sequential(desc, &pushes)
    }

    fn adopt_field(
        &mut self,
        catalog: &Catalog,
        field: &RegisterDescriptor,
        unit: usize,
        channel: usize,
        pushes: &mut Vec<UnitPush>,
    ) -> Result<()> {
        let target = Target::of(field.scope, unit, channel);
        let Some(span) = field.span(target.channel()) else {
            return Ok(());
        };
        let words = match field.propagation {
            Propagation::SharedBits { shared, exclusive } => {
                let word_of = |u: usize| self.store.image(u).get(span.start).copied().unwrap_or(0);
                // exclusive bits already held by a present unit
                let taken = (0..unit).fold(0, |acc, u| acc | word_of(u)) & exclusive;
                vec![merge_shared_bits(word_of(unit), word_of(0), shared, 0) & !taken]
            }
            _ => {
                let value = self.current_value(catalog, field, Target::of(field.scope, 0, channel))?;
                let ctx = self.context(target);
                encode_at(field, &value, target, &ctx)?.1
            }
        };
        if self.store.set_words(unit, span.start, &words) {
            debug!("{} ({target}) taken from unit 0: {words:?}", field.name);
            self.stage(unit, span.start, words, &field.apply, pushes);
            self.recompute(catalog, field.scope, &field.dependents, target, pushes)?;
        }
        let value = {
            let ctx = self.context(target);
            field.conversion.decode(&ctx.words(span.start, span.len()), &ctx)
        };
        self.store.set_value(target, field.name, value);
        Ok(())
    }

    /// Mirror-side bookkeeping for a push: queue it and its tasks if the
    /// unit is online
    fn stage(&mut self, unit: usize, address: usize, words: Vec<u16>, tasks: &[TaskKind], pushes: &mut Vec<UnitPush>) {
        if !self.online(unit) {
            return;
        }
        pushes.push(UnitPush { unit, address, words });
        self.pending.extend(tasks.iter().map(|&task| (unit, task)));
    }

    fn push_sequential(&self, desc: &RegisterDescriptor, pushes: &[UnitPush]) -> Result<()> {
        for p in pushes {
            debug!("{}: unit {} {:#05x} <- {:?}", desc.name, p.unit, p.address, p.words);
            self.transport
                .hw_write(p.unit, p.address, &p.words)
                .map_err(|e| SyncError::transport(desc.name, desc.scope, Direction::Write, p.unit, e))?;
        }
        Ok(())
    }

    fn recompute(
        &mut self,
        catalog: &Catalog,
        scope: Scope,
        dependents: &[Dependent],
        target: Target,
        pushes: &mut Vec<UnitPush>,
    ) -> Result<()> {
        let Some(unit) = target.unit() else {
            return Ok(());
        };
        for dep in dependents {
            let dep_desc = catalog.get(dep.scope(scope), dep.name).ok_or_else(|| {
                SyncError::out_of_range(dep.name, dep.scope(scope), Direction::Write, "dependent missing from catalog")
            })?;
            match dep.target {
                DependentTarget::Same => self.recompute_one(catalog, dep_desc, target, pushes)?,
                DependentTarget::Unit => self.recompute_one(catalog, dep_desc, Target::Unit { unit }, pushes)?,
                DependentTarget::EveryChannel => {
                    for channel in 0..self.topology.channels() {
                        self.recompute_one(catalog, dep_desc, Target::Channel { unit, channel }, pushes)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn recompute_one(
        &mut self,
        catalog: &Catalog,
        desc: &RegisterDescriptor,
        target: Target,
        pushes: &mut Vec<UnitPush>,
    ) -> Result<()> {
        let unit = target.unit().unwrap_or(0);
        match desc.storage {
            Storage::Derived(derived) => {
                let value = {
                    let ctx = self.context(target);
                    recompute::derive(catalog, desc, derived, &ctx)?
                };
                trace!("{} ({target}) = {value}", desc.name);
                self.store.set_value(target, desc.name, value.into());
            }
            Storage::Dsp { .. } => {
                let Some(span) = desc.span(target.channel()) else {
                    return Ok(());
                };
                let words = {
                    let ctx = self.context(target);
                    recompute::recompute_words(catalog, desc, &ctx)?
                };
                if let Some(words) = words {
                    if self.store.set_words(unit, span.start, &words) {
                        debug!("{} ({target}) recomputed: {words:?}", desc.name);
                        self.stage(unit, span.start, words, &desc.apply, pushes);
                    }
                }
                let value = {
                    let ctx = self.context(target);
                    desc.conversion.decode(&ctx.words(span.start, span.len()), &ctx)
                };
                self.store.set_value(target, desc.name, value);
            }
            Storage::Host { .. } => {}
        }
        Ok(())
    }

    /// Mirror a value on every unit but `source` and push it to the present
    /// ones
    ///
    /// With a `source_word`, shared-bit fields merge that word into each
    /// unit's own; otherwise the engineering value is converted per unit.
    fn fan_out(
        &mut self,
        catalog: &Catalog,
        desc: &RegisterDescriptor,
        source: Target,
        value: &EngineeringValue,
        source_word: Option<u16>,
        dependents: &[Dependent],
    ) -> Result<()> {
        self.enter(EngineState::Broadcasting);
        let source_unit = source.unit().unwrap_or(0);
        let channel = source.channel().unwrap_or(0);
        let mut pushes = Vec::new();
        for unit in 0..self.topology.max_units() {
            if source_word.is_some() && unit == source_unit {
                continue;
            }
            let target = Target::of(desc.scope, unit, channel);
            let (start, words, effective) = {
                let ctx = self.context(target);
                match (desc.propagation, source_word) {
                    (Propagation::SharedBits { shared, exclusive }, Some(word)) => {
                        let start = desc
                            .span(target.channel())
                            .map_or(0, |span| span.start);
                        let merged = merge_shared_bits(ctx.word(start), word, shared, exclusive);
                        (start, vec![merged], desc.conversion.decode(&[merged], &ctx))
                    }
                    _ => {
                        let (start, words) = encode_at(desc, value, target, &ctx)?;
                        let effective = desc.conversion.decode(&words, &ctx);
                        (start, words, effective)
                    }
                }
            };
            self.store.set_words(unit, start, &words);
            self.store.set_value(target, desc.name, effective);
            self.stage(unit, start, words, &desc.apply, &mut pushes);
            self.recompute(catalog, desc.scope, dependents, target, &mut pushes)?;
        }
        if pushes.is_empty() {
            return Ok(());
        }
        let report = BroadcastCoordinator::new(&self.transport, self.parallel_broadcast)
            .push(desc.name, desc.scope, &pushes);
        for (unit, e) in &report.failures {
            warn!("broadcast {}: unit {unit} failed: {e}", desc.name);
            self.pending.retain(|(u, _)| u != unit);
        }
        match report.into_first_error() {
            Some(e) => {
                self.run_pending(desc.name, desc.scope)?;
                Err(e)
            }
            None => Ok(()),
        }
    }

    fn run_pending(&mut self, field: &str, scope: Scope) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        if self.offline {
            return Ok(());
        }
        for (unit, task) in pending {
            debug!("unit {unit}: {task}");
            self.transport
                .apply_task(unit, task, task.default_timeout_ms())
                .map_err(|e| SyncError::transport(field, scope, Direction::Write, unit, e))?;
        }
        Ok(())
    }

    fn read_aggregate(
        &mut self,
        catalog: &Catalog,
        name: &str,
        aggregate: Aggregate,
        target: Target,
    ) -> Result<EngineeringValue> {
        let scope = target.scope();
        let mut record = Record::new();
        let mut succeeded = 0;
        for (i, desc) in catalog.members(scope, aggregate).enumerate() {
            match self.read_field(catalog, desc, target) {
                Ok(value) => {
                    record.values.insert(desc.name.to_string(), value);
                    succeeded += 1;
                }
                Err(e) if desc.best_effort => {
                    warn!("{name}: {} skipped: {e}", desc.name);
                    record.failures.push(FieldFailure {
                        field: desc.name.to_string(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    return Err(SyncError::AggregateFailure {
                        field: name.to_string(),
                        scope,
                        direction: Direction::Read,
                        attempted: i + 1,
                        succeeded,
                        source: Box::new(e),
                    })
                }
            }
        }
        Ok(record.into())
    }

    fn write_aggregate(
        &mut self,
        catalog: &Catalog,
        name: &str,
        aggregate: Aggregate,
        target: Target,
        record: &Record,
    ) -> Result<EngineeringValue> {
        let scope = target.scope();
        if aggregate == Aggregate::Statistics {
            return Err(SyncError::invalid_direction(
                name,
                scope,
                Direction::Write,
                Access::ReadOnly,
            ));
        }
        for field in record.values.keys() {
            let known = catalog
                .get(scope, field)
                .is_some_and(|d| d.category == aggregate.category());
            if !known {
                return Err(SyncError::unknown_field(field.as_str(), scope, Direction::Write));
            }
        }

        let mut written = Record::new();
        let mut attempted = 0;
        let mut succeeded = 0;
        let members = catalog
            .members(scope, aggregate)
            .filter_map(|desc| record.get(desc.name).map(|value| (desc, value)));
        for (desc, value) in members {
            if !desc.access.allows(Direction::Write) {
                trace!("{name}: {} is {}, skipped", desc.name, desc.access);
                continue;
            }
            attempted += 1;
            self.enter(EngineState::Validating);
            match self.write_field(catalog, desc, target, value) {
                Ok(effective) => {
                    written.values.insert(desc.name.to_string(), effective);
                    succeeded += 1;
                }
                Err(e) if desc.best_effort => {
                    warn!("{name}: {} skipped: {e}", desc.name);
                    written.failures.push(FieldFailure {
                        field: desc.name.to_string(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    return Err(SyncError::AggregateFailure {
                        field: name.to_string(),
                        scope,
                        direction: Direction::Write,
                        attempted,
                        succeeded,
                        source: Box::new(e),
                    })
                }
            }
        }
        Ok(written.into())
    }
}

fn check_access(desc: &RegisterDescriptor, direction: Direction) -> Result<()> {
    if desc.access.allows(direction) {
        Ok(())
    } else {
        Err(SyncError::invalid_direction(desc.name, desc.scope, direction, desc.access))
    }
}

fn encode_at(
    desc: &RegisterDescriptor,
    value: &EngineeringValue,
    target: Target,
    ctx: &ConvertContext<'_>,
) -> Result<(usize, Vec<u16>)> {
    let span = desc
        .span(target.channel())
        .ok_or_else(|| SyncError::out_of_range(desc.name, desc.scope, Direction::Write, "no storage span"))?;
    let current = ctx.words(span.start, span.len());
    let words = desc
        .conversion
        .encode(value, &current, ctx)
        .map_err(|reason| SyncError::out_of_range(desc.name, desc.scope, Direction::Write, reason))?;
    Ok((span.start, words))
}

/// Dependents of a field followed by those of its reset partner, without
/// repeats
fn dependents_of(desc: &RegisterDescriptor, partner: Option<&RegisterDescriptor>) -> Vec<Dependent> {
    let mut dependents = desc.dependents.clone();
    for dep in partner.into_iter().flat_map(|p| p.dependents.iter()) {
        if !dependents.contains(dep) {
            dependents.push(*dep);
        }
    }
    dependents
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn unit_count(v: f64) -> usize {
    v.max(0.0) as usize
}
