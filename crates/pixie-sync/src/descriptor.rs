//! Register descriptors
//!
//! A descriptor says where a field lives, how its value is converted and
//! limited, what must be recomputed after it changes, and how the change
//! propagates across units. Descriptors are immutable once a catalog is
//! built and are shared by reference.

use crate::backend::TaskKind;
use crate::clamp::Limit;
use crate::convert::Conversion;
use crate::request::{Direction, Scope};
use pixie_regs::dsp;
use std::fmt;
use std::ops::Range;

/// Direction policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Readable and writable
    ReadWrite,
    /// Host may only read
    ReadOnly,
    /// Host may only write (strobes)
    WriteOnly,
}

impl Access {
    /// Whether `direction` is allowed
    #[must_use]
    pub const fn allows(self, direction: Direction) -> bool {
        !matches!(
            (self, direction),
            (Self::ReadOnly, Direction::Write) | (Self::WriteOnly, Direction::Read)
        )
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadWrite => write!(f, "read-write"),
            Self::ReadOnly => write!(f, "read-only"),
            Self::WriteOnly => write!(f, "write-only"),
        }
    }
}

/// DSP memory block a word offset is relative to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
    /// Absolute module address
    Module,
    /// Offset within the channel's input block
    ChannelInput,
    /// Offset within the channel's statistics block
    ChannelOutput,
}

/// Value computed from other state rather than stored
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Derived {
    /// Fixed number (library release, header lengths)
    Constant(f64),
    /// Unit capacity of the topology
    MaxUnits,
    /// Board-version word of the unit's variant
    BoardVersion,
    /// ADC sampling rate in MSPS
    AdcRate,
    /// ADC resolution in bits
    AdcBits,
    /// Shortest coincidence window covering every good channel, in ns
    MinCoincidenceWait,
    /// `count / (time - dead)` of sibling fields, 0 if the denominator is 0
    Rate {
        /// Counter field
        count: &'static str,
        /// Elapsed-time field
        time: &'static str,
        /// Dead-time field subtracted from `time`
        dead: Option<&'static str>,
    },
}

/// Where a field's value lives
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Storage {
    /// Host-side system value, held only in the mirror
    Host {
        /// Number of values (1 for scalars)
        len: usize,
    },
    /// DSP parameter words
    Dsp {
        /// Block the offset is relative to
        block: Block,
        /// First word
        offset: usize,
        /// Number of words
        words: usize,
    },
    /// Computed on read
    Derived(Derived),
}

impl Storage {
    /// Absolute word range for a channel (or the unit, for module words)
    #[must_use]
    pub fn span(&self, channel: Option<usize>) -> Option<Range<usize>> {
        match *self {
            Self::Dsp {
                block,
                offset,
                words,
            } => {
                let start = match block {
                    Block::Module => offset,
                    Block::ChannelInput => dsp::channel_input(channel?, offset),
                    Block::ChannelOutput => dsp::channel_output(channel?, offset),
                };
                Some(start..start + words)
            }
            Self::Host { .. } | Self::Derived(_) => None,
        }
    }

    /// Number of stored words (0 for host and derived values)
    #[must_use]
    pub const fn words(&self) -> usize {
        match self {
            Self::Dsp { words, .. } => *words,
            Self::Host { .. } | Self::Derived(_) => 0,
        }
    }
}

/// Which instance of a dependent field is recomputed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependentTarget {
    /// Same scope and instance as the written field
    Same,
    /// Unit-scope field of the written field's unit
    Unit,
    /// Channel-scope field on every channel of the written field's unit
    EveryChannel,
}

/// A field recomputed after this one changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependent {
    /// Dependent field name
    pub name: &'static str,
    /// Instances to recompute
    pub target: DependentTarget,
}

impl Dependent {
    /// Scope the dependent is looked up in, given the written field's scope
    #[must_use]
    pub const fn scope(&self, written: Scope) -> Scope {
        match self.target {
            DependentTarget::Same => written,
            DependentTarget::Unit => Scope::Unit,
            DependentTarget::EveryChannel => Scope::Channel,
        }
    }
}

/// How a field is brought up to date when one of its inputs changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recompute {
    /// Raw words stay; the engineering value is re-derived
    Refresh,
    /// The field's own limit is re-applied to its current value
    Reclamp,
    /// Pile-up window from the energy filter and filter range
    PeakSeparation,
    /// Largest list-mode event count per buffer for the run type
    MaxEvents,
    /// Coincidence delay compensating the coincidence window (`KEEP_CW`)
    CoincDelay,
    /// Reset delay following the compensated coincidence delay (`KEEP_CW`)
    ResetDelay,
}

/// How a change propagates across units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Only the addressed unit
    Local,
    /// Same engineering value in every unit
    Global,
    /// Masked bits copied to every unit
    SharedBits {
        /// Bits forced identical in all units
        shared: u16,
        /// Bits that, once set in one unit, are cleared in all others
        exclusive: u16,
    },
}

/// Parameter or run statistic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Configuration parameter
    Parameter,
    /// Run statistic or telemetry
    Statistic,
}

/// Engine-level side effect of a system field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Value is the present-unit count
    PresentUnits,
    /// Value switches offline analysis (no hardware access)
    Offline,
    /// Value switches coincidence-wait compensation
    KeepCoincWait,
}

/// Immutable description of one field
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterDescriptor {
    /// Scope the field exists at
    pub scope: Scope,
    /// Exact field name
    pub name: &'static str,
    /// Storage location
    pub storage: Storage,
    /// Direction policy
    pub access: Access,
    /// Conversion rule
    pub conversion: Conversion,
    /// Valid range
    pub limit: Limit,
    /// Fields recomputed after a change, in order
    pub dependents: Vec<Dependent>,
    /// How this field is recomputed when it is itself a dependent
    pub recompute: Recompute,
    /// Control tasks to run after a change
    pub apply: Vec<TaskKind>,
    /// Cross-unit propagation
    pub propagation: Propagation,
    /// Parameter or statistic
    pub category: Category,
    /// Failure does not abort an aggregate operation
    pub best_effort: bool,
    /// System-level side effect
    pub effect: Option<Effect>,
}

impl RegisterDescriptor {
    /// Read-write parameter with width-only limits and no dependents
    #[must_use]
    pub fn new(scope: Scope, name: &'static str, storage: Storage, conversion: Conversion) -> Self {
        Self {
            scope,
            name,
            storage,
            access: Access::ReadWrite,
            conversion,
            limit: Limit::Width,
            dependents: Vec::new(),
            recompute: Recompute::Refresh,
            apply: Vec::new(),
            propagation: Propagation::Local,
            category: Category::Parameter,
            best_effort: false,
            effect: None,
        }
    }

    /// Host-side system value
    #[must_use]
    pub fn system(name: &'static str) -> Self {
        Self::new(Scope::System, name, Storage::Host { len: 1 }, Conversion::Identity)
    }

    /// Host-side system word array
    #[must_use]
    pub fn system_words(name: &'static str, len: usize) -> Self {
        Self::new(Scope::System, name, Storage::Host { len }, Conversion::Words)
    }

    /// Module word(s) at an absolute address
    #[must_use]
    pub fn module(name: &'static str, offset: usize, conversion: Conversion) -> Self {
        let storage = Storage::Dsp {
            block: Block::Module,
            offset,
            words: 1,
        };
        Self::new(Scope::Unit, name, storage, conversion)
    }

    /// Channel input word(s)
    #[must_use]
    pub fn channel(name: &'static str, offset: usize, conversion: Conversion) -> Self {
        let storage = Storage::Dsp {
            block: Block::ChannelInput,
            offset,
            words: 1,
        };
        Self::new(Scope::Channel, name, storage, conversion)
    }

    /// Read-only, best-effort module statistic
    #[must_use]
    pub fn module_stat(name: &'static str, offset: usize, words: usize, conversion: Conversion) -> Self {
        let storage = Storage::Dsp {
            block: Block::Module,
            offset,
            words,
        };
        Self::new(Scope::Unit, name, storage, conversion).statistic()
    }

    /// Read-only, best-effort channel statistic
    #[must_use]
    pub fn channel_stat(name: &'static str, offset: usize, words: usize, conversion: Conversion) -> Self {
        let storage = Storage::Dsp {
            block: Block::ChannelOutput,
            offset,
            words,
        };
        Self::new(Scope::Channel, name, storage, conversion).statistic()
    }

    /// Read-only computed value
    #[must_use]
    pub fn derived(scope: Scope, name: &'static str, derived: Derived) -> Self {
        Self::new(scope, name, Storage::Derived(derived), Conversion::Identity).read_only()
    }

    /// Store `words` words instead of one
    #[must_use]
    pub fn words(mut self, count: usize) -> Self {
        match &mut self.storage {
            Storage::Dsp { words, .. } => *words = count,
            Storage::Host { len } => *len = count,
            Storage::Derived(_) => {}
        }
        self
    }

    /// Set the valid range
    #[must_use]
    pub fn limit(mut self, limit: Limit) -> Self {
        self.limit = limit;
        self
    }

    /// Mark read-only
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.access = Access::ReadOnly;
        self
    }

    /// Mark write-only
    #[must_use]
    pub fn write_only(mut self) -> Self {
        self.access = Access::WriteOnly;
        self
    }

    /// Append a dependent
    #[must_use]
    pub fn dependent(mut self, name: &'static str, target: DependentTarget) -> Self {
        self.dependents.push(Dependent { name, target });
        self
    }

    /// Set how this field is recomputed as a dependent
    #[must_use]
    pub fn recompute(mut self, rule: Recompute) -> Self {
        self.recompute = rule;
        self
    }

    /// Append a control task to run after a change
    #[must_use]
    pub fn apply(mut self, task: TaskKind) -> Self {
        self.apply.push(task);
        self
    }

    /// Broadcast the value to every unit
    #[must_use]
    pub fn global(mut self) -> Self {
        self.propagation = Propagation::Global;
        self
    }

    /// Copy masked bits to every unit
    #[must_use]
    pub fn shared_bits(mut self, shared: u16, exclusive: u16) -> Self {
        self.propagation = Propagation::SharedBits { shared, exclusive };
        self
    }

    /// Mark as a read-only, best-effort statistic
    #[must_use]
    pub fn statistic(mut self) -> Self {
        self.category = Category::Statistic;
        self.best_effort = true;
        self.access = Access::ReadOnly;
        self
    }

    /// Attach a system-level side effect
    #[must_use]
    pub fn effect(mut self, effect: Effect) -> Self {
        self.effect = Some(effect);
        self
    }

    /// Absolute word range for a channel (or the unit)
    #[must_use]
    pub fn span(&self, channel: Option<usize>) -> Option<Range<usize>> {
        self.storage.span(channel)
    }

    /// Whether the value is a word array
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self.conversion, Conversion::Words)
            || matches!(self.storage, Storage::Host { len } if len > 1)
    }
}
