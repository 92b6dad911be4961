//! Register synchronization for XIA Pixie-4, Pixie-4e and Pixie-500e modules.
//!
//! Keeps a host-side mirror of every module's DSP parameter block in step
//! with the hardware. Each read or write of a named field goes through one
//! state machine: the value is validated and clamped, converted between
//! engineering units and raw words, mirrored, pushed to the unit, its
//! dependents are recomputed and, for global fields, the change is
//! broadcast to every unit.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`catalog`] | Name-indexed register descriptors per scope, aggregate aliases |
//! | [`descriptor`] | Storage, access, dependents, propagation of one field |
//! | [`convert`] | Engineering ⇄ raw conversions, clocks and scales |
//! | [`clamp`] | Range, variant, pair and computed limits |
//! | [`recompute`] | Derived values and dependent recomputation |
//! | [`store`] | The parameter mirror |
//! | [`topology`] | Units, variants, present count |
//! | [`broadcast`] | Cross-unit fan-out |
//! | [`backends`] | Register transports (simulated) |
//!
//! # Quick start
//!
//! ```
//! use pixie_regs::BoardVariant;
//! use pixie_sync::{EngineConfig, SoftwareBackend, SyncEngine, Target, TransferRequest};
//!
//! # fn main() -> pixie_sync::Result<()> {
//! let config = EngineConfig::uniform(2, BoardVariant::Pixie4);
//! let backend = SoftwareBackend::from_config(&config);
//! let mut engine = SyncEngine::new(backend, &config)?;
//!
//! // Pixie-4 gate delay saturates at 254 filter cycles of 75 MHz
//! let ch = Target::Channel { unit: 0, channel: 1 };
//! let effective = engine.transfer(TransferRequest::write(ch, "GATE_DELAY", 1000.0))?;
//! let us = effective.as_scalar().unwrap_or_default();
//! assert!((us - 254.0 / 75.0).abs() < 1e-9);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod backend;
pub mod backends;
pub mod broadcast;
pub mod catalog;
pub mod clamp;
mod config;
pub mod convert;
pub mod descriptor;
mod engine;
mod error;
pub mod recompute;
mod request;
pub mod store;
pub mod topology;
mod value;

pub use backend::{RegisterTransport, TaskKind, TransportError, TransportResult};
pub use backends::{Fault, SoftwareBackend, WriteRecord};
pub use catalog::{Aggregate, Catalog, Resolved};
pub use config::{ConfigError, EngineConfig, UnitConfig};
pub use descriptor::{Access, RegisterDescriptor};
pub use engine::{EngineState, RefreshRange, SyncEngine};
pub use error::{Result, SyncError};
pub use request::{Direction, Scope, Target, TransferRequest};
pub use value::{EngineeringValue, FieldFailure, Record};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Catalog, Direction, EngineConfig, EngineeringValue, Record, RefreshRange,
        RegisterTransport, Result, Scope, SoftwareBackend, SyncEngine, SyncError, Target,
        TransferRequest,
    };
}
