//! Error types for register synchronization

use crate::backend::TransportError;
use crate::config::ConfigError;
use crate::descriptor::Access;
use crate::request::{Direction, Scope};
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while transferring a field
///
/// Every transfer error carries the field name, scope and direction of the
/// attempted operation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No descriptor with this exact name exists in the scope
    #[error("{direction} {scope}/{field}: unknown field")]
    UnknownField {
        /// Requested field name
        field: String,
        /// Scope searched
        scope: Scope,
        /// Attempted direction
        direction: Direction,
    },

    /// Write to a read-only field or read of a write-only field
    #[error("{direction} {scope}/{field}: field is {access}")]
    InvalidDirection {
        /// Field name
        field: String,
        /// Field scope
        scope: Scope,
        /// Attempted direction
        direction: Direction,
        /// Access policy of the field
        access: Access,
    },

    /// Scope token is not one of SYSTEM, MODULE/UNIT or CHANNEL
    #[error("{direction} {token}/{field}: invalid scope")]
    InvalidScope {
        /// Field name
        field: String,
        /// Rejected scope token
        token: String,
        /// Attempted direction
        direction: Direction,
    },

    /// Value or descriptor inconsistency that cannot be clamped away
    #[error("{direction} {scope}/{field}: out of range: {reason}")]
    OutOfRange {
        /// Field name
        field: String,
        /// Field scope
        scope: Scope,
        /// Attempted direction
        direction: Direction,
        /// What was out of range
        reason: String,
    },

    /// Unit or channel index outside the topology
    #[error("{direction} {scope}/{field}: {kind} index {index} out of range (have {count})")]
    InvalidIndex {
        /// Field name
        field: String,
        /// Field scope
        scope: Scope,
        /// Attempted direction
        direction: Direction,
        /// "unit" or "channel"
        kind: &'static str,
        /// Requested index
        index: usize,
        /// Number of addressable instances
        count: usize,
    },

    /// Payload shape does not match the field
    #[error("{direction} {scope}/{field}: invalid payload, expected {expected}")]
    InvalidPayload {
        /// Field name
        field: String,
        /// Field scope
        scope: Scope,
        /// Attempted direction
        direction: Direction,
        /// Payload shape the field accepts
        expected: &'static str,
    },

    /// Register transport failed
    #[error("{direction} {scope}/{field}: unit {unit}: {source}")]
    HardwareTransport {
        /// Field name
        field: String,
        /// Field scope
        scope: Scope,
        /// Attempted direction
        direction: Direction,
        /// Unit the transport was addressing
        unit: usize,
        /// Underlying transport error
        #[source]
        source: TransportError,
    },

    /// First non-best-effort failure inside an aggregate operation
    #[error("{direction} {scope}/{field}: aggregate stopped after {succeeded}/{attempted} fields: {source}")]
    AggregateFailure {
        /// Aggregate pseudo-field name
        field: String,
        /// Aggregate scope
        scope: Scope,
        /// Attempted direction
        direction: Direction,
        /// Fields attempted, including the failing one
        attempted: usize,
        /// Fields that completed
        succeeded: usize,
        /// The failure that stopped the aggregate
        #[source]
        source: Box<SyncError>,
    },

    /// Engine configuration rejected
    #[error("Configuration error: {source}")]
    Config {
        /// Underlying configuration error
        #[from]
        source: ConfigError,
    },
}

impl SyncError {
    /// Create an unknown field error
    pub fn unknown_field(field: impl Into<String>, scope: Scope, direction: Direction) -> Self {
        Self::UnknownField {
            field: field.into(),
            scope,
            direction,
        }
    }

    /// Create an invalid direction error
    pub fn invalid_direction(
        field: impl Into<String>,
        scope: Scope,
        direction: Direction,
        access: Access,
    ) -> Self {
        Self::InvalidDirection {
            field: field.into(),
            scope,
            direction,
            access,
        }
    }

    /// Create an out of range error
    pub fn out_of_range(
        field: impl Into<String>,
        scope: Scope,
        direction: Direction,
        reason: impl Into<String>,
    ) -> Self {
        Self::OutOfRange {
            field: field.into(),
            scope,
            direction,
            reason: reason.into(),
        }
    }

    /// Create an invalid payload error
    pub fn invalid_payload(
        field: impl Into<String>,
        scope: Scope,
        direction: Direction,
        expected: &'static str,
    ) -> Self {
        Self::InvalidPayload {
            field: field.into(),
            scope,
            direction,
            expected,
        }
    }

    /// Create a hardware transport error
    pub fn transport(
        field: impl Into<String>,
        scope: Scope,
        direction: Direction,
        unit: usize,
        source: TransportError,
    ) -> Self {
        Self::HardwareTransport {
            field: field.into(),
            scope,
            direction,
            unit,
            source,
        }
    }

    /// Field name of the failed operation
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::UnknownField { field, .. }
            | Self::InvalidDirection { field, .. }
            | Self::InvalidScope { field, .. }
            | Self::OutOfRange { field, .. }
            | Self::InvalidIndex { field, .. }
            | Self::InvalidPayload { field, .. }
            | Self::HardwareTransport { field, .. }
            | Self::AggregateFailure { field, .. } => Some(field),
            Self::Config { .. } => None,
        }
    }

    /// Scope of the failed operation (`None` for a rejected scope token)
    #[must_use]
    pub fn scope(&self) -> Option<Scope> {
        match self {
            Self::UnknownField { scope, .. }
            | Self::InvalidDirection { scope, .. }
            | Self::OutOfRange { scope, .. }
            | Self::InvalidIndex { scope, .. }
            | Self::InvalidPayload { scope, .. }
            | Self::HardwareTransport { scope, .. }
            | Self::AggregateFailure { scope, .. } => Some(*scope),
            Self::InvalidScope { .. } | Self::Config { .. } => None,
        }
    }

    /// Direction of the failed operation
    #[must_use]
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Self::UnknownField { direction, .. }
            | Self::InvalidDirection { direction, .. }
            | Self::InvalidScope { direction, .. }
            | Self::OutOfRange { direction, .. }
            | Self::InvalidIndex { direction, .. }
            | Self::InvalidPayload { direction, .. }
            | Self::HardwareTransport { direction, .. }
            | Self::AggregateFailure { direction, .. } => Some(*direction),
            Self::Config { .. } => None,
        }
    }

    /// Whether the parameter mirror may now be ahead of the hardware
    ///
    /// After such an error callers should refresh before trusting reads.
    #[must_use]
    pub fn mirror_may_be_stale(&self) -> bool {
        match self {
            Self::HardwareTransport { .. } => true,
            Self::AggregateFailure { source, .. } => source.mirror_may_be_stale(),
            _ => false,
        }
    }
}
