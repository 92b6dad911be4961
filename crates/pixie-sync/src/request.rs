//! Transfer requests: direction, scope and target instance

use crate::error::{Result, SyncError};
use crate::value::EngineeringValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Level at which a field exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Scope {
    /// System-wide, host-side only
    System,
    /// One module
    #[serde(alias = "MODULE")]
    Unit,
    /// One input channel of one module
    Channel,
}

impl Scope {
    /// Parse a scope token
    ///
    /// Accepts `SYSTEM`, `MODULE`, `UNIT` and `CHANNEL`, case-insensitively.
    /// Unrecognized input yields `None`; [`TransferRequest::parse`] turns that
    /// into [`SyncError::InvalidScope`].
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "SYSTEM" => Some(Self::System),
            "MODULE" | "UNIT" => Some(Self::Unit),
            "CHANNEL" => Some(Self::Channel),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "SYSTEM"),
            Self::Unit => write!(f, "MODULE"),
            Self::Channel => write!(f, "CHANNEL"),
        }
    }
}

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Host reads the (refreshed) mirror
    Read,
    /// Host writes a new value
    Write,
}

impl Direction {
    /// Parse a direction token (`read`/`write`, or `get`/`set`)
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "read" | "get" => Some(Self::Read),
            "write" | "set" => Some(Self::Write),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Instance a request addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// The system scope
    System,
    /// One unit
    Unit {
        /// Unit index
        unit: usize,
    },
    /// One channel of one unit
    Channel {
        /// Unit index
        unit: usize,
        /// Channel index
        channel: usize,
    },
}

impl Target {
    /// Scope of this target
    #[must_use]
    pub const fn scope(&self) -> Scope {
        match self {
            Self::System => Scope::System,
            Self::Unit { .. } => Scope::Unit,
            Self::Channel { .. } => Scope::Channel,
        }
    }

    /// Unit index, if the target is unit or channel scoped
    #[must_use]
    pub const fn unit(&self) -> Option<usize> {
        match self {
            Self::System => None,
            Self::Unit { unit } | Self::Channel { unit, .. } => Some(*unit),
        }
    }

    /// Channel index, if the target is channel scoped
    #[must_use]
    pub const fn channel(&self) -> Option<usize> {
        match self {
            Self::Channel { channel, .. } => Some(*channel),
            _ => None,
        }
    }

    /// Build a target of `scope` from indices (unused indices are ignored)
    #[must_use]
    pub const fn of(scope: Scope, unit: usize, channel: usize) -> Self {
        match scope {
            Scope::System => Self::System,
            Scope::Unit => Self::Unit { unit },
            Scope::Channel => Self::Channel { unit, channel },
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::Unit { unit } => write!(f, "unit {unit}"),
            Self::Channel { unit, channel } => write!(f, "unit {unit} channel {channel}"),
        }
    }
}

/// One set or get operation
///
/// Constructed by the caller, consumed by [`SyncEngine::transfer`](crate::SyncEngine::transfer).
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    /// Read or write
    pub direction: Direction,
    /// Addressed instance
    pub target: Target,
    /// Field or aggregate name, matched exactly
    pub field: String,
    /// Value to write (`None` for reads)
    pub value: Option<EngineeringValue>,
}

impl TransferRequest {
    /// Read request
    pub fn read(target: Target, field: impl Into<String>) -> Self {
        Self {
            direction: Direction::Read,
            target,
            field: field.into(),
            value: None,
        }
    }

    /// Write request
    pub fn write(target: Target, field: impl Into<String>, value: impl Into<EngineeringValue>) -> Self {
        Self {
            direction: Direction::Write,
            target,
            field: field.into(),
            value: Some(value.into()),
        }
    }

    /// Build a request from textual direction and scope tokens
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidScope`] for an unrecognized scope token, or
    /// [`SyncError::InvalidPayload`] for an unrecognized direction token or a
    /// write without a value.
    pub fn parse(
        direction: &str,
        scope: &str,
        field: &str,
        unit: usize,
        channel: usize,
        value: Option<EngineeringValue>,
    ) -> Result<Self> {
        let dir = Direction::from_token(direction);
        let Some(scope_kind) = Scope::from_token(scope) else {
            return Err(SyncError::InvalidScope {
                field: field.to_string(),
                token: scope.to_string(),
                direction: dir.unwrap_or(Direction::Read),
            });
        };
        let Some(dir) = dir else {
            return Err(SyncError::invalid_payload(
                field,
                scope_kind,
                Direction::Read,
                "direction read or write",
            ));
        };
        if dir == Direction::Write && value.is_none() {
            return Err(SyncError::invalid_payload(field, scope_kind, dir, "a value to write"));
        }
        Ok(Self {
            direction: dir,
            target: Target::of(scope_kind, unit, channel),
            field: field.to_string(),
            value: if dir == Direction::Write { value } else { None },
        })
    }

    /// Scope of the request
    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.target.scope()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_tokens() {
        assert_eq!(Scope::from_token("MODULE"), Some(Scope::Unit));
        assert_eq!(Scope::from_token("unit"), Some(Scope::Unit));
        assert_eq!(Scope::from_token("Channel"), Some(Scope::Channel));
        assert_eq!(Scope::from_token("CRATE"), None);
    }

    #[test]
    fn parse_rejects_bad_scope() {
        let err = TransferRequest::parse("read", "CRATE", "GATE_DELAY", 0, 0, None).unwrap_err();
        assert!(matches!(err, SyncError::InvalidScope { ref token, .. } if token == "CRATE"));
        assert_eq!(err.field(), Some("GATE_DELAY"));
    }

    #[test]
    fn parse_write_needs_value() {
        let err = TransferRequest::parse("write", "CHANNEL", "GATE_DELAY", 0, 1, None).unwrap_err();
        assert!(matches!(err, SyncError::InvalidPayload { .. }));
    }

    #[test]
    fn parse_builds_channel_target() {
        let req =
            TransferRequest::parse("set", "channel", "TAU", 2, 3, Some(EngineeringValue::Scalar(40.0)))
                .unwrap();
        assert_eq!(req.target, Target::Channel { unit: 2, channel: 3 });
        assert_eq!(req.direction, Direction::Write);
    }

    #[test]
    fn read_drops_payload() {
        let req =
            TransferRequest::parse("get", "MODULE", "RUN_TYPE", 1, 0, Some(EngineeringValue::Scalar(1.0)))
                .unwrap();
        assert_eq!(req.value, None);
        assert_eq!(req.target, Target::Unit { unit: 1 });
    }
}
