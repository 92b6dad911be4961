//! Register transport abstraction
//!
//! The engine never touches a device directly. Everything it needs from the
//! hardware goes through [`RegisterTransport`]: word reads and writes of the
//! DSP parameter block, control tasks that re-apply a batch of settings, and
//! the board variant fixed at boot.

use pixie_regs::task;
use pixie_regs::BoardVariant;
use std::fmt::{self, Debug};
use thiserror::Error;

/// Errors reported by a register transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// Unit is not present in the crate
    #[error("Unit {unit} not present")]
    NotPresent {
        /// Requested unit
        unit: usize,
    },

    /// Address range outside the parameter block
    #[error("Address range {address:#06x}+{count} outside parameter block")]
    AddressOutOfRange {
        /// First word
        address: usize,
        /// Word count
        count: usize,
    },

    /// Operation did not complete within its budget
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Hardware-level error from device
    #[error("Hardware error: {reason}")]
    Hardware {
        /// Reason for failure
        reason: String,
    },
}

impl TransportError {
    /// Create a hardware error
    pub fn hardware(reason: impl Into<String>) -> Self {
        Self::Hardware {
            reason: reason.into(),
        }
    }
}

/// Result type alias for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Control task that re-applies a batch of settings on the DSP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    /// Recompute and load offset and gain DACs
    SetDacs,
    /// Reload filter and trigger configuration into the FiPPI
    ProgramFippi,
}

impl TaskKind {
    /// DSP control-task code
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::SetDacs => task::code::SET_DACS,
            Self::ProgramFippi => task::code::PROGRAM_FIPPI,
        }
    }

    /// Completion budget in milliseconds
    #[must_use]
    pub const fn default_timeout_ms(self) -> u64 {
        match self {
            Self::SetDacs => task::SET_DACS_TIMEOUT_MS,
            Self::ProgramFippi => task::PROGRAM_FIPPI_TIMEOUT_MS,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetDacs => write!(f, "SET_DACS"),
            Self::ProgramFippi => write!(f, "PROGRAM_FIPPI"),
        }
    }
}

/// Device register transport
///
/// Implementations serialize operations per unit; the engine may call into
/// different units from different threads during a broadcast.
pub trait RegisterTransport: Debug + Send + Sync {
    /// Read `count` words starting at `address`
    ///
    /// # Errors
    ///
    /// Returns error if the unit is absent, the range is invalid, or the
    /// device fails to answer in time.
    fn hw_read(&self, unit: usize, address: usize, count: usize) -> TransportResult<Vec<u16>>;

    /// Write `words` starting at `address`
    ///
    /// # Errors
    ///
    /// Returns error if the unit is absent, the range is invalid, or the
    /// device rejects the write.
    fn hw_write(&self, unit: usize, address: usize, words: &[u16]) -> TransportResult<()>;

    /// Run a control task and wait for it at most `timeout_ms`
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Timeout`] if the task does not finish.
    fn apply_task(&self, unit: usize, task: TaskKind, timeout_ms: u64) -> TransportResult<()>;

    /// Board variant, fixed at boot
    ///
    /// # Errors
    ///
    /// Returns error if the unit cannot report its board-version word.
    fn board_variant(&self, unit: usize) -> TransportResult<BoardVariant>;
}
