//! Control/status register bit definitions.
//!
//! Bits that must agree across every module in a system are grouped into
//! `*_SHARED` masks; bits that may be set in at most one module are grouped
//! into `*_EXCLUSIVE` masks.

/// Module CSR A.
pub mod modcsra {
    /// Module is the trigger share master.
    pub const TRIGGER_MASTER: u16 = 1 << 1;
    /// Module drives the system-wide veto line.
    pub const VETO_MASTER: u16 = 1 << 5;
    /// Front-panel trigger distribution enabled.
    pub const FRONT_PANEL_TRIGGER: u16 = 1 << 11;

    /// Bits kept identical in all modules.
    pub const SHARED: u16 = TRIGGER_MASTER | FRONT_PANEL_TRIGGER;
    /// Bits set in at most one module.
    pub const EXCLUSIVE: u16 = VETO_MASTER;
}

/// Module CSR B.
pub mod modcsrb {
    /// Backplane run-synchronization enabled.
    pub const RUN_SYNC: u16 = 1 << 1;
    /// Backplane clock master.
    pub const CLOCK_MASTER: u16 = 1 << 8;
    /// Clock distributed from the backplane.
    pub const BACKPLANE_CLOCK: u16 = 1 << 9;

    /// Bits kept identical in all modules.
    pub const SHARED: u16 = RUN_SYNC | CLOCK_MASTER | BACKPLANE_CLOCK;
}

/// Channel CSR A.
pub mod chancsra {
    /// Channel contributes to triggers.
    pub const TRIGGER_ENABLE: u16 = 1 << 0;
    /// Channel is "good": read out and counted.
    pub const GOOD: u16 = 1 << 2;
    /// Positive input polarity.
    pub const POLARITY: u16 = 1 << 5;
}

/// Channel CSR B.
pub mod chancsrb {
    /// User-defined extra inputs carry a control pair.
    pub const EXTRA_PAIR: u16 = 1 << 10;
}

/// Host control word (`C_CONTROL`).
pub mod ccontrol {
    /// Poll the DSP before each buffer read.
    pub const POLL: u16 = 1 << 8;
    /// Keep list-mode data in external memory.
    pub const EXTERNAL_MEMORY: u16 = 1 << 9;
    /// Auto-process list-mode data after readout.
    pub const AUTO_PROCESS: u16 = 1 << 12;
    /// Keep the original word order.
    pub const RAW_ORDER: u16 = 1 << 15;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_and_exclusive_masks_do_not_overlap() {
        assert_eq!(modcsra::SHARED & modcsra::EXCLUSIVE, 0);
    }

    #[test]
    fn csra_bits_are_distinct() {
        let bits = [chancsra::TRIGGER_ENABLE, chancsra::GOOD, chancsra::POLARITY];
        for (i, a) in bits.iter().enumerate() {
            for b in &bits[i + 1..] {
                assert_eq!(a & b, 0);
            }
        }
    }
}
