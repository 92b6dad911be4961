//! Control tasks and run types.
//!
//! Control tasks are short DSP routines the host starts by writing a task
//! code and polling for completion. Run types select what the DSP records
//! during a data run.

/// Control task codes written to the DSP control-task word.
pub mod code {
    /// Recompute and load all offset/gain DAC values.
    pub const SET_DACS: u16 = 0;
    /// Reload FiPPI filter and trigger configuration.
    pub const PROGRAM_FIPPI: u16 = 5;
}

/// Budget for `SET_DACS`, in milliseconds (DAC settling dominates).
pub const SET_DACS_TIMEOUT_MS: u64 = 10_000;

/// Budget for `PROGRAM_FIPPI`, in milliseconds.
pub const PROGRAM_FIPPI_TIMEOUT_MS: u64 = 1_000;

/// Run type words.
pub mod run_type {
    /// List mode, full channel header plus trace.
    pub const LIST_FULL: u16 = 0x100;
    /// List mode, full channel header, no trace.
    pub const LIST_NO_TRACE: u16 = 0x101;
    /// Compressed list mode: energy and time only.
    pub const LIST_COMPRESSED: u16 = 0x102;
    /// Most compressed list mode.
    pub const LIST_COMPRESSED_2: u16 = 0x103;
    /// MCA-only run.
    pub const MCA: u16 = 0x301;
    /// Host-controlled run (external memory).
    pub const HOST_EXTERNAL: u16 = 0x401;
    /// Host-controlled run (auto-processed).
    pub const HOST_PROCESSED: u16 = 0x402;

    /// First run type that records no list-mode events.
    pub const FIRST_NON_LIST: u16 = 0x300;

    /// Run type substituted for an unsupported request.
    pub const FALLBACK: u16 = MCA;

    /// Whether `rt` is a run type the DSP supports.
    #[must_use]
    pub const fn is_valid(rt: u16) -> bool {
        (rt & 0x000F) <= 3 && ((rt & 0x0F00) >> 8) <= 4
    }

    /// Channel header length for a list-mode run type, or `None` for
    /// run types without per-channel list-mode output.
    #[must_use]
    pub const fn channel_header_length(rt: u16) -> Option<usize> {
        match rt {
            LIST_FULL | LIST_NO_TRACE => Some(9),
            LIST_COMPRESSED => Some(4),
            LIST_COMPRESSED_2 => Some(2),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::run_type;

    #[test]
    fn documented_run_types_are_valid() {
        for rt in [
            run_type::LIST_FULL,
            run_type::LIST_NO_TRACE,
            run_type::LIST_COMPRESSED,
            run_type::LIST_COMPRESSED_2,
            run_type::MCA,
            run_type::HOST_EXTERNAL,
            run_type::HOST_PROCESSED,
        ] {
            assert!(run_type::is_valid(rt), "{rt:#x}");
        }
    }

    #[test]
    fn unsupported_run_types_are_rejected() {
        assert!(!run_type::is_valid(0x104));
        assert!(!run_type::is_valid(0x501));
    }

    #[test]
    fn channel_header_lengths() {
        assert_eq!(run_type::channel_header_length(0x100), Some(9));
        assert_eq!(run_type::channel_header_length(0x102), Some(4));
        assert_eq!(run_type::channel_header_length(0x103), Some(2));
        assert_eq!(run_type::channel_header_length(0x301), None);
    }
}
