//! DSP parameter memory map.
//!
//! Every Pixie module exposes a flat block of `N_DSP_PAR` 16-bit words in DSP
//! data memory. The lower half (`0 .. DSP_IO_BORDER`) holds host-writable
//! input parameters; the upper half holds results and run statistics the DSP
//! writes back.
//!
//! ```text
//! 0x000 ┌──────────────────────────────┐
//!       │ module input words            │  MODNUM .. EXTRAIN
//! 0x040 ├──────────────────────────────┤
//!       │ channel 0 input block (48)    │  CHANNEL_INPUT_BASE + ch * 48
//!       │ channel 1 input block         │
//!       │ channel 2 input block         │
//!       │ channel 3 input block         │
//! 0x100 ├──────────────────────────────┤  DSP_IO_BORDER
//!       │ release / build / FiPPI id    │
//! 0x103 │ module run statistics (25)    │  MODULE_STATISTICS
//!       │ boot words, USEROUT           │
//! 0x141 │ channel 0 statistics (32)     │  CHANNEL_STATISTICS
//!       │ ...                           │
//! 0x1FF └──────────────────────────────┘
//! ```
//!
//! Multi-word counters are stored most significant word first
//! (high, mid, low).

use core::ops::Range;

/// Total number of DSP parameter words per module.
pub const N_DSP_PAR: usize = 512;

/// First output (DSP-written) word.
pub const DSP_IO_BORDER: usize = 256;

/// Input channels per module.
pub const NUMBER_OF_CHANNELS: usize = 4;

/// Maximum number of modules a single crate system can address.
pub const PRESET_MAX_MODULES: usize = 17;

// ── Module input words ───────────────────────────────────────────────────────

/// Module number as assigned at boot.
pub const MODNUM: usize = 0x00;
/// Module control/status register A.
pub const MODCSRA: usize = 0x01;
/// Module control/status register B.
pub const MODCSRB: usize = 0x02;
/// Module control/status register C.
pub const MODCSRC: usize = 0x03;
/// List-mode/MCA run task selector.
pub const RUNTASK: usize = 0x04;
/// Host control word (`C_CONTROL`).
pub const CCONTROL: usize = 0x05;
/// Maximum events per list-mode buffer.
pub const MAXEVENTS: usize = 0x06;
/// Coincidence pattern mask.
pub const COINCPATTERN: usize = 0x07;
/// Coincidence window, in system clock cycles.
pub const COINCWAIT: usize = 0x08;
/// Wait for all modules before starting a run.
pub const SYNCHWAIT: usize = 0x09;
/// Clear timers at run start.
pub const INSYNCH: usize = 0x0A;
/// Energy filter decimation (log2).
pub const FILTERRANGE: usize = 0x0B;
/// Module multiplicity pattern.
pub const MODULEPATTERN: usize = 0x0C;
/// Nearest-neighbor share pattern.
pub const NNSHAREPATTERN: usize = 0x0D;
/// Double-buffer control/status register.
pub const DBLBUFCSR: usize = 0x0E;
/// External trigger delay, in system clock cycles.
pub const XETDELAY: usize = 0x0F;
/// Pulse-shape masks A, B and C.
pub const PDMMASKA: usize = 0x10;
/// See [`PDMMASKA`].
pub const PDMMASKB: usize = 0x11;
/// See [`PDMMASKA`].
pub const PDMMASKC: usize = 0x12;
/// Trace FIFO length in samples, set by the DSP at boot.
pub const FIFOLENGTH: usize = 0x13;
/// Run-statistics clear strobe.
pub const STATCLEAR: usize = 0x14;
/// User input words.
pub const USERIN: usize = 0x20;
/// Number of user input words.
pub const USERIN_LEN: usize = 16;
/// Spare module input words.
pub const EXTRAIN: usize = 0x30;
/// Number of spare module input words.
pub const EXTRAIN_LEN: usize = 8;

// ── Channel input block ──────────────────────────────────────────────────────

/// First word of channel 0's input block.
pub const CHANNEL_INPUT_BASE: usize = 0x40;

/// Words between consecutive channel input blocks.
pub const CHANNEL_INPUT_STRIDE: usize = 48;

/// Offsets inside one channel input block.
pub mod chan {
    /// Channel control/status register A.
    pub const CHANCSRA: usize = 0;
    /// Channel control/status register B.
    pub const CHANCSRB: usize = 1;
    /// Channel control/status register C.
    pub const CHANCSRC: usize = 2;
    /// Switched gain amplifier setting. Followed by [`DIGGAIN`].
    pub const SGA: usize = 3;
    /// Digital gain trim, signed 1/65536 steps.
    pub const DIGGAIN: usize = 4;
    /// Offset DAC value.
    pub const TRACKDAC: usize = 5;
    /// Trigger filter length.
    pub const FASTLENGTH: usize = 6;
    /// Trigger filter gap.
    pub const FASTGAP: usize = 7;
    /// Trigger threshold, scaled by [`FASTLENGTH`].
    pub const FASTTHRESH: usize = 8;
    /// Energy filter length.
    pub const SLOWLENGTH: usize = 9;
    /// Energy filter gap.
    pub const SLOWGAP: usize = 10;
    /// Pile-up inspection window.
    pub const PEAKSEP: usize = 11;
    /// Preamp decay time, integer microseconds. Followed by [`PREAMPTAUB`].
    pub const PREAMPTAUA: usize = 12;
    /// Preamp decay time, fraction in 1/65536 µs.
    pub const PREAMPTAUB: usize = 13;
    /// Trace length in ADC samples.
    pub const TRACELENGTH: usize = 14;
    /// Trace pre-trigger delay in ADC samples.
    pub const USERDELAY: usize = 15;
    /// Pulse-shape window start. Followed by [`PSALENGTH`].
    pub const PSAOFFSET: usize = 16;
    /// Pulse-shape window length.
    pub const PSALENGTH: usize = 17;
    /// Sampling interval for untriggered traces. Followed by [`XAVG`].
    pub const XWAIT: usize = 18;
    /// Averaging factor for untriggered traces.
    pub const XAVG: usize = 19;
    /// Baseline position, percent of full scale.
    pub const BASELINEPERCENT: usize = 20;
    /// Energy binning, stored as 65536 - bins.
    pub const LOG2EBIN: usize = 21;
    /// Baseline averaging, log2, signed.
    pub const LOG2BWEIGHT: usize = 22;
    /// Baseline cut.
    pub const BLCUT: usize = 23;
    /// Energy filter integrator mode.
    pub const INTEGRATOR: usize = 24;
    /// GFLT gate window.
    pub const GATEWINDOW: usize = 25;
    /// GFLT gate delay.
    pub const GATEDELAY: usize = 26;
    /// Coincidence delay.
    pub const COINCDELAY: usize = 27;
    /// Reset delay following coincidence compensation.
    pub const RESETDELAY: usize = 28;
    /// Constant-fraction threshold.
    pub const CFDTHR: usize = 29;
    /// Fast constant-fraction threshold.
    pub const FCFDTH: usize = 30;
    /// QDC sum 0 length.
    pub const QDC0LENGTH: usize = 31;
    /// QDC sum 0 delay.
    pub const QDC0DELAY: usize = 32;
    /// QDC sum 1 length.
    pub const QDC1LENGTH: usize = 33;
    /// QDC sum 1 delay.
    pub const QDC1DELAY: usize = 34;
    /// Spare channel input words.
    pub const CHEXTRAIN: usize = 36;
    /// Number of spare channel input words.
    pub const CHEXTRAIN_LEN: usize = 8;
}

// ── Module output words ──────────────────────────────────────────────────────

/// DSP code release.
pub const DSPRELEASE: usize = DSP_IO_BORDER;
/// DSP code build.
pub const DSPBUILD: usize = DSP_IO_BORDER + 1;
/// FiPPI firmware identifier.
pub const FIPPIID: usize = DSP_IO_BORDER + 2;

/// Run time, 3 words of DSP clock ticks.
pub const RUNTIMEA: usize = DSP_IO_BORDER + 3;
/// Total time, 3 words of DSP clock ticks.
pub const TOTALTIMEA: usize = DSP_IO_BORDER + 6;
/// Number of events, 2 words.
pub const NUMEVENTSA: usize = DSP_IO_BORDER + 9;
/// Coincidence count time, 3 words of system clock ticks.
pub const CCOUNTTIMEA: usize = DSP_IO_BORDER + 11;
/// Coincidence dead time, 3 words of system clock ticks.
pub const CSFDTA: usize = DSP_IO_BORDER + 14;
/// Number of coincidence triggers, 2 words.
pub const NCOINCTRIGA: usize = DSP_IO_BORDER + 17;

/// System identifier word.
pub const SYSTEMID: usize = DSP_IO_BORDER + 28;
/// Board serial number.
pub const SERIALNUM: usize = DSP_IO_BORDER + 29;
/// User output words.
pub const USEROUT: usize = DSP_IO_BORDER + 32;
/// Number of user output words.
pub const USEROUT_LEN: usize = 16;

// ── Channel output words ─────────────────────────────────────────────────────

/// First word of channel 0's statistics block.
pub const CHANNEL_OUTPUT_BASE: usize = DSP_IO_BORDER + 65;

/// Words between consecutive channel statistics blocks.
pub const CHANNEL_OUTPUT_STRIDE: usize = 32;

/// Offsets inside one channel statistics block.
pub mod stat {
    /// Live time, 3 words of count-time ticks.
    pub const COUNTTIMEA: usize = 0;
    /// Fast peaks, 2 words.
    pub const FASTPEAKSA: usize = 3;
    /// Trigger filter dead time, 3 words of filter clock ticks.
    pub const FTDTA: usize = 5;
    /// Output events, 2 words.
    pub const NOUTA: usize = 8;
    /// Events passing pile-up inspection, 2 words.
    pub const NPPIA: usize = 10;
    /// Gate counts, 2 words.
    pub const GCOUNTA: usize = 12;
    /// Energy filter dead time, 3 words of count-time ticks.
    pub const SFDTA: usize = 14;
    /// Gate dead time, 3 words of count-time ticks.
    pub const GDTA: usize = 17;
    /// Instantaneous input count rate estimate.
    pub const ICR: usize = 20;
    /// Instantaneous out-of-range fraction.
    pub const OORF: usize = 21;
}

// ── Address ranges ───────────────────────────────────────────────────────────

/// Complete parameter block.
pub const FULL_BLOCK: Range<usize> = 0..N_DSP_PAR;

/// Module run statistics: the reduced range read for statistics-only queries.
pub const MODULE_STATISTICS: Range<usize> = DSP_IO_BORDER + 3..DSP_IO_BORDER + 28;

/// All channel statistics blocks.
pub const CHANNEL_STATISTICS: Range<usize> = CHANNEL_OUTPUT_BASE..N_DSP_PAR;

/// Address of a word in channel `ch`'s input block.
#[must_use]
pub const fn channel_input(ch: usize, offset: usize) -> usize {
    CHANNEL_INPUT_BASE + ch * CHANNEL_INPUT_STRIDE + offset
}

/// Address of a word in channel `ch`'s statistics block.
#[must_use]
pub const fn channel_output(ch: usize, offset: usize) -> usize {
    CHANNEL_OUTPUT_BASE + ch * CHANNEL_OUTPUT_STRIDE + offset
}

// ── List-mode buffer geometry ────────────────────────────────────────────────

/// Words in each list-mode buffer header.
pub const BUFFER_HEAD_LENGTH: usize = 6;
/// Words in each event header.
pub const EVENT_HEAD_LENGTH: usize = 3;
/// Longest channel header (run type 0x100/0x101).
pub const MAX_CHAN_HEAD_LENGTH: usize = 9;
/// Host I/O buffer length in words.
pub const IO_BUFFER_LENGTH: usize = 8192;
/// DSP event buffer length in words.
pub const EVENT_BUFFER_LENGTH: usize = 1024;
