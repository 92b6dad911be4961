//! Board variants and their clocks.
//!
//! The variant is read from the board-version word at boot and never changes
//! afterwards. It decides clock rates and several per-field limits.
//!
//! ```text
//! board version   family (& 0x0F00)   sub-type (& 0x0FF0)
//! 0x0700          Pixie-4
//! 0x0A00          Pixie-500e
//! 0x0B10          Pixie-4e            16 bit, 125 MSPS
//! 0x0B20          Pixie-4e            14 bit, 500 MSPS
//! ```

/// Board-version family and sub-type codes.
pub mod module_type {
    /// Pixie-4 family.
    pub const P4: u16 = 0x0700;
    /// Pixie-500e family.
    pub const P500E: u16 = 0x0A00;
    /// Pixie-4e family.
    pub const P4E: u16 = 0x0B00;
    /// Pixie-4e, 16 bit 125 MSPS sub-type.
    pub const P4E_16_125: u16 = 0x0B10;
    /// Pixie-4e, 14 bit 500 MSPS sub-type.
    pub const P4E_14_500: u16 = 0x0B20;

    /// Mask selecting the family.
    pub const FAMILY_MASK: u16 = 0x0F00;
    /// Mask selecting the sub-type.
    pub const SUBTYPE_MASK: u16 = 0x0FF0;
}

/// Clock rates of one board variant, in MHz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSet {
    /// System (FPGA fabric) clock.
    pub system_mhz: f64,
    /// Energy/trigger filter clock.
    pub filter_mhz: f64,
    /// ADC sampling clock.
    pub adc_mhz: f64,
    /// DSP run-timer clock.
    pub dsp_mhz: f64,
    /// Filter clock ticks per live-time counter tick.
    pub count_time_scale: f64,
}

/// How untriggered-trace sampling intervals are quantized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XdtQuantization {
    /// Power-of-two multiples of 5 DSP cycles, with hardware averaging.
    PowerOfTwo,
    /// Steps of 5 DSP cycles above 13, rounded in the direction of change.
    Incremental,
}

/// Board variant discovered at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardVariant {
    /// Pixie-4: 4 channels, 14 bit, 75 MSPS.
    Pixie4,
    /// Pixie-500e: 4 channels, 12 bit, 500 MSPS.
    Pixie500e,
    /// Pixie-4e: 4 channels, 16 bit, 125 MSPS.
    Pixie4e16x125,
    /// Pixie-4e: 4 channels, 14 bit, 500 MSPS.
    Pixie4e14x500,
    /// Unrecognized board-version word.
    Unknown(u16),
}

impl BoardVariant {
    /// Every recognized variant.
    pub const ALL: [Self; 4] = [
        Self::Pixie4,
        Self::Pixie500e,
        Self::Pixie4e16x125,
        Self::Pixie4e14x500,
    ];

    /// Classify a board-version word.
    #[must_use]
    pub const fn from_board_version(version: u16) -> Self {
        match version & module_type::SUBTYPE_MASK {
            module_type::P4E_16_125 => Self::Pixie4e16x125,
            module_type::P4E_14_500 => Self::Pixie4e14x500,
            _ => match version & module_type::FAMILY_MASK {
                module_type::P4 => Self::Pixie4,
                module_type::P500E => Self::Pixie500e,
                _ => Self::Unknown(version),
            },
        }
    }

    /// Board-version word reported by this variant.
    #[must_use]
    pub const fn board_version(&self) -> u16 {
        match self {
            Self::Pixie4 => module_type::P4,
            Self::Pixie500e => module_type::P500E,
            Self::Pixie4e16x125 => module_type::P4E_16_125,
            Self::Pixie4e14x500 => module_type::P4E_14_500,
            Self::Unknown(v) => *v,
        }
    }

    /// Short lowercase name used in configuration files.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Pixie4 => "pixie4",
            Self::Pixie500e => "pixie500e",
            Self::Pixie4e16x125 => "pixie4e-16-125",
            Self::Pixie4e14x500 => "pixie4e-14-500",
            Self::Unknown(_) => "unknown",
        }
    }

    /// Parse a configuration name, see [`name`](Self::name).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.name() == name)
    }

    /// Whether this is a PCIe-generation (4e or 500e) board.
    #[must_use]
    pub const fn is_express(&self) -> bool {
        matches!(self, Self::Pixie500e | Self::Pixie4e16x125 | Self::Pixie4e14x500)
    }

    /// Clock rates.
    #[must_use]
    pub const fn clocks(&self) -> ClockSet {
        match self {
            Self::Pixie4 | Self::Unknown(_) => ClockSet {
                system_mhz: 75.0,
                filter_mhz: 75.0,
                adc_mhz: 75.0,
                dsp_mhz: 50.0,
                count_time_scale: 16.0,
            },
            Self::Pixie500e | Self::Pixie4e14x500 => ClockSet {
                system_mhz: 125.0,
                filter_mhz: 125.0,
                adc_mhz: 500.0,
                dsp_mhz: 100.0,
                count_time_scale: 1.0,
            },
            Self::Pixie4e16x125 => ClockSet {
                system_mhz: 125.0,
                filter_mhz: 125.0,
                adc_mhz: 125.0,
                dsp_mhz: 100.0,
                count_time_scale: 1.0,
            },
        }
    }

    /// ADC resolution in bits.
    #[must_use]
    pub const fn adc_bits(&self) -> u16 {
        match self {
            Self::Pixie500e => 12,
            Self::Pixie4e16x125 => 16,
            Self::Pixie4 | Self::Pixie4e14x500 | Self::Unknown(_) => 14,
        }
    }

    /// Trace FIFO length in samples, as the DSP reports it at boot.
    #[must_use]
    pub const fn fifo_length(&self) -> u16 {
        match self {
            Self::Pixie4 | Self::Unknown(_) => 1024,
            Self::Pixie500e | Self::Pixie4e16x125 | Self::Pixie4e14x500 => 8192,
        }
    }

    /// Largest raw GFLT gate delay.
    #[must_use]
    pub const fn gate_delay_max_raw(&self) -> u16 {
        match self {
            Self::Pixie500e => 126,
            Self::Pixie4e16x125 | Self::Pixie4e14x500 => 510,
            Self::Pixie4 | Self::Unknown(_) => 254,
        }
    }

    /// Legal raw coincidence window, in system clock cycles.
    #[must_use]
    pub const fn coinc_wait_range(&self) -> (u16, u16) {
        if self.is_express() {
            (5, 511)
        } else {
            (1, 65531)
        }
    }

    /// Coincidence delay step in ns, or `None` if the variant has no
    /// adjustable coincidence delay.
    #[must_use]
    pub fn coinc_delay_step_ns(&self) -> Option<f64> {
        let clocks = self.clocks();
        match self {
            Self::Pixie4 => Some(1000.0 / clocks.system_mhz),
            Self::Pixie4e16x125 => Some(1000.0 / clocks.adc_mhz),
            Self::Pixie4e14x500 => Some(4000.0 / clocks.adc_mhz),
            Self::Pixie500e | Self::Unknown(_) => None,
        }
    }

    /// Largest raw coincidence delay.
    #[must_use]
    pub const fn coinc_delay_max_raw(&self) -> u16 {
        match self {
            Self::Pixie4 => 65533,
            Self::Pixie4e16x125 | Self::Pixie4e14x500 => 253,
            Self::Pixie500e | Self::Unknown(_) => 0,
        }
    }

    /// Largest raw trace delay for a channel whose trace length is
    /// `trace_length` samples.
    #[must_use]
    pub const fn trace_delay_max_raw(&self, trace_length: u16) -> u16 {
        match self {
            Self::Pixie4 => trace_length,
            Self::Pixie500e => 2000,
            Self::Pixie4e16x125 | Self::Pixie4e14x500 | Self::Unknown(_) => u16::MAX,
        }
    }

    /// XDT quantization scheme.
    #[must_use]
    pub const fn xdt_quantization(&self) -> XdtQuantization {
        if self.is_express() {
            XdtQuantization::PowerOfTwo
        } else {
            XdtQuantization::Incremental
        }
    }
}

impl core::fmt::Display for BoardVariant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Pixie4 => write!(f, "Pixie-4"),
            Self::Pixie500e => write!(f, "Pixie-500e"),
            Self::Pixie4e16x125 => write!(f, "Pixie-4e 16/125"),
            Self::Pixie4e14x500 => write!(f, "Pixie-4e 14/500"),
            Self::Unknown(v) => write!(f, "unknown board {v:#06x}"),
        }
    }
}
