//! Unit conversion between engineering values and DSP words
//!
//! Scalar conversions work in two steps:
//!
//! ```text
//! engineering ──to_raw──▶ logical raw (i64) ──pack──▶ stored words
//! engineering ◀─from_raw── logical raw (i64) ◀─unpack── stored words
//! ```
//!
//! The clamper limits the logical raw value, so `pack` never saturates: a
//! raw value that does not fit the storage width is a descriptor
//! inconsistency and is reported as such. Conversions that need more than
//! one integer (fraction pairs, gain settings, XDT) encode and decode whole
//! word groups directly.
//!
//! All rounding is half away from zero ([`round_off`]).

use crate::value::EngineeringValue;
use pixie_regs::analog::{self, DIGITAL_TRIM_LIMIT};
use pixie_regs::dsp::{self, chan};
use pixie_regs::{BoardVariant, ClockSet, XdtQuantization};

/// Round half away from zero
#[must_use]
pub fn round_off(x: f64) -> i64 {
    x.round() as i64
}

/// Clock selector for tick-based scales
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    /// System clock
    System,
    /// Filter clock
    Filter,
    /// ADC clock
    Adc,
    /// DSP clock
    Dsp,
}

impl Clock {
    fn mhz(self, clocks: &ClockSet) -> f64 {
        match self {
            Self::System => clocks.system_mhz,
            Self::Filter => clocks.filter_mhz,
            Self::Adc => clocks.adc_mhz,
            Self::Dsp => clocks.dsp_mhz,
        }
    }
}

/// Engineering units per raw unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scale {
    /// 1
    Unity,
    /// Fixed factor
    Const(f64),
    /// One cycle of `clock`, in µs
    Micros(Clock),
    /// One cycle of `clock`, in ns
    Nanos(Clock),
    /// One cycle of `clock`, in s
    Seconds(Clock),
    /// One decimated filter cycle (2^FILTER_RANGE / filter clock), in µs
    FilterInterval,
    /// One live-time counter tick, in s
    CountTime,
    /// Reciprocal of the channel's trigger filter length
    PerFastLength,
    /// Coincidence delay step of the variant, in ns (0 if not adjustable)
    CoincDelayStep,
    /// Instantaneous rate estimate, counts/s per raw unit
    IcrRate,
}

impl Scale {
    /// Resolve the factor for one unit/channel
    #[must_use]
    pub fn factor(&self, ctx: &ConvertContext<'_>) -> f64 {
        let c = &ctx.clocks;
        match self {
            Self::Unity => 1.0,
            Self::Const(f) => *f,
            Self::Micros(clock) => 1.0 / clock.mhz(c),
            Self::Nanos(clock) => 1000.0 / clock.mhz(c),
            Self::Seconds(clock) => 1.0e-6 / clock.mhz(c),
            Self::FilterInterval => f64::from(1u32 << ctx.filter_range().min(15)) / c.filter_mhz,
            Self::CountTime => c.count_time_scale * 1.0e-6 / c.filter_mhz,
            Self::PerFastLength => match ctx.channel_word(chan::FASTLENGTH) {
                0 => 0.0,
                fl => 1.0 / f64::from(fl),
            },
            Self::CoincDelayStep => ctx.variant.coinc_delay_step_ns().unwrap_or(0.0),
            Self::IcrRate => c.filter_mhz / (65536.0 * 32.0 * 1.0e-6),
        }
    }
}

/// Per-unit view used by conversions and limits
///
/// Holds the unit's variant and clocks plus a borrow of its raw image so
/// that conversions depending on other words (trigger threshold
/// normalization, PSA window start, filter range) can read them.
#[derive(Debug, Clone, Copy)]
pub struct ConvertContext<'a> {
    /// Board variant of the unit
    pub variant: BoardVariant,
    /// Clock set of the variant
    pub clocks: ClockSet,
    /// Raw DSP word image of the unit (empty for system scope)
    pub image: &'a [u16],
    /// Channel for channel-scoped fields
    pub channel: Option<usize>,
    /// Coincidence-wait compensation active (`KEEP_CW`)
    pub keep_coinc_wait: bool,
    /// Largest unit index + 1 the topology can hold
    pub max_units: usize,
}

impl<'a> ConvertContext<'a> {
    /// Context for one unit
    #[must_use]
    pub fn new(variant: BoardVariant, image: &'a [u16]) -> Self {
        Self {
            variant,
            clocks: variant.clocks(),
            image,
            channel: None,
            keep_coinc_wait: false,
            max_units: dsp::PRESET_MAX_MODULES,
        }
    }

    /// Same context, addressing one channel
    #[must_use]
    pub fn with_channel(mut self, channel: Option<usize>) -> Self {
        self.channel = channel;
        self
    }

    /// Same context with coincidence-wait compensation set
    #[must_use]
    pub fn with_keep_coinc_wait(mut self, keep: bool) -> Self {
        self.keep_coinc_wait = keep;
        self
    }

    /// Same context with a different unit capacity
    #[must_use]
    pub fn with_max_units(mut self, max_units: usize) -> Self {
        self.max_units = max_units;
        self
    }

    /// Raw word at an absolute address (0 outside the image)
    #[must_use]
    pub fn word(&self, address: usize) -> u16 {
        self.image.get(address).copied().unwrap_or(0)
    }

    /// Words of a span (zero-filled outside the image)
    #[must_use]
    pub fn words(&self, address: usize, count: usize) -> Vec<u16> {
        (address..address + count).map(|a| self.word(a)).collect()
    }

    /// Word of the current channel's input block
    #[must_use]
    pub fn channel_word(&self, offset: usize) -> u16 {
        self.channel
            .map_or(0, |ch| self.word(dsp::channel_input(ch, offset)))
    }

    /// Word of another channel's input block
    #[must_use]
    pub fn channel_word_of(&self, channel: usize, offset: usize) -> u16 {
        self.word(dsp::channel_input(channel, offset))
    }

    /// Energy filter decimation (log2)
    #[must_use]
    pub fn filter_range(&self) -> u16 {
        self.word(dsp::FILTERRANGE)
    }
}

/// Conversion rule of a descriptor
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Conversion {
    /// Raw integer equals the value
    Identity,
    /// raw = round(value / scale)
    Linear(Scale),
    /// Two's-complement 16-bit, raw = round(value / scale)
    Signed16(Scale),
    /// Multi-word unsigned counter, most significant word first (read-only)
    Counter(Scale),
    /// Sub-field of one register word
    Bits {
        /// Position of the lowest bit
        shift: u8,
        /// Number of bits
        width: u8,
    },
    /// Stored as 65536 - value; values below 1 store 0
    Complement,
    /// Offset DAC: raw = (1 - value / full_scale) * 32768
    Offset {
        /// Volts at raw 0
        full_scale: f64,
    },
    /// End position stored as a length after the start word at `base`
    Relative {
        /// Channel-block offset of the start word
        base: usize,
        /// Scale of start and end
        scale: Scale,
    },
    /// Integer word followed by a 1/65536 fraction word
    Fraction,
    /// SGA setting followed by a signed digital trim
    Gain,
    /// Untriggered-trace interval and averaging (`XWAIT`, `XAVG`)
    Xdt,
    /// Word array, one value per word
    Words,
}

impl Conversion {
    /// Whether the conversion works through a single logical raw integer
    #[must_use]
    pub const fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Identity
                | Self::Linear(_)
                | Self::Signed16(_)
                | Self::Counter(_)
                | Self::Bits { .. }
                | Self::Complement
                | Self::Offset { .. }
                | Self::Relative { .. }
        )
    }

    /// Scale of a linear conversion, if any
    #[must_use]
    pub const fn scale(&self) -> Option<Scale> {
        match self {
            Self::Linear(s) | Self::Signed16(s) | Self::Counter(s) | Self::Relative { scale: s, .. } => {
                Some(*s)
            }
            _ => None,
        }
    }

    /// Smallest and largest logical raw value that fits `words` words
    #[must_use]
    pub fn raw_bounds(&self, words: usize) -> (i64, i64) {
        match self {
            Self::Signed16(_) => (i64::from(i16::MIN), i64::from(i16::MAX)),
            Self::Bits { width, .. } => (0, (1i64 << width) - 1),
            Self::Counter(_) => (0, (1i64 << (16 * words.min(3))) - 1),
            _ => (0, i64::from(u16::MAX)),
        }
    }

    /// Engineering value to logical raw
    #[must_use]
    pub fn to_raw(&self, value: f64, ctx: &ConvertContext<'_>) -> i64 {
        match self {
            Self::Identity | Self::Bits { .. } | Self::Complement => round_off(value),
            Self::Linear(s) | Self::Signed16(s) | Self::Counter(s) | Self::Relative { scale: s, .. } => {
                match s.factor(ctx) {
                    f if f == 0.0 => 0,
                    f => round_off(value / f),
                }
            }
            Self::Offset { full_scale } => round_off((1.0 - value / full_scale) * 32768.0),
            Self::Fraction | Self::Gain | Self::Xdt | Self::Words => round_off(value),
        }
    }

    /// Logical raw to engineering value
    #[must_use]
    pub fn from_raw(&self, raw: i64, ctx: &ConvertContext<'_>) -> f64 {
        match self {
            Self::Linear(s) | Self::Signed16(s) | Self::Counter(s) | Self::Relative { scale: s, .. } => {
                raw as f64 * s.factor(ctx)
            }
            Self::Offset { full_scale } => (32768.0 - raw as f64) / 32768.0 * full_scale,
            _ => raw as f64,
        }
    }

    /// Stored words to logical raw
    #[must_use]
    pub fn unpack(&self, words: &[u16], ctx: &ConvertContext<'_>) -> i64 {
        let first = words.first().copied().unwrap_or(0);
        match self {
            Self::Signed16(_) => i64::from(first as i16),
            Self::Counter(_) => combine_words(words) as i64,
            Self::Bits { shift, width } => i64::from((first >> shift) & bit_mask(*width)),
            Self::Complement => match first {
                0 => 0,
                w => 65536 - i64::from(w),
            },
            Self::Relative { base, .. } => i64::from(first) + i64::from(ctx.channel_word(*base)),
            _ => i64::from(first),
        }
    }

    /// Logical raw to stored words
    ///
    /// `current` holds the words presently stored, needed for bit-field
    /// merges.
    ///
    /// # Errors
    ///
    /// Returns a reason string if the raw value does not fit the storage.
    pub fn pack(
        &self,
        raw: i64,
        current: &[u16],
        ctx: &ConvertContext<'_>,
    ) -> std::result::Result<Vec<u16>, String> {
        let (lo, hi) = self.raw_bounds(current.len());
        if raw < lo || raw > hi {
            return Err(format!("raw value {raw} outside [{lo}, {hi}]"));
        }
        let first = current.first().copied().unwrap_or(0);
        let words = match self {
            Self::Signed16(_) => vec![(raw as i16) as u16],
            Self::Counter(_) => split_counter(raw as u64, current.len()),
            Self::Bits { shift, width } => {
                let mask = bit_mask(*width) << shift;
                vec![(first & !mask) | (((raw as u16) << shift) & mask)]
            }
            Self::Complement => match raw {
                0 => vec![0],
                r => vec![(65536 - r) as u16],
            },
            Self::Relative { base, .. } => {
                let start = i64::from(ctx.channel_word(*base));
                if raw < start {
                    return Err(format!("end {raw} before start {start}"));
                }
                vec![(raw - start) as u16]
            }
            _ => vec![raw as u16],
        };
        Ok(words)
    }

    /// Encode an engineering value into stored words
    ///
    /// # Errors
    ///
    /// Returns a reason string if the value does not fit the storage or has
    /// the wrong shape.
    pub fn encode(
        &self,
        value: &EngineeringValue,
        current: &[u16],
        ctx: &ConvertContext<'_>,
    ) -> std::result::Result<Vec<u16>, String> {
        if let Self::Words = self {
            let words = value
                .as_words()
                .ok_or_else(|| format!("expected word array, got {}", value.shape()))?;
            if words.len() != current.len() {
                return Err(format!("expected {} words, got {}", current.len(), words.len()));
            }
            return words
                .iter()
                .map(|&w| match round_off(w) {
                    r @ 0..=0xFFFF => Ok(r as u16),
                    r => Err(format!("word {r} outside [0, 65535]")),
                })
                .collect();
        }
        let v = value
            .as_scalar()
            .ok_or_else(|| format!("expected scalar, got {}", value.shape()))?;
        match self {
            Self::Fraction => encode_fraction(v),
            Self::Gain => Ok(encode_gain(v, ctx).to_vec()),
            Self::Xdt => Ok(encode_xdt(v, current, ctx).to_vec()),
            _ => self.pack(self.to_raw(v, ctx), current, ctx),
        }
    }

    /// Decode stored words into an engineering value
    #[must_use]
    pub fn decode(&self, words: &[u16], ctx: &ConvertContext<'_>) -> EngineeringValue {
        match self {
            Self::Words => EngineeringValue::Words(words.iter().map(|&w| f64::from(w)).collect()),
            Self::Fraction => EngineeringValue::Scalar(decode_fraction(words)),
            Self::Gain => EngineeringValue::Scalar(decode_gain(words, ctx)),
            Self::Xdt => EngineeringValue::Scalar(decode_xdt(words, ctx)),
            _ => EngineeringValue::Scalar(self.from_raw(self.unpack(words, ctx), ctx)),
        }
    }
}

fn bit_mask(width: u8) -> u16 {
    if width >= 16 {
        u16::MAX
    } else {
        (1u16 << width) - 1
    }
}

/// Combine counter words, most significant first
#[must_use]
pub fn combine_words(words: &[u16]) -> u64 {
    words.iter().fold(0u64, |acc, &w| (acc << 16) | u64::from(w))
}

/// Split a counter into `count` words, most significant first
#[must_use]
pub fn split_counter(value: u64, count: usize) -> Vec<u16> {
    (0..count)
        .rev()
        .map(|i| ((value >> (16 * i)) & 0xFFFF) as u16)
        .collect()
}

fn encode_fraction(v: f64) -> std::result::Result<Vec<u16>, String> {
    if !(0.0..65536.0).contains(&v) {
        return Err(format!("{v} outside [0, 65536)"));
    }
    let whole = v.floor();
    let frac = round_off((v - whole) * 65536.0).min(65535);
    Ok(vec![whole as u16, frac as u16])
}

fn decode_fraction(words: &[u16]) -> f64 {
    let whole = f64::from(words.first().copied().unwrap_or(0));
    let frac = f64::from(words.get(1).copied().unwrap_or(0));
    whole + frac / 65536.0
}

/// SGA setting and digital trim for a requested gain in V/V
#[must_use]
pub fn encode_gain(v: f64, ctx: &ConvertContext<'_>) -> [u16; 2] {
    let (sga, analog) = analog::select_gain(ctx.variant, v);
    let trim = (v / analog - 1.0).clamp(-DIGITAL_TRIM_LIMIT, DIGITAL_TRIM_LIMIT);
    let dig = round_off(trim * 65536.0) as i16;
    [sga, dig as u16]
}

fn decode_gain(words: &[u16], ctx: &ConvertContext<'_>) -> f64 {
    let sga = words.first().copied().unwrap_or(0);
    let dig = words.get(1).copied().unwrap_or(0) as i16;
    (1.0 + f64::from(dig) / 65536.0) * analog::analog_gain(ctx.variant, sga)
}

/// `XWAIT` and `XAVG` words for a requested interval in µs
///
/// `current` holds the stored `XWAIT`/`XAVG` pair; the incremental scheme
/// rounds towards the direction of change.
#[must_use]
pub fn encode_xdt(v: f64, current: &[u16], ctx: &ConvertContext<'_>) -> [u16; 2] {
    let dsp = ctx.clocks.dsp_mhz;
    let intdt = round_off(v * dsp);
    match ctx.variant.xdt_quantization() {
        XdtQuantization::PowerOfTwo => {
            let mut avg = 0u16;
            while avg < 13 && intdt >= 10 << avg {
                avg += 1;
            }
            [1 << avg, avg]
        }
        XdtQuantization::Incremental => {
            let last = decode_xdt(current, ctx);
            let xwait = match intdt {
                i if i <= 4 => 4,
                i @ 5..=13 => i,
                i if i <= 65533 => {
                    let steps = (i - 13) as f64 / 5.0;
                    let steps = if v > last { steps.ceil() } else { steps.floor() };
                    (13 + 5 * steps as i64).min(65533)
                }
                _ => 65533,
            };
            let xavg = match xwait {
                w if w <= 13 => 65535,
                65533 => 5,
                w => (65536.0 / ((w - 3) as f64 / 5.0)).floor() as u16,
            };
            [xwait as u16, xavg]
        }
    }
}

fn decode_xdt(words: &[u16], ctx: &ConvertContext<'_>) -> f64 {
    let xwait = f64::from(words.first().copied().unwrap_or(0));
    match ctx.variant.xdt_quantization() {
        XdtQuantization::PowerOfTwo => xwait * 5.0 / ctx.clocks.dsp_mhz,
        XdtQuantization::Incremental => xwait / ctx.clocks.dsp_mhz,
    }
}
