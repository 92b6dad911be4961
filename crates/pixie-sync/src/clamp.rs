//! Validator/clamper
//!
//! Limits are applied in the logical raw domain: the requested value is
//! converted to raw, limited, and converted back, so the effective value a
//! write echoes is always exactly representable. Every rule is idempotent:
//! clamping an already clamped value changes nothing.
//!
//! Clamping never mutates state. A co-constrained pair that has to be reset
//! reports the partner's new value in [`Clamped::partner`] and the engine
//! writes it.

use crate::catalog::Catalog;
use crate::convert::{round_off, ConvertContext};
use crate::descriptor::{RegisterDescriptor, Storage};
use crate::error::{Result, SyncError};
use crate::recompute;
use crate::request::Direction;
use crate::value::EngineeringValue;
use pixie_regs::csr::{ccontrol, chancsrb};
use pixie_regs::dsp::{self, chan};
use pixie_regs::task::run_type;
use tracing::debug;

/// Variant-dependent raw range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantBound {
    /// GFLT gate delay, [1, variant max]
    GateDelay,
    /// Coincidence window, variant range
    CoincWait,
}

/// Symmetric co-constrained pair: this field plus `partner` must not exceed
/// `limit` raw units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairRule {
    /// Partner field in the same scope
    pub partner: &'static str,
    /// Largest raw sum
    pub limit: i64,
    /// Smallest raw value of this field
    pub floor: i64,
    /// Smallest raw value of the partner
    pub partner_floor: i64,
    /// Raw value both fields reset to when no reduction fits
    pub default: i64,
}

/// Range computed from other words of the unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// [0, computed events per buffer]
    MaxEvents,
    /// Multiple of 32 samples within the trace FIFO
    TraceLength,
    /// Variant cap relative to the trace length
    TraceDelay,
    /// PSA window start within the trace
    PsaStart,
    /// PSA window end between its start and the trace end
    PsaEnd,
    /// Trigger threshold saturation near the 12-bit limit
    FastThreshold,
    /// Variant range, frozen while coincidence-wait compensation is on
    CoincDelay,
    /// Host control bits incompatible with the run type are cleared
    HostControl,
    /// Unsupported run types fall back to MCA
    RunType,
    /// Keep the low bits of another channel word
    LowBitsOf {
        /// Channel-block offset of the word owning the bits
        offset: usize,
        /// Bits taken from that word
        mask: u16,
        /// Largest raw value before merging
        max: i64,
    },
    /// Channel extra-input control pair
    ExtraIn,
    /// [1, unit capacity]
    UnitCount,
}

/// Valid range of a field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Limit {
    /// Storage width only
    Width,
    /// Raw range
    Raw {
        /// Smallest raw value
        min: i64,
        /// Largest raw value
        max: i64,
    },
    /// Engineering range, applied before conversion
    Engineering {
        /// Smallest value
        min: f64,
        /// Largest value
        max: f64,
    },
    /// Raw range decided by the board variant
    Variant(VariantBound),
    /// Co-constrained pair
    Pair(PairRule),
    /// Raw multiple of `step` within [min, max]
    Step {
        /// Quantum
        step: i64,
        /// Smallest raw value
        min: i64,
        /// Largest raw value
        max: i64,
    },
    /// Context-dependent rule
    Computed(Bound),
}

/// Partner value imposed by a pair reset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartnerReset {
    /// Partner field name
    pub name: &'static str,
    /// Partner's new engineering value
    pub value: f64,
}

/// Result of clamping a write
#[derive(Debug, Clone, PartialEq)]
pub struct Clamped {
    /// Effective engineering value
    pub value: EngineeringValue,
    /// Partner that must be written alongside
    pub partner: Option<PartnerReset>,
}

/// Applies descriptor limits to requested values
#[derive(Debug, Clone, Copy)]
pub struct Clamper<'c> {
    catalog: &'c Catalog,
}

impl<'c> Clamper<'c> {
    /// Clamper resolving pair partners in `catalog`
    #[must_use]
    pub const fn new(catalog: &'c Catalog) -> Self {
        Self { catalog }
    }

    /// Clamp a requested value for `desc`
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidPayload`] if the value's shape does not
    /// match the field, or [`SyncError::OutOfRange`] if the descriptor
    /// refers to a partner that does not exist.
    pub fn clamp(
        &self,
        desc: &RegisterDescriptor,
        value: &EngineeringValue,
        ctx: &ConvertContext<'_>,
    ) -> Result<Clamped> {
        let payload = |expected| SyncError::invalid_payload(desc.name, desc.scope, Direction::Write, expected);

        if desc.is_array() {
            let words = value.as_words().ok_or_else(|| payload("word array"))?;
            let len = match desc.storage {
                Storage::Host { len } => len,
                storage => storage.words(),
            };
            if words.len() != len {
                return Err(payload("word array of the field's length"));
            }
            let clamped = clamp_words(desc, words, ctx);
            return Ok(Clamped {
                value: EngineeringValue::Words(clamped),
                partner: None,
            });
        }

        let v = value.as_scalar().ok_or_else(|| payload("scalar"))?;
        if !v.is_finite() {
            return Err(payload("finite number"));
        }

        if !desc.conversion.is_scalar() {
            let v = match desc.limit {
                Limit::Engineering { min, max } => v.clamp(min, max),
                _ => v.clamp(0.0, 65535.0 + 65535.0 / 65536.0),
            };
            let current = self.current_words(desc, ctx);
            let words = desc
                .conversion
                .encode(&EngineeringValue::Scalar(v), &current, ctx)
                .map_err(|reason| SyncError::out_of_range(desc.name, desc.scope, Direction::Write, reason))?;
            let effective = desc.conversion.decode(&words, ctx);
            return Ok(Clamped {
                value: effective,
                partner: None,
            });
        }

        let v = match desc.limit {
            Limit::Engineering { min, max } => v.clamp(min, max),
            _ => v,
        };
        let conv = desc.conversion;
        let requested = conv.to_raw(v, ctx);
        let (raw, partner) = self.clamp_raw(desc, requested, ctx)?;
        let (lo, hi) = conv.raw_bounds(desc.storage.words().max(1));
        let raw = raw.clamp(lo, hi);
        if raw != requested {
            debug!("{} clamped: raw {} -> {}", desc.name, requested, raw);
        }
        Ok(Clamped {
            value: EngineeringValue::Scalar(conv.from_raw(raw, ctx)),
            partner,
        })
    }

    fn current_words(&self, desc: &RegisterDescriptor, ctx: &ConvertContext<'_>) -> Vec<u16> {
        desc.span(ctx.channel)
            .map(|span| ctx.words(span.start, span.len()))
            .unwrap_or_default()
    }

    fn current_raw(&self, desc: &RegisterDescriptor, ctx: &ConvertContext<'_>) -> i64 {
        desc.conversion.unpack(&self.current_words(desc, ctx), ctx)
    }

    fn clamp_raw(
        &self,
        desc: &RegisterDescriptor,
        raw: i64,
        ctx: &ConvertContext<'_>,
    ) -> Result<(i64, Option<PartnerReset>)> {
        let clamped = match desc.limit {
            Limit::Width | Limit::Engineering { .. } => raw,
            Limit::Raw { min, max } => raw.clamp(min, max),
            Limit::Variant(VariantBound::GateDelay) => {
                raw.clamp(1, i64::from(ctx.variant.gate_delay_max_raw()))
            }
            Limit::Variant(VariantBound::CoincWait) => {
                let (min, max) = ctx.variant.coinc_wait_range();
                raw.clamp(i64::from(min), i64::from(max))
            }
            Limit::Step { step, min, max } => {
                (round_off(raw as f64 / step as f64) * step).clamp(min, max)
            }
            Limit::Pair(rule) => return self.clamp_pair(desc, rule, raw, ctx),
            Limit::Computed(bound) => self.clamp_computed(desc, bound, raw, ctx),
        };
        Ok((clamped, None))
    }

    fn clamp_pair(
        &self,
        desc: &RegisterDescriptor,
        rule: PairRule,
        raw: i64,
        ctx: &ConvertContext<'_>,
    ) -> Result<(i64, Option<PartnerReset>)> {
        let partner = self.catalog.get(desc.scope, rule.partner).ok_or_else(|| {
            SyncError::out_of_range(
                desc.name,
                desc.scope,
                Direction::Write,
                format!("pair partner {} missing from catalog", rule.partner),
            )
        })?;
        let a = raw.max(rule.floor);
        let b = self.current_raw(partner, ctx);
        if a + b <= rule.limit {
            return Ok((a, None));
        }
        let a_now = self.current_raw(desc, ctx);
        let both_at_floor = a_now <= rule.floor && b <= rule.partner_floor;
        if !both_at_floor && b <= rule.limit - rule.floor {
            return Ok((rule.limit - b, None));
        }
        debug!(
            "{}/{} exceed {}: both reset to {}",
            desc.name, rule.partner, rule.limit, rule.default
        );
        let reset = PartnerReset {
            name: partner.name,
            value: partner.conversion.from_raw(rule.default, ctx),
        };
        Ok((rule.default, Some(reset)))
    }

    fn clamp_computed(
        &self,
        desc: &RegisterDescriptor,
        bound: Bound,
        raw: i64,
        ctx: &ConvertContext<'_>,
    ) -> i64 {
        match bound {
            Bound::MaxEvents => raw.clamp(0, recompute::max_events(ctx)),
            Bound::TraceLength => {
                let fifo = i64::from(ctx.word(dsp::FIFOLENGTH));
                let cap = ((fifo - 16).max(0) / 32) * 32;
                (round_off(raw as f64 / 32.0) * 32).clamp(0, cap)
            }
            Bound::TraceDelay => {
                let tl = ctx.channel_word(chan::TRACELENGTH);
                raw.clamp(0, i64::from(ctx.variant.trace_delay_max_raw(tl)))
            }
            Bound::PsaStart => raw.clamp(0, i64::from(ctx.channel_word(chan::TRACELENGTH))),
            Bound::PsaEnd => {
                let start = i64::from(ctx.channel_word(chan::PSAOFFSET));
                let end = i64::from(ctx.channel_word(chan::TRACELENGTH)).max(start);
                raw.clamp(start, end)
            }
            Bound::FastThreshold => {
                let fl = f64::from(ctx.channel_word(chan::FASTLENGTH));
                if raw >= 4095 {
                    round_off(4095.0 - 0.5 * fl)
                } else if raw < 2 {
                    0
                } else {
                    raw
                }
            }
            Bound::CoincDelay => {
                if ctx.keep_coinc_wait {
                    self.current_raw(desc, ctx)
                } else {
                    raw.clamp(0, i64::from(ctx.variant.coinc_delay_max_raw()))
                }
            }
            Bound::HostControl => i64::from(sanitize_host_control(
                raw.clamp(0, 0xFFFF) as u16,
                ctx.word(dsp::RUNTASK),
            )),
            Bound::RunType => {
                let rt = raw.clamp(0, 0xFFFF) as u16;
                if run_type::is_valid(rt) {
                    raw
                } else {
                    debug!("run type {:#x} unsupported, using {:#x}", rt, run_type::FALLBACK);
                    i64::from(run_type::FALLBACK)
                }
            }
            Bound::LowBitsOf { offset, mask, max } => {
                let low = ctx.channel_word(offset) & mask;
                let high = raw.clamp(0, max) & !i64::from(mask);
                high | i64::from(low)
            }
            Bound::UnitCount => raw.clamp(1, ctx.max_units as i64),
            Bound::ExtraIn => raw,
        }
    }
}

/// Clear host control bits that the run type does not allow
#[must_use]
pub fn sanitize_host_control(mut word: u16, run_task: u16) -> u16 {
    if run_task == run_type::HOST_EXTERNAL {
        word |= ccontrol::EXTERNAL_MEMORY;
        word &= !ccontrol::AUTO_PROCESS;
    }
    if run_task == run_type::HOST_PROCESSED {
        word &= !ccontrol::AUTO_PROCESS;
    }
    if word & ccontrol::POLL != 0 {
        word &= !ccontrol::AUTO_PROCESS;
    }
    word
}

fn clamp_words(desc: &RegisterDescriptor, words: &[f64], ctx: &ConvertContext<'_>) -> Vec<f64> {
    let mut raw: Vec<i64> = words
        .iter()
        .map(|&w| if w.is_finite() { round_off(w).clamp(0, 0xFFFF) } else { 0 })
        .collect();
    if desc.limit == Limit::Computed(Bound::ExtraIn)
        && ctx.channel_word(chan::CHANCSRB) & chancsrb::EXTRA_PAIR != 0
    {
        if let Some(w0) = raw.get_mut(0) {
            *w0 = (*w0).clamp(1, 63);
        }
        if let Some(w1) = raw.get_mut(1) {
            *w1 = (*w1).clamp(0, 7);
        }
    }
    raw.into_iter().map(|r| r as f64).collect()
}
