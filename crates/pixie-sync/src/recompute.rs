//! Derived-value recomputation
//!
//! Pure functions of a unit's raw image. The engine calls
//! [`recompute_words`] for each dependent of a written field, in declaration
//! order, and [`derive`] whenever a storage-less field is read.

use crate::catalog::Catalog;
use crate::clamp::Clamper;
use crate::convert::{round_off, ConvertContext};
use crate::descriptor::{Derived, Recompute, RegisterDescriptor, Storage};
use crate::error::{Result, SyncError};
use crate::request::Direction;
use pixie_regs::csr::chancsra;
use pixie_regs::dsp::{self, chan};
use pixie_regs::task::run_type;

/// Pile-up inspection window (`PEAKSEP`) of the context's channel
#[must_use]
pub fn peak_separation(ctx: &ConvertContext<'_>) -> u16 {
    let sum = i64::from(ctx.channel_word(chan::SLOWLENGTH)) + i64::from(ctx.channel_word(chan::SLOWGAP));
    let sample = match ctx.filter_range() {
        0 => (sum - 7).max(6),
        1 => (sum - 4).max(6),
        2 => sum - 2,
        _ => sum - 1,
    }
    .max(0);
    let sep = if sample + 5 > 128 { sample + 1 } else { sample + 5 };
    sep.min(i64::from(u16::MAX)) as u16
}

fn is_good(ctx: &ConvertContext<'_>, channel: usize) -> bool {
    ctx.channel_word_of(channel, chan::CHANCSRA) & chancsra::GOOD != 0
}

fn peak_separation_cycles(ctx: &ConvertContext<'_>, channel: usize) -> i64 {
    i64::from(ctx.channel_word_of(channel, chan::PEAKSEP)) << ctx.filter_range().min(15)
}

/// Longest peak separation among good channels, in filter cycles (at least 1)
#[must_use]
pub fn min_coinc_wait_cycles(ctx: &ConvertContext<'_>) -> i64 {
    (0..dsp::NUMBER_OF_CHANNELS)
        .filter(|&ch| is_good(ctx, ch))
        .map(|ch| peak_separation_cycles(ctx, ch))
        .max()
        .unwrap_or(0)
        .max(1)
}

/// Shortest coincidence window covering every good channel, in ns
#[must_use]
pub fn min_coinc_wait_ns(ctx: &ConvertContext<'_>) -> f64 {
    min_coinc_wait_cycles(ctx) as f64 * 1000.0 / ctx.clocks.system_mhz
}

fn compensation_cycles(ctx: &ConvertContext<'_>) -> i64 {
    let ch = ctx.channel.unwrap_or(0);
    (min_coinc_wait_cycles(ctx) - peak_separation_cycles(ctx, ch)).max(0)
}

/// Coincidence delay aligning the context's channel to the longest one
#[must_use]
pub fn coinc_delay_compensation(ctx: &ConvertContext<'_>) -> u16 {
    let cycles = compensation_cycles(ctx) as f64;
    let raw = round_off(cycles / ctx.clocks.filter_mhz * ctx.clocks.system_mhz);
    raw.clamp(0, i64::from(ctx.variant.coinc_delay_max_raw())) as u16
}

/// Reset delay following the compensated coincidence delay
#[must_use]
pub fn reset_delay(ctx: &ConvertContext<'_>) -> u16 {
    (compensation_cycles(ctx) + 4).clamp(29, i64::from(u16::MAX)) as u16
}

/// Largest number of list-mode events per I/O buffer for the unit's run type
#[must_use]
pub fn max_events(ctx: &ConvertContext<'_>) -> i64 {
    let rt = ctx.word(dsp::RUNTASK);
    if rt >= run_type::FIRST_NON_LIST {
        return 0;
    }
    let Some(chl) = run_type::channel_header_length(rt) else {
        return 0;
    };
    let event_length = (0..dsp::NUMBER_OF_CHANNELS)
        .filter(|&ch| is_good(ctx, ch))
        .map(|ch| {
            let trace = if rt == run_type::LIST_FULL {
                usize::from(ctx.channel_word_of(ch, chan::TRACELENGTH))
            } else {
                0
            };
            chl + trace
        })
        .sum::<usize>()
        + dsp::EVENT_HEAD_LENGTH;
    let room = dsp::IO_BUFFER_LENGTH - dsp::BUFFER_HEAD_LENGTH;
    if event_length > room || event_length > dsp::EVENT_BUFFER_LENGTH {
        return 0;
    }
    (room / event_length).min(usize::from(u16::MAX)) as i64
}

/// New stored words for a dependent field, or `None` if the rule leaves
/// its words alone
///
/// # Errors
///
/// Returns error if re-clamping the field fails.
pub fn recompute_words(
    catalog: &Catalog,
    desc: &RegisterDescriptor,
    ctx: &ConvertContext<'_>,
) -> Result<Option<Vec<u16>>> {
    let words = match desc.recompute {
        Recompute::Refresh => None,
        Recompute::Reclamp => {
            let Some(span) = desc.span(ctx.channel) else {
                return Ok(None);
            };
            let current = ctx.words(span.start, span.len());
            let value = desc.conversion.decode(&current, ctx);
            let clamped = Clamper::new(catalog).clamp(desc, &value, ctx)?;
            let words = desc
                .conversion
                .encode(&clamped.value, &current, ctx)
                .map_err(|reason| SyncError::out_of_range(desc.name, desc.scope, Direction::Write, reason))?;
            Some(words)
        }
        Recompute::PeakSeparation => Some(vec![peak_separation(ctx)]),
        Recompute::MaxEvents => Some(vec![max_events(ctx) as u16]),
        Recompute::CoincDelay => ctx
            .keep_coinc_wait
            .then(|| vec![coinc_delay_compensation(ctx)]),
        Recompute::ResetDelay => ctx.keep_coinc_wait.then(|| vec![reset_delay(ctx)]),
    };
    Ok(words)
}

/// Value of a storage-less field
///
/// # Errors
///
/// Returns [`SyncError::OutOfRange`] if a rate's dead time exceeds its
/// elapsed time, or if a rate refers to a field that is not stored.
pub fn derive(
    catalog: &Catalog,
    desc: &RegisterDescriptor,
    derived: Derived,
    ctx: &ConvertContext<'_>,
) -> Result<f64> {
    let value = match derived {
        Derived::Constant(v) => v,
        Derived::MaxUnits => ctx.max_units as f64,
        Derived::BoardVersion => f64::from(ctx.variant.board_version()),
        Derived::AdcRate => ctx.clocks.adc_mhz,
        Derived::AdcBits => f64::from(ctx.variant.adc_bits()),
        Derived::MinCoincidenceWait => min_coinc_wait_ns(ctx),
        Derived::Rate { count, time, dead } => {
            let count = stored_value(catalog, desc, count, ctx)?;
            let mut live = stored_value(catalog, desc, time, ctx)?;
            if let Some(dead) = dead {
                live -= stored_value(catalog, desc, dead, ctx)?;
            }
            if live < 0.0 {
                return Err(SyncError::out_of_range(
                    desc.name,
                    desc.scope,
                    Direction::Read,
                    "dead time exceeds elapsed time",
                ));
            }
            if live == 0.0 {
                0.0
            } else {
                count / live
            }
        }
    };
    Ok(value)
}

fn stored_value(
    catalog: &Catalog,
    desc: &RegisterDescriptor,
    name: &str,
    ctx: &ConvertContext<'_>,
) -> Result<f64> {
    let sibling = catalog
        .get(desc.scope, name)
        .filter(|d| matches!(d.storage, Storage::Dsp { .. }))
        .ok_or_else(|| {
            SyncError::out_of_range(
                desc.name,
                desc.scope,
                Direction::Read,
                format!("rate input {name} is not a stored field"),
            )
        })?;
    let span = sibling.span(ctx.channel).unwrap_or(0..0);
    let words = ctx.words(span.start, span.len());
    Ok(sibling.conversion.decode(&words, ctx).as_scalar().unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixie_regs::BoardVariant;

    fn image() -> Vec<u16> {
        let mut img = vec![0u16; dsp::N_DSP_PAR];
        img[dsp::FILTERRANGE] = 1;
        img
    }

    fn set_chan(img: &mut [u16], ch: usize, offset: usize, v: u16) {
        img[dsp::channel_input(ch, offset)] = v;
    }

    #[test]
    fn peak_separation_by_filter_range() {
        let mut img = image();
        set_chan(&mut img, 0, chan::SLOWLENGTH, 20);
        set_chan(&mut img, 0, chan::SLOWGAP, 10);
        for (fr, expected) in [(0, 28), (1, 31), (2, 33), (3, 34)] {
            img[dsp::FILTERRANGE] = fr;
            let ctx = ConvertContext::new(BoardVariant::Pixie4, &img).with_channel(Some(0));
            assert_eq!(peak_separation(&ctx), expected, "filter range {fr}");
        }
    }

    #[test]
    fn long_filters_use_the_short_offset() {
        let mut img = image();
        img[dsp::FILTERRANGE] = 3;
        set_chan(&mut img, 1, chan::SLOWLENGTH, 100);
        set_chan(&mut img, 1, chan::SLOWGAP, 27);
        let ctx = ConvertContext::new(BoardVariant::Pixie4, &img).with_channel(Some(1));
        // sample 126 -> 131 would exceed 128
        assert_eq!(peak_separation(&ctx), 127);
    }

    #[test]
    fn min_coinc_wait_tracks_good_channels() {
        let mut img = image();
        set_chan(&mut img, 0, chan::CHANCSRA, chancsra::GOOD);
        set_chan(&mut img, 0, chan::PEAKSEP, 20);
        set_chan(&mut img, 1, chan::PEAKSEP, 90);
        let ctx = ConvertContext::new(BoardVariant::Pixie4, &img);
        assert_eq!(min_coinc_wait_cycles(&ctx), 40);
        assert!((min_coinc_wait_ns(&ctx) - 40.0 * 1000.0 / 75.0).abs() < 1e-9);

        set_chan(&mut img, 1, chan::CHANCSRA, chancsra::GOOD);
        let ctx = ConvertContext::new(BoardVariant::Pixie4, &img);
        assert_eq!(min_coinc_wait_cycles(&ctx), 180);
    }

    #[test]
    fn no_good_channels_gives_one_cycle() {
        let img = image();
        let ctx = ConvertContext::new(BoardVariant::Pixie4, &img);
        assert_eq!(min_coinc_wait_cycles(&ctx), 1);
    }

    #[test]
    fn compensation_aligns_shorter_channels() {
        let mut img = image();
        for ch in 0..2 {
            set_chan(&mut img, ch, chan::CHANCSRA, chancsra::GOOD);
        }
        set_chan(&mut img, 0, chan::PEAKSEP, 20);
        set_chan(&mut img, 1, chan::PEAKSEP, 30);
        let ctx = ConvertContext::new(BoardVariant::Pixie4, &img).with_channel(Some(0));
        assert_eq!(coinc_delay_compensation(&ctx), 20);
        assert_eq!(reset_delay(&ctx), 29);
        let ctx = ctx.with_channel(Some(1));
        assert_eq!(coinc_delay_compensation(&ctx), 0);
    }

    #[test]
    fn max_events_for_list_modes() {
        let mut img = image();
        for ch in 0..4 {
            set_chan(&mut img, ch, chan::CHANCSRA, chancsra::GOOD);
            set_chan(&mut img, ch, chan::TRACELENGTH, 100);
        }
        let room = dsp::IO_BUFFER_LENGTH - dsp::BUFFER_HEAD_LENGTH;
        for (rt, length) in [(0x100u16, 3 + 4 * 109), (0x101, 3 + 36), (0x102, 3 + 16), (0x103, 3 + 8)] {
            img[dsp::RUNTASK] = rt;
            let ctx = ConvertContext::new(BoardVariant::Pixie4, &img);
            assert_eq!(max_events(&ctx), (room / length) as i64, "run type {rt:#x}");
        }
        img[dsp::RUNTASK] = run_type::MCA;
        let ctx = ConvertContext::new(BoardVariant::Pixie4, &img);
        assert_eq!(max_events(&ctx), 0);
    }

    #[test]
    fn oversized_events_give_zero() {
        let mut img = image();
        img[dsp::RUNTASK] = run_type::LIST_FULL;
        set_chan(&mut img, 0, chan::CHANCSRA, chancsra::GOOD);
        set_chan(&mut img, 0, chan::TRACELENGTH, 4000);
        let ctx = ConvertContext::new(BoardVariant::Pixie4e16x125, &img);
        assert_eq!(max_events(&ctx), 0);
    }
}
