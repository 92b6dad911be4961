//! Channel-scope fields (channel input block and channel run statistics)

use crate::backend::TaskKind;
use crate::clamp::{Bound, Limit, PairRule, VariantBound};
use crate::convert::{Clock, Conversion, Scale};
use crate::descriptor::{DependentTarget, Derived, Recompute, RegisterDescriptor as D};
use crate::request::Scope;
use pixie_regs::analog::{GAIN_RANGE, V_OFFSET_MAX};
use pixie_regs::dsp::{chan, stat};

use Conversion::{Counter, Identity, Linear, Words};
use DependentTarget::{EveryChannel, Same, Unit};

const FILTER_MICROS: Conversion = Linear(Scale::Micros(Clock::Filter));
const ADC_MICROS: Conversion = Linear(Scale::Micros(Clock::Adc));
const FILTER_INTERVAL: Conversion = Linear(Scale::FilterInterval);

const ENERGY_SUM: i64 = 127;
const TRIGGER_SUM: i64 = 63;

fn energy_field(d: D) -> D {
    d.dependent("PEAK_SEPARATION", Same)
        .dependent("TRACE_DELAY", Same)
        .dependent("MIN_COINCIDENCE_WAIT", Unit)
        .dependent("COINC_DELAY", EveryChannel)
        .dependent("RESET_DELAY", EveryChannel)
        .apply(TaskKind::ProgramFippi)
}

fn csra_field(d: D) -> D {
    d.dependent("MIN_COINCIDENCE_WAIT", Unit)
        .apply(TaskKind::ProgramFippi)
}

fn run_stat(name: &'static str, offset: usize, words: usize, scale: Scale) -> D {
    D::channel_stat(name, offset, words, Counter(scale))
}

fn rate(name: &'static str, count: &'static str, dead: Option<&'static str>) -> D {
    D::derived(
        Scope::Channel,
        name,
        Derived::Rate {
            count,
            time: "COUNT_TIME",
            dead,
        },
    )
    .statistic()
}

pub(super) fn descriptors() -> Vec<D> {
    vec![
        // trigger filter
        D::channel("TRIGGER_RISETIME", chan::FASTLENGTH, FILTER_MICROS)
            .limit(Limit::Pair(PairRule {
                partner: "TRIGGER_FLATTOP",
                limit: TRIGGER_SUM,
                floor: 2,
                partner_floor: 0,
                default: 4,
            }))
            .dependent("TRIGGER_THRESHOLD", Same)
            .apply(TaskKind::ProgramFippi),
        D::channel("TRIGGER_FLATTOP", chan::FASTGAP, FILTER_MICROS)
            .limit(Limit::Pair(PairRule {
                partner: "TRIGGER_RISETIME",
                limit: TRIGGER_SUM,
                floor: 0,
                partner_floor: 2,
                default: 4,
            }))
            .apply(TaskKind::ProgramFippi),
        D::channel("TRIGGER_THRESHOLD", chan::FASTTHRESH, Linear(Scale::PerFastLength))
            .limit(Limit::Computed(Bound::FastThreshold))
            .apply(TaskKind::ProgramFippi),
        // energy filter
        energy_field(
            D::channel("ENERGY_RISETIME", chan::SLOWLENGTH, FILTER_INTERVAL).limit(Limit::Pair(
                PairRule {
                    partner: "ENERGY_FLATTOP",
                    limit: ENERGY_SUM,
                    floor: 3,
                    partner_floor: 3,
                    default: 8,
                },
            )),
        ),
        energy_field(
            D::channel("ENERGY_FLATTOP", chan::SLOWGAP, FILTER_INTERVAL).limit(Limit::Pair(
                PairRule {
                    partner: "ENERGY_RISETIME",
                    limit: ENERGY_SUM,
                    floor: 3,
                    partner_floor: 3,
                    default: 8,
                },
            )),
        ),
        D::channel("PEAK_SEPARATION", chan::PEAKSEP, Identity)
            .read_only()
            .recompute(Recompute::PeakSeparation),
        // analog front end
        D::channel("VGAIN", chan::SGA, Conversion::Gain)
            .words(2)
            .limit(Limit::Engineering {
                min: GAIN_RANGE.0,
                max: GAIN_RANGE.1,
            })
            .apply(TaskKind::SetDacs)
            .apply(TaskKind::ProgramFippi),
        D::channel(
            "VOFFSET",
            chan::TRACKDAC,
            Conversion::Offset {
                full_scale: V_OFFSET_MAX,
            },
        )
        .limit(Limit::Raw { min: 0, max: 65535 })
        .apply(TaskKind::SetDacs),
        D::channel("TAU", chan::PREAMPTAUA, Conversion::Fraction)
            .words(2)
            .limit(Limit::Engineering {
                min: 1.0 / 65536.0,
                max: 65535.0,
            }),
        // traces and pulse shape analysis
        D::channel("TRACE_LENGTH", chan::TRACELENGTH, ADC_MICROS)
            .limit(Limit::Computed(Bound::TraceLength))
            .dependent("TRACE_DELAY", Same)
            .dependent("PSA_START", Same)
            .dependent("PSA_END", Same)
            .apply(TaskKind::ProgramFippi),
        D::channel("TRACE_DELAY", chan::USERDELAY, ADC_MICROS)
            .limit(Limit::Computed(Bound::TraceDelay))
            .recompute(Recompute::Reclamp)
            .apply(TaskKind::ProgramFippi),
        D::channel("PSA_START", chan::PSAOFFSET, ADC_MICROS)
            .limit(Limit::Computed(Bound::PsaStart))
            .recompute(Recompute::Reclamp)
            .dependent("PSA_END", Same),
        D::channel(
            "PSA_END",
            chan::PSALENGTH,
            Conversion::Relative {
                base: chan::PSAOFFSET,
                scale: Scale::Micros(Clock::Adc),
            },
        )
        .limit(Limit::Computed(Bound::PsaEnd))
        .recompute(Recompute::Reclamp),
        D::channel("XDT", chan::XWAIT, Conversion::Xdt).words(2),
        D::channel("BASELINE_PERCENT", chan::BASELINEPERCENT, Identity)
            .limit(Limit::Raw { min: 0, max: 100 }),
        // control registers
        csra_field(D::channel("CHANNEL_CSRA", chan::CHANCSRA, Identity)),
        csra_field(D::channel(
            "CHANNEL_GOOD",
            chan::CHANCSRA,
            Conversion::Bits { shift: 2, width: 1 },
        )),
        csra_field(D::channel(
            "CHANNEL_POLARITY",
            chan::CHANCSRA,
            Conversion::Bits { shift: 5, width: 1 },
        )),
        D::channel("CHANNEL_CSRB", chan::CHANCSRB, Identity)
            .dependent("CH_EXTRA_IN", Same)
            .apply(TaskKind::ProgramFippi),
        D::channel("CHANNEL_CSRC", chan::CHANCSRC, Identity).apply(TaskKind::ProgramFippi),
        // constant fraction discriminators, percent of pulse height
        D::channel("CFD_THRESHOLD", chan::CFDTHR, Linear(Scale::Const(100.0 / 65536.0)))
            .limit(Limit::Engineering { min: 0.0, max: 99.0 })
            .apply(TaskKind::ProgramFippi),
        D::channel("FCFD_THRESHOLD", chan::FCFDTH, Identity).apply(TaskKind::ProgramFippi),
        // spectrum binning
        D::channel("BINFACTOR", chan::LOG2EBIN, Conversion::Complement)
            .limit(Limit::Raw { min: 0, max: 16 }),
        D::channel("INTEGRATOR", chan::INTEGRATOR, Identity)
            .limit(Limit::Raw { min: 0, max: 5 })
            .apply(TaskKind::ProgramFippi),
        D::channel("GATE_WINDOW", chan::GATEWINDOW, FILTER_MICROS)
            .limit(Limit::Raw { min: 1, max: 254 })
            .apply(TaskKind::ProgramFippi),
        D::channel("GATE_DELAY", chan::GATEDELAY, FILTER_MICROS)
            .limit(Limit::Variant(VariantBound::GateDelay))
            .apply(TaskKind::ProgramFippi),
        // charge integration windows
        D::channel("QDC0_LENGTH", chan::QDC0LENGTH, FILTER_MICROS)
            .limit(Limit::Step { step: 4, min: 4, max: 120 })
            .apply(TaskKind::ProgramFippi),
        D::channel("QDC1_LENGTH", chan::QDC1LENGTH, FILTER_MICROS)
            .limit(Limit::Step { step: 4, min: 4, max: 120 })
            .apply(TaskKind::ProgramFippi),
        D::channel("QDC0_DELAY", chan::QDC0DELAY, FILTER_MICROS)
            .limit(Limit::Raw { min: 0, max: 380 })
            .dependent("QDC1_DELAY", Same)
            .apply(TaskKind::ProgramFippi),
        D::channel("QDC1_DELAY", chan::QDC1DELAY, FILTER_MICROS)
            .limit(Limit::Computed(Bound::LowBitsOf {
                offset: chan::QDC0DELAY,
                mask: 0b11,
                max: 380,
            }))
            .recompute(Recompute::Reclamp)
            .apply(TaskKind::ProgramFippi),
        // baseline
        D::channel("BLCUT", chan::BLCUT, Identity).limit(Limit::Raw { min: 0, max: 32767 }),
        D::channel("BLAVG", chan::LOG2BWEIGHT, Conversion::Signed16(Scale::Const(-1.0)))
            .limit(Limit::Raw { min: -16, max: 0 }),
        // coincidence alignment
        D::channel("COINC_DELAY", chan::COINCDELAY, Linear(Scale::CoincDelayStep))
            .limit(Limit::Computed(Bound::CoincDelay))
            .recompute(Recompute::CoincDelay)
            .apply(TaskKind::ProgramFippi),
        D::channel("RESET_DELAY", chan::RESETDELAY, Identity)
            .read_only()
            .recompute(Recompute::ResetDelay),
        D::channel("CH_EXTRA_IN", chan::CHEXTRAIN, Words)
            .words(chan::CHEXTRAIN_LEN)
            .limit(Limit::Computed(Bound::ExtraIn))
            .recompute(Recompute::Reclamp),
        // run statistics
        run_stat("COUNT_TIME", stat::COUNTTIMEA, 3, Scale::CountTime),
        run_stat("FAST_PEAKS", stat::FASTPEAKSA, 2, Scale::Unity),
        run_stat("FTDT", stat::FTDTA, 3, Scale::Seconds(Clock::Filter)),
        run_stat("NOUT", stat::NOUTA, 2, Scale::Unity),
        run_stat("NPPI", stat::NPPIA, 2, Scale::Unity),
        run_stat("GATE_COUNTS", stat::GCOUNTA, 2, Scale::Unity),
        run_stat("SFDT", stat::SFDTA, 3, Scale::CountTime),
        run_stat("GDT", stat::GDTA, 3, Scale::CountTime),
        rate("OUTPUT_COUNT_RATE", "NOUT", None),
        rate("PASS_PILEUP_RATE", "NPPI", None),
        rate("INPUT_COUNT_RATE", "FAST_PEAKS", Some("FTDT")),
        rate("GATE_RATE", "GATE_COUNTS", None),
        run_stat("CURRENT_ICR", stat::ICR, 1, Scale::IcrRate),
        run_stat("CURRENT_OORF", stat::OORF, 1, Scale::Const(100.0 / 65536.0)),
    ]
}
