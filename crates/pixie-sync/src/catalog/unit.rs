//! Unit-scope fields (module words and module run statistics)

use crate::backend::TaskKind;
use crate::clamp::{Bound, Limit, VariantBound};
use crate::convert::{Clock, Conversion, Scale};
use crate::descriptor::{DependentTarget, Derived, Recompute, RegisterDescriptor as D};
use crate::request::Scope;
use pixie_regs::csr::{modcsra, modcsrb};
use pixie_regs::dsp;

use Conversion::{Counter, Identity, Linear, Words};
use DependentTarget::{EveryChannel, Same};

const FLAG: Limit = Limit::Raw { min: 0, max: 1 };

fn run_task_field(d: D) -> D {
    d.global()
        .dependent("MAX_EVENTS", Same)
        .dependent("C_CONTROL", Same)
}

pub(super) fn descriptors() -> Vec<D> {
    vec![
        D::module("MODULE_NUMBER", dsp::MODNUM, Identity).read_only(),
        D::module("MODULE_CSRA", dsp::MODCSRA, Identity)
            .shared_bits(modcsra::SHARED, modcsra::EXCLUSIVE)
            .apply(TaskKind::ProgramFippi),
        D::module("MODULE_CSRB", dsp::MODCSRB, Identity)
            .shared_bits(modcsrb::SHARED, 0)
            .apply(TaskKind::ProgramFippi),
        D::module("MODULE_CSRC", dsp::MODCSRC, Identity).apply(TaskKind::ProgramFippi),
        D::module("C_CONTROL", dsp::CCONTROL, Identity)
            .limit(Limit::Computed(Bound::HostControl))
            .recompute(Recompute::Reclamp)
            .global(),
        run_task_field(
            D::module("RUN_TYPE", dsp::RUNTASK, Identity).limit(Limit::Computed(Bound::RunType)),
        ),
        run_task_field(
            D::module("RUN_TASK_MODE", dsp::RUNTASK, Conversion::Bits { shift: 8, width: 4 })
                .limit(Limit::Raw { min: 0, max: 4 }),
        ),
        run_task_field(
            D::module("RUN_TASK_VARIANT", dsp::RUNTASK, Conversion::Bits { shift: 0, width: 4 })
                .limit(Limit::Raw { min: 0, max: 3 }),
        ),
        D::module("MAX_EVENTS", dsp::MAXEVENTS, Identity)
            .limit(Limit::Computed(Bound::MaxEvents))
            .recompute(Recompute::MaxEvents),
        D::module("COINCIDENCE_PATTERN", dsp::COINCPATTERN, Identity).apply(TaskKind::ProgramFippi),
        D::module("ACTUAL_COINCIDENCE_WAIT", dsp::COINCWAIT, Linear(Scale::Nanos(Clock::System)))
            .limit(Limit::Variant(VariantBound::CoincWait))
            .apply(TaskKind::ProgramFippi),
        D::derived(Scope::Unit, "MIN_COINCIDENCE_WAIT", Derived::MinCoincidenceWait),
        D::module("SYNCH_WAIT", dsp::SYNCHWAIT, Identity).limit(FLAG).global(),
        D::module("IN_SYNCH", dsp::INSYNCH, Identity).limit(FLAG).global(),
        D::module("FILTER_RANGE", dsp::FILTERRANGE, Identity)
            .limit(Limit::Raw { min: 1, max: 6 })
            .dependent("ENERGY_RISETIME", EveryChannel)
            .dependent("ENERGY_FLATTOP", EveryChannel)
            .dependent("PEAK_SEPARATION", EveryChannel)
            .dependent("MIN_COINCIDENCE_WAIT", Same)
            .dependent("COINC_DELAY", EveryChannel)
            .dependent("RESET_DELAY", EveryChannel)
            .apply(TaskKind::ProgramFippi),
        D::module("MODULEPATTERN", dsp::MODULEPATTERN, Identity),
        D::module("NNSHAREPATTERN", dsp::NNSHAREPATTERN, Identity),
        D::module("DBLBUFCSR", dsp::DBLBUFCSR, Identity).limit(FLAG),
        D::module("XET_DELAY", dsp::XETDELAY, Linear(Scale::Nanos(Clock::System)))
            .apply(TaskKind::ProgramFippi),
        D::module("PDM_MASKA", dsp::PDMMASKA, Identity),
        D::module("PDM_MASKB", dsp::PDMMASKB, Identity),
        D::module("PDM_MASKC", dsp::PDMMASKC, Identity),
        D::module("FIFO_LENGTH", dsp::FIFOLENGTH, Identity).read_only(),
        D::module("USER_IN", dsp::USERIN, Words).words(dsp::USERIN_LEN),
        D::module("EXTRA_IN", dsp::EXTRAIN, Words).words(dsp::EXTRAIN_LEN),
        D::module("RUN_STATS_CLEAR", dsp::STATCLEAR, Identity)
            .limit(FLAG)
            .write_only(),
        // boot words
        D::derived(Scope::Unit, "BOARD_VERSION", Derived::BoardVersion),
        D::module("SERIAL_NUMBER", dsp::SERIALNUM, Identity).read_only(),
        D::derived(Scope::Unit, "ADC_RATE", Derived::AdcRate),
        D::derived(Scope::Unit, "ADC_BITS", Derived::AdcBits),
        D::module("DSP_RELEASE", dsp::DSPRELEASE, Identity).read_only(),
        D::module("DSP_BUILD", dsp::DSPBUILD, Identity).read_only(),
        D::module("FIPPI_ID", dsp::FIPPIID, Identity).read_only(),
        D::module("SYSTEM_ID", dsp::SYSTEMID, Identity).read_only(),
        D::derived(
            Scope::Unit,
            "BUFFER_HEAD_LENGTH",
            Derived::Constant(dsp::BUFFER_HEAD_LENGTH as f64),
        ),
        D::derived(
            Scope::Unit,
            "EVENT_HEAD_LENGTH",
            Derived::Constant(dsp::EVENT_HEAD_LENGTH as f64),
        ),
        D::derived(
            Scope::Unit,
            "CHANNEL_HEAD_LENGTH",
            Derived::Constant(dsp::MAX_CHAN_HEAD_LENGTH as f64),
        ),
        D::derived(
            Scope::Unit,
            "OUTPUT_BUFFER_LENGTH",
            Derived::Constant(dsp::IO_BUFFER_LENGTH as f64),
        ),
        D::module("USER_OUT", dsp::USEROUT, Words)
            .words(dsp::USEROUT_LEN)
            .read_only(),
        // run statistics
        D::module_stat("RUN_TIME", dsp::RUNTIMEA, 3, Counter(Scale::Seconds(Clock::Dsp))),
        D::module_stat("TOTAL_TIME", dsp::TOTALTIMEA, 3, Counter(Scale::Seconds(Clock::Dsp))),
        D::module_stat("NUMBER_EVENTS", dsp::NUMEVENTSA, 2, Counter(Scale::Unity)),
        D::derived(
            Scope::Unit,
            "EVENT_RATE",
            Derived::Rate {
                count: "NUMBER_EVENTS",
                time: "RUN_TIME",
                dead: None,
            },
        )
        .statistic(),
        D::module_stat(
            "COINC_COUNT_TIME",
            dsp::CCOUNTTIMEA,
            3,
            Counter(Scale::Seconds(Clock::System)),
        ),
        D::module_stat("COINC_SFDT", dsp::CSFDTA, 3, Counter(Scale::Seconds(Clock::System))),
        D::module_stat("NUM_COINC_TRIG", dsp::NCOINCTRIGA, 2, Counter(Scale::Unity)),
        D::derived(
            Scope::Unit,
            "COINC_INPUT_RATE",
            Derived::Rate {
                count: "NUM_COINC_TRIG",
                time: "COINC_COUNT_TIME",
                dead: Some("COINC_SFDT"),
            },
        )
        .statistic(),
    ]
}
