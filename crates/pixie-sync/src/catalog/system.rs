//! System-scope fields (host-side, no hardware storage)

use crate::clamp::{Bound, Limit};
use crate::descriptor::{Derived, Effect, RegisterDescriptor as D};
use crate::request::Scope;
use pixie_regs::dsp;

const LIBRARY_RELEASE: f64 = 0x0420 as f64;
const LIBRARY_BUILD: f64 = 0x0001 as f64;

const FLAG: Limit = Limit::Raw { min: 0, max: 1 };

pub(super) fn descriptors() -> Vec<D> {
    vec![
        D::system("NUMBER_MODULES")
            .limit(Limit::Computed(Bound::UnitCount))
            .effect(Effect::PresentUnits),
        D::system("OFFLINE_ANALYSIS").limit(FLAG).effect(Effect::Offline),
        D::system("AUTO_PROCESSLMDATA").limit(FLAG),
        D::system("KEEP_CW").limit(FLAG).effect(Effect::KeepCoincWait),
        // slot number of each unit
        D::system_words("SLOT_WAVE", dsp::PRESET_MAX_MODULES),
        D::derived(Scope::System, "MAX_NUMBER_MODULES", Derived::MaxUnits),
        D::derived(Scope::System, "C_LIBRARY_RELEASE", Derived::Constant(LIBRARY_RELEASE)),
        D::derived(Scope::System, "C_LIBRARY_BUILD", Derived::Constant(LIBRARY_BUILD)),
    ]
}
