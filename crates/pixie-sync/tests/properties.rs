//! Property tests for conversion and clamping

use pixie_regs::dsp::{self, chan};
use pixie_regs::BoardVariant;
use pixie_sync::{EngineConfig, SoftwareBackend, SyncEngine, Target, TransferRequest};
use proptest::prelude::*;

const CH: Target = Target::Channel { unit: 0, channel: 1 };

fn engine(variant: BoardVariant) -> SyncEngine<SoftwareBackend> {
    let config = EngineConfig::uniform(1, variant);
    SyncEngine::new(SoftwareBackend::from_config(&config), &config).expect("engine boots")
}

fn write(engine: &mut SyncEngine<SoftwareBackend>, field: &str, value: f64) -> f64 {
    engine
        .transfer(TransferRequest::write(CH, field, value))
        .expect("write succeeds")
        .as_scalar()
        .expect("scalar result")
}

fn raw(engine: &SyncEngine<SoftwareBackend>, offset: usize) -> u16 {
    engine.store().image(0)[dsp::channel_input(1, offset)]
}

fn variant() -> impl Strategy<Value = BoardVariant> {
    prop_oneof![
        Just(BoardVariant::Pixie4),
        Just(BoardVariant::Pixie500e),
        Just(BoardVariant::Pixie4e16x125),
        Just(BoardVariant::Pixie4e14x500),
    ]
}

fn clamped_field() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("GATE_DELAY"),
        Just("GATE_WINDOW"),
        Just("BLCUT"),
        Just("QDC0_LENGTH"),
        Just("TRIGGER_THRESHOLD"),
        Just("VOFFSET"),
        Just("CFD_THRESHOLD"),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every representable gate delay reads back as written
    #[test]
    fn gate_delay_round_trips(variant in variant(), step in 0.0f64..1.0) {
        let mut engine = engine(variant);
        let max = f64::from(variant.gate_delay_max_raw());
        let want = ((step * (max - 1.0)).round() + 1.0) / variant.clocks().filter_mhz;
        let got = write(&mut engine, "GATE_DELAY", want);
        prop_assert!((got - want).abs() < 1e-9);
        let back = engine
            .transfer(TransferRequest::read(CH, "GATE_DELAY"))
            .expect("read")
            .as_scalar()
            .expect("scalar");
        prop_assert!((back - want).abs() < 1e-9);
    }

    /// Writing the echoed value again changes nothing
    #[test]
    fn clamping_is_idempotent(field in clamped_field(), value in -1.0e4f64..1.0e4) {
        let mut engine = engine(BoardVariant::Pixie4);
        let first = write(&mut engine, field, value);
        let image = engine.store().image(0).to_vec();
        let second = write(&mut engine, field, first);
        prop_assert!((first - second).abs() < 1e-9, "{} -> {} -> {}", value, first, second);
        prop_assert_eq!(engine.store().image(0), image.as_slice());
    }

    /// The energy filter never exceeds 127 raw cycles in total
    #[test]
    fn energy_pair_stays_within_limit(
        writes in proptest::collection::vec((any::<bool>(), 0u16..300), 1..12)
    ) {
        let mut engine = engine(BoardVariant::Pixie4);
        let interval = 4.0 / 75.0;
        for (rise, cycles) in writes {
            let field = if rise { "ENERGY_RISETIME" } else { "ENERGY_FLATTOP" };
            write(&mut engine, field, f64::from(cycles) * interval);
            let sl = raw(&engine, chan::SLOWLENGTH);
            let sg = raw(&engine, chan::SLOWGAP);
            prop_assert!(sl >= 3 && sg >= 3, "{} {}", sl, sg);
            prop_assert!(sl + sg <= 127, "{} {}", sl, sg);
        }
    }

    /// The trigger filter never exceeds 63 raw cycles in total
    #[test]
    fn trigger_pair_stays_within_limit(
        writes in proptest::collection::vec((any::<bool>(), 0u16..100), 1..12)
    ) {
        let mut engine = engine(BoardVariant::Pixie4);
        for (rise, cycles) in writes {
            let field = if rise { "TRIGGER_RISETIME" } else { "TRIGGER_FLATTOP" };
            write(&mut engine, field, f64::from(cycles) / 75.0);
            let fl = raw(&engine, chan::FASTLENGTH);
            let fg = raw(&engine, chan::FASTGAP);
            prop_assert!(fl >= 2, "{}", fl);
            prop_assert!(fl + fg <= 63, "{} {}", fl, fg);
        }
    }
}
