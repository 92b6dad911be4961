//! Integration tests for the sync engine state machine
//!
//! Every test drives the engine against the simulated backend and checks
//! both the echoed value and the hardware traffic it caused.

use pixie_regs::csr::modcsrb;
use pixie_regs::dsp::{self, chan};
use pixie_regs::BoardVariant;
use pixie_sync::{
    Direction, EngineConfig, EngineState, RefreshRange, Scope, SoftwareBackend, SyncEngine,
    SyncError, TaskKind, Target, TransferRequest, TransportError,
};

fn engine_with(variants: &[BoardVariant], present: usize) -> SyncEngine<SoftwareBackend> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let config = EngineConfig {
        max_units: variants.len(),
        present_units: present,
        ..EngineConfig::default()
    };
    SyncEngine::new(SoftwareBackend::new(variants), &config).expect("engine boots")
}

fn pixie4() -> SyncEngine<SoftwareBackend> {
    engine_with(&[BoardVariant::Pixie4], 1)
}

fn ch(channel: usize) -> Target {
    Target::Channel { unit: 0, channel }
}

fn write(engine: &mut SyncEngine<SoftwareBackend>, target: Target, field: &str, value: f64) -> f64 {
    engine
        .transfer(TransferRequest::write(target, field, value))
        .expect("write succeeds")
        .as_scalar()
        .expect("scalar result")
}

fn read(engine: &mut SyncEngine<SoftwareBackend>, target: Target, field: &str) -> f64 {
    engine
        .transfer(TransferRequest::read(target, field))
        .expect("read succeeds")
        .as_scalar()
        .expect("scalar result")
}

fn word(engine: &SyncEngine<SoftwareBackend>, unit: usize, address: usize) -> u16 {
    engine.transport().peek(unit, address, 1).expect("peek")[0]
}

/// Energy filter interval of a Pixie-4 at filter range 2, in µs
const P4_INTERVAL: f64 = 4.0 / 75.0;

/// Gate delay saturates at the variant maximum and echoes the effective value
#[test]
fn test_gate_delay_saturates_per_variant() {
    for (variant, max_raw, filter_mhz) in [
        (BoardVariant::Pixie4, 254, 75.0),
        (BoardVariant::Pixie500e, 126, 125.0),
        (BoardVariant::Pixie4e16x125, 510, 125.0),
    ] {
        let mut engine = engine_with(&[variant], 1);
        let effective = write(&mut engine, ch(1), "GATE_DELAY", 1000.0);
        assert!((effective - f64::from(max_raw) / filter_mhz).abs() < 1e-9, "{variant}");
        assert_eq!(word(&engine, 0, dsp::channel_input(1, chan::GATEDELAY)), max_raw);
        assert_eq!(engine.transport().tasks(0), vec![TaskKind::ProgramFippi]);
    }
}

/// The Pixie-4 gate delay scenario: 1000 µs requested, 254/75 µs effective
#[test]
fn test_gate_delay_read_echoes_write() {
    let mut engine = pixie4();
    write(&mut engine, ch(0), "GATE_DELAY", 1000.0);
    let v = read(&mut engine, ch(0), "GATE_DELAY");
    assert!((v - 3.386_666).abs() < 1e-5);
}

/// Writes to read-only fields fail before any hardware access
#[test]
fn test_read_only_write_never_reaches_hardware() {
    let mut engine = pixie4();
    engine.transport().clear_logs();
    let err = engine
        .transfer(TransferRequest::write(ch(0), "PEAK_SEPARATION", 12.0))
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidDirection { .. }));
    assert_eq!(err.field(), Some("PEAK_SEPARATION"));
    assert_eq!(err.scope(), Some(Scope::Channel));
    assert_eq!(err.direction(), Some(Direction::Write));
    assert_eq!(engine.transport().write_count(), 0);
    assert_eq!(engine.last_trail(), &[EngineState::Validating, EngineState::Idle]);
}

/// Write-only strobes cannot be read
#[test]
fn test_write_only_strobe() {
    let mut engine = pixie4();
    let err = engine
        .transfer(TransferRequest::read(Target::Unit { unit: 0 }, "RUN_STATS_CLEAR"))
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidDirection { direction: Direction::Read, .. }));
    write(&mut engine, Target::Unit { unit: 0 }, "RUN_STATS_CLEAR", 1.0);
    assert_eq!(word(&engine, 0, dsp::STATCLEAR), 1);
}

/// Lookup is exact and errors carry the attempted direction
#[test]
fn test_unknown_field() {
    let mut engine = pixie4();
    let err = engine
        .transfer(TransferRequest::write(ch(0), "gate_delay", 1.0))
        .unwrap_err();
    assert!(matches!(err, SyncError::UnknownField { direction: Direction::Write, .. }));
    assert!(engine.lookup_descriptor(Scope::Channel, "GATE_DELAY").is_ok());
    assert!(engine.lookup_descriptor(Scope::Unit, "GATE_DELAY").is_err());
}

/// Out-of-topology indices are rejected
#[test]
fn test_invalid_index() {
    let mut engine = engine_with(&[BoardVariant::Pixie4; 2], 2);
    let err = engine
        .transfer(TransferRequest::read(Target::Channel { unit: 0, channel: 4 }, "TAU"))
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidIndex { kind: "channel", .. }));
    let err = engine
        .transfer(TransferRequest::read(Target::Unit { unit: 2 }, "FILTER_RANGE"))
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidIndex { kind: "unit", count: 2, .. }));
}

/// Writes need a payload of the field's shape
#[test]
fn test_payload_shape_is_checked_before_mutation() {
    let mut engine = pixie4();
    engine.transport().clear_logs();
    let err = engine
        .transfer(TransferRequest::write(ch(0), "GATE_DELAY", vec![1.0, 2.0]))
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidPayload { .. }));
    let err = engine
        .transfer(TransferRequest::write(Target::Unit { unit: 0 }, "USER_IN", vec![1.0; 3]))
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidPayload { .. }));
    let missing = TransferRequest {
        value: None,
        ..TransferRequest::write(ch(0), "GATE_DELAY", 1.0)
    };
    assert!(matches!(
        engine.transfer(missing),
        Err(SyncError::InvalidPayload { .. })
    ));
    assert_eq!(engine.transport().write_count(), 0);
}

/// Both energy times at their floor: an oversized write resets both
#[test]
fn test_energy_pair_resets_both_at_floor() {
    let mut engine = pixie4();
    write(&mut engine, ch(0), "ENERGY_RISETIME", 3.0 * P4_INTERVAL);
    write(&mut engine, ch(0), "ENERGY_FLATTOP", 3.0 * P4_INTERVAL);

    let effective = write(&mut engine, ch(0), "ENERGY_RISETIME", 200.0 * P4_INTERVAL);
    assert!((effective - 8.0 * P4_INTERVAL).abs() < 1e-9);
    assert_eq!(word(&engine, 0, dsp::channel_input(0, chan::SLOWLENGTH)), 8);
    assert_eq!(word(&engine, 0, dsp::channel_input(0, chan::SLOWGAP)), 8);
    let gap = read(&mut engine, ch(0), "ENERGY_FLATTOP");
    assert!((gap - 8.0 * P4_INTERVAL).abs() < 1e-9);
    // filter range 2: 8 + 8 - 2, plus 5
    assert_eq!(word(&engine, 0, dsp::channel_input(0, chan::PEAKSEP)), 19);
}

/// Otherwise only the written field is reduced
#[test]
fn test_energy_pair_reduces_written_field() {
    let mut engine = pixie4();
    let effective = write(&mut engine, ch(2), "ENERGY_RISETIME", 200.0 * P4_INTERVAL);
    assert!((effective - 122.0 * P4_INTERVAL).abs() < 1e-9);
    assert_eq!(word(&engine, 0, dsp::channel_input(2, chan::SLOWGAP)), 5);
    let mirror = engine.store().image(0);
    let sl = mirror[dsp::channel_input(2, chan::SLOWLENGTH)];
    let sg = mirror[dsp::channel_input(2, chan::SLOWGAP)];
    assert!(sl + sg <= 127);
}

/// Trigger pair: floors 2/0, sum at most 63
#[test]
fn test_trigger_pair_limits() {
    let mut engine = pixie4();
    let f = 1.0 / 75.0;
    let effective = write(&mut engine, ch(0), "TRIGGER_FLATTOP", 100.0 * f);
    assert!((effective - 55.0 * f).abs() < 1e-9);
    assert_eq!(word(&engine, 0, dsp::channel_input(0, chan::FASTLENGTH)), 8);
    let effective = write(&mut engine, ch(0), "TRIGGER_RISETIME", 0.0);
    assert!((effective - 2.0 * f).abs() < 1e-9);
}

/// Writing an already clamped value again changes nothing
#[test]
fn test_write_is_idempotent() {
    let mut engine = pixie4();
    let first = write(&mut engine, ch(1), "TAU", 47.3);
    let image = engine.store().image(0).to_vec();
    let second = write(&mut engine, ch(1), "TAU", first);
    assert_eq!(first.to_bits(), second.to_bits());
    assert_eq!(engine.store().image(0), image.as_slice());
    let writes = engine.transport().writes(0);
    assert_eq!(writes[writes.len() - 1], writes[writes.len() - 2]);
}

/// Filter range rescales the energy times and recomputes the window chain
#[test]
fn test_filter_range_recompute_chain() {
    let mut engine = pixie4();
    let fr = write(&mut engine, Target::Unit { unit: 0 }, "FILTER_RANGE", 9.0);
    assert!((fr - 6.0).abs() < f64::EPSILON);
    write(&mut engine, Target::Unit { unit: 0 }, "FILTER_RANGE", 3.0);

    let rise = read(&mut engine, ch(0), "ENERGY_RISETIME");
    assert!((rise - 20.0 * 8.0 / 75.0).abs() < 1e-9);
    for channel in 0..4 {
        // 20 + 5 - 1, plus 5
        assert_eq!(word(&engine, 0, dsp::channel_input(channel, chan::PEAKSEP)), 29);
    }
    let wait = read(&mut engine, Target::Unit { unit: 0 }, "MIN_COINCIDENCE_WAIT");
    assert!((wait - f64::from(29 << 3) * 1000.0 / 75.0).abs() < 1e-6);
    assert!(engine.last_trail().contains(&EngineState::Converting));
}

/// A new fast length changes the trigger threshold's engineering value only
#[test]
fn test_trigger_threshold_follows_fast_length() {
    let mut engine = pixie4();
    write(&mut engine, ch(0), "TRIGGER_THRESHOLD", 10.0);
    assert_eq!(word(&engine, 0, dsp::channel_input(0, chan::FASTTHRESH)), 80);
    write(&mut engine, ch(0), "TRIGGER_RISETIME", 16.0 / 75.0);
    assert_eq!(word(&engine, 0, dsp::channel_input(0, chan::FASTTHRESH)), 80);
    let cached = engine.store().value(ch(0), "TRIGGER_THRESHOLD").cloned();
    assert_eq!(cached, Some(5.0.into()));
}

/// Shorter traces pull the trace delay and PSA start in
#[test]
fn test_trace_length_relimits_dependents() {
    let mut engine = pixie4();
    let tl = write(&mut engine, ch(0), "TRACE_LENGTH", 13.0);
    assert!((tl - 12.8).abs() < 1e-9);
    write(&mut engine, ch(0), "TRACE_DELAY", 12.0);
    write(&mut engine, ch(0), "PSA_START", 10.0);
    assert_eq!(word(&engine, 0, dsp::channel_input(0, chan::USERDELAY)), 900);

    let tl = write(&mut engine, ch(0), "TRACE_LENGTH", 3.0);
    assert!((tl - 224.0 / 75.0).abs() < 1e-9);
    assert_eq!(word(&engine, 0, dsp::channel_input(0, chan::USERDELAY)), 224);
    assert_eq!(word(&engine, 0, dsp::channel_input(0, chan::PSAOFFSET)), 224);
}

/// QDC1 delay keeps QDC0's two low bits
#[test]
fn test_qdc_delays_share_low_bits() {
    let mut engine = pixie4();
    let f = 1.0 / 75.0;
    write(&mut engine, ch(0), "QDC0_DELAY", 7.0 * f);
    assert_eq!(word(&engine, 0, dsp::channel_input(0, chan::QDC1DELAY)), 3);
    let effective = write(&mut engine, ch(0), "QDC1_DELAY", 100.0 * f);
    assert!((effective - 103.0 * f).abs() < 1e-9);
}

/// Gain changes re-apply the DACs and then the FiPPI, once each
#[test]
fn test_apply_tasks_run_once_in_order() {
    let mut engine = pixie4();
    engine.transport().clear_logs();
    write(&mut engine, ch(0), "VGAIN", 2.0);
    assert_eq!(
        engine.transport().tasks(0),
        vec![TaskKind::SetDacs, TaskKind::ProgramFippi]
    );
}

/// Multi-word run timer: (1·2^32 + 100) ticks of the 50 MHz DSP clock
#[test]
fn test_run_time_counter() {
    let mut engine = pixie4();
    engine
        .transport()
        .poke(0, dsp::RUNTIMEA, &[1, 0, 100])
        .expect("poke");
    engine.refresh(0, RefreshRange::UnitStatistics).expect("refresh");
    let t = read(&mut engine, Target::Unit { unit: 0 }, "RUN_TIME");
    let expected = (4_294_967_296.0 + 100.0) * 2e-8;
    assert!((t - expected).abs() < 1e-9);
}

/// Offline analysis never touches the hardware
#[test]
fn test_offline_mode() {
    let mut engine = pixie4();
    write(&mut engine, Target::System, "OFFLINE_ANALYSIS", 1.0);
    assert!(engine.is_offline());
    engine.transport().clear_logs();

    write(&mut engine, ch(0), "GATE_DELAY", 10.0 / 75.0);
    assert_eq!(engine.transport().write_count(), 0);
    assert!(engine.transport().tasks(0).is_empty());
    assert_eq!(engine.store().image(0)[dsp::channel_input(0, chan::GATEDELAY)], 10);

    let address = dsp::channel_input(0, chan::BLCUT);
    engine.transport().poke(0, address, &[77]).expect("poke");
    engine.refresh(0, RefreshRange::Full).expect("refresh");
    assert_eq!(engine.store().image(0)[address], 0);
}

/// With KEEP_CW on, coincidence delays are computed, not written
#[test]
fn test_keep_coinc_wait_compensation() {
    let mut engine = pixie4();
    let step = 1000.0 / 75.0;
    let delay = write(&mut engine, ch(1), "COINC_DELAY", 200.0);
    assert!((delay - 15.0 * step).abs() < 1e-9);
    write(&mut engine, ch(1), "COINC_DELAY", 0.0);

    write(&mut engine, Target::System, "KEEP_CW", 1.0);
    assert!(engine.keeps_coinc_wait());
    // channel 0 peak separation 40 + 5 - 2 + 5 = 48 against 28 elsewhere
    write(&mut engine, ch(0), "ENERGY_RISETIME", 40.0 * P4_INTERVAL);
    assert_eq!(word(&engine, 0, dsp::channel_input(0, chan::PEAKSEP)), 48);
    assert_eq!(word(&engine, 0, dsp::channel_input(0, chan::COINCDELAY)), 0);
    assert_eq!(word(&engine, 0, dsp::channel_input(1, chan::COINCDELAY)), 80);
    assert_eq!(word(&engine, 0, dsp::channel_input(1, chan::RESETDELAY)), 84);
    assert_eq!(word(&engine, 0, dsp::channel_input(0, chan::RESETDELAY)), 29);

    let frozen = write(&mut engine, ch(1), "COINC_DELAY", 1.0);
    assert!((frozen - 80.0 * step).abs() < 1e-9);
}

/// Run type changes recompute the event count limit on every unit
#[test]
fn test_run_type_sets_max_events() {
    let mut engine = engine_with(&[BoardVariant::Pixie4; 3], 2);
    write(&mut engine, Target::Unit { unit: 0 }, "RUN_TYPE", f64::from(0x100));
    // 4 good channels of 9 header words plus the event header
    let expected = u16::try_from((8192 - 6) / 39).expect("fits");
    for unit in 0..3 {
        assert_eq!(engine.store().image(unit)[dsp::RUNTASK], 0x100);
    }
    for unit in 0..2 {
        assert_eq!(engine.store().image(unit)[dsp::MAXEVENTS], expected);
    }
    assert_eq!(word(&engine, 1, dsp::MAXEVENTS), expected);
    assert!(engine.transport().writes(2).is_empty());

    let rt = write(&mut engine, Target::Unit { unit: 0 }, "RUN_TYPE", f64::from(0x205));
    assert!((rt - f64::from(0x301)).abs() < f64::EPSILON);
    assert_eq!(word(&engine, 0, dsp::MAXEVENTS), 0);
}

/// Transport failures are reported; the mirror is already ahead
#[test]
fn test_transport_write_failure() {
    let mut engine = pixie4();
    engine.transport().inject(0, pixie_sync::Fault::Write);
    let err = engine
        .transfer(TransferRequest::write(ch(0), "GATE_DELAY", 20.0 / 75.0))
        .unwrap_err();
    assert!(matches!(err, SyncError::HardwareTransport { unit: 0, .. }));
    assert!(err.mirror_may_be_stale());
    assert_eq!(engine.store().image(0)[dsp::channel_input(0, chan::GATEDELAY)], 20);
    assert!(engine.transport().tasks(0).is_empty());
    assert_eq!(engine.state(), EngineState::Idle);
}

/// A control task that does not finish in time fails the transfer
#[test]
fn test_task_timeout() {
    let mut engine = pixie4();
    engine.transport().inject(0, pixie_sync::Fault::Task);
    let err = engine
        .transfer(TransferRequest::write(ch(0), "GATE_WINDOW", 5.0 / 75.0))
        .unwrap_err();
    match err {
        SyncError::HardwareTransport { source, .. } => {
            assert!(matches!(source, TransportError::Timeout { duration_ms: 1000 }));
        }
        other => panic!("unexpected error {other}"),
    }
}

/// Growing NUMBER_MODULES reads the new units and gives them the global configuration
#[test]
fn test_number_modules_reconfigures_topology() {
    let mut engine = engine_with(&[BoardVariant::Pixie4; 4], 2);
    assert_eq!(engine.store().image(2)[dsp::MODNUM], 0);
    write(&mut engine, Target::Unit { unit: 0 }, "RUN_TYPE", f64::from(0x100));
    write(&mut engine, Target::Unit { unit: 0 }, "MODULE_CSRB", f64::from(modcsrb::CLOCK_MASTER));

    let n = write(&mut engine, Target::System, "NUMBER_MODULES", 3.0);
    assert!((n - 3.0).abs() < f64::EPSILON);
    assert_eq!(engine.topology().present(), 3);
    assert_eq!(engine.store().image(2)[dsp::MODNUM], 2);

    // global and shared-bit fields match unit 0 on the hardware too
    let run_type = read(&mut engine, Target::Unit { unit: 2 }, "RUN_TYPE");
    assert_eq!(run_type, read(&mut engine, Target::Unit { unit: 0 }, "RUN_TYPE"));
    assert_eq!(word(&engine, 2, dsp::RUNTASK), 0x100);
    assert_eq!(word(&engine, 2, dsp::MODCSRB) & modcsrb::CLOCK_MASTER, modcsrb::CLOCK_MASTER);
    assert_eq!(word(&engine, 2, dsp::MAXEVENTS), word(&engine, 0, dsp::MAXEVENTS));
    assert!(engine.transport().tasks(2).contains(&TaskKind::ProgramFippi));

    let n = write(&mut engine, Target::System, "NUMBER_MODULES", 10.0);
    assert!((n - 4.0).abs() < f64::EPSILON);
    let n = write(&mut engine, Target::System, "NUMBER_MODULES", 0.0);
    assert!((n - 1.0).abs() < f64::EPSILON);
    assert_eq!(engine.topology().present(), 1);
}

/// A unit that cannot be reached leaves the topology at the last good unit
#[test]
fn test_number_modules_rolls_back_on_failure() {
    let config = EngineConfig {
        max_units: 4,
        present_units: 1,
        ..EngineConfig::default()
    };
    let mut engine =
        SyncEngine::new(SoftwareBackend::new(&[BoardVariant::Pixie4; 2]), &config).expect("engine boots");
    let err = engine
        .transfer(TransferRequest::write(Target::System, "NUMBER_MODULES", 4.0))
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::HardwareTransport {
            unit: 2,
            source: TransportError::NotPresent { unit: 2 },
            ..
        }
    ));
    assert_eq!(engine.topology().present(), 2);
    let n = read(&mut engine, Target::System, "NUMBER_MODULES");
    assert!((n - 2.0).abs() < f64::EPSILON);
    assert_eq!(engine.store().image(1)[dsp::MODNUM], 1);

    // absent units still take mirror-only writes
    write(&mut engine, Target::Unit { unit: 0 }, "SYNCH_WAIT", 1.0);
    assert_eq!(word(&engine, 1, dsp::SYNCHWAIT), 1);
    assert_eq!(engine.store().image(3)[dsp::SYNCHWAIT], 1);
}

/// Boot reads the variant of every present unit
#[test]
fn test_boot_reads_variants() {
    let mut engine = engine_with(&[BoardVariant::Pixie500e, BoardVariant::Pixie4e14x500], 2);
    assert_eq!(engine.topology().variant(1), BoardVariant::Pixie4e14x500);
    let rate = read(&mut engine, Target::Unit { unit: 1 }, "ADC_RATE");
    assert!((rate - 500.0).abs() < f64::EPSILON);
    let max = read(&mut engine, Target::System, "MAX_NUMBER_MODULES");
    assert!((max - 2.0).abs() < f64::EPSILON);
}

/// Boot fails when a present unit is missing from the transport
#[test]
fn test_boot_fails_without_unit() {
    let config = EngineConfig {
        max_units: 4,
        present_units: 3,
        ..EngineConfig::default()
    };
    let err = SyncEngine::new(SoftwareBackend::new(&[BoardVariant::Pixie4; 2]), &config).unwrap_err();
    assert!(matches!(
        err,
        SyncError::HardwareTransport {
            unit: 2,
            source: TransportError::NotPresent { unit: 2 },
            ..
        }
    ));
}

/// read_through refreshes just the field's words
#[test]
fn test_read_through_refreshes_span() {
    let mut engine = pixie4();
    let address = dsp::channel_input(3, chan::BLCUT);
    engine.transport().poke(0, address, &[1234]).expect("poke");
    let other = dsp::channel_input(3, chan::GATEWINDOW);
    engine.transport().poke(0, other, &[9]).expect("poke");

    let v = engine
        .read_through(TransferRequest::read(ch(3), "BLCUT"))
        .expect("read")
        .as_scalar();
    assert_eq!(v, Some(1234.0));
    assert_eq!(engine.store().image(0)[other], 1);
}
