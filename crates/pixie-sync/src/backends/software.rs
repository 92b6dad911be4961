// SPDX-License-Identifier: AGPL-3.0-only

//! Software (simulated crate) backend
//!
//! Implements [`RegisterTransport`] over in-memory DSP parameter blocks, one
//! per unit. Each unit sits behind its own `Mutex`, so operations on one
//! unit are serialized while different units proceed independently, which
//! is the same discipline the hardware transport follows.
//!
//! Every write and control task is logged so tests can assert exactly
//! which hardware traffic a transfer caused. Faults can be injected per
//! unit for reads, writes and tasks.
//!
//! ## Boot image
//!
//! ```text
//! MODNUM      unit index          FIFOLENGTH  variant FIFO depth
//! RUNTASK     0x301 (MCA)         FILTERRANGE 2
//! COINCWAIT   variant minimum     SERIALNUM   configured serial
//! per channel: GOOD | TRIGGER_ENABLE, fast 8/4, slow 20/5, offset DAC mid-scale
//! ```

use crate::backend::{RegisterTransport, TaskKind, TransportError, TransportResult};
use crate::config::EngineConfig;
use pixie_regs::csr::chancsra;
use pixie_regs::dsp::{self, chan};
use pixie_regs::BoardVariant;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// DSP code release reported by simulated units
pub const SIM_DSP_RELEASE: u16 = 0x0420;
/// DSP code build reported by simulated units
pub const SIM_DSP_BUILD: u16 = 0x0007;
/// FiPPI configuration ID reported by simulated units
pub const SIM_FIPPI_ID: u16 = 0x0111;

/// One logged hardware write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// First word address
    pub address: usize,
    /// Words written
    pub words: Vec<u16>,
}

/// Operation class a fault can be injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `hw_read` fails
    Read,
    /// `hw_write` fails
    Write,
    /// `apply_task` times out
    Task,
}

#[derive(Debug)]
struct SimUnit {
    variant: BoardVariant,
    memory: Vec<u16>,
    writes: Vec<WriteRecord>,
    tasks: Vec<TaskKind>,
    faults: Vec<Fault>,
}

impl SimUnit {
    fn boot(unit: usize, variant: BoardVariant, serial: u16) -> Self {
        let mut memory = vec![0u16; dsp::N_DSP_PAR];
        memory[dsp::MODNUM] = u16::try_from(unit).unwrap_or(u16::MAX);
        memory[dsp::RUNTASK] = pixie_regs::task::run_type::MCA;
        memory[dsp::FILTERRANGE] = 2;
        memory[dsp::COINCWAIT] = variant.coinc_wait_range().0;
        memory[dsp::FIFOLENGTH] = variant.fifo_length();
        memory[dsp::DSPRELEASE] = SIM_DSP_RELEASE;
        memory[dsp::DSPBUILD] = SIM_DSP_BUILD;
        memory[dsp::FIPPIID] = SIM_FIPPI_ID;
        memory[dsp::SYSTEMID] = variant.board_version();
        memory[dsp::SERIALNUM] = serial;
        for ch in 0..dsp::NUMBER_OF_CHANNELS {
            let mut set = |offset, value| memory[dsp::channel_input(ch, offset)] = value;
            set(chan::CHANCSRA, chancsra::GOOD | chancsra::TRIGGER_ENABLE);
            set(chan::FASTLENGTH, 8);
            set(chan::FASTGAP, 4);
            set(chan::SLOWLENGTH, 20);
            set(chan::SLOWGAP, 5);
            set(chan::PEAKSEP, 28);
            set(chan::TRACKDAC, 32768);
            set(chan::GATEDELAY, 1);
            set(chan::GATEWINDOW, 1);
            set(chan::QDC0LENGTH, 4);
            set(chan::QDC1LENGTH, 4);
        }
        Self {
            variant,
            memory,
            writes: Vec::new(),
            tasks: Vec::new(),
            faults: Vec::new(),
        }
    }

    fn check_range(&self, address: usize, count: usize) -> TransportResult<()> {
        if address + count > self.memory.len() {
            return Err(TransportError::AddressOutOfRange { address, count });
        }
        Ok(())
    }
}

/// Simulated crate of units
#[derive(Debug)]
pub struct SoftwareBackend {
    units: Vec<Mutex<SimUnit>>,
}

impl SoftwareBackend {
    /// Backend with one booted unit per variant
    #[must_use]
    pub fn new(variants: &[BoardVariant]) -> Self {
        let units = variants
            .iter()
            .enumerate()
            .map(|(i, &v)| Mutex::new(SimUnit::boot(i, v, 0)))
            .collect();
        info!("SoftwareBackend: {} simulated unit(s)", variants.len());
        Self { units }
    }

    /// Backend simulating the present units of a configuration
    ///
    /// Units without a configured variant take unit 0's, or Pixie-4.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        let fallback = config.unit_variant(0).unwrap_or(BoardVariant::Pixie4);
        let units = (0..config.present_units)
            .map(|i| {
                let variant = config.unit_variant(i).unwrap_or(fallback);
                let serial = config.units.get(i).map_or(0, |u| u.serial_number);
                Mutex::new(SimUnit::boot(i, variant, serial))
            })
            .collect::<Vec<_>>();
        info!("SoftwareBackend: {} simulated unit(s) from config", units.len());
        Self { units }
    }

    /// Number of simulated units
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    fn unit(&self, unit: usize) -> TransportResult<MutexGuard<'_, SimUnit>> {
        self.units
            .get(unit)
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner))
            .ok_or(TransportError::NotPresent { unit })
    }

    /// Write memory directly, bypassing faults and the write log
    ///
    /// # Errors
    ///
    /// Returns error if the unit or range does not exist.
    pub fn poke(&self, unit: usize, address: usize, words: &[u16]) -> TransportResult<()> {
        let mut u = self.unit(unit)?;
        u.check_range(address, words.len())?;
        u.memory[address..address + words.len()].copy_from_slice(words);
        Ok(())
    }

    /// Read memory directly, bypassing faults
    ///
    /// # Errors
    ///
    /// Returns error if the unit or range does not exist.
    pub fn peek(&self, unit: usize, address: usize, count: usize) -> TransportResult<Vec<u16>> {
        let u = self.unit(unit)?;
        u.check_range(address, count)?;
        Ok(u.memory[address..address + count].to_vec())
    }

    /// Make one class of operation fail on a unit
    pub fn inject(&self, unit: usize, fault: Fault) {
        if let Ok(mut u) = self.unit(unit) {
            if !u.faults.contains(&fault) {
                u.faults.push(fault);
            }
        }
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        for m in &self.units {
            m.lock().unwrap_or_else(PoisonError::into_inner).faults.clear();
        }
    }

    /// Writes logged for a unit, oldest first
    #[must_use]
    pub fn writes(&self, unit: usize) -> Vec<WriteRecord> {
        self.unit(unit).map(|u| u.writes.clone()).unwrap_or_default()
    }

    /// Control tasks logged for a unit, oldest first
    #[must_use]
    pub fn tasks(&self, unit: usize) -> Vec<TaskKind> {
        self.unit(unit).map(|u| u.tasks.clone()).unwrap_or_default()
    }

    /// Total logged writes over all units
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.units
            .iter()
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner).writes.len())
            .sum()
    }

    /// Clear write and task logs of every unit
    pub fn clear_logs(&self) {
        for m in &self.units {
            let mut u = m.lock().unwrap_or_else(PoisonError::into_inner);
            u.writes.clear();
            u.tasks.clear();
        }
    }
}

impl RegisterTransport for SoftwareBackend {
    fn hw_read(&self, unit: usize, address: usize, count: usize) -> TransportResult<Vec<u16>> {
        let u = self.unit(unit)?;
        if u.faults.contains(&Fault::Read) {
            return Err(TransportError::hardware("injected read fault"));
        }
        u.check_range(address, count)?;
        Ok(u.memory[address..address + count].to_vec())
    }

    fn hw_write(&self, unit: usize, address: usize, words: &[u16]) -> TransportResult<()> {
        let mut u = self.unit(unit)?;
        if u.faults.contains(&Fault::Write) {
            return Err(TransportError::hardware("injected write fault"));
        }
        u.check_range(address, words.len())?;
        u.memory[address..address + words.len()].copy_from_slice(words);
        u.writes.push(WriteRecord {
            address,
            words: words.to_vec(),
        });
        debug!("sim unit {unit}: wrote {} word(s) at {address:#05x}", words.len());
        Ok(())
    }

    fn apply_task(&self, unit: usize, task: TaskKind, timeout_ms: u64) -> TransportResult<()> {
        let mut u = self.unit(unit)?;
        if u.faults.contains(&Fault::Task) {
            return Err(TransportError::Timeout {
                duration_ms: timeout_ms,
            });
        }
        u.tasks.push(task);
        debug!("sim unit {unit}: task {task} done");
        Ok(())
    }

    fn board_variant(&self, unit: usize) -> TransportResult<BoardVariant> {
        Ok(self.unit(unit)?.variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_image_reflects_variant() {
        let backend = SoftwareBackend::new(&[BoardVariant::Pixie4, BoardVariant::Pixie4e16x125]);
        assert_eq!(backend.peek(0, dsp::FIFOLENGTH, 1).unwrap(), vec![1024]);
        assert_eq!(backend.peek(1, dsp::FIFOLENGTH, 1).unwrap(), vec![8192]);
        assert_eq!(backend.peek(1, dsp::MODNUM, 1).unwrap(), vec![1]);
        assert_eq!(backend.peek(1, dsp::COINCWAIT, 1).unwrap(), vec![5]);
        assert_eq!(backend.board_variant(1).unwrap(), BoardVariant::Pixie4e16x125);
    }

    #[test]
    fn writes_are_logged() {
        let backend = SoftwareBackend::new(&[BoardVariant::Pixie4]);
        backend.hw_write(0, dsp::USERIN, &[1, 2]).unwrap();
        assert_eq!(backend.hw_read(0, dsp::USERIN, 2).unwrap(), vec![1, 2]);
        assert_eq!(
            backend.writes(0),
            vec![WriteRecord {
                address: dsp::USERIN,
                words: vec![1, 2]
            }]
        );
        backend.poke(0, dsp::USERIN, &[9]).unwrap();
        assert_eq!(backend.write_count(), 1);
        backend.clear_logs();
        assert_eq!(backend.write_count(), 0);
    }

    #[test]
    fn absent_unit_is_not_present() {
        let backend = SoftwareBackend::new(&[BoardVariant::Pixie4]);
        assert!(matches!(
            backend.hw_read(3, 0, 1),
            Err(TransportError::NotPresent { unit: 3 })
        ));
    }

    #[test]
    fn range_is_checked() {
        let backend = SoftwareBackend::new(&[BoardVariant::Pixie4]);
        assert!(matches!(
            backend.hw_write(0, dsp::N_DSP_PAR - 1, &[0, 0]),
            Err(TransportError::AddressOutOfRange { .. })
        ));
    }

    #[test]
    fn injected_faults_fail_operations() {
        let backend = SoftwareBackend::new(&[BoardVariant::Pixie4, BoardVariant::Pixie4]);
        backend.inject(1, Fault::Write);
        backend.inject(1, Fault::Task);
        assert!(backend.hw_write(1, dsp::USERIN, &[1]).is_err());
        assert!(backend.hw_write(0, dsp::USERIN, &[1]).is_ok());
        assert!(matches!(
            backend.apply_task(1, TaskKind::SetDacs, 10_000),
            Err(TransportError::Timeout { duration_ms: 10_000 })
        ));
        backend.clear_faults();
        assert!(backend.hw_write(1, dsp::USERIN, &[1]).is_ok());
        assert!(backend.apply_task(1, TaskKind::ProgramFippi, 1_000).is_ok());
        assert_eq!(backend.tasks(1), vec![TaskKind::ProgramFippi]);
    }

    #[test]
    fn from_config_simulates_present_units() {
        let mut config = EngineConfig::uniform(2, BoardVariant::Pixie500e);
        config.units[1].serial_number = 42;
        let backend = SoftwareBackend::from_config(&config);
        assert_eq!(backend.unit_count(), 2);
        assert_eq!(backend.peek(1, dsp::SERIALNUM, 1).unwrap(), vec![42]);
    }
}
