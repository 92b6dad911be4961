//! Silicon model for XIA Pixie-4, Pixie-4e and Pixie-500e modules.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the module: the DSP parameter memory map, control/status
//! register bits, board variants with their clocks and limits, control-task
//! codes and the analog gain stages.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`dsp`] | DSP parameter words: input block, channel blocks, statistics, buffer geometry |
//! | [`csr`] | Module, channel and host control/status bits, shared-bit masks |
//! | [`variant`] | Board-version decoding, clock sets, per-variant limits |
//! | [`task`] | Control-task codes and timeouts, run types |
//! | [`analog`] | SGA gain tables, digital trim and offset DAC range |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod analog;
pub mod csr;
pub mod dsp;
pub mod task;
pub mod variant;

pub use variant::{BoardVariant, ClockSet, XdtQuantization};
