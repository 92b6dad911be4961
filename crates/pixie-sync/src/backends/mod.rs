//! Register transport implementations
//!
//! The hardware transport belongs to the crate controller and lives outside
//! this crate. The software backend simulates a crate for tests, the CLI
//! and offline work.

pub mod software;

pub use software::{Fault, SoftwareBackend, WriteRecord};
