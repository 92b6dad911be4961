//! Engine configuration
//!
//! Loaded from JSON. Every field has a default, so an empty object is a
//! valid single-unit configuration.

use pixie_regs::dsp::PRESET_MAX_MODULES;
use pixie_regs::BoardVariant;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration is not valid JSON for [`EngineConfig`]
    #[error("Cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// Values are inconsistent
    #[error("Invalid configuration: {reason}")]
    Invalid {
        /// What is wrong
        reason: String,
    },
}

impl ConfigError {
    fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

/// Per-unit settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitConfig {
    /// Board variant name (`pixie4`, `pixie500e`, `pixie4e-16-125`,
    /// `pixie4e-14-500`)
    pub variant: Option<String>,
    /// Serial number reported by the simulated backend
    pub serial_number: u16,
}

impl UnitConfig {
    /// Configured variant, if named
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown name.
    pub fn board_variant(&self) -> Result<Option<BoardVariant>, ConfigError> {
        self.variant
            .as_deref()
            .map(|name| {
                BoardVariant::from_name(name)
                    .ok_or_else(|| ConfigError::invalid(format!("unknown board variant {name:?}")))
            })
            .transpose()
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Unit capacity of the topology
    pub max_units: usize,
    /// Units physically present (indices `0..present_units`)
    pub present_units: usize,
    /// Run cross-unit broadcasts on one thread per unit
    pub parallel_broadcast: bool,
    /// Start in offline analysis mode (no hardware access)
    pub offline: bool,
    /// Start with coincidence-wait compensation on
    pub keep_coinc_wait: bool,
    /// Per-unit settings, by unit index
    pub units: Vec<UnitConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_units: PRESET_MAX_MODULES,
            present_units: 1,
            parallel_broadcast: false,
            offline: false,
            keep_coinc_wait: false,
            units: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Configuration with `present` units of one variant
    #[must_use]
    pub fn uniform(present: usize, variant: BoardVariant) -> Self {
        Self {
            present_units: present,
            units: (0..present)
                .map(|i| UnitConfig {
                    variant: Some(variant.name().to_string()),
                    serial_number: u16::try_from(i + 1).unwrap_or(u16::MAX),
                })
                .collect(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::Invalid`] for inconsistent values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check value consistency
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_units == 0 || self.max_units > PRESET_MAX_MODULES {
            return Err(ConfigError::invalid(format!(
                "max_units {} outside [1, {PRESET_MAX_MODULES}]",
                self.max_units
            )));
        }
        if self.present_units > self.max_units {
            return Err(ConfigError::invalid(format!(
                "present_units {} exceeds max_units {}",
                self.present_units, self.max_units
            )));
        }
        if self.units.len() > self.max_units {
            return Err(ConfigError::invalid(format!(
                "{} unit entries for {} units",
                self.units.len(),
                self.max_units
            )));
        }
        for unit in &self.units {
            unit.board_variant()?;
        }
        Ok(())
    }

    /// Configured variant of one unit, if any
    #[must_use]
    pub fn unit_variant(&self, unit: usize) -> Option<BoardVariant> {
        self.units.get(unit).and_then(|u| u.board_variant().ok().flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_default() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.present_units, 1);
    }

    #[test]
    fn parses_unit_variants() {
        let config = EngineConfig::from_json_str(
            r#"{
                "max_units": 4,
                "present_units": 2,
                "parallel_broadcast": true,
                "units": [{"variant": "pixie4"}, {"variant": "pixie500e", "serial_number": 7}]
            }"#,
        )
        .unwrap();
        assert_eq!(config.unit_variant(0), Some(BoardVariant::Pixie4));
        assert_eq!(config.unit_variant(1), Some(BoardVariant::Pixie500e));
        assert_eq!(config.unit_variant(2), None);
        assert_eq!(config.units[1].serial_number, 7);
    }

    #[test]
    fn rejects_inconsistent_counts() {
        let err = EngineConfig::from_json_str(r#"{"max_units": 2, "present_units": 3}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(EngineConfig::from_json_str(r#"{"max_units": 40}"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{"max_units": 0}"#).is_err());
    }

    #[test]
    fn rejects_unknown_variant() {
        let err = EngineConfig::from_json_str(r#"{"units": [{"variant": "pixie9"}]}"#).unwrap_err();
        assert!(err.to_string().contains("pixie9"));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            EngineConfig::from_json_str("{max_units: 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn uniform_names_every_unit() {
        let config = EngineConfig::uniform(3, BoardVariant::Pixie4e16x125);
        config.validate().unwrap();
        assert_eq!(config.units.len(), 3);
        assert_eq!(config.unit_variant(2), Some(BoardVariant::Pixie4e16x125));
    }
}
