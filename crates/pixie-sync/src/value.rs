//! Engineering-unit values exchanged with callers

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value in engineering units (µs, V, V/V, counts, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EngineeringValue {
    /// Single number
    Scalar(f64),
    /// Word array (user words, slot maps)
    Words(Vec<f64>),
    /// Aggregate result or aggregate write payload
    Record(Record),
}

impl EngineeringValue {
    /// The number, if this is a scalar
    #[must_use]
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    /// The words, if this is a word array
    #[must_use]
    pub fn as_words(&self) -> Option<&[f64]> {
        match self {
            Self::Words(w) => Some(w),
            _ => None,
        }
    }

    /// The record, if this is an aggregate value
    #[must_use]
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Short name of the value's shape, for diagnostics
    #[must_use]
    pub const fn shape(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Words(_) => "word array",
            Self::Record(_) => "record",
        }
    }
}

impl From<f64> for EngineeringValue {
    fn from(v: f64) -> Self {
        Self::Scalar(v)
    }
}

impl From<Vec<f64>> for EngineeringValue {
    fn from(w: Vec<f64>) -> Self {
        Self::Words(w)
    }
}

impl From<Record> for EngineeringValue {
    fn from(r: Record) -> Self {
        Self::Record(r)
    }
}

impl fmt::Display for EngineeringValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(v) => write!(f, "{v}"),
            Self::Words(w) => {
                write!(f, "[")?;
                for (i, v) in w.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Self::Record(r) => {
                for (name, v) in &r.values {
                    writeln!(f, "{name:<24} {v}")?;
                }
                for failure in &r.failures {
                    writeln!(f, "{:<24} FAILED: {}", failure.field, failure.reason)?;
                }
                Ok(())
            }
        }
    }
}

/// Field values of an aggregate, in catalog order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Field name to value
    pub values: IndexMap<String, EngineeringValue>,
    /// Best-effort fields that failed and were skipped
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FieldFailure>,
}

impl Record {
    /// Empty record
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<EngineeringValue>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    /// Value of one field
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&EngineeringValue> {
        self.values.get(field)
    }

    /// Scalar value of one field
    #[must_use]
    pub fn scalar(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(EngineeringValue::as_scalar)
    }
}

/// A best-effort field that failed during an aggregate operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFailure {
    /// Field name
    pub field: String,
    /// Error message
    pub reason: String,
}
