//! MMS value representation and functional constraints.
//!
//! The connection provider exchanges attribute values as [`MmsValue`], a
//! tagged representation of the MMS data types the control core touches.

use bytes::Bytes;

use crate::error::{ControlError, Result};

/// Functional constraint qualifying an attribute access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionalConstraint {
    /// Status information
    St,
    /// Measurands
    Mx,
    /// Setpoint
    Sp,
    /// Configuration
    Cf,
    /// Control
    Co,
    /// Operate received
    Or,
    /// Service response
    Sr,
}

impl FunctionalConstraint {
    /// The two-letter token used in flattened MMS variable names.
    #[inline]
    pub const fn token(self) -> &'static str {
        match self {
            Self::St => "ST",
            Self::Mx => "MX",
            Self::Sp => "SP",
            Self::Cf => "CF",
            Self::Co => "CO",
            Self::Or => "OR",
            Self::Sr => "SR",
        }
    }
}

/// A decoded MMS value.
#[derive(Debug, Clone, PartialEq)]
pub enum MmsValue {
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    UInt(u64),
    /// Floating point
    Float(f64),
    /// Visible string
    VisibleString(String),
    /// Bit string, LSB-first packed into a u32
    BitString {
        /// Packed bit value
        value: u32,
        /// Number of valid bits
        size: u8,
    },
    /// Octet string
    OctetString(Bytes),
    /// UTC time in milliseconds since the Unix epoch
    UtcTime(u64),
    /// Structure of named-by-position elements
    Struct(Vec<MmsValue>),
}

impl MmsValue {
    /// Get the value as i64 if integral.
    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i64::try_from(*v).ok(),
            Self::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Get a structure element by position.
    #[inline]
    pub fn element(&self, index: usize) -> Option<&MmsValue> {
        match self {
            Self::Struct(elements) => elements.get(index),
            _ => None,
        }
    }

    /// Number of elements if this is a structure.
    #[inline]
    pub fn element_count(&self) -> Option<usize> {
        match self {
            Self::Struct(elements) => Some(elements.len()),
            _ => None,
        }
    }

    /// Interpret this value as a control sequence number, normalized
    /// modulo 256.
    ///
    /// Accepts integral values and numeric strings (decimal or `0x` hex);
    /// everything else is an [`ControlError::InvalidValue`].
    pub fn to_ctlnum(&self) -> Result<u8> {
        match self {
            Self::Int(v) => Ok(normalize_ctlnum(*v)),
            Self::UInt(v) => Ok(normalize_ctlnum((*v % 256) as i64)),
            Self::Bool(v) => Ok(u8::from(*v)),
            Self::VisibleString(s) => {
                let s = s.trim();
                let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                    i64::from_str_radix(hex, 16)
                } else {
                    s.parse::<i64>()
                };
                parsed
                    .map(normalize_ctlnum)
                    .map_err(|_| ControlError::invalid_value(format!("not a ctlNum: {s:?}")))
            }
            other => Err(ControlError::invalid_value(format!(
                "not a ctlNum: {other:?}"
            ))),
        }
    }
}

/// Normalize a raw sequence number into the modulo-256 ctlNum domain.
#[inline]
pub fn normalize_ctlnum(raw: i64) -> u8 {
    raw.rem_euclid(256) as u8
}
