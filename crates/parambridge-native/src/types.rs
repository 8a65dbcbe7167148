//! Parameter type codes, masks and values.

use std::fmt;

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::NativeError;

/// Wire-level parameter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ParamType {
    Uint8 = 0,
    Uint16 = 1,
    Uint32 = 2,
    Uint64 = 3,
    Int8 = 4,
    Int16 = 5,
    Int32 = 6,
    Int64 = 7,
    Xint8 = 8,
    Xint16 = 9,
    Xint32 = 10,
    Xint64 = 11,
    Float = 12,
    Double = 13,
    String = 14,
    Data = 15,
}

impl ParamType {
    /// Parse a raw type code.
    pub fn from_code(code: u8) -> Result<Self, NativeError> {
        Self::try_from(code).map_err(|_| NativeError::InvalidParamType(code))
    }

    pub fn code(self) -> u8 {
        self.into()
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            ParamType::Uint8
                | ParamType::Uint16
                | ParamType::Uint32
                | ParamType::Uint64
                | ParamType::Xint8
                | ParamType::Xint16
                | ParamType::Xint32
                | ParamType::Xint64
        )
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ParamType::Int8 | ParamType::Int16 | ParamType::Int32 | ParamType::Int64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, ParamType::Float | ParamType::Double)
    }

    /// String and data parameters store one buffer, not one value per index.
    pub fn is_buffer(self) -> bool {
        matches!(self, ParamType::String | ParamType::Data)
    }

    /// Zero value for a freshly allocated slot of this type.
    pub fn zero(self) -> ParamValue {
        match self {
            t if t.is_unsigned() => ParamValue::UInt(0),
            t if t.is_signed() => ParamValue::Int(0),
            t if t.is_float() => ParamValue::Float(0.0),
            ParamType::String => ParamValue::Str(String::new()),
            _ => ParamValue::Bytes(Vec::new()),
        }
    }

    /// Check that `value` may be stored in a parameter of this type.
    pub fn accepts(self, value: &ParamValue) -> bool {
        match value {
            ParamValue::UInt(v) => self.is_unsigned() && *v <= self.max_unsigned(),
            ParamValue::Int(v) => {
                (self.is_signed() && self.signed_range().contains(v))
                    || (self.is_unsigned() && *v >= 0 && (*v as u64) <= self.max_unsigned())
            }
            ParamValue::Float(_) => self.is_float(),
            ParamValue::Str(_) => self == ParamType::String,
            ParamValue::Bytes(_) => self == ParamType::Data,
        }
    }

    /// Normalize an accepted value to this type's storage variant.
    pub fn coerce(self, value: ParamValue) -> Result<ParamValue, NativeError> {
        if !self.accepts(&value) {
            return Err(NativeError::ValueType {
                expected: self.name(),
                found: value.type_name(),
            });
        }
        Ok(match value {
            ParamValue::Int(v) if self.is_unsigned() => ParamValue::UInt(v as u64),
            ParamValue::Float(v) if self == ParamType::Float => ParamValue::Float(v as f32 as f64),
            other => other,
        })
    }

    fn max_unsigned(self) -> u64 {
        match self {
            ParamType::Uint8 | ParamType::Xint8 => u8::MAX as u64,
            ParamType::Uint16 | ParamType::Xint16 => u16::MAX as u64,
            ParamType::Uint32 | ParamType::Xint32 => u32::MAX as u64,
            _ => u64::MAX,
        }
    }

    fn signed_range(self) -> std::ops::RangeInclusive<i64> {
        match self {
            ParamType::Int8 => i8::MIN as i64..=i8::MAX as i64,
            ParamType::Int16 => i16::MIN as i64..=i16::MAX as i64,
            ParamType::Int32 => i32::MIN as i64..=i32::MAX as i64,
            _ => i64::MIN..=i64::MAX,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ParamType::Uint8 => "uint8",
            ParamType::Uint16 => "uint16",
            ParamType::Uint32 => "uint32",
            ParamType::Uint64 => "uint64",
            ParamType::Int8 => "int8",
            ParamType::Int16 => "int16",
            ParamType::Int32 => "int32",
            ParamType::Int64 => "int64",
            ParamType::Xint8 => "xint8",
            ParamType::Xint16 => "xint16",
            ParamType::Xint32 => "xint32",
            ParamType::Xint64 => "xint64",
            ParamType::Float => "float",
            ParamType::Double => "double",
            ParamType::String => "string",
            ParamType::Data => "data",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Parameter mask bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ParamMask: u32 {
        const READONLY = 1 << 0;
        const REMOTE   = 1 << 1;
        const PERSIST  = 1 << 2;
        const TELEM    = 1 << 3;
        const HIDDEN   = 1 << 4;
        const DEBUG    = 1 << 5;
        const CALIB    = 1 << 6;
        const CONFIG   = 1 << 7;
    }
}

/// A single cached parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl ParamValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Int(_) => "int",
            ParamValue::UInt(_) => "uint",
            ParamValue::Float(_) => "float",
            ParamValue::Str(_) => "string",
            ParamValue::Bytes(_) => "data",
        }
    }
}

/// Who created a record and therefore who may free it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// Created by the subsystem itself. Never freed by a bridge.
    Static,
    /// Created on demand through a bridge.
    Dynamic,
}

/// Command completion codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum CommandStatus {
    Exit = 1,
    Success = 0,
    Usage = -1,
    Invalid = -2,
    NoSpace = -3,
    Io = -4,
    NoMemory = -5,
    NotFound = -6,
    Break = -7,
}

impl CommandStatus {
    pub fn is_success(self) -> bool {
        self == CommandStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_codes() {
        assert_eq!(ParamType::from_code(0), Ok(ParamType::Uint8));
        assert_eq!(ParamType::from_code(14), Ok(ParamType::String));
        assert_eq!(
            ParamType::from_code(42),
            Err(NativeError::InvalidParamType(42))
        );
        assert_eq!(ParamType::Double.code(), 13);
    }

    #[test]
    fn test_range_checks() {
        assert!(ParamType::Uint8.accepts(&ParamValue::Int(255)));
        assert!(!ParamType::Uint8.accepts(&ParamValue::Int(256)));
        assert!(!ParamType::Uint8.accepts(&ParamValue::Int(-1)));
        assert!(ParamType::Int8.accepts(&ParamValue::Int(-128)));
        assert!(!ParamType::Int8.accepts(&ParamValue::UInt(3)));
        assert!(!ParamType::Float.accepts(&ParamValue::Int(1)));
    }

    #[test]
    fn test_coerce_normalizes_unsigned() {
        let value = ParamType::Uint16.coerce(ParamValue::Int(7)).unwrap();
        assert_eq!(value, ParamValue::UInt(7));
        assert!(ParamType::String.coerce(ParamValue::Int(7)).is_err());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(i32::from(CommandStatus::Invalid), -2);
        assert_eq!(CommandStatus::try_from(-6), Ok(CommandStatus::NotFound));
    }
}
