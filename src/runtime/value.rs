//! Managed values.
//!
//! [`Value`] is the single representation of data on the scripting side of
//! the bridge. [`FromValue`] and [`IntoValue`] convert between values and
//! Rust types for function bodies.

use std::fmt;

use parambridge_native::{ParamType, ParamValue};

use crate::command::Command;
use crate::error::{BridgeError, BridgeResult};
use crate::parameter::Parameter;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    /// Unsigned integers above `i64::MAX`. Smaller ones are always `Int`.
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Parameter(Parameter),
    Command(Command),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::UInt(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Parameter(_) => "Parameter",
            Value::Command(_) => "Command",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Integer value of an unsigned quantity.
    pub fn unsigned(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(v) => Value::Int(v),
            Err(_) => Value::UInt(v),
        }
    }

    /// Convert a cached native value.
    pub fn from_param_value(value: ParamValue) -> BridgeResult<Self> {
        Ok(match value {
            ParamValue::Int(v) => Value::Int(v),
            ParamValue::UInt(v) => Value::unsigned(v),
            ParamValue::Float(v) => Value::Float(v),
            ParamValue::Str(s) => Value::Str(s),
            ParamValue::Bytes(b) => Value::Bytes(b),
        })
    }

    /// Convert to a native value storable in a parameter of type `ty`.
    pub fn to_param_value(&self, ty: ParamType) -> BridgeResult<ParamValue> {
        let value = match self {
            Value::Bool(b) if !ty.is_float() && !ty.is_buffer() => ParamValue::Int(*b as i64),
            Value::Int(v) if ty.is_float() => ParamValue::Float(*v as f64),
            Value::Int(v) => ParamValue::Int(*v),
            Value::UInt(v) if ty.is_float() => ParamValue::Float(*v as f64),
            Value::UInt(v) => ParamValue::UInt(*v),
            Value::Float(v) => ParamValue::Float(*v),
            Value::Str(s) => ParamValue::Str(s.clone()),
            Value::Bytes(b) => ParamValue::Bytes(b.clone()),
            other => {
                return Err(BridgeError::TypeMismatch {
                    message: format!("cannot store {} in a {ty} parameter", other.type_name()),
                });
            }
        };
        if !ty.accepts(&value) {
            return Err(BridgeError::TypeMismatch {
                message: format!("value {self} does not fit a {ty} parameter"),
            });
        }
        Ok(value)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::Int(v) => write!(f, "Int({v})"),
            Value::UInt(v) => write!(f, "UInt({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Bytes(b) => write!(f, "Bytes({b:?})"),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Parameter(p) => write!(f, "Parameter({})", p.name()),
            Value::Command(c) => write!(f, "Command({})", c.name()),
        }
    }
}

/// Text form used when values are formatted into a command line.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Bytes(b) => {
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Parameter(p) => write!(f, "{}", p.name()),
            Value::Command(c) => write!(f, "{}", c.name()),
        }
    }
}

/// Handles compare by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Parameter(a), Value::Parameter(b)) => a.same_handle(b),
            (Value::Command(a), Value::Command(b)) => a.same_handle(b),
            _ => false,
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

/// Extract a Rust value from a [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> BridgeResult<Self>;
}

/// Convert a Rust value into a [`Value`].
pub trait IntoValue {
    fn into_value(self) -> Value;
}

fn mismatch(expected: &str, value: &Value) -> BridgeError {
    BridgeError::TypeMismatch {
        message: format!("expected {expected}, found {}", value.type_name()),
    }
}

macro_rules! impl_int_conversions {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value) -> BridgeResult<Self> {
                    match value {
                        Value::Int(v) => <$ty>::try_from(*v).map_err(|_| BridgeError::TypeMismatch {
                            message: format!("{v} does not fit in {}", stringify!($ty)),
                        }),
                        Value::UInt(v) => <$ty>::try_from(*v).map_err(|_| BridgeError::TypeMismatch {
                            message: format!("{v} does not fit in {}", stringify!($ty)),
                        }),
                        other => Err(mismatch("int", other)),
                    }
                }
            }

            impl IntoValue for $ty {
                fn into_value(self) -> Value {
                    Value::Int(self as i64)
                }
            }
        )*
    };
}

impl_int_conversions!(i8, i16, i32, i64, u8, u16, u32);

impl FromValue for u64 {
    fn from_value(value: &Value) -> BridgeResult<Self> {
        match value {
            Value::UInt(v) => Ok(*v),
            Value::Int(v) => u64::try_from(*v).map_err(|_| BridgeError::TypeMismatch {
                message: format!("{v} does not fit in u64"),
            }),
            other => Err(mismatch("int", other)),
        }
    }
}

impl IntoValue for u64 {
    fn into_value(self) -> Value {
        Value::unsigned(self)
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> BridgeResult<Self> {
        match value {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            Value::UInt(v) => Ok(*v as f64),
            other => Err(mismatch("float", other)),
        }
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> BridgeResult<Self> {
        match value {
            Value::Bool(v) => Ok(*v),
            other => Err(mismatch("bool", other)),
        }
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> BridgeResult<Self> {
        match value {
            Value::Str(s) => Ok(s.clone()),
            other => Err(mismatch("str", other)),
        }
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::Str(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Str(self.to_string())
    }
}

impl FromValue for Parameter {
    fn from_value(value: &Value) -> BridgeResult<Self> {
        match value {
            Value::Parameter(p) => Ok(p.clone()),
            other => Err(mismatch("Parameter", other)),
        }
    }
}

impl IntoValue for Parameter {
    fn into_value(self) -> Value {
        Value::Parameter(self)
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> BridgeResult<Self> {
        Ok(value.clone())
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl IntoValue for () {
    fn into_value(self) -> Value {
        Value::None
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(IntoValue::into_value).collect())
    }
}

macro_rules! impl_from_for_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    value.into_value()
                }
            }
        )*
    };
}

impl_from_for_value!(i8, i16, i32, i64, u8, u16, u32, u64, f64, bool, String, Parameter);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}
