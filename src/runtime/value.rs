//! WebAssembly value representation

use crate::parser::module::ValueType;
use fhex::ToHex;
use std::fmt;

/// Runtime representation of WebAssembly values
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Value {
    /// The zero value of a type, used to initialise locals
    pub fn default_for(value_type: ValueType) -> Value {
        match value_type {
            ValueType::I32 => Value::I32(0),
            ValueType::I64 => Value::I64(0),
            ValueType::F32 => Value::F32(0.0),
            ValueType::F64 => Value::F64(0.0),
        }
    }

    /// Get the WebAssembly type of this value
    pub fn typ(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Parse a textual argument as a value of the given type.
    ///
    /// Integers accept signed or unsigned decimal (`-1` and `4294967295` are
    /// the same i32); floats accept decimal notation or raw bits in hex
    /// (`0x3fc00000`).
    pub fn parse(value_type: ValueType, text: &str) -> Result<Value, String> {
        let text = text.trim();
        match value_type {
            ValueType::I32 => text
                .parse::<i32>()
                .or_else(|_| text.parse::<u32>().map(|v| v as i32))
                .map(Value::I32)
                .map_err(|e| format!("failed to parse i32 from '{text}': {e}")),
            ValueType::I64 => text
                .parse::<i64>()
                .or_else(|_| text.parse::<u64>().map(|v| v as i64))
                .map(Value::I64)
                .map_err(|e| format!("failed to parse i64 from '{text}': {e}")),
            ValueType::F32 => match text.strip_prefix("0x") {
                Some(hex) => u32::from_str_radix(hex, 16)
                    .map(|bits| Value::F32(f32::from_bits(bits)))
                    .map_err(|e| format!("failed to parse f32 bits from '{text}': {e}")),
                None => text
                    .parse::<f32>()
                    .map(Value::F32)
                    .map_err(|e| format!("failed to parse f32 from '{text}': {e}")),
            },
            ValueType::F64 => match text.strip_prefix("0x") {
                Some(hex) => u64::from_str_radix(hex, 16)
                    .map(|bits| Value::F64(f64::from_bits(bits)))
                    .map_err(|e| format!("failed to parse f64 bits from '{text}': {e}")),
                None => text
                    .parse::<f64>()
                    .map(Value::F64)
                    .map_err(|e| format!("failed to parse f64 from '{text}': {e}")),
            },
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "i32:{v}"),
            Value::I64(v) => write!(f, "i64:{v}"),
            Value::F32(v) => write!(f, "f32:{}", v.to_hex()),
            Value::F64(v) => write!(f, "f64:{}", v.to_hex()),
        }
    }
}
