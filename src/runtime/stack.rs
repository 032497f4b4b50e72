//! WebAssembly value stack

use super::{RuntimeError, Value};
use crate::parser::module::ValueType;

/// The operand stack shared by every frame of an invocation
#[derive(Debug, Default)]
pub struct Stack {
    values: Vec<Value>,
}

impl Stack {
    pub fn new() -> Self {
        Stack { values: Vec::new() }
    }

    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    pub fn push_all(&mut self, values: impl IntoIterator<Item = Value>) {
        self.values.extend(values);
    }

    pub fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.values.pop().ok_or(RuntimeError::StackUnderflow)
    }

    /// Pop a value and check its type
    pub fn pop_typed(&mut self, expected: ValueType) -> Result<Value, RuntimeError> {
        let value = self.pop()?;
        if value.typ() != expected {
            return Err(RuntimeError::TypeMismatch {
                expected,
                actual: value.typ(),
            });
        }
        Ok(value)
    }

    pub fn pop_i32(&mut self) -> Result<i32, RuntimeError> {
        match self.pop()? {
            Value::I32(v) => Ok(v),
            other => Err(mismatch(ValueType::I32, &other)),
        }
    }

    pub fn pop_i64(&mut self) -> Result<i64, RuntimeError> {
        match self.pop()? {
            Value::I64(v) => Ok(v),
            other => Err(mismatch(ValueType::I64, &other)),
        }
    }

    pub fn pop_f32(&mut self) -> Result<f32, RuntimeError> {
        match self.pop()? {
            Value::F32(v) => Ok(v),
            other => Err(mismatch(ValueType::F32, &other)),
        }
    }

    pub fn pop_f64(&mut self) -> Result<f64, RuntimeError> {
        match self.pop()? {
            Value::F64(v) => Ok(v),
            other => Err(mismatch(ValueType::F64, &other)),
        }
    }

    /// Pop values matching `types`, returned in declaration order.
    pub fn pop_values(&mut self, types: &[ValueType]) -> Result<Vec<Value>, RuntimeError> {
        let mut values = types
            .iter()
            .rev()
            .map(|ty| self.pop_typed(*ty))
            .collect::<Result<Vec<Value>, RuntimeError>>()?;
        values.reverse();
        Ok(values)
    }

    /// Drop everything between `height` and the top `keep` values, as a
    /// branch does when it leaves a block.
    pub fn unwind(&mut self, height: usize, keep: usize) -> Result<(), RuntimeError> {
        let first_kept = self
            .values
            .len()
            .checked_sub(keep)
            .filter(|first| *first >= height)
            .ok_or(RuntimeError::StackUnderflow)?;
        self.values.drain(height..first_kept);
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn peek(&self) -> Option<&Value> {
        self.values.last()
    }
}

fn mismatch(expected: ValueType, actual: &Value) -> RuntimeError {
    RuntimeError::TypeMismatch {
        expected,
        actual: actual.typ(),
    }
}
