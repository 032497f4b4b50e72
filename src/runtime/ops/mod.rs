//! Instruction implementations, grouped by category
//!
//! Each operation pops its operands from the [`Stack`], checking their types,
//! and pushes its result. Operand type errors surface as
//! [`RuntimeError::TypeMismatch`] traps.

/// `unop!(stack, pop_i32, I32, |a| expr)`: pop one operand, push `expr`
macro_rules! unop {
    ($stack:ident, $pop:ident, $variant:ident, |$a:ident| $body:expr) => {{
        let $a = $stack.$pop()?;
        $stack.push(Value::$variant($body));
    }};
}

/// `binop!(stack, pop_i32, I32, |a, b| expr)`: pop `b` then `a`, push `expr`
macro_rules! binop {
    ($stack:ident, $pop:ident, $variant:ident, |$a:ident, $b:ident| $body:expr) => {{
        let $b = $stack.$pop()?;
        let $a = $stack.$pop()?;
        $stack.push(Value::$variant($body));
    }};
}

pub mod conversion;
pub mod memory;
pub mod numeric;

pub(crate) use crate::parser::instruction::MemArg;
pub(crate) use crate::runtime::memory::Memory;
pub(crate) use crate::runtime::stack::Stack;
pub(crate) use crate::runtime::{RuntimeError, Value};
