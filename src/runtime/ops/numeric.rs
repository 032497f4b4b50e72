//! Numeric instructions: tests, comparisons and arithmetic
//!
//! Integer arithmetic wraps; division and remainder trap on a zero divisor,
//! and signed division traps on `MIN / -1`. Float `min`/`max` propagate NaN
//! and order `-0.0` below `+0.0`.

use super::conversion;
use super::{RuntimeError, Stack, Value};
use crate::parser::instruction::NumericOp;

/// Execute a single numeric instruction against the stack
pub fn execute(op: NumericOp, stack: &mut Stack) -> Result<(), RuntimeError> {
    use NumericOp::*;

    match op {
        // i32 test and comparison
        I32Eqz => unop!(stack, pop_i32, I32, |a| (a == 0) as i32),
        I32Eq => binop!(stack, pop_i32, I32, |a, b| (a == b) as i32),
        I32Ne => binop!(stack, pop_i32, I32, |a, b| (a != b) as i32),
        I32LtS => binop!(stack, pop_i32, I32, |a, b| (a < b) as i32),
        I32LtU => binop!(stack, pop_i32, I32, |a, b| ((a as u32) < (b as u32)) as i32),
        I32GtS => binop!(stack, pop_i32, I32, |a, b| (a > b) as i32),
        I32GtU => binop!(stack, pop_i32, I32, |a, b| ((a as u32) > (b as u32)) as i32),
        I32LeS => binop!(stack, pop_i32, I32, |a, b| (a <= b) as i32),
        I32LeU => binop!(stack, pop_i32, I32, |a, b| ((a as u32) <= (b as u32)) as i32),
        I32GeS => binop!(stack, pop_i32, I32, |a, b| (a >= b) as i32),
        I32GeU => binop!(stack, pop_i32, I32, |a, b| ((a as u32) >= (b as u32)) as i32),

        // i64 test and comparison
        I64Eqz => unop!(stack, pop_i64, I32, |a| (a == 0) as i32),
        I64Eq => binop!(stack, pop_i64, I32, |a, b| (a == b) as i32),
        I64Ne => binop!(stack, pop_i64, I32, |a, b| (a != b) as i32),
        I64LtS => binop!(stack, pop_i64, I32, |a, b| (a < b) as i32),
        I64LtU => binop!(stack, pop_i64, I32, |a, b| ((a as u64) < (b as u64)) as i32),
        I64GtS => binop!(stack, pop_i64, I32, |a, b| (a > b) as i32),
        I64GtU => binop!(stack, pop_i64, I32, |a, b| ((a as u64) > (b as u64)) as i32),
        I64LeS => binop!(stack, pop_i64, I32, |a, b| (a <= b) as i32),
        I64LeU => binop!(stack, pop_i64, I32, |a, b| ((a as u64) <= (b as u64)) as i32),
        I64GeS => binop!(stack, pop_i64, I32, |a, b| (a >= b) as i32),
        I64GeU => binop!(stack, pop_i64, I32, |a, b| ((a as u64) >= (b as u64)) as i32),

        // float comparison, false whenever a NaN is involved (except ne)
        F32Eq => binop!(stack, pop_f32, I32, |a, b| (a == b) as i32),
        F32Ne => binop!(stack, pop_f32, I32, |a, b| (a != b) as i32),
        F32Lt => binop!(stack, pop_f32, I32, |a, b| (a < b) as i32),
        F32Gt => binop!(stack, pop_f32, I32, |a, b| (a > b) as i32),
        F32Le => binop!(stack, pop_f32, I32, |a, b| (a <= b) as i32),
        F32Ge => binop!(stack, pop_f32, I32, |a, b| (a >= b) as i32),
        F64Eq => binop!(stack, pop_f64, I32, |a, b| (a == b) as i32),
        F64Ne => binop!(stack, pop_f64, I32, |a, b| (a != b) as i32),
        F64Lt => binop!(stack, pop_f64, I32, |a, b| (a < b) as i32),
        F64Gt => binop!(stack, pop_f64, I32, |a, b| (a > b) as i32),
        F64Le => binop!(stack, pop_f64, I32, |a, b| (a <= b) as i32),
        F64Ge => binop!(stack, pop_f64, I32, |a, b| (a >= b) as i32),

        // i32 arithmetic
        I32Clz => unop!(stack, pop_i32, I32, |a| a.leading_zeros() as i32),
        I32Ctz => unop!(stack, pop_i32, I32, |a| a.trailing_zeros() as i32),
        I32Popcnt => unop!(stack, pop_i32, I32, |a| a.count_ones() as i32),
        I32Add => binop!(stack, pop_i32, I32, |a, b| a.wrapping_add(b)),
        I32Sub => binop!(stack, pop_i32, I32, |a, b| a.wrapping_sub(b)),
        I32Mul => binop!(stack, pop_i32, I32, |a, b| a.wrapping_mul(b)),
        I32DivS => binop!(stack, pop_i32, I32, |a, b| {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            a.checked_div(b).ok_or(RuntimeError::IntegerOverflow)?
        }),
        I32DivU => binop!(stack, pop_i32, I32, |a, b| {
            (a as u32).checked_div(b as u32).ok_or(RuntimeError::DivisionByZero)? as i32
        }),
        I32RemS => binop!(stack, pop_i32, I32, |a, b| {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            a.wrapping_rem(b)
        }),
        I32RemU => binop!(stack, pop_i32, I32, |a, b| {
            (a as u32).checked_rem(b as u32).ok_or(RuntimeError::DivisionByZero)? as i32
        }),
        I32And => binop!(stack, pop_i32, I32, |a, b| a & b),
        I32Or => binop!(stack, pop_i32, I32, |a, b| a | b),
        I32Xor => binop!(stack, pop_i32, I32, |a, b| a ^ b),
        I32Shl => binop!(stack, pop_i32, I32, |a, b| a.wrapping_shl(b as u32)),
        I32ShrS => binop!(stack, pop_i32, I32, |a, b| a.wrapping_shr(b as u32)),
        I32ShrU => binop!(stack, pop_i32, I32, |a, b| (a as u32).wrapping_shr(b as u32) as i32),
        I32Rotl => binop!(stack, pop_i32, I32, |a, b| a.rotate_left(b as u32)),
        I32Rotr => binop!(stack, pop_i32, I32, |a, b| a.rotate_right(b as u32)),

        // i64 arithmetic
        I64Clz => unop!(stack, pop_i64, I64, |a| a.leading_zeros() as i64),
        I64Ctz => unop!(stack, pop_i64, I64, |a| a.trailing_zeros() as i64),
        I64Popcnt => unop!(stack, pop_i64, I64, |a| a.count_ones() as i64),
        I64Add => binop!(stack, pop_i64, I64, |a, b| a.wrapping_add(b)),
        I64Sub => binop!(stack, pop_i64, I64, |a, b| a.wrapping_sub(b)),
        I64Mul => binop!(stack, pop_i64, I64, |a, b| a.wrapping_mul(b)),
        I64DivS => binop!(stack, pop_i64, I64, |a, b| {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            a.checked_div(b).ok_or(RuntimeError::IntegerOverflow)?
        }),
        I64DivU => binop!(stack, pop_i64, I64, |a, b| {
            (a as u64).checked_div(b as u64).ok_or(RuntimeError::DivisionByZero)? as i64
        }),
        I64RemS => binop!(stack, pop_i64, I64, |a, b| {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            a.wrapping_rem(b)
        }),
        I64RemU => binop!(stack, pop_i64, I64, |a, b| {
            (a as u64).checked_rem(b as u64).ok_or(RuntimeError::DivisionByZero)? as i64
        }),
        I64And => binop!(stack, pop_i64, I64, |a, b| a & b),
        I64Or => binop!(stack, pop_i64, I64, |a, b| a | b),
        I64Xor => binop!(stack, pop_i64, I64, |a, b| a ^ b),
        I64Shl => binop!(stack, pop_i64, I64, |a, b| a.wrapping_shl(b as u32)),
        I64ShrS => binop!(stack, pop_i64, I64, |a, b| a.wrapping_shr(b as u32)),
        I64ShrU => binop!(stack, pop_i64, I64, |a, b| (a as u64).wrapping_shr(b as u32) as i64),
        I64Rotl => binop!(stack, pop_i64, I64, |a, b| a.rotate_left((b & 63) as u32)),
        I64Rotr => binop!(stack, pop_i64, I64, |a, b| a.rotate_right((b & 63) as u32)),

        // f32 arithmetic
        F32Abs => unop!(stack, pop_f32, F32, |a| a.abs()),
        F32Neg => unop!(stack, pop_f32, F32, |a| -a),
        F32Ceil => unop!(stack, pop_f32, F32, |a| a.ceil()),
        F32Floor => unop!(stack, pop_f32, F32, |a| a.floor()),
        F32Trunc => unop!(stack, pop_f32, F32, |a| a.trunc()),
        F32Nearest => unop!(stack, pop_f32, F32, |a| a.round_ties_even()),
        F32Sqrt => unop!(stack, pop_f32, F32, |a| a.sqrt()),
        F32Add => binop!(stack, pop_f32, F32, |a, b| a + b),
        F32Sub => binop!(stack, pop_f32, F32, |a, b| a - b),
        F32Mul => binop!(stack, pop_f32, F32, |a, b| a * b),
        F32Div => binop!(stack, pop_f32, F32, |a, b| a / b),
        F32Min => binop!(stack, pop_f32, F32, |a, b| f32_min(a, b)),
        F32Max => binop!(stack, pop_f32, F32, |a, b| f32_max(a, b)),
        F32Copysign => binop!(stack, pop_f32, F32, |a, b| a.copysign(b)),

        // f64 arithmetic
        F64Abs => unop!(stack, pop_f64, F64, |a| a.abs()),
        F64Neg => unop!(stack, pop_f64, F64, |a| -a),
        F64Ceil => unop!(stack, pop_f64, F64, |a| a.ceil()),
        F64Floor => unop!(stack, pop_f64, F64, |a| a.floor()),
        F64Trunc => unop!(stack, pop_f64, F64, |a| a.trunc()),
        F64Nearest => unop!(stack, pop_f64, F64, |a| a.round_ties_even()),
        F64Sqrt => unop!(stack, pop_f64, F64, |a| a.sqrt()),
        F64Add => binop!(stack, pop_f64, F64, |a, b| a + b),
        F64Sub => binop!(stack, pop_f64, F64, |a, b| a - b),
        F64Mul => binop!(stack, pop_f64, F64, |a, b| a * b),
        F64Div => binop!(stack, pop_f64, F64, |a, b| a / b),
        F64Min => binop!(stack, pop_f64, F64, |a, b| f64_min(a, b)),
        F64Max => binop!(stack, pop_f64, F64, |a, b| f64_max(a, b)),
        F64Copysign => binop!(stack, pop_f64, F64, |a, b| a.copysign(b)),

        _ => conversion::execute(op, stack)?,
    }
    Ok(())
}

macro_rules! float_min_max {
    ($min:ident, $max:ident, $t:ty) => {
        fn $min(a: $t, b: $t) -> $t {
            if a.is_nan() || b.is_nan() {
                <$t>::NAN
            } else if a == 0.0 && b == 0.0 {
                if a.is_sign_negative() { a } else { b }
            } else {
                a.min(b)
            }
        }

        fn $max(a: $t, b: $t) -> $t {
            if a.is_nan() || b.is_nan() {
                <$t>::NAN
            } else if a == 0.0 && b == 0.0 {
                if a.is_sign_positive() { a } else { b }
            } else {
                a.max(b)
            }
        }
    };
}

float_min_max!(f32_min, f32_max, f32);
float_min_max!(f64_min, f64_max, f64);
