//! Conversion instructions
//!
//! Float to integer truncation traps on NaN ("invalid conversion to integer")
//! and on values whose truncation falls outside the target range ("integer
//! overflow"). Range checks are done in f64, which represents every f32 and
//! every bound used here exactly.

use super::{RuntimeError, Stack, Value};
use crate::parser::instruction::NumericOp;

/// Truncate toward zero, trapping unless `min <= trunc(value) < max`.
fn truncate(value: f64, min: f64, max: f64) -> Result<f64, RuntimeError> {
    if value.is_nan() {
        return Err(RuntimeError::InvalidConversion);
    }
    let truncated = value.trunc();
    if truncated < min || truncated >= max {
        return Err(RuntimeError::IntegerOverflow);
    }
    Ok(truncated)
}

const I32_RANGE: (f64, f64) = (-2147483648.0, 2147483648.0);
const U32_RANGE: (f64, f64) = (0.0, 4294967296.0);
const I64_RANGE: (f64, f64) = (-9223372036854775808.0, 9223372036854775808.0);
const U64_RANGE: (f64, f64) = (0.0, 18446744073709551616.0);

pub fn trunc_to_i32(value: f64) -> Result<i32, RuntimeError> {
    truncate(value, I32_RANGE.0, I32_RANGE.1).map(|t| t as i32)
}

pub fn trunc_to_u32(value: f64) -> Result<i32, RuntimeError> {
    truncate(value, U32_RANGE.0, U32_RANGE.1).map(|t| t as u32 as i32)
}

pub fn trunc_to_i64(value: f64) -> Result<i64, RuntimeError> {
    truncate(value, I64_RANGE.0, I64_RANGE.1).map(|t| t as i64)
}

pub fn trunc_to_u64(value: f64) -> Result<i64, RuntimeError> {
    truncate(value, U64_RANGE.0, U64_RANGE.1).map(|t| t as u64 as i64)
}

/// Execute a conversion or sign-extension instruction
pub fn execute(op: NumericOp, stack: &mut Stack) -> Result<(), RuntimeError> {
    use NumericOp::*;

    match op {
        I32WrapI64 => unop!(stack, pop_i64, I32, |a| a as i32),
        I32TruncF32S => unop!(stack, pop_f32, I32, |a| trunc_to_i32(a as f64)?),
        I32TruncF32U => unop!(stack, pop_f32, I32, |a| trunc_to_u32(a as f64)?),
        I32TruncF64S => unop!(stack, pop_f64, I32, |a| trunc_to_i32(a)?),
        I32TruncF64U => unop!(stack, pop_f64, I32, |a| trunc_to_u32(a)?),
        I64ExtendI32S => unop!(stack, pop_i32, I64, |a| a as i64),
        I64ExtendI32U => unop!(stack, pop_i32, I64, |a| a as u32 as i64),
        I64TruncF32S => unop!(stack, pop_f32, I64, |a| trunc_to_i64(a as f64)?),
        I64TruncF32U => unop!(stack, pop_f32, I64, |a| trunc_to_u64(a as f64)?),
        I64TruncF64S => unop!(stack, pop_f64, I64, |a| trunc_to_i64(a)?),
        I64TruncF64U => unop!(stack, pop_f64, I64, |a| trunc_to_u64(a)?),
        F32ConvertI32S => unop!(stack, pop_i32, F32, |a| a as f32),
        F32ConvertI32U => unop!(stack, pop_i32, F32, |a| a as u32 as f32),
        F32ConvertI64S => unop!(stack, pop_i64, F32, |a| a as f32),
        F32ConvertI64U => unop!(stack, pop_i64, F32, |a| a as u64 as f32),
        F32DemoteF64 => unop!(stack, pop_f64, F32, |a| a as f32),
        F64ConvertI32S => unop!(stack, pop_i32, F64, |a| a as f64),
        F64ConvertI32U => unop!(stack, pop_i32, F64, |a| a as u32 as f64),
        F64ConvertI64S => unop!(stack, pop_i64, F64, |a| a as f64),
        F64ConvertI64U => unop!(stack, pop_i64, F64, |a| a as u64 as f64),
        F64PromoteF32 => unop!(stack, pop_f32, F64, |a| a as f64),
        I32ReinterpretF32 => unop!(stack, pop_f32, I32, |a| a.to_bits() as i32),
        I64ReinterpretF64 => unop!(stack, pop_f64, I64, |a| a.to_bits() as i64),
        F32ReinterpretI32 => unop!(stack, pop_i32, F32, |a| f32::from_bits(a as u32)),
        F64ReinterpretI64 => unop!(stack, pop_i64, F64, |a| f64::from_bits(a as u64)),
        I32Extend8S => unop!(stack, pop_i32, I32, |a| a as i8 as i32),
        I32Extend16S => unop!(stack, pop_i32, I32, |a| a as i16 as i32),
        I64Extend8S => unop!(stack, pop_i64, I64, |a| a as i8 as i64),
        I64Extend16S => unop!(stack, pop_i64, I64, |a| a as i16 as i64),
        I64Extend32S => unop!(stack, pop_i64, I64, |a| a as i32 as i64),
        // every other numeric op is handled by numeric::execute
        _ => return super::numeric::execute(op, stack),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(-2147483648.9, Ok(i32::MIN))]
    #[case(2147483647.9, Ok(i32::MAX))]
    #[case(-0.99, Ok(0))]
    #[case(2147483648.0, Err("integer overflow"))]
    #[case(-2147483649.0, Err("integer overflow"))]
    #[case(f64::NAN, Err("invalid conversion to integer"))]
    #[case(f64::INFINITY, Err("integer overflow"))]
    fn test_trunc_to_i32(#[case] value: f64, #[case] expected: Result<i32, &str>) {
        assert_eq!(trunc_to_i32(value).map_err(|e| e.to_string()), expected.map_err(String::from));
    }

    #[rstest]
    #[case(4294967295.5, Ok(-1))]
    #[case(-0.5, Ok(0))]
    #[case(-1.0, Err("integer overflow"))]
    #[case(4294967296.0, Err("integer overflow"))]
    fn test_trunc_to_u32(#[case] value: f64, #[case] expected: Result<i32, &str>) {
        assert_eq!(trunc_to_u32(value).map_err(|e| e.to_string()), expected.map_err(String::from));
    }

    #[test]
    fn test_trunc_64() {
        assert_eq!(trunc_to_i64(-9223372036854775808.0).unwrap(), i64::MIN);
        assert!(trunc_to_i64(9223372036854775808.0).is_err());
        assert_eq!(trunc_to_u64(18446744073709549568.0).unwrap(), -2048);
        assert!(trunc_to_u64(18446744073709551616.0).is_err());
        // f32 just below 2^31 truncates, 2^31 itself overflows
        assert_eq!(trunc_to_i32(2147483520.0f32 as f64).unwrap(), 2147483520);
        assert!(trunc_to_i32(2147483648.0f32 as f64).is_err());
    }

    #[test]
    fn test_execute_conversions() {
        let mut stack = Stack::new();
        stack.push(Value::I32(-1));
        execute(NumericOp::I64ExtendI32U, &mut stack).unwrap();
        assert_eq!(stack.pop().unwrap(), Value::I64(0xffff_ffff));

        stack.push(Value::I32(0x80));
        execute(NumericOp::I32Extend8S, &mut stack).unwrap();
        assert_eq!(stack.pop().unwrap(), Value::I32(-128));

        stack.push(Value::F32(-1.5));
        execute(NumericOp::I32ReinterpretF32, &mut stack).unwrap();
        assert_eq!(stack.pop().unwrap(), Value::I32(0xbfc0_0000u32 as i32));

        stack.push(Value::I32(-1));
        execute(NumericOp::F64ConvertI32U, &mut stack).unwrap();
        assert_eq!(stack.pop().unwrap(), Value::F64(4294967295.0));

        stack.push(Value::F32(f32::NAN));
        assert!(matches!(
            execute(NumericOp::I64TruncF32S, &mut stack),
            Err(RuntimeError::InvalidConversion)
        ));
    }
}
