//! Memory instructions
//!
//! The address operand is an unsigned i32; the static offset from the memarg
//! is added to it without wrapping, so `addr + offset` past 4GiB is simply out
//! of bounds.

use super::{MemArg, Memory, RuntimeError, Stack, Value};
use crate::parser::instruction::{LoadOp, StoreOp};

/// `t.load*`: pop the address, push the loaded value
pub fn load(stack: &mut Stack, memory: &Memory, op: LoadOp, memarg: &MemArg) -> Result<(), RuntimeError> {
    use LoadOp::*;

    let addr = stack.pop_i32()? as u32;
    let offset = memarg.offset;
    let value = match op {
        I32Load => Value::I32(memory.read_u32(addr, offset)? as i32),
        I64Load => Value::I64(memory.read_u64(addr, offset)? as i64),
        F32Load => Value::F32(f32::from_bits(memory.read_u32(addr, offset)?)),
        F64Load => Value::F64(f64::from_bits(memory.read_u64(addr, offset)?)),
        I32Load8S => Value::I32(memory.read_u8(addr, offset)? as i8 as i32),
        I32Load8U => Value::I32(memory.read_u8(addr, offset)? as i32),
        I32Load16S => Value::I32(memory.read_u16(addr, offset)? as i16 as i32),
        I32Load16U => Value::I32(memory.read_u16(addr, offset)? as i32),
        I64Load8S => Value::I64(memory.read_u8(addr, offset)? as i8 as i64),
        I64Load8U => Value::I64(memory.read_u8(addr, offset)? as i64),
        I64Load16S => Value::I64(memory.read_u16(addr, offset)? as i16 as i64),
        I64Load16U => Value::I64(memory.read_u16(addr, offset)? as i64),
        I64Load32S => Value::I64(memory.read_u32(addr, offset)? as i32 as i64),
        I64Load32U => Value::I64(memory.read_u32(addr, offset)? as i64),
    };
    stack.push(value);
    Ok(())
}

/// `t.store*`: pop the value then the address, store the (wrapped) value
pub fn store(stack: &mut Stack, memory: &mut Memory, op: StoreOp, memarg: &MemArg) -> Result<(), RuntimeError> {
    use StoreOp::*;

    let offset = memarg.offset;
    match op {
        I32Store | I32Store8 | I32Store16 => {
            let value = stack.pop_i32()?;
            let addr = stack.pop_i32()? as u32;
            match op {
                I32Store8 => memory.write_u8(addr, offset, value as u8),
                I32Store16 => memory.write_u16(addr, offset, value as u16),
                _ => memory.write_u32(addr, offset, value as u32),
            }
        }
        I64Store | I64Store8 | I64Store16 | I64Store32 => {
            let value = stack.pop_i64()?;
            let addr = stack.pop_i32()? as u32;
            match op {
                I64Store8 => memory.write_u8(addr, offset, value as u8),
                I64Store16 => memory.write_u16(addr, offset, value as u16),
                I64Store32 => memory.write_u32(addr, offset, value as u32),
                _ => memory.write_u64(addr, offset, value as u64),
            }
        }
        F32Store => {
            let value = stack.pop_f32()?;
            let addr = stack.pop_i32()? as u32;
            memory.write_u32(addr, offset, value.to_bits())
        }
        F64Store => {
            let value = stack.pop_f64()?;
            let addr = stack.pop_i32()? as u32;
            memory.write_u64(addr, offset, value.to_bits())
        }
    }
}

/// `memory.grow`: pop the page delta, push the old size or -1
pub fn grow(stack: &mut Stack, memory: &mut Memory) -> Result<(), RuntimeError> {
    let delta = stack.pop_i32()? as u32;
    stack.push(Value::I32(memory.grow(delta)));
    Ok(())
}
