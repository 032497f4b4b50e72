use log::trace;

use super::{BlockType, Instruction, LoadOp, MemArg, NumericOp, StoreOp};
use crate::parser::limits::{MAX_BR_TABLE_LABELS, MAX_FUNCTION_LOCALS};
use crate::parser::module::{ConstExpr, FunctionBody, ValueType};
use crate::parser::reader::Reader;
use crate::parser::DecodeError;

/// A structured instruction whose `end` (and possibly `else`) has not been
/// seen yet.
struct OpenBlock {
    start: usize,
    else_at: Option<usize>,
}

/// Decode one entry of the code section: local declarations followed by the
/// instruction sequence, which must end exactly at the end of `reader`.
pub fn decode_function_body(reader: &mut Reader) -> Result<FunctionBody, DecodeError> {
    let locals = decode_locals(reader)?;

    let mut code: Vec<Instruction> = Vec::new();
    let mut open: Vec<OpenBlock> = Vec::new();

    loop {
        let pc = code.len();
        let offset = reader.pos();
        let opcode = reader.read_byte()?;
        let instruction = match opcode {
            0x02 => {
                let block_type = decode_block_type(reader)?;
                open.push(OpenBlock { start: pc, else_at: None });
                Instruction::Block { block_type, end: 0 }
            }
            0x03 => {
                let block_type = decode_block_type(reader)?;
                open.push(OpenBlock { start: pc, else_at: None });
                Instruction::Loop { block_type }
            }
            0x04 => {
                let block_type = decode_block_type(reader)?;
                open.push(OpenBlock { start: pc, else_at: None });
                Instruction::If {
                    block_type,
                    else_at: None,
                    end: 0,
                }
            }
            0x05 => {
                let block = open.last_mut().ok_or_else(|| malformed(offset, "else outside of if"))?;
                match code.get(block.start) {
                    Some(Instruction::If { .. }) if block.else_at.is_none() => block.else_at = Some(pc),
                    _ => return Err(malformed(offset, "else without matching if")),
                }
                Instruction::Else { end: 0 }
            }
            0x0b => match open.pop() {
                Some(block) => {
                    close_block(&mut code, block, pc);
                    Instruction::End
                }
                None => {
                    // end of the function body itself
                    code.push(Instruction::End);
                    if !reader.is_empty() {
                        return Err(DecodeError::Malformed(format!(
                            "{} trailing bytes after function end at offset {}",
                            reader.remaining(),
                            reader.pos()
                        )));
                    }
                    break;
                }
            },
            _ => decode_plain(opcode, reader)?,
        };
        trace!("  {:>5}: {}", pc, instruction);
        code.push(instruction);
    }

    Ok(FunctionBody { locals, code })
}

fn malformed(offset: usize, what: &str) -> DecodeError {
    DecodeError::Malformed(format!("{what} at offset {offset}"))
}

fn close_block(code: &mut [Instruction], block: OpenBlock, end_pc: usize) {
    match &mut code[block.start] {
        Instruction::Block { end, .. } => *end = end_pc,
        Instruction::If { else_at, end, .. } => {
            *else_at = block.else_at;
            *end = end_pc;
        }
        // loops branch backwards and never need their end
        _ => {}
    }
    if let Some(else_pc) = block.else_at {
        if let Instruction::Else { end } = &mut code[else_pc] {
            *end = end_pc;
        }
    }
}

fn decode_locals(reader: &mut Reader) -> Result<Vec<ValueType>, DecodeError> {
    let groups = reader.read_vu32()?;
    let mut locals = Vec::new();
    let mut total: u64 = 0;
    for _ in 0..groups {
        let count = reader.read_vu32()?;
        total += count as u64;
        if total > MAX_FUNCTION_LOCALS as u64 {
            return Err(DecodeError::TooMany {
                what: "locals",
                count: total.min(u32::MAX as u64) as u32,
                limit: MAX_FUNCTION_LOCALS,
            });
        }
        let value_type = ValueType::decode(reader.read_byte()?)?;
        locals.extend(std::iter::repeat(value_type).take(count as usize));
    }
    Ok(locals)
}

/// Block types share an encoding with the negative range of a signed 33-bit
/// integer: 0x40 is the empty type, value types are single bytes, anything
/// non-negative is a type index.
fn decode_block_type(reader: &mut Reader) -> Result<BlockType, DecodeError> {
    let raw = reader.read_vs33()?;
    if raw >= 0 {
        return Ok(BlockType::FuncType(raw as u32));
    }
    let byte = (raw & 0x7f) as u8;
    match byte {
        0x40 => Ok(BlockType::Empty),
        _ => ValueType::decode(byte).map(BlockType::Value),
    }
}

fn decode_memarg(reader: &mut Reader) -> Result<MemArg, DecodeError> {
    Ok(MemArg {
        align: reader.read_vu32()?,
        offset: reader.read_vu32()?,
    })
}

fn expect_zero_byte(reader: &mut Reader, what: &str) -> Result<(), DecodeError> {
    let offset = reader.pos();
    match reader.read_byte()? {
        0x00 => Ok(()),
        _ => Err(malformed(offset, &format!("{what} reserved byte must be zero"))),
    }
}

/// Every instruction that does not open or close a block.
fn decode_plain(opcode: u8, reader: &mut Reader) -> Result<Instruction, DecodeError> {
    use Instruction::*;

    if let Some(op) = NumericOp::from_opcode(opcode) {
        return Ok(Numeric(op));
    }
    if let Some(op) = LoadOp::from_opcode(opcode) {
        return Ok(Load {
            op,
            memarg: decode_memarg(reader)?,
        });
    }
    if let Some(op) = StoreOp::from_opcode(opcode) {
        return Ok(Store {
            op,
            memarg: decode_memarg(reader)?,
        });
    }

    let instruction = match opcode {
        0x00 => Unreachable,
        0x01 => Nop,
        0x0c => Br {
            label_idx: reader.read_vu32()?,
        },
        0x0d => BrIf {
            label_idx: reader.read_vu32()?,
        },
        0x0e => {
            let count = reader.read_count(MAX_BR_TABLE_LABELS, "br_table labels")?;
            let labels = (0..count)
                .map(|_| reader.read_vu32())
                .collect::<Result<Vec<u32>, DecodeError>>()?;
            BrTable {
                labels,
                default: reader.read_vu32()?,
            }
        }
        0x0f => Return,
        0x10 => Call {
            func_idx: reader.read_vu32()?,
        },
        0x11 => CallIndirect {
            type_idx: reader.read_vu32()?,
            table_idx: reader.read_vu32()?,
        },
        0x1a => Drop,
        0x1b => Select,
        0x20 => LocalGet {
            local_idx: reader.read_vu32()?,
        },
        0x21 => LocalSet {
            local_idx: reader.read_vu32()?,
        },
        0x22 => LocalTee {
            local_idx: reader.read_vu32()?,
        },
        0x23 => GlobalGet {
            global_idx: reader.read_vu32()?,
        },
        0x24 => GlobalSet {
            global_idx: reader.read_vu32()?,
        },
        0x3f => {
            expect_zero_byte(reader, "memory.size")?;
            MemorySize
        }
        0x40 => {
            expect_zero_byte(reader, "memory.grow")?;
            MemoryGrow
        }
        0x41 => I32Const {
            value: reader.read_vs32()?,
        },
        0x42 => I64Const {
            value: reader.read_vs64()?,
        },
        0x43 => F32Const {
            value: reader.read_f32()?,
        },
        0x44 => F64Const {
            value: reader.read_f64()?,
        },
        0xfc | 0xfd => {
            let sub = reader.read_vu32()?;
            return Err(DecodeError::UnsupportedOpcode(format!("0x{opcode:02x} {sub}")));
        }
        _ => return Err(DecodeError::UnsupportedOpcode(format!("0x{opcode:02x}"))),
    };
    Ok(instruction)
}

/// Decode a constant expression, including its terminating `end`.
pub fn decode_const_expr(reader: &mut Reader) -> Result<ConstExpr, DecodeError> {
    let offset = reader.pos();
    let expr = match reader.read_byte()? {
        0x41 => ConstExpr::I32(reader.read_vs32()?),
        0x42 => ConstExpr::I64(reader.read_vs64()?),
        0x43 => ConstExpr::F32(reader.read_f32()?),
        0x44 => ConstExpr::F64(reader.read_f64()?),
        0x23 => ConstExpr::GlobalGet(reader.read_vu32()?),
        opcode => {
            return Err(DecodeError::Malformed(format!(
                "unsupported constant expression opcode 0x{opcode:02x} at offset {offset}"
            )))
        }
    };
    let end_offset = reader.pos();
    match reader.read_byte()? {
        0x0b => Ok(expr),
        _ => Err(malformed(end_offset, "constant expression must be a single instruction")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> Result<FunctionBody, DecodeError> {
        decode_function_body(&mut Reader::new(bytes))
    }

    #[test]
    fn patches_block_and_if_targets() {
        let body = decode(&[
            0x01, 0x01, 0x7f, // one local of type i32
            0x02, 0x40, // block
            0x20, 0x00, // local.get 0
            0x04, 0x7f, // if (result i32)
            0x41, 0x01, // i32.const 1
            0x05, // else
            0x41, 0x02, // i32.const 2
            0x0b, // end (if)
            0x1a, // drop
            0x0b, // end (block)
            0x0b, // end (function)
        ])
        .unwrap();

        assert_eq!(body.locals, vec![ValueType::I32]);
        assert_eq!(
            body.code,
            vec![
                Instruction::Block {
                    block_type: BlockType::Empty,
                    end: 8,
                },
                Instruction::LocalGet { local_idx: 0 },
                Instruction::If {
                    block_type: BlockType::Value(ValueType::I32),
                    else_at: Some(4),
                    end: 6,
                },
                Instruction::I32Const { value: 1 },
                Instruction::Else { end: 6 },
                Instruction::I32Const { value: 2 },
                Instruction::End,
                Instruction::Drop,
                Instruction::End,
                Instruction::End,
            ]
        );
    }

    #[test]
    fn if_without_else() {
        let body = decode(&[0x00, 0x41, 0x01, 0x04, 0x40, 0x01, 0x0b, 0x0b]).unwrap();
        assert_eq!(
            body.code[1],
            Instruction::If {
                block_type: BlockType::Empty,
                else_at: None,
                end: 3,
            }
        );
    }

    #[test]
    fn block_type_index() {
        let body = decode(&[0x00, 0x03, 0x02, 0x0b, 0x0b]).unwrap();
        assert_eq!(
            body.code[0],
            Instruction::Loop {
                block_type: BlockType::FuncType(2)
            }
        );
    }

    #[test]
    fn loop_end_does_not_close_the_enclosing_block() {
        let body = decode(&[
            0x00, // no locals
            0x02, 0x40, // block
            0x03, 0x40, // loop
            0x0c, 0x00, // br 0
            0x0b, // end (loop)
            0x01, // nop
            0x0b, // end (block)
            0x0b, // end (function)
        ])
        .unwrap();
        assert_eq!(
            body.code,
            vec![
                Instruction::Block {
                    block_type: BlockType::Empty,
                    end: 5,
                },
                Instruction::Loop {
                    block_type: BlockType::Empty
                },
                Instruction::Br { label_idx: 0 },
                Instruction::End,
                Instruction::Nop,
                Instruction::End,
                Instruction::End,
            ]
        );

        // an unterminated loop runs out of input instead of swallowing the function end
        assert!(matches!(
            decode(&[0x00, 0x03, 0x40, 0x0b]),
            Err(DecodeError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn expands_local_groups() {
        let body = decode(&[0x02, 0x02, 0x7e, 0x01, 0x7c, 0x0b]).unwrap();
        assert_eq!(body.locals, vec![ValueType::I64, ValueType::I64, ValueType::F64]);
        assert_eq!(body.code, vec![Instruction::End]);
    }

    #[test]
    fn rejects_malformed_bodies() {
        // missing final end
        assert!(matches!(decode(&[0x00, 0x01]), Err(DecodeError::UnexpectedEof { .. })));
        // bytes after the final end
        assert!(matches!(decode(&[0x00, 0x0b, 0x01]), Err(DecodeError::Malformed(_))));
        // else without if
        assert!(matches!(decode(&[0x00, 0x05, 0x0b]), Err(DecodeError::Malformed(_))));
        // two elses
        assert!(matches!(
            decode(&[0x00, 0x41, 0x00, 0x04, 0x40, 0x05, 0x05, 0x0b, 0x0b]),
            Err(DecodeError::Malformed(_))
        ));
        // bulk memory prefix
        assert!(matches!(
            decode(&[0x00, 0xfc, 0x0a, 0x00, 0x00, 0x0b]),
            Err(DecodeError::UnsupportedOpcode(op)) if op == "0xfc 10"
        ));
        assert!(matches!(decode(&[0x00, 0x3f, 0x01, 0x0b]), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn too_many_locals() {
        assert!(matches!(
            decode(&[0x01, 0xff, 0xff, 0x03, 0x7f, 0x0b]),
            Err(DecodeError::TooMany { what: "locals", .. })
        ));
    }

    #[test]
    fn const_expressions() {
        let mut reader = Reader::new(&[0x41, 0x7f, 0x0b]);
        assert_eq!(decode_const_expr(&mut reader).unwrap(), ConstExpr::I32(-1));
        let mut reader = Reader::new(&[0x23, 0x02, 0x0b]);
        assert_eq!(decode_const_expr(&mut reader).unwrap(), ConstExpr::GlobalGet(2));
        let mut reader = Reader::new(&[0x41, 0x01, 0x41, 0x02, 0x6a, 0x0b]);
        assert!(matches!(decode_const_expr(&mut reader), Err(DecodeError::Malformed(_))));
        let mut reader = Reader::new(&[0x6a, 0x0b]);
        assert!(matches!(decode_const_expr(&mut reader), Err(DecodeError::Malformed(_))));
    }
}
