//! Instruction representation.
//!
//! Function bodies are kept as a flat instruction list. Structured control
//! instructions carry the positions of their matching `else`/`end`, resolved
//! once at decode time, so the executor can branch without scanning.

pub mod decode;

pub use decode::decode_function_body;

use super::module::ValueType;
use std::fmt;

/// Memory argument for load and store instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemArg {
    /// Alignment hint, as a power of 2
    pub align: u32,
    pub offset: u32,
}

/// Block type for structured control instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Empty,
    Value(ValueType),
    /// Index into the type section, for blocks with parameters or several results
    FuncType(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    // Control instructions
    Unreachable,
    Nop,
    Block { block_type: BlockType, end: usize },
    Loop { block_type: BlockType },
    If { block_type: BlockType, else_at: Option<usize>, end: usize },
    Else { end: usize },
    End,
    Br { label_idx: u32 },
    BrIf { label_idx: u32 },
    BrTable { labels: Vec<u32>, default: u32 },
    Return,
    Call { func_idx: u32 },
    CallIndirect { type_idx: u32, table_idx: u32 },

    // Parametric instructions
    Drop,
    Select,

    // Variable instructions
    LocalGet { local_idx: u32 },
    LocalSet { local_idx: u32 },
    LocalTee { local_idx: u32 },
    GlobalGet { global_idx: u32 },
    GlobalSet { global_idx: u32 },

    // Memory instructions
    Load { op: LoadOp, memarg: MemArg },
    Store { op: StoreOp, memarg: MemArg },
    MemorySize,
    MemoryGrow,

    // Numeric instructions
    I32Const { value: i32 },
    I64Const { value: i64 },
    F32Const { value: f32 },
    F64Const { value: f64 },
    Numeric(NumericOp),
}

impl Instruction {
    pub fn mnemonic(&self) -> &'static str {
        use Instruction::*;
        match self {
            Unreachable => "unreachable",
            Nop => "nop",
            Block { .. } => "block",
            Loop { .. } => "loop",
            If { .. } => "if",
            Else { .. } => "else",
            End => "end",
            Br { .. } => "br",
            BrIf { .. } => "br_if",
            BrTable { .. } => "br_table",
            Return => "return",
            Call { .. } => "call",
            CallIndirect { .. } => "call_indirect",
            Drop => "drop",
            Select => "select",
            LocalGet { .. } => "local.get",
            LocalSet { .. } => "local.set",
            LocalTee { .. } => "local.tee",
            GlobalGet { .. } => "global.get",
            GlobalSet { .. } => "global.set",
            Load { op, .. } => op.mnemonic(),
            Store { op, .. } => op.mnemonic(),
            MemorySize => "memory.size",
            MemoryGrow => "memory.grow",
            I32Const { .. } => "i32.const",
            I64Const { .. } => "i64.const",
            F32Const { .. } => "f32.const",
            F64Const { .. } => "f64.const",
            Numeric(op) => op.mnemonic(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;
        match self {
            Br { label_idx } | BrIf { label_idx } => write!(f, "{} {}", self.mnemonic(), label_idx),
            Call { func_idx } => write!(f, "call {func_idx}"),
            LocalGet { local_idx } | LocalSet { local_idx } | LocalTee { local_idx } => {
                write!(f, "{} {}", self.mnemonic(), local_idx)
            }
            GlobalGet { global_idx } | GlobalSet { global_idx } => write!(f, "{} {}", self.mnemonic(), global_idx),
            I32Const { value } => write!(f, "i32.const {value}"),
            I64Const { value } => write!(f, "i64.const {value}"),
            Load { memarg, .. } | Store { memarg, .. } if memarg.offset != 0 => {
                write!(f, "{} offset={}", self.mnemonic(), memarg.offset)
            }
            _ => f.write_str(self.mnemonic()),
        }
    }
}

macro_rules! opcode_table {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($opcode:literal => $variant:ident, $mnemonic:literal;)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $vis enum $name {
            $($variant,)*
        }

        impl $name {
            pub fn from_opcode(opcode: u8) -> Option<Self> {
                match opcode {
                    $($opcode => Some($name::$variant),)*
                    _ => None,
                }
            }

            pub fn mnemonic(&self) -> &'static str {
                match self {
                    $($name::$variant => $mnemonic,)*
                }
            }
        }
    };
}

opcode_table! {
    /// Memory loads (0x28 - 0x35)
    pub enum LoadOp {
        0x28 => I32Load, "i32.load";
        0x29 => I64Load, "i64.load";
        0x2a => F32Load, "f32.load";
        0x2b => F64Load, "f64.load";
        0x2c => I32Load8S, "i32.load8_s";
        0x2d => I32Load8U, "i32.load8_u";
        0x2e => I32Load16S, "i32.load16_s";
        0x2f => I32Load16U, "i32.load16_u";
        0x30 => I64Load8S, "i64.load8_s";
        0x31 => I64Load8U, "i64.load8_u";
        0x32 => I64Load16S, "i64.load16_s";
        0x33 => I64Load16U, "i64.load16_u";
        0x34 => I64Load32S, "i64.load32_s";
        0x35 => I64Load32U, "i64.load32_u";
    }
}

opcode_table! {
    /// Memory stores (0x36 - 0x3e)
    pub enum StoreOp {
        0x36 => I32Store, "i32.store";
        0x37 => I64Store, "i64.store";
        0x38 => F32Store, "f32.store";
        0x39 => F64Store, "f64.store";
        0x3a => I32Store8, "i32.store8";
        0x3b => I32Store16, "i32.store16";
        0x3c => I64Store8, "i64.store8";
        0x3d => I64Store16, "i64.store16";
        0x3e => I64Store32, "i64.store32";
    }
}

impl LoadOp {
    /// Access width in bytes
    pub fn width(&self) -> u32 {
        use LoadOp::*;
        match self {
            I32Load8S | I32Load8U | I64Load8S | I64Load8U => 1,
            I32Load16S | I32Load16U | I64Load16S | I64Load16U => 2,
            I32Load | F32Load | I64Load32S | I64Load32U => 4,
            I64Load | F64Load => 8,
        }
    }
}

impl StoreOp {
    pub fn width(&self) -> u32 {
        use StoreOp::*;
        match self {
            I32Store8 | I64Store8 => 1,
            I32Store16 | I64Store16 => 2,
            I32Store | F32Store | I64Store32 => 4,
            I64Store | F64Store => 8,
        }
    }
}

opcode_table! {
    /// Comparison, arithmetic and conversion instructions (0x45 - 0xc4)
    pub enum NumericOp {
        0x45 => I32Eqz, "i32.eqz";
        0x46 => I32Eq, "i32.eq";
        0x47 => I32Ne, "i32.ne";
        0x48 => I32LtS, "i32.lt_s";
        0x49 => I32LtU, "i32.lt_u";
        0x4a => I32GtS, "i32.gt_s";
        0x4b => I32GtU, "i32.gt_u";
        0x4c => I32LeS, "i32.le_s";
        0x4d => I32LeU, "i32.le_u";
        0x4e => I32GeS, "i32.ge_s";
        0x4f => I32GeU, "i32.ge_u";

        0x50 => I64Eqz, "i64.eqz";
        0x51 => I64Eq, "i64.eq";
        0x52 => I64Ne, "i64.ne";
        0x53 => I64LtS, "i64.lt_s";
        0x54 => I64LtU, "i64.lt_u";
        0x55 => I64GtS, "i64.gt_s";
        0x56 => I64GtU, "i64.gt_u";
        0x57 => I64LeS, "i64.le_s";
        0x58 => I64LeU, "i64.le_u";
        0x59 => I64GeS, "i64.ge_s";
        0x5a => I64GeU, "i64.ge_u";

        0x5b => F32Eq, "f32.eq";
        0x5c => F32Ne, "f32.ne";
        0x5d => F32Lt, "f32.lt";
        0x5e => F32Gt, "f32.gt";
        0x5f => F32Le, "f32.le";
        0x60 => F32Ge, "f32.ge";

        0x61 => F64Eq, "f64.eq";
        0x62 => F64Ne, "f64.ne";
        0x63 => F64Lt, "f64.lt";
        0x64 => F64Gt, "f64.gt";
        0x65 => F64Le, "f64.le";
        0x66 => F64Ge, "f64.ge";

        0x67 => I32Clz, "i32.clz";
        0x68 => I32Ctz, "i32.ctz";
        0x69 => I32Popcnt, "i32.popcnt";
        0x6a => I32Add, "i32.add";
        0x6b => I32Sub, "i32.sub";
        0x6c => I32Mul, "i32.mul";
        0x6d => I32DivS, "i32.div_s";
        0x6e => I32DivU, "i32.div_u";
        0x6f => I32RemS, "i32.rem_s";
        0x70 => I32RemU, "i32.rem_u";
        0x71 => I32And, "i32.and";
        0x72 => I32Or, "i32.or";
        0x73 => I32Xor, "i32.xor";
        0x74 => I32Shl, "i32.shl";
        0x75 => I32ShrS, "i32.shr_s";
        0x76 => I32ShrU, "i32.shr_u";
        0x77 => I32Rotl, "i32.rotl";
        0x78 => I32Rotr, "i32.rotr";

        0x79 => I64Clz, "i64.clz";
        0x7a => I64Ctz, "i64.ctz";
        0x7b => I64Popcnt, "i64.popcnt";
        0x7c => I64Add, "i64.add";
        0x7d => I64Sub, "i64.sub";
        0x7e => I64Mul, "i64.mul";
        0x7f => I64DivS, "i64.div_s";
        0x80 => I64DivU, "i64.div_u";
        0x81 => I64RemS, "i64.rem_s";
        0x82 => I64RemU, "i64.rem_u";
        0x83 => I64And, "i64.and";
        0x84 => I64Or, "i64.or";
        0x85 => I64Xor, "i64.xor";
        0x86 => I64Shl, "i64.shl";
        0x87 => I64ShrS, "i64.shr_s";
        0x88 => I64ShrU, "i64.shr_u";
        0x89 => I64Rotl, "i64.rotl";
        0x8a => I64Rotr, "i64.rotr";

        0x8b => F32Abs, "f32.abs";
        0x8c => F32Neg, "f32.neg";
        0x8d => F32Ceil, "f32.ceil";
        0x8e => F32Floor, "f32.floor";
        0x8f => F32Trunc, "f32.trunc";
        0x90 => F32Nearest, "f32.nearest";
        0x91 => F32Sqrt, "f32.sqrt";
        0x92 => F32Add, "f32.add";
        0x93 => F32Sub, "f32.sub";
        0x94 => F32Mul, "f32.mul";
        0x95 => F32Div, "f32.div";
        0x96 => F32Min, "f32.min";
        0x97 => F32Max, "f32.max";
        0x98 => F32Copysign, "f32.copysign";

        0x99 => F64Abs, "f64.abs";
        0x9a => F64Neg, "f64.neg";
        0x9b => F64Ceil, "f64.ceil";
        0x9c => F64Floor, "f64.floor";
        0x9d => F64Trunc, "f64.trunc";
        0x9e => F64Nearest, "f64.nearest";
        0x9f => F64Sqrt, "f64.sqrt";
        0xa0 => F64Add, "f64.add";
        0xa1 => F64Sub, "f64.sub";
        0xa2 => F64Mul, "f64.mul";
        0xa3 => F64Div, "f64.div";
        0xa4 => F64Min, "f64.min";
        0xa5 => F64Max, "f64.max";
        0xa6 => F64Copysign, "f64.copysign";

        0xa7 => I32WrapI64, "i32.wrap_i64";
        0xa8 => I32TruncF32S, "i32.trunc_f32_s";
        0xa9 => I32TruncF32U, "i32.trunc_f32_u";
        0xaa => I32TruncF64S, "i32.trunc_f64_s";
        0xab => I32TruncF64U, "i32.trunc_f64_u";
        0xac => I64ExtendI32S, "i64.extend_i32_s";
        0xad => I64ExtendI32U, "i64.extend_i32_u";
        0xae => I64TruncF32S, "i64.trunc_f32_s";
        0xaf => I64TruncF32U, "i64.trunc_f32_u";
        0xb0 => I64TruncF64S, "i64.trunc_f64_s";
        0xb1 => I64TruncF64U, "i64.trunc_f64_u";
        0xb2 => F32ConvertI32S, "f32.convert_i32_s";
        0xb3 => F32ConvertI32U, "f32.convert_i32_u";
        0xb4 => F32ConvertI64S, "f32.convert_i64_s";
        0xb5 => F32ConvertI64U, "f32.convert_i64_u";
        0xb6 => F32DemoteF64, "f32.demote_f64";
        0xb7 => F64ConvertI32S, "f64.convert_i32_s";
        0xb8 => F64ConvertI32U, "f64.convert_i32_u";
        0xb9 => F64ConvertI64S, "f64.convert_i64_s";
        0xba => F64ConvertI64U, "f64.convert_i64_u";
        0xbb => F64PromoteF32, "f64.promote_f32";
        0xbc => I32ReinterpretF32, "i32.reinterpret_f32";
        0xbd => I64ReinterpretF64, "i64.reinterpret_f64";
        0xbe => F32ReinterpretI32, "f32.reinterpret_i32";
        0xbf => F64ReinterpretI64, "f64.reinterpret_i64";

        0xc0 => I32Extend8S, "i32.extend8_s";
        0xc1 => I32Extend16S, "i32.extend16_s";
        0xc2 => I64Extend8S, "i64.extend8_s";
        0xc3 => I64Extend16S, "i64.extend16_s";
        0xc4 => I64Extend32S, "i64.extend32_s";
    }
}
