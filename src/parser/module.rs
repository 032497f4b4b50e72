use std::fmt;

use super::instruction::Instruction;
use super::DecodeError;

/// A decoded WebAssembly module.
///
/// Index spaces (functions, tables, memories, globals) start with the imported
/// entries followed by the ones the module defines, as in the binary format.
#[derive(Debug, Default)]
pub struct Module {
    pub name: String,
    pub version: u32,

    pub types: Vec<FunctionType>,
    pub imports: Vec<Import>,
    /// Type index of each defined function
    pub functions: Vec<u32>,
    pub tables: Vec<TableType>,
    pub memories: Vec<Limits>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub start: Option<u32>,
    pub elements: Vec<Element>,
    pub data_count: Option<u32>,
    pub code: Vec<FunctionBody>,
    pub data: Vec<Data>,
    pub custom: Vec<CustomSection>,
}

impl Module {
    pub fn new(name: &str) -> Module {
        Module {
            name: name.to_string(),
            version: 1,
            ..Default::default()
        }
    }

    fn imported<'a, T: 'a>(&'a self, pick: impl Fn(&'a ExternalKind) -> Option<T> + 'a) -> impl Iterator<Item = T> + 'a {
        self.imports.iter().filter_map(move |import| pick(&import.external_kind))
    }

    pub fn num_imported_functions(&self) -> usize {
        self.imported(|kind| match kind {
            ExternalKind::Function(type_idx) => Some(*type_idx),
            _ => None,
        })
        .count()
    }

    pub fn num_imported_globals(&self) -> usize {
        self.imported_globals().count()
    }

    pub fn imported_globals(&self) -> impl Iterator<Item = GlobalType> + '_ {
        self.imported(|kind| match kind {
            ExternalKind::Global(global_type) => Some(*global_type),
            _ => None,
        })
    }

    pub fn total_functions(&self) -> usize {
        self.num_imported_functions() + self.functions.len()
    }

    pub fn total_globals(&self) -> usize {
        self.num_imported_globals() + self.globals.len()
    }

    pub fn total_tables(&self) -> usize {
        self.imported(|kind| match kind {
            ExternalKind::Table(table_type) => Some(*table_type),
            _ => None,
        })
        .count()
            + self.tables.len()
    }

    pub fn total_memories(&self) -> usize {
        self.imported(|kind| match kind {
            ExternalKind::Memory(limits) => Some(*limits),
            _ => None,
        })
        .count()
            + self.memories.len()
    }

    /// Type index of a function in the function index space.
    pub fn function_type_index(&self, func_idx: u32) -> Option<u32> {
        let func_idx = func_idx as usize;
        let imported = self.num_imported_functions();
        if func_idx < imported {
            self.imported(|kind| match kind {
                ExternalKind::Function(type_idx) => Some(*type_idx),
                _ => None,
            })
            .nth(func_idx)
        } else {
            self.functions.get(func_idx - imported).copied()
        }
    }

    pub fn function_type(&self, func_idx: u32) -> Option<&FunctionType> {
        self.function_type_index(func_idx)
            .and_then(|type_idx| self.types.get(type_idx as usize))
    }

    pub fn global_type(&self, global_idx: u32) -> Option<GlobalType> {
        let global_idx = global_idx as usize;
        let imported = self.num_imported_globals();
        if global_idx < imported {
            self.imported_globals().nth(global_idx)
        } else {
            self.globals
                .get(global_idx - imported)
                .map(|global| global.global_type)
        }
    }

    pub fn export(&self, name: &str) -> Option<&Export> {
        self.exports.iter().find(|export| export.name == name)
    }

    pub fn get_function_name(&self, index: u32) -> Option<&String> {
        self.exports.iter().find_map(|export| match export.index {
            ExportIndex::Function(idx) if idx == index => Some(&export.name),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
}

impl ValueType {
    pub fn decode(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            0x7f => Ok(ValueType::I32),
            0x7e => Ok(ValueType::I64),
            0x7d => Ok(ValueType::F32),
            0x7c => Ok(ValueType::F64),
            _ => Err(DecodeError::InvalidValueType(byte)),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            ValueType::I32 => 0x7f,
            ValueType::I64 => 0x7e,
            ValueType::F32 => 0x7d,
            ValueType::F64 => 0x7c,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionType {
    pub parameters: Vec<ValueType>,
    pub return_types: Vec<ValueType>,
}

impl FunctionType {
    pub fn new(parameters: Vec<ValueType>, return_types: Vec<ValueType>) -> FunctionType {
        FunctionType {
            parameters,
            return_types,
        }
    }
}

fn join(types: &[ValueType]) -> String {
    types
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<String>>()
        .join(", ")
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}) -> ", join(&self.parameters))?;
        match self.return_types.len() {
            0 => write!(f, "nil"),
            1 => write!(f, "{}", self.return_types[0]),
            _ => write!(f, "({})", join(&self.return_types)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

impl Limits {
    /// Whether an entity with `actual` limits may satisfy an import declared
    /// with these limits.
    pub fn accepts(&self, actual: &Limits) -> bool {
        if actual.min < self.min {
            return false;
        }
        match (self.max, actual.max) {
            (None, _) => true,
            (Some(expected), Some(actual)) => actual <= expected,
            (Some(_), None) => false,
        }
    }
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "min={} max={}", self.min, max),
            None => write!(f, "min={}", self.min),
        }
    }
}

/// Tables hold function references only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub value_type: ValueType,
    pub mutable: bool,
}

impl fmt::Display for GlobalType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.mutable {
            write!(f, "(mut {})", self.value_type)
        } else {
            write!(f, "{}", self.value_type)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExternalKind {
    /// Type index of the imported function
    Function(u32),
    Table(TableType),
    Memory(Limits),
    Global(GlobalType),
}

impl ExternalKind {
    pub fn name(&self) -> &'static str {
        match self {
            ExternalKind::Function(_) => "function",
            ExternalKind::Table(_) => "table",
            ExternalKind::Memory(_) => "memory",
            ExternalKind::Global(_) => "global",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub external_kind: ExternalKind,
}

impl fmt::Display for Import {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{} ({})", self.module, self.name, self.external_kind.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportIndex {
    Function(u32),
    Table(u32),
    Memory(u32),
    Global(u32),
}

impl ExportIndex {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ExportIndex::Function(_) => "function",
            ExportIndex::Table(_) => "table",
            ExportIndex::Memory(_) => "memory",
            ExportIndex::Global(_) => "global",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Export {
    pub name: String,
    pub index: ExportIndex,
}

/// Constant expression used by global initialisers and segment offsets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstExpr {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    GlobalGet(u32),
}

#[derive(Debug, Clone)]
pub struct Global {
    pub global_type: GlobalType,
    pub init: ConstExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SegmentMode {
    /// Copied into the table or memory during instantiation
    Active { index: u32, offset: ConstExpr },
    /// Only reachable through bulk instructions, which are not supported, so
    /// passive and declarative segments are retained but never applied
    Passive,
}

#[derive(Debug, Clone)]
pub struct Element {
    pub mode: SegmentMode,
    pub functions: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct Data {
    pub mode: SegmentMode,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct FunctionBody {
    /// Declared locals, expanded (parameters are not included)
    pub locals: Vec<ValueType>,
    pub code: Vec<Instruction>,
}

#[derive(Debug, Clone)]
pub struct CustomSection {
    pub name: String,
    pub size: usize,
}
