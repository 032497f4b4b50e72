//! Structural validation.
//!
//! Checks that every index a module mentions refers to something that exists
//! and that the module-level constraints hold (single memory and table,
//! limits, export names, start signature, constant initialisers). Operand
//! stack typing of function bodies is left to the executor, which traps on
//! a mismatch instead of trusting the code.

use std::collections::HashSet;

use thiserror::Error;

use super::instruction::{BlockType, Instruction, MemArg};
use super::limits::MAX_MEMORY_PAGES;
use super::module::{ConstExpr, ExportIndex, ExternalKind, FunctionBody, Limits, Module, SegmentMode, ValueType};

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("unknown type {0}")]
    UnknownType(u32),

    #[error("unknown function {0}")]
    UnknownFunction(u32),

    #[error("unknown table {0}")]
    UnknownTable(u32),

    #[error("unknown memory {0}")]
    UnknownMemory(u32),

    #[error("unknown global {0}")]
    UnknownGlobal(u32),

    #[error("unknown local {0}")]
    UnknownLocal(u32),

    #[error("unknown label {0}")]
    UnknownLabel(u32),

    #[error("multiple memories")]
    MultipleMemories,

    #[error("multiple tables")]
    MultipleTables,

    #[error("size minimum must not be greater than maximum ({0})")]
    InvalidLimits(Limits),

    #[error("memory size must be at most 65536 pages (4GiB)")]
    MemoryTooLarge,

    #[error("duplicate export name {0}")]
    DuplicateExport(String),

    #[error("start function must have type () -> nil, found {0}")]
    InvalidStartFunction(String),

    #[error("type mismatch: constant expression yields {found}, expected {expected}")]
    ConstantTypeMismatch { expected: ValueType, found: ValueType },

    #[error("constant expression required: global {0} is not an immutable import")]
    ConstantExpressionRequired(u32),

    #[error("global is immutable: {0}")]
    ImmutableGlobal(u32),

    #[error("alignment must not be larger than natural")]
    BadAlignment,

    #[error("function {index}: {source}")]
    InFunction {
        index: u32,
        source: Box<ValidationError>,
    },
}

pub fn validate_module(module: &Module) -> Result<(), ValidationError> {
    for import in &module.imports {
        match &import.external_kind {
            ExternalKind::Function(type_idx) => check_type(module, *type_idx)?,
            ExternalKind::Memory(limits) => check_memory_limits(limits)?,
            ExternalKind::Table(table_type) => check_limits(&table_type.limits)?,
            ExternalKind::Global(_) => {}
        }
    }
    for type_idx in &module.functions {
        check_type(module, *type_idx)?;
    }

    if module.total_memories() > 1 {
        return Err(ValidationError::MultipleMemories);
    }
    if module.total_tables() > 1 {
        return Err(ValidationError::MultipleTables);
    }
    for limits in &module.memories {
        check_memory_limits(limits)?;
    }
    for table in &module.tables {
        check_limits(&table.limits)?;
    }

    for global in &module.globals {
        let found = const_expr_type(module, &global.init)?;
        let expected = global.global_type.value_type;
        if found != expected {
            return Err(ValidationError::ConstantTypeMismatch { expected, found });
        }
    }

    validate_exports(module)?;

    if let Some(start) = module.start {
        let ty = module
            .function_type(start)
            .ok_or(ValidationError::UnknownFunction(start))?;
        if !ty.parameters.is_empty() || !ty.return_types.is_empty() {
            return Err(ValidationError::InvalidStartFunction(ty.to_string()));
        }
    }

    for element in &module.elements {
        if let SegmentMode::Active { index, offset } = &element.mode {
            if *index as usize >= module.total_tables() {
                return Err(ValidationError::UnknownTable(*index));
            }
            check_offset(module, offset)?;
        }
        for func_idx in &element.functions {
            check_function(module, *func_idx)?;
        }
    }

    for data in &module.data {
        if let SegmentMode::Active { index, offset } = &data.mode {
            if *index as usize >= module.total_memories() {
                return Err(ValidationError::UnknownMemory(*index));
            }
            check_offset(module, offset)?;
        }
    }

    let imported = module.num_imported_functions();
    for (i, (type_idx, body)) in module.functions.iter().zip(&module.code).enumerate() {
        let index = (imported + i) as u32;
        validate_body(module, *type_idx, body).map_err(|source| ValidationError::InFunction {
            index,
            source: Box::new(source),
        })?;
    }

    Ok(())
}

fn check_type(module: &Module, type_idx: u32) -> Result<(), ValidationError> {
    match module.types.get(type_idx as usize) {
        Some(_) => Ok(()),
        None => Err(ValidationError::UnknownType(type_idx)),
    }
}

fn check_function(module: &Module, func_idx: u32) -> Result<(), ValidationError> {
    if (func_idx as usize) < module.total_functions() {
        Ok(())
    } else {
        Err(ValidationError::UnknownFunction(func_idx))
    }
}

fn check_limits(limits: &Limits) -> Result<(), ValidationError> {
    match limits.max {
        Some(max) if max < limits.min => Err(ValidationError::InvalidLimits(*limits)),
        _ => Ok(()),
    }
}

fn check_memory_limits(limits: &Limits) -> Result<(), ValidationError> {
    check_limits(limits)?;
    if limits.min > MAX_MEMORY_PAGES || limits.max.map_or(false, |max| max > MAX_MEMORY_PAGES) {
        return Err(ValidationError::MemoryTooLarge);
    }
    Ok(())
}

/// Result type of a constant expression. `global.get` may only refer to
/// immutable imported globals.
fn const_expr_type(module: &Module, expr: &ConstExpr) -> Result<ValueType, ValidationError> {
    Ok(match expr {
        ConstExpr::I32(_) => ValueType::I32,
        ConstExpr::I64(_) => ValueType::I64,
        ConstExpr::F32(_) => ValueType::F32,
        ConstExpr::F64(_) => ValueType::F64,
        ConstExpr::GlobalGet(global_idx) => {
            let global = module
                .imported_globals()
                .nth(*global_idx as usize)
                .ok_or(ValidationError::ConstantExpressionRequired(*global_idx))?;
            if global.mutable {
                return Err(ValidationError::ConstantExpressionRequired(*global_idx));
            }
            global.value_type
        }
    })
}

fn check_offset(module: &Module, offset: &ConstExpr) -> Result<(), ValidationError> {
    let found = const_expr_type(module, offset)?;
    if found != ValueType::I32 {
        return Err(ValidationError::ConstantTypeMismatch {
            expected: ValueType::I32,
            found,
        });
    }
    Ok(())
}

fn validate_exports(module: &Module) -> Result<(), ValidationError> {
    let mut names = HashSet::new();
    for export in &module.exports {
        if !names.insert(export.name.as_str()) {
            return Err(ValidationError::DuplicateExport(export.name.clone()));
        }
        match export.index {
            ExportIndex::Function(idx) => check_function(module, idx)?,
            ExportIndex::Table(idx) if idx as usize >= module.total_tables() => {
                return Err(ValidationError::UnknownTable(idx))
            }
            ExportIndex::Memory(idx) if idx as usize >= module.total_memories() => {
                return Err(ValidationError::UnknownMemory(idx))
            }
            ExportIndex::Global(idx) if idx as usize >= module.total_globals() => {
                return Err(ValidationError::UnknownGlobal(idx))
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_memarg(module: &Module, memarg: &MemArg, width: u32) -> Result<(), ValidationError> {
    if module.total_memories() == 0 {
        return Err(ValidationError::UnknownMemory(0));
    }
    if memarg.align >= 32 || (1u32 << memarg.align) > width {
        return Err(ValidationError::BadAlignment);
    }
    Ok(())
}

fn check_block_type(module: &Module, block_type: &BlockType) -> Result<(), ValidationError> {
    match block_type {
        BlockType::FuncType(type_idx) => check_type(module, *type_idx),
        _ => Ok(()),
    }
}

fn validate_body(module: &Module, type_idx: u32, body: &FunctionBody) -> Result<(), ValidationError> {
    let params = module
        .types
        .get(type_idx as usize)
        .map_or(0, |ty| ty.parameters.len());
    let num_locals = params + body.locals.len();
    // the function body itself is label 0 when nothing else is open
    let mut depth: usize = 0;

    let check_label = |label_idx: u32, depth: usize| {
        if label_idx as usize <= depth {
            Ok(())
        } else {
            Err(ValidationError::UnknownLabel(label_idx))
        }
    };

    for instruction in &body.code {
        match instruction {
            Instruction::Block { block_type, .. } | Instruction::Loop { block_type } | Instruction::If { block_type, .. } => {
                check_block_type(module, block_type)?;
                depth += 1;
            }
            Instruction::End => depth = depth.saturating_sub(1),
            Instruction::Br { label_idx } | Instruction::BrIf { label_idx } => check_label(*label_idx, depth)?,
            Instruction::BrTable { labels, default } => {
                for label_idx in labels.iter().chain(std::iter::once(default)) {
                    check_label(*label_idx, depth)?;
                }
            }
            Instruction::Call { func_idx } => check_function(module, *func_idx)?,
            Instruction::CallIndirect { type_idx, table_idx } => {
                check_type(module, *type_idx)?;
                if *table_idx as usize >= module.total_tables() {
                    return Err(ValidationError::UnknownTable(*table_idx));
                }
            }
            Instruction::LocalGet { local_idx }
            | Instruction::LocalSet { local_idx }
            | Instruction::LocalTee { local_idx } => {
                if *local_idx as usize >= num_locals {
                    return Err(ValidationError::UnknownLocal(*local_idx));
                }
            }
            Instruction::GlobalGet { global_idx } => {
                module
                    .global_type(*global_idx)
                    .ok_or(ValidationError::UnknownGlobal(*global_idx))?;
            }
            Instruction::GlobalSet { global_idx } => {
                let global = module
                    .global_type(*global_idx)
                    .ok_or(ValidationError::UnknownGlobal(*global_idx))?;
                if !global.mutable {
                    return Err(ValidationError::ImmutableGlobal(*global_idx));
                }
            }
            Instruction::Load { op, memarg } => check_memarg(module, memarg, op.width())?,
            Instruction::Store { op, memarg } => check_memarg(module, memarg, op.width())?,
            Instruction::MemorySize | Instruction::MemoryGrow => {
                if module.total_memories() == 0 {
                    return Err(ValidationError::UnknownMemory(0));
                }
            }
            _ => {}
        }
    }
    Ok(())
}
