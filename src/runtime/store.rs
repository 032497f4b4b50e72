//! Per-instance runtime state
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                    Store                     │
//! │  functions  [0]: Host { env.print }          │
//! │             [1]: Wasm { type 0, code 0 }     │
//! │  globals    [0]: imported, [1..]: defined    │
//! │  memory     Option<Memory>                   │
//! │  table      Option<Table>                    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Index spaces follow the module: imports come first, then the module's own
//! definitions. The store is owned by an [`Instance`](super::Instance) and
//! borrowed mutably by the executor for the duration of one call.

use std::rc::Rc;

use super::{HostFunction, Memory, RuntimeError, Table, Value};
use crate::parser::module::ConstExpr;

/// An entry in the function index space
#[derive(Debug)]
pub enum FunctionInstance {
    /// Imported host function; `name` is `module.field` for trap messages.
    /// Shared when the module imports the same field more than once.
    Host { name: String, func: Rc<HostFunction> },
    /// Function defined by the module
    Wasm { type_idx: u32, code_idx: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalInstance {
    pub value: Value,
    pub mutable: bool,
}

#[derive(Debug, Default)]
pub struct Store {
    pub functions: Vec<FunctionInstance>,
    pub globals: Vec<GlobalInstance>,
    pub memory: Option<Memory>,
    pub table: Option<Table>,
}

impl Store {
    pub fn new() -> Self {
        Store::default()
    }

    pub fn function(&self, func_idx: u32) -> Result<&FunctionInstance, RuntimeError> {
        self.functions
            .get(func_idx as usize)
            .ok_or(RuntimeError::InvalidIndex("function", func_idx))
    }

    pub fn global(&self, global_idx: u32) -> Result<&GlobalInstance, RuntimeError> {
        self.globals
            .get(global_idx as usize)
            .ok_or(RuntimeError::InvalidIndex("global", global_idx))
    }

    /// `global.set`: the new value must have the global's type
    pub fn set_global(&mut self, global_idx: u32, value: Value) -> Result<(), RuntimeError> {
        let global = self
            .globals
            .get_mut(global_idx as usize)
            .ok_or(RuntimeError::InvalidIndex("global", global_idx))?;
        if !global.mutable {
            return Err(RuntimeError::InvalidIndex("mutable global", global_idx));
        }
        if global.value.typ() != value.typ() {
            return Err(RuntimeError::TypeMismatch {
                expected: global.value.typ(),
                actual: value.typ(),
            });
        }
        global.value = value;
        Ok(())
    }

    /// Evaluate a constant expression against the globals initialised so far
    pub fn eval_const(&self, expr: &ConstExpr) -> Result<Value, RuntimeError> {
        Ok(match *expr {
            ConstExpr::I32(v) => Value::I32(v),
            ConstExpr::I64(v) => Value::I64(v),
            ConstExpr::F32(v) => Value::F32(v),
            ConstExpr::F64(v) => Value::F64(v),
            ConstExpr::GlobalGet(idx) => self.global(idx)?.value,
        })
    }
}
