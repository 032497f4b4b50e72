//! WebAssembly module instance
//!
//! Instantiation binds the host's imports to the module's declarations,
//! allocates memory, table and globals, applies active segments and runs the
//! start function. Any failure drops everything allocated so far; a caller
//! only ever sees a fully initialised [`Instance`].

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use log::{debug, warn};

use super::executor::Executor;
use super::imports::{Extern, ImportDescriptor};
use super::store::{FunctionInstance, GlobalInstance, Store};
use super::{HostFunction, Imports, Memory, RuntimeError, Table, Value};
use crate::config::Config;
use crate::error::Error;
use crate::last_error::ErrorChannel;
use crate::parser::module::{Export, ExportIndex, ExternalKind, FunctionType, Module, SegmentMode, ValueType};

/// A live, runnable module instance
#[derive(Debug)]
pub struct Instance {
    module: Module,
    store: Store,
    config: Config,
    /// Where invocation failures are recorded
    channel: Arc<ErrorChannel>,
}

impl Instance {
    pub(crate) fn new(
        module: Module,
        imports: Imports,
        config: &Config,
        channel: Arc<ErrorChannel>,
    ) -> Result<Instance, Error> {
        let mut store = Store::new();

        debug!("{}: resolving {} imports", module.name, module.imports.len());
        resolve_imports(&module, imports, &mut store)?;

        debug!("{}: allocating", module.name);
        allocate(&module, config, &mut store)?;

        debug!("{}: applying segments", module.name);
        apply_segments(&module, &mut store)?;

        if let Some(start) = module.start {
            debug!("{}: running start function {}", module.name, start);
            Executor::new(&module, &mut store, config.max_call_depth).call(start, &[])?;
        }

        Ok(Instance {
            module,
            store,
            config: *config,
            channel,
        })
    }

    /// Call an exported function.
    ///
    /// Arguments must match the export's signature exactly; nothing runs
    /// otherwise. Failures are also recorded in the error channel.
    pub fn invoke(&mut self, name: &str, args: &[Value]) -> Result<Vec<Value>, Error> {
        self.call(name, args).map_err(|error| {
            self.channel.record_error(&error);
            error
        })
    }

    /// [`Instance::invoke`] without recording failures
    pub(crate) fn call(&mut self, name: &str, args: &[Value]) -> Result<Vec<Value>, Error> {
        let (func_idx, ty) = self.exported_function(name)?;
        let types: Vec<ValueType> = args.iter().map(Value::typ).collect();
        if types != ty.parameters {
            return Err(Error::SignatureMismatch(format!(
                "{name} expects {ty}, got ({})",
                types.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
            )));
        }

        debug!("invoke {name}{ty}");
        let results = Executor::new(&self.module, &mut self.store, self.config.max_call_depth).call(func_idx, args)?;
        Ok(results)
    }

    fn exported_function(&self, name: &str) -> Result<(u32, &FunctionType), Error> {
        let export = self
            .module
            .export(name)
            .ok_or_else(|| Error::Link(format!("unknown export {name}")))?;
        let ExportIndex::Function(func_idx) = export.index else {
            return Err(Error::SignatureMismatch(format!(
                "export {name} is a {}, not a function",
                export.index.kind_name()
            )));
        };
        let ty = self
            .module
            .function_type(func_idx)
            .ok_or(RuntimeError::InvalidIndex("function", func_idx))?;
        Ok((func_idx, ty))
    }

    /// Signature of an exported function
    pub fn export_signature(&self, name: &str) -> Result<&FunctionType, Error> {
        self.exported_function(name).map(|(_, ty)| ty)
    }

    pub fn exports(&self) -> &[Export] {
        &self.module.exports
    }

    pub fn memory(&self) -> Option<&Memory> {
        self.store.memory.as_ref()
    }

    pub fn memory_mut(&mut self) -> Option<&mut Memory> {
        self.store.memory.as_mut()
    }

    /// Current value of an exported global
    pub fn global(&self, name: &str) -> Option<Value> {
        match self.module.export(name)?.index {
            ExportIndex::Global(idx) => self.store.global(idx).ok().map(|global| global.value),
            _ => None,
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Release the instance. Equivalent to dropping it.
    pub fn destroy(self) {
        debug!("{}: destroyed", self.module.name);
    }
}

/// A provided import as the resolver holds it. Functions and globals can
/// satisfy any number of declarations; a memory or table moves into the
/// store the first time it is bound.
enum Binding {
    Function(Rc<HostFunction>),
    Global { value: Value, mutable: bool },
    Memory(Option<Memory>),
    Table(Option<Table>),
}

impl From<Extern> for Binding {
    fn from(value: Extern) -> Self {
        match value {
            Extern::Function(func) => Binding::Function(Rc::new(func)),
            Extern::Global { value, mutable } => Binding::Global { value, mutable },
            Extern::Memory(memory) => Binding::Memory(Some(memory)),
            Extern::Table(table) => Binding::Table(Some(table)),
        }
    }
}

impl Binding {
    fn kind_name(&self) -> &'static str {
        match self {
            Binding::Function(_) => "function",
            Binding::Global { .. } => "global",
            Binding::Memory(_) => "memory",
            Binding::Table(_) => "table",
        }
    }
}

/// Bind the provided imports into the store, in the module's import order.
fn resolve_imports(module: &Module, imports: Imports, store: &mut Store) -> Result<(), Error> {
    let mut provided: HashMap<(String, String), (Binding, bool)> = HashMap::with_capacity(imports.len());
    for ImportDescriptor { module: namespace, name, value } in imports {
        match provided.entry((namespace, name)) {
            Entry::Occupied(entry) => {
                let (namespace, name) = entry.key();
                return Err(Error::Link(format!("duplicate import {namespace}.{name}")));
            }
            Entry::Vacant(entry) => {
                entry.insert((value.into(), false));
            }
        }
    }

    for import in &module.imports {
        let qualified = format!("{}.{}", import.module, import.name);
        let (binding, used) = provided
            .get_mut(&(import.module.clone(), import.name.clone()))
            .ok_or_else(|| Error::Link(format!("unknown import {qualified}")))?;
        *used = true;
        let incompatible = |expected: &dyn std::fmt::Display, actual: &dyn std::fmt::Display| {
            Error::Link(format!(
                "incompatible import type for {qualified}: expected {expected}, got {actual}"
            ))
        };
        let already_bound = || Error::Link(format!("import {qualified} is already bound to another declaration"));

        match (&import.external_kind, binding) {
            (ExternalKind::Function(type_idx), Binding::Function(func)) => {
                let expected = module
                    .types
                    .get(*type_idx as usize)
                    .ok_or(RuntimeError::InvalidIndex("type", *type_idx))?;
                if func.ty() != expected {
                    return Err(incompatible(expected, func.ty()));
                }
                store.functions.push(FunctionInstance::Host {
                    name: qualified,
                    func: Rc::clone(func),
                });
            }
            (ExternalKind::Global(expected), Binding::Global { value, mutable }) => {
                let (value, mutable) = (*value, *mutable);
                if value.typ() != expected.value_type || mutable != expected.mutable {
                    let actual = if mutable {
                        format!("(mut {})", value.typ())
                    } else {
                        value.typ().to_string()
                    };
                    return Err(incompatible(expected, &actual));
                }
                store.globals.push(GlobalInstance { value, mutable });
            }
            (ExternalKind::Memory(expected), Binding::Memory(slot)) => {
                let memory = slot.take().ok_or_else(already_bound)?;
                if !expected.accepts(&memory.limits()) {
                    return Err(incompatible(&format!("memory {expected}"), &format!("memory {}", memory.limits())));
                }
                store.memory = Some(memory);
            }
            (ExternalKind::Table(expected), Binding::Table(slot)) => {
                let table = slot.take().ok_or_else(already_bound)?;
                if !expected.limits.accepts(&table.limits()) {
                    return Err(incompatible(
                        &format!("table {}", expected.limits),
                        &format!("table {}", table.limits()),
                    ));
                }
                store.table = Some(table);
            }
            (expected, actual) => return Err(incompatible(&expected.name(), &actual.kind_name())),
        }
    }

    for ((namespace, name), _) in provided.iter().filter(|(_, (_, used))| !used) {
        warn!("import {namespace}.{name} is not used by {}", module.name);
    }
    Ok(())
}

/// Allocate the module's own memory and table, define its functions and
/// evaluate global initialisers.
fn allocate(module: &Module, config: &Config, store: &mut Store) -> Result<(), Error> {
    for limits in &module.memories {
        store.memory = Some(Memory::new(*limits, config.max_memory_pages)?);
    }
    for table_type in &module.tables {
        store.table = Some(Table::new(table_type.limits)?);
    }
    for (code_idx, type_idx) in module.functions.iter().enumerate() {
        store.functions.push(FunctionInstance::Wasm {
            type_idx: *type_idx,
            code_idx,
        });
    }
    for global in &module.globals {
        let value = store.eval_const(&global.init)?;
        store.globals.push(GlobalInstance {
            value,
            mutable: global.global_type.mutable,
        });
    }
    Ok(())
}

/// Copy active element and data segments into the table and memory
fn apply_segments(module: &Module, store: &mut Store) -> Result<(), RuntimeError> {
    for element in &module.elements {
        if let SegmentMode::Active { offset, .. } = &element.mode {
            let offset = segment_offset(store, offset)?;
            let table = store.table.as_mut().ok_or(RuntimeError::TableOutOfBounds)?;
            table.init(offset, &element.functions)?;
        }
    }
    for data in &module.data {
        if let SegmentMode::Active { offset, .. } = &data.mode {
            let offset = segment_offset(store, offset)?;
            let memory = store.memory.as_mut().ok_or(RuntimeError::MemoryOutOfBounds)?;
            memory.write(offset, 0, &data.bytes)?;
        }
    }
    Ok(())
}

fn segment_offset(store: &Store, offset: &crate::parser::module::ConstExpr) -> Result<u32, RuntimeError> {
    match store.eval_const(offset)? {
        Value::I32(offset) => Ok(offset as u32),
        other => Err(RuntimeError::TypeMismatch {
            expected: ValueType::I32,
            actual: other.typ(),
        }),
    }
}
