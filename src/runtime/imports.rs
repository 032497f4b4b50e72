//! Host-provided imports
//!
//! The host hands a sequence of [`ImportDescriptor`]s to instantiation, one per
//! `(module, name)` pair the guest declares. Values are moved into the
//! instance; functions are host closures with a declared signature.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use super::{Memory, RuntimeError, Table, Value};
use crate::parser::module::{FunctionType, ValueType};

/// Failure reported by a host function. The text ends up verbatim in the
/// recorded trap message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HostError(pub String);

impl From<&str> for HostError {
    fn from(message: &str) -> Self {
        HostError(message.to_string())
    }
}

impl From<String> for HostError {
    fn from(message: String) -> Self {
        HostError(message)
    }
}

/// What a host function can see of the calling instance
pub struct Caller<'a> {
    memory: Option<&'a mut Memory>,
}

impl<'a> Caller<'a> {
    pub(crate) fn new(memory: Option<&'a mut Memory>) -> Caller<'a> {
        Caller { memory }
    }

    /// The instance's linear memory, if it has one
    pub fn memory(&mut self) -> Option<&mut Memory> {
        self.memory.as_deref_mut()
    }

    /// Read a UTF-8 string the guest placed in memory
    pub fn read_utf8(&self, ptr: u32, len: u32) -> Result<String, HostError> {
        let memory = self
            .memory
            .as_deref()
            .ok_or_else(|| HostError::from("instance has no memory"))?;
        let bytes = memory
            .read(ptr, 0, len as usize)
            .map_err(|e| HostError(e.to_string()))?;
        String::from_utf8(bytes.to_vec()).map_err(|_| HostError::from("string is not valid UTF-8"))
    }
}

type HostFn = dyn Fn(&mut Caller<'_>, &[Value]) -> Result<Vec<Value>, HostError>;

/// A host closure with the signature the guest will call it through
pub struct HostFunction {
    ty: FunctionType,
    func: Box<HostFn>,
}

impl HostFunction {
    pub fn new<F>(params: Vec<ValueType>, results: Vec<ValueType>, func: F) -> HostFunction
    where
        F: Fn(&mut Caller<'_>, &[Value]) -> Result<Vec<Value>, HostError> + 'static,
    {
        HostFunction {
            ty: FunctionType::new(params, results),
            func: Box::new(func),
        }
    }

    pub fn ty(&self) -> &FunctionType {
        &self.ty
    }

    /// Call the closure on behalf of the guest.
    ///
    /// Errors and panics raised by the closure become a `HostTrap` naming
    /// `function`; results must match the declared signature.
    pub fn call(&self, function: &str, caller: &mut Caller<'_>, args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
        let trap = |message: String| RuntimeError::HostTrap {
            function: function.to_string(),
            message,
        };

        let results = match catch_unwind(AssertUnwindSafe(|| (self.func)(caller, args))) {
            Ok(Ok(results)) => results,
            Ok(Err(HostError(message))) => return Err(trap(message)),
            Err(payload) => return Err(trap(format!("host function panicked: {}", panic_message(&*payload)))),
        };

        let actual: Vec<ValueType> = results.iter().map(Value::typ).collect();
        if actual != self.ty.return_types {
            return Err(trap(format!(
                "returned ({}) but is declared as {}",
                actual.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
                self.ty
            )));
        }
        Ok(results)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostFunction({})", self.ty)
    }
}

/// Best effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A value the host provides for one import
#[derive(Debug)]
pub enum Extern {
    Function(HostFunction),
    Global { value: Value, mutable: bool },
    Memory(Memory),
    Table(Table),
}

impl Extern {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Extern::Function(_) => "function",
            Extern::Global { .. } => "global",
            Extern::Memory(_) => "memory",
            Extern::Table(_) => "table",
        }
    }
}

impl From<HostFunction> for Extern {
    fn from(func: HostFunction) -> Self {
        Extern::Function(func)
    }
}

impl From<Memory> for Extern {
    fn from(memory: Memory) -> Self {
        Extern::Memory(memory)
    }
}

impl From<Table> for Extern {
    fn from(table: Table) -> Self {
        Extern::Table(table)
    }
}

/// (namespace, name, value)
#[derive(Debug)]
pub struct ImportDescriptor {
    pub module: String,
    pub name: String,
    pub value: Extern,
}

/// The import table handed to instantiation. Order is irrelevant, but each
/// `(module, name)` pair may appear only once.
#[derive(Debug, Default)]
pub struct Imports {
    entries: Vec<ImportDescriptor>,
}

impl Imports {
    pub fn new() -> Self {
        Imports { entries: Vec::new() }
    }

    pub fn push(&mut self, module: impl Into<String>, name: impl Into<String>, value: impl Into<Extern>) {
        self.entries.push(ImportDescriptor {
            module: module.into(),
            name: name.into(),
            value: value.into(),
        });
    }

    /// Builder form of [`Imports::push`]
    pub fn with(mut self, module: impl Into<String>, name: impl Into<String>, value: impl Into<Extern>) -> Self {
        self.push(module, name, value);
        self
    }

    pub fn function<F>(
        self,
        module: impl Into<String>,
        name: impl Into<String>,
        params: Vec<ValueType>,
        results: Vec<ValueType>,
        func: F,
    ) -> Self
    where
        F: Fn(&mut Caller<'_>, &[Value]) -> Result<Vec<Value>, HostError> + 'static,
    {
        self.with(module, name, HostFunction::new(params, results, func))
    }

    pub fn global(self, module: impl Into<String>, name: impl Into<String>, value: Value, mutable: bool) -> Self {
        self.with(module, name, Extern::Global { value, mutable })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for Imports {
    type Item = ImportDescriptor;
    type IntoIter = std::vec::IntoIter<ImportDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add() -> HostFunction {
        HostFunction::new(vec![ValueType::I32, ValueType::I32], vec![ValueType::I32], |_, args| {
            match args {
                [Value::I32(a), Value::I32(b)] => Ok(vec![Value::I32(a + b)]),
                _ => Err("bad arguments".into()),
            }
        })
    }

    #[test]
    fn test_host_call() {
        let mut caller = Caller::new(None);
        let results = add().call("env.add", &mut caller, &[Value::I32(2), Value::I32(3)]).unwrap();
        assert_eq!(results, vec![Value::I32(5)]);
        assert_eq!(add().ty().to_string(), "(i32, i32) -> i32");
    }

    #[test]
    fn test_host_error_becomes_trap() {
        let mut caller = Caller::new(None);
        let err = add().call("env.add", &mut caller, &[Value::I64(2)]).unwrap_err();
        assert_eq!(err.to_string(), "env.add: bad arguments");
    }

    #[test]
    fn test_host_panic_is_contained() {
        let boom = HostFunction::new(vec![], vec![], |_, _| panic!("boom"));
        let mut caller = Caller::new(None);
        let err = boom.call("env.boom", &mut caller, &[]).unwrap_err();
        assert_eq!(err.to_string(), "env.boom: host function panicked: boom");
    }

    #[test]
    fn test_host_results_checked() {
        let wrong = HostFunction::new(vec![], vec![ValueType::I64], |_, _| Ok(vec![Value::I32(1)]));
        let mut caller = Caller::new(None);
        let err = wrong.call("env.wrong", &mut caller, &[]).unwrap_err();
        assert_eq!(err.to_string(), "env.wrong: returned (i32) but is declared as () -> i64");
    }

    #[test]
    fn test_caller_reads_guest_strings() {
        let mut memory = Memory::with_pages(1, None).unwrap();
        memory.write(16, 0, b"hello").unwrap();
        let caller = Caller::new(Some(&mut memory));
        assert_eq!(caller.read_utf8(16, 5).unwrap(), "hello");
        assert!(caller.read_utf8(65535, 2).is_err());
        assert!(Caller::new(None).read_utf8(0, 0).is_err());
    }

    #[test]
    fn test_imports_builder() {
        let imports = Imports::new()
            .with("env", "add", add())
            .global("env", "base", Value::I32(8), false)
            .with("env", "memory", Memory::with_pages(1, None).unwrap());
        assert_eq!(imports.len(), 3);
        let kinds: Vec<&str> = imports.into_iter().map(|d| d.value.kind_name()).collect();
        assert_eq!(kinds, vec!["function", "global", "memory"]);
    }
}
