//! C API
//!
//! Opaque instance handles, status codes and the last-error queries. Every
//! entry point runs inside `catch_unwind`, so neither a trap nor a Rust panic
//! ever unwinds into the caller; failures become `EMBER_ERROR` plus a message
//! in the calling thread's error channel.
//!
//! A host program follows the usual sequence:
//!
//! ```c
//! ember_instance_t *instance = NULL;
//! if (ember_instantiate(&instance, bytes, len, imports, 0) != EMBER_OK) {
//!     int len = ember_last_error_length();
//!     char *message = malloc(len);
//!     ember_last_error_message(message, len);
//! }
//! ember_instance_call(instance, "add", params, 2, results, 1);
//! ember_instance_destroy(instance);
//! ```

#![allow(non_camel_case_types, clippy::missing_safety_doc)]

use std::cell::RefCell;
use std::ffi::{c_char, c_int, c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::slice;

use crate::engine::Engine;
use crate::error::Error;
use crate::last_error::ErrorChannel;
use crate::parser::module::ValueType;
use crate::runtime::imports::panic_message;
use crate::runtime::{Extern, HostError, HostFunction, Imports, Instance, Value};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ember_result_t {
    EMBER_OK = 1,
    EMBER_ERROR = 2,
}

/// Value type tags, the WebAssembly value type bytes
pub type ember_value_tag = u32;

pub const EMBER_I32: ember_value_tag = 0x7f;
pub const EMBER_I64: ember_value_tag = 0x7e;
pub const EMBER_F32: ember_value_tag = 0x7d;
pub const EMBER_F64: ember_value_tag = 0x7c;

#[repr(C)]
#[derive(Clone, Copy)]
pub union ember_value {
    pub i32: i32,
    pub i64: i64,
    pub f32: f32,
    pub f64: f64,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ember_value_t {
    pub tag: ember_value_tag,
    pub value: ember_value,
}

impl From<Value> for ember_value_t {
    fn from(value: Value) -> Self {
        match value {
            Value::I32(v) => ember_value_t {
                tag: EMBER_I32,
                value: ember_value { i32: v },
            },
            Value::I64(v) => ember_value_t {
                tag: EMBER_I64,
                value: ember_value { i64: v },
            },
            Value::F32(v) => ember_value_t {
                tag: EMBER_F32,
                value: ember_value { f32: v },
            },
            Value::F64(v) => ember_value_t {
                tag: EMBER_F64,
                value: ember_value { f64: v },
            },
        }
    }
}

impl TryFrom<&ember_value_t> for Value {
    type Error = String;

    fn try_from(value: &ember_value_t) -> Result<Self, Self::Error> {
        // SAFETY: the tag selects the union field the caller initialised
        unsafe {
            match value.tag {
                EMBER_I32 => Ok(Value::I32(value.value.i32)),
                EMBER_I64 => Ok(Value::I64(value.value.i64)),
                EMBER_F32 => Ok(Value::F32(value.value.f32)),
                EMBER_F64 => Ok(Value::F64(value.value.f64)),
                tag => Err(format!("invalid value tag 0x{tag:x}")),
            }
        }
    }
}

fn value_type(tag: ember_value_tag) -> Result<ValueType, String> {
    u8::try_from(tag)
        .ok()
        .and_then(|byte| ValueType::decode(byte).ok())
        .ok_or_else(|| format!("invalid value tag 0x{tag:x}"))
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ember_byte_array {
    pub bytes: *const u8,
    pub bytes_len: u32,
}

impl ember_byte_array {
    unsafe fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(raw_slice(self.bytes, self.bytes_len)?).ok()
    }
}

/// Host callback. Returning `EMBER_ERROR` traps the guest; the callback may
/// set the trap text with [`ember_trap_message`] first.
pub type ember_host_fn = Option<
    unsafe extern "C" fn(
        user_data: *mut c_void,
        params: *const ember_value_t,
        params_len: u32,
        results: *mut ember_value_t,
        results_len: u32,
    ) -> ember_result_t,
>;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ember_import_func_t {
    pub callback: ember_host_fn,
    pub params: *const ember_value_tag,
    pub params_len: u32,
    pub returns: *const ember_value_tag,
    pub returns_len: u32,
    pub user_data: *mut c_void,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ember_import_global_t {
    pub value: ember_value_t,
    pub mutable: bool,
}

pub type ember_import_kind = u32;

pub const EMBER_IMPORT_FUNCTION: ember_import_kind = 0;
pub const EMBER_IMPORT_GLOBAL: ember_import_kind = 3;

#[repr(C)]
#[derive(Clone, Copy)]
pub union ember_import_value {
    pub func: ember_import_func_t,
    pub global: ember_import_global_t,
}

#[repr(C)]
pub struct ember_import_t {
    pub module_name: ember_byte_array,
    pub import_name: ember_byte_array,
    pub tag: ember_import_kind,
    pub value: ember_import_value,
}

/// Opaque instance handle
pub struct ember_instance_t {
    inner: Instance,
}

thread_local! {
    /// Text set by a failing host callback through `ember_trap_message`
    static TRAP_MESSAGE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// A slice over caller memory. Empty when `len` is 0, `None` for a null
/// pointer with a non-zero length.
unsafe fn raw_slice<'a, T>(ptr: *const T, len: u32) -> Option<&'a [T]> {
    if len == 0 {
        Some(&[])
    } else if ptr.is_null() {
        None
    } else {
        Some(slice::from_raw_parts(ptr, len as usize))
    }
}

fn record(error: &Error) {
    ErrorChannel::with_current(|channel| channel.record_error(error));
}

/// Run an entry point, recording its failure or panic in the calling
/// thread's channel.
fn boundary(body: impl FnOnce() -> Result<(), Error>) -> ember_result_t {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => ember_result_t::EMBER_OK,
        Ok(Err(error)) => {
            record(&error);
            ember_result_t::EMBER_ERROR
        }
        Err(payload) => {
            let message = format!("runtime trap: panic: {}", panic_message(&*payload));
            ErrorChannel::with_current(|channel| channel.record(message));
            ember_result_t::EMBER_ERROR
        }
    }
}

unsafe fn host_function(name: &str, import: &ember_import_func_t) -> Result<HostFunction, Error> {
    let invalid = |what: &str| Error::Link(format!("import {name}: {what}"));
    let callback = import.callback.ok_or_else(|| invalid("null callback"))?;
    let tags = |ptr: *const ember_value_tag, len: u32| -> Result<Vec<ValueType>, Error> {
        raw_slice(ptr, len)
            .ok_or_else(|| invalid("null type array"))?
            .iter()
            .map(|tag| value_type(*tag).map_err(|e| invalid(&e)))
            .collect()
    };
    let params = tags(import.params, import.params_len)?;
    let results = tags(import.returns, import.returns_len)?;
    let result_types = results.clone();
    let user_data = import.user_data;

    Ok(HostFunction::new(params, results, move |_, args| {
        let args: Vec<ember_value_t> = args.iter().map(|v| ember_value_t::from(*v)).collect();
        let mut results: Vec<ember_value_t> = result_types
            .iter()
            .map(|t| ember_value_t::from(Value::default_for(*t)))
            .collect();

        TRAP_MESSAGE.with(|message| message.borrow_mut().take());
        let status = callback(
            user_data,
            args.as_ptr(),
            args.len() as u32,
            results.as_mut_ptr(),
            results.len() as u32,
        );
        if status != ember_result_t::EMBER_OK {
            let message = TRAP_MESSAGE.with(|message| message.borrow_mut().take());
            return Err(HostError(
                message.unwrap_or_else(|| "host function returned an error".to_string()),
            ));
        }
        results.iter().map(|v| Value::try_from(v).map_err(HostError)).collect()
    }))
}

unsafe fn collect_imports(imports: &[ember_import_t]) -> Result<Imports, Error> {
    let mut collected = Imports::new();
    for import in imports {
        let (Some(module), Some(name)) = (import.module_name.as_str(), import.import_name.as_str()) else {
            return Err(Error::Link("import name is not valid UTF-8".to_string()));
        };
        let qualified = format!("{module}.{name}");
        let value = match import.tag {
            EMBER_IMPORT_FUNCTION => Extern::Function(host_function(&qualified, &import.value.func)?),
            EMBER_IMPORT_GLOBAL => {
                let global = import.value.global;
                let value = Value::try_from(&global.value)
                    .map_err(|e| Error::Link(format!("import {qualified}: {e}")))?;
                Extern::Global {
                    value,
                    mutable: global.mutable,
                }
            }
            tag => return Err(Error::Link(format!("import {qualified}: unsupported import kind {tag}"))),
        };
        collected.push(module, name, value);
    }
    Ok(collected)
}

/// Compile and instantiate a module. On success `*out_instance` receives a
/// handle the caller must release with [`ember_instance_destroy`]; on failure
/// it is left untouched.
#[no_mangle]
pub unsafe extern "C" fn ember_instantiate(
    out_instance: *mut *mut ember_instance_t,
    bytes: *const u8,
    bytes_len: u32,
    imports: *const ember_import_t,
    imports_len: u32,
) -> ember_result_t {
    boundary(|| {
        if out_instance.is_null() {
            return Err(Error::Link("instance out-pointer is null".to_string()));
        }
        let bytes = raw_slice(bytes, bytes_len).ok_or_else(|| Error::Link("module bytes are null".to_string()))?;
        let imports = raw_slice(imports, imports_len).ok_or_else(|| Error::Link("import array is null".to_string()))?;
        let imports = collect_imports(imports)?;

        let instance = Engine::new().instantiate_unrecorded(bytes, imports)?;
        *out_instance = Box::into_raw(Box::new(ember_instance_t { inner: instance }));
        Ok(())
    })
}

/// Call an exported function. `results_len` must equal the number of
/// values the function returns; results are written only on success.
#[no_mangle]
pub unsafe extern "C" fn ember_instance_call(
    instance: *mut ember_instance_t,
    name: *const c_char,
    params: *const ember_value_t,
    params_len: u32,
    results: *mut ember_value_t,
    results_len: u32,
) -> ember_result_t {
    boundary(|| {
        let instance = match instance.as_mut() {
            Some(instance) => &mut instance.inner,
            None => return Err(Error::SignatureMismatch("instance is null".to_string())),
        };
        if name.is_null() {
            return Err(Error::Link("export name is null".to_string()));
        }
        let name = CStr::from_ptr(name)
            .to_str()
            .map_err(|_| Error::Link("export name is not valid UTF-8".to_string()))?;

        let args = raw_slice(params, params_len)
            .ok_or_else(|| Error::SignatureMismatch("parameter array is null".to_string()))?
            .iter()
            .map(Value::try_from)
            .collect::<Result<Vec<Value>, String>>()
            .map_err(Error::SignatureMismatch)?;

        let expected = instance.export_signature(name)?.return_types.len();
        if expected != results_len as usize || (results.is_null() && results_len != 0) {
            return Err(Error::SignatureMismatch(format!(
                "{name} returns {expected} values but {results_len} result slots were given"
            )));
        }

        let values = instance.call(name, &args)?;
        for (i, value) in values.into_iter().enumerate() {
            *results.add(i) = ember_value_t::from(value);
        }
        Ok(())
    })
}

/// Release an instance. A null handle is ignored.
#[no_mangle]
pub unsafe extern "C" fn ember_instance_destroy(instance: *mut ember_instance_t) {
    if !instance.is_null() {
        let instance = Box::from_raw(instance);
        let _ = catch_unwind(AssertUnwindSafe(move || instance.inner.destroy()));
    }
}

/// Byte length of the last recorded error message, excluding any terminator
#[no_mangle]
pub extern "C" fn ember_last_error_length() -> c_int {
    let length = ErrorChannel::with_current(ErrorChannel::length);
    c_int::try_from(length).unwrap_or(c_int::MAX)
}

/// Copy up to `length` bytes of the last error message into `buffer`. No
/// terminator is written. Returns the number of bytes copied, or -1 when
/// `buffer` is null and `length` is not 0.
#[no_mangle]
pub unsafe extern "C" fn ember_last_error_message(buffer: *mut c_char, length: c_int) -> c_int {
    if length < 0 || (buffer.is_null() && length != 0) {
        return -1;
    }
    if length == 0 {
        return 0;
    }
    let buffer = slice::from_raw_parts_mut(buffer.cast::<u8>(), length as usize);
    let written = ErrorChannel::with_current(|channel| channel.copy_into(buffer));
    written as c_int
}

/// Set the message of the trap a host callback is about to raise
#[no_mangle]
pub unsafe extern "C" fn ember_trap_message(message: *const u8, length: u32) {
    let text = raw_slice(message, length)
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .unwrap_or_default();
    TRAP_MESSAGE.with(|slot| *slot.borrow_mut() = Some(text));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_conversion() {
        let c = ember_value_t::from(Value::I64(-5));
        assert_eq!(c.tag, EMBER_I64);
        assert_eq!(Value::try_from(&c).unwrap(), Value::I64(-5));

        let bad = ember_value_t {
            tag: 0x40,
            value: ember_value { i32: 0 },
        };
        assert_eq!(Value::try_from(&bad).unwrap_err(), "invalid value tag 0x40");
        assert_eq!(value_type(EMBER_F32).unwrap(), ValueType::F32);
        assert!(value_type(0x17f).is_err());
    }

    #[test]
    fn raw_slices() {
        unsafe {
            assert_eq!(raw_slice::<u8>(std::ptr::null(), 0), Some(&[][..]));
            assert_eq!(raw_slice::<u8>(std::ptr::null(), 3), None);
            let bytes = [1u8, 2, 3];
            assert_eq!(raw_slice(bytes.as_ptr(), 2), Some(&bytes[..2]));
        }
    }

    #[test]
    fn boundary_contains_panics() {
        let status = boundary(|| panic!("host exploded"));
        assert_eq!(status, ember_result_t::EMBER_ERROR);
        assert_eq!(
            ErrorChannel::current().message().as_deref(),
            Some("runtime trap: panic: host exploded")
        );
    }
}
