//! An embeddable WebAssembly instantiation core.
//!
//! ember decodes and validates a module, binds host imports, allocates the
//! instance and runs it on an interpreter. Every failure is returned as an
//! [`Error`] and also recorded in a last-error channel, which C hosts query
//! through the [`ffi`] layer after a call reports `EMBER_ERROR`.
//!
//! # Modules
//!
//! - [`parser`] -- Binary format decoder and validator. Reads `.wasm` bytes into a [`parser::module::Module`].
//! - [`runtime`] -- Interpreter, memory, tables, import binding and instances.
//! - [`engine`] -- Compile and instantiate with a [`Config`] and an error channel.
//! - [`last_error`] -- The last-error channel.
//! - [`ffi`] -- C ABI.
//!
//! # Example
//!
//! ```
//! use ember::{Engine, ErrorChannel, Imports, Value};
//!
//! let bytes = wat::parse_str(r#"
//!     (module
//!         (func (export "add") (param i32 i32) (result i32)
//!             local.get 0
//!             local.get 1
//!             i32.add)
//!         (func (export "throw_wasm_error") unreachable))
//! "#).unwrap();
//!
//! let engine = Engine::new();
//! let mut instance = engine.instantiate(&bytes, Imports::new()).unwrap();
//! assert_eq!(instance.invoke("add", &[Value::I32(2), Value::I32(3)]).unwrap(), vec![Value::I32(5)]);
//!
//! assert!(instance.invoke("throw_wasm_error", &[]).is_err());
//! assert_eq!(
//!     ErrorChannel::current().message().as_deref(),
//!     Some("runtime trap: unreachable executed")
//! );
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod last_error;
pub mod parser;
pub mod runtime;

pub use config::Config;
pub use engine::Engine;
pub use error::{Error, ErrorKind};
pub use last_error::ErrorChannel;
pub use runtime::{Caller, Extern, HostError, HostFunction, Imports, Instance, Memory, Table, Value};
