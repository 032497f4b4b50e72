//! Common test utilities shared between integration tests
#![allow(dead_code)]

use std::sync::Arc;

use ember::{Engine, ErrorChannel};

/// Module with no imports whose `throw_wasm_error` export always traps
pub const THROW_WASM_ERROR: &str = r#"
(module
    (func (export "throw_wasm_error") (result i32)
        unreachable)
    (func (export "add") (param i32 i32) (result i32)
        (i32.add (local.get 0) (local.get 1))))
"#;

/// Exports that each fail in a different way
pub const FAULTS: &str = r#"
(module
    (memory 1)
    (table 1 funcref)
    (func $recurse (export "recurse") (call $recurse))
    (func (export "divide") (param i32 i32) (result i32)
        (i32.div_s (local.get 0) (local.get 1)))
    (func (export "overflow") (result i32)
        (i32.div_s (i32.const -2147483648) (i32.const -1)))
    (func (export "load") (param i32) (result i64)
        (i64.load (local.get 0)))
    (func (export "truncate") (param f64) (result i32)
        (i32.trunc_f64_s (local.get 0)))
    (func (export "indirect") (result i32)
        (call_indirect (result i32) (i32.const 0))))
"#;

pub fn assemble(wat: &str) -> Vec<u8> {
    wat::parse_str(wat).expect("test module should assemble")
}

/// An engine recording into a channel of its own
pub fn isolated_engine() -> (Engine, Arc<ErrorChannel>) {
    let channel = Arc::new(ErrorChannel::new());
    (Engine::new().with_channel(channel.clone()), channel)
}

/// Read a channel's message the way a C host does: ask for the length, then
/// copy exactly that many bytes.
pub fn read_message(channel: &ErrorChannel) -> String {
    let mut buffer = vec![0u8; channel.length()];
    let written = channel.copy_into(&mut buffer);
    assert_eq!(written, buffer.len());
    String::from_utf8(buffer).expect("recorded messages are UTF-8")
}
