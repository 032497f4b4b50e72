mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::{assemble, isolated_engine, read_message, FAULTS, THROW_WASM_ERROR};
use ember::parser::module::ValueType;
use ember::{Config, Engine, ErrorChannel, ErrorKind, Imports, Value};
use rstest::rstest;

#[rstest]
#[case::empty(&[])]
#[case::truncated_magic(&[0x00, 0x61, 0x73])]
#[case::wrong_magic(&[0x00, 0x61, 0x73, 0x6e, 0x01, 0x00, 0x00, 0x00])]
#[case::invalid_version(&[0x00, 0x61, 0x73, 0x6d, 0x0d, 0x00, 0x00, 0x00])]
#[case::truncated_version(&[0x00, 0x61, 0x73, 0x6d, 0x01, 0x00])]
#[case::truncated_section(&[0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, 0x01, 0x05, 0x01])]
fn malformed_bytes_are_compile_errors(#[case] bytes: &[u8]) {
    let (engine, channel) = isolated_engine();
    let err = engine.instantiate(bytes, Imports::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CompileError);
    assert!(channel.length() > 0);
    assert!(read_message(&channel).starts_with("compile error: "));
}

#[test]
fn unresolved_import_names_namespace_and_field() {
    let (engine, channel) = isolated_engine();
    let bytes = assemble(r#"(module (import "env" "print_str" (func (param i32 i32))))"#);
    let err = engine.instantiate(&bytes, Imports::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LinkError);
    let message = read_message(&channel);
    assert!(message.contains("env"), "{message}");
    assert!(message.contains("print_str"), "{message}");
}

#[test]
fn throw_wasm_error_scenario() {
    let (engine, channel) = isolated_engine();
    let mut instance = engine.instantiate(&assemble(THROW_WASM_ERROR), Imports::new()).unwrap();
    assert_eq!(channel.length(), 0);

    let err = instance.invoke("throw_wasm_error", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RuntimeTrap);

    let length = channel.length();
    let message = read_message(&channel);
    assert!(!message.is_empty());
    assert!(!message.contains('\0'));
    assert_eq!(message.len(), length);
    assert_eq!(message, "runtime trap: unreachable executed");

    // the host and the instance survive the trap
    assert_eq!(
        instance.invoke("add", &[Value::I32(2), Value::I32(3)]).unwrap(),
        vec![Value::I32(5)]
    );
    instance.destroy();
}

#[test]
fn queries_are_idempotent() {
    let (engine, channel) = isolated_engine();
    let mut instance = engine.instantiate(&assemble(THROW_WASM_ERROR), Imports::new()).unwrap();
    instance.invoke("throw_wasm_error", &[]).unwrap_err();

    let first = (channel.length(), read_message(&channel));
    let second = (channel.length(), read_message(&channel));
    assert_eq!(first, second);
}

#[test]
fn destroy_leaves_other_instances_alone() {
    let (engine, _) = isolated_engine();
    let bytes = assemble(THROW_WASM_ERROR);
    let first = engine.instantiate(&bytes, Imports::new()).unwrap();
    let mut second = engine.instantiate(&bytes, Imports::new()).unwrap();
    first.destroy();
    assert_eq!(
        second.invoke("add", &[Value::I32(40), Value::I32(2)]).unwrap(),
        vec![Value::I32(42)]
    );
}

#[test]
fn start_trap_yields_no_instance() {
    let (engine, channel) = isolated_engine();
    let bytes = assemble("(module (func $start unreachable) (start $start))");
    let err = engine.instantiate(&bytes, Imports::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RuntimeTrap);
    assert_eq!(read_message(&channel), "runtime trap: unreachable executed");
}

#[test]
fn duplicate_import_descriptors() {
    let (engine, channel) = isolated_engine();
    let bytes = assemble(r#"(module (import "env" "tick" (func)))"#);
    let imports = Imports::new()
        .function("env", "tick", vec![], vec![], |_, _| Ok(vec![]))
        .function("env", "tick", vec![], vec![], |_, _| Ok(vec![]));
    assert_eq!(engine.instantiate(&bytes, imports).unwrap_err().kind(), ErrorKind::LinkError);
    assert_eq!(read_message(&channel), "link error: duplicate import env.tick");
}

#[test]
fn repeated_import_declarations_share_one_descriptor() {
    let (engine, _) = isolated_engine();
    let bytes = assemble(
        r#"(module
            (import "env" "g" (global $a i32))
            (import "env" "g" (global $b i32))
            (func (export "sum") (result i32) (i32.add (global.get $a) (global.get $b))))"#,
    );
    let imports = Imports::new().global("env", "g", Value::I32(1), false);
    let mut instance = engine.instantiate(&bytes, imports).unwrap();
    assert_eq!(instance.invoke("sum", &[]).unwrap(), vec![Value::I32(2)]);
}

#[test]
fn loops_run_to_completion() {
    let (engine, _) = isolated_engine();
    let bytes = assemble(
        r#"(module
            (func (export "f") (result i32) (loop (result i32) (i32.const 5)))
            (func (export "sum") (param i32) (result i32)
                (local i32)
                (block
                    (loop
                        (br_if 1 (i32.eqz (local.get 0)))
                        (local.set 1 (i32.add (local.get 1) (local.get 0)))
                        (local.set 0 (i32.sub (local.get 0) (i32.const 1)))
                        (br 0)))
                local.get 1))"#,
    );
    let mut instance = engine.instantiate(&bytes, Imports::new()).unwrap();
    assert_eq!(instance.invoke("f", &[]).unwrap(), vec![Value::I32(5)]);
    assert_eq!(instance.invoke("sum", &[Value::I32(10)]).unwrap(), vec![Value::I32(55)]);
}

#[test]
fn import_signature_mismatch() {
    let (engine, _) = isolated_engine();
    let bytes = assemble(r#"(module (import "env" "tick" (func (param i32))))"#);
    let imports = Imports::new().function("env", "tick", vec![ValueType::F32], vec![], |_, _| Ok(vec![]));
    assert_eq!(engine.instantiate(&bytes, imports).unwrap_err().kind(), ErrorKind::LinkError);
}

#[test]
fn mismatched_invoke_runs_no_guest_code() {
    let (engine, channel) = isolated_engine();
    let bytes = assemble(
        r#"(module
            (import "env" "tick" (func $tick))
            (func (export "run") (param i32) (call $tick)))"#,
    );
    let ticks = Rc::new(Cell::new(0));
    let counter = ticks.clone();
    let imports = Imports::new().function("env", "tick", vec![], vec![], move |_, _| {
        counter.set(counter.get() + 1);
        Ok(vec![])
    });
    let mut instance = engine.instantiate(&bytes, imports).unwrap();

    for args in [&[][..], &[Value::I64(1)], &[Value::I32(1), Value::I32(2)]] {
        let err = instance.invoke("run", args).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureMismatch);
    }
    assert_eq!(ticks.get(), 0);
    assert!(read_message(&channel).starts_with("signature mismatch: "));

    instance.invoke("run", &[Value::I32(1)]).unwrap();
    assert_eq!(ticks.get(), 1);
}

#[rstest]
#[case("divide", vec![Value::I32(1), Value::I32(0)], "runtime trap: integer divide by zero")]
#[case("overflow", vec![], "runtime trap: integer overflow")]
#[case("load", vec![Value::I32(65530)], "runtime trap: out of bounds memory access")]
#[case("truncate", vec![Value::F64(f64::NAN)], "runtime trap: invalid conversion to integer")]
#[case("indirect", vec![], "runtime trap: uninitialized element 0")]
#[case("recurse", vec![], "runtime trap: call stack exhausted")]
fn each_fault_records_its_own_message(#[case] export: &str, #[case] args: Vec<Value>, #[case] expected: &str) {
    let (engine, channel) = isolated_engine();
    let mut instance = engine.instantiate(&assemble(FAULTS), Imports::new()).unwrap();
    let err = instance.invoke(export, &args).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RuntimeTrap);
    assert_eq!(read_message(&channel), expected);
}

#[test]
fn stack_exhaustion_respects_the_configured_depth() {
    let channel = std::sync::Arc::new(ErrorChannel::new());
    let engine = Engine::with_config(Config::default().max_call_depth(10)).with_channel(channel.clone());
    let bytes = assemble(
        r#"(module
            (func $count (export "count") (param i32) (result i32)
                (if (result i32) (i32.eqz (local.get 0))
                    (then (i32.const 0))
                    (else (i32.add (i32.const 1)
                                   (call $count (i32.sub (local.get 0) (i32.const 1))))))))"#,
    );
    let mut instance = engine.instantiate(&bytes, Imports::new()).unwrap();
    assert_eq!(instance.invoke("count", &[Value::I32(9)]).unwrap(), vec![Value::I32(9)]);
    assert!(instance.invoke("count", &[Value::I32(10)]).is_err());
    assert_eq!(read_message(&channel), "runtime trap: call stack exhausted");
}

#[test]
fn memory_ceiling_is_a_resource_error() {
    let channel = std::sync::Arc::new(ErrorChannel::new());
    let engine = Engine::with_config(Config::default().max_memory_pages(4)).with_channel(channel.clone());
    let err = engine
        .instantiate(&assemble("(module (memory 5))"), Imports::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceError);
    assert_eq!(
        read_message(&channel),
        "resource error: memory of 5 pages exceeds the limit of 4 pages"
    );

    let bytes = assemble(r#"(module (memory 1) (func (export "grow") (result i32) (memory.grow (i32.const 4))))"#);
    let mut instance = engine.instantiate(&bytes, Imports::new()).unwrap();
    assert_eq!(instance.invoke("grow", &[]).unwrap(), vec![Value::I32(-1)]);
}

#[test]
fn thread_channels_do_not_observe_each_other() {
    let bytes = assemble(THROW_WASM_ERROR);
    let worker_bytes = bytes.clone();
    std::thread::spawn(move || {
        let mut instance = Engine::new().instantiate(&worker_bytes, Imports::new()).unwrap();
        instance.invoke("throw_wasm_error", &[]).unwrap_err();
        assert!(ErrorChannel::with_current(ErrorChannel::length) > 0);
    })
    .join()
    .unwrap();

    assert_eq!(ErrorChannel::with_current(ErrorChannel::length), 0);
    Engine::new().instantiate(&bytes, Imports::new()).unwrap();
    assert_eq!(ErrorChannel::with_current(ErrorChannel::length), 0);
}

#[test]
fn host_error_text_is_recorded() {
    let (engine, channel) = isolated_engine();
    let bytes = assemble(
        r#"(module
            (import "env" "check" (func $check (param i32)))
            (func (export "run") (call $check (i32.const 13))))"#,
    );
    let imports = Imports::new().function("env", "check", vec![ValueType::I32], vec![], |_, args| {
        Err(format!("value {} is unlucky", args[0]).into())
    });
    let mut instance = engine.instantiate(&bytes, imports).unwrap();
    instance.invoke("run", &[]).unwrap_err();
    assert_eq!(read_message(&channel), "runtime trap: env.check: value i32:13 is unlucky");
}

#[test]
fn panicking_host_import_is_contained() {
    let (engine, channel) = isolated_engine();
    let bytes = assemble(
        r#"(module
            (import "env" "explode" (func $explode))
            (func (export "run") (call $explode)))"#,
    );
    let imports = Imports::new().function("env", "explode", vec![], vec![], |_, _| panic!("kaboom"));
    let mut instance = engine.instantiate(&bytes, imports).unwrap();
    let err = instance.invoke("run", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RuntimeTrap);
    assert_eq!(read_message(&channel), "runtime trap: env.explode: host function panicked: kaboom");
}

#[test]
fn unknown_export() {
    let (engine, channel) = isolated_engine();
    let mut instance = engine.instantiate(&assemble(THROW_WASM_ERROR), Imports::new()).unwrap();
    assert_eq!(instance.invoke("missing", &[]).unwrap_err().kind(), ErrorKind::LinkError);
    assert_eq!(read_message(&channel), "link error: unknown export missing");
}
