//! WebAssembly instruction executor
//!
//! Function bodies are flat instruction lists whose `block`/`if`/`else`
//! instructions already know where their matching `else` and `end` live, so
//! execution is a single loop over a program counter. Wasm-to-wasm calls push
//! a [`CallFrame`] instead of recursing, which keeps deep guest recursion off
//! the native stack; the frame count is bounded by `max_call_depth`.

use log::trace;

use super::{
    control::{block_arity, Label, LabelKind, LabelStack},
    frame::CallFrame,
    imports::Caller,
    ops,
    stack::Stack,
    store::{self, FunctionInstance},
    RuntimeError, Value,
};
use crate::parser::instruction::Instruction;
use crate::parser::module::Module;

/// Executes calls into one instance
pub struct Executor<'a> {
    module: &'a Module,
    store: &'a mut store::Store,
    stack: Stack,
    labels: LabelStack,
    frames: Vec<CallFrame>,
    max_call_depth: usize,
}

impl<'a> Executor<'a> {
    pub fn new(module: &'a Module, store: &'a mut store::Store, max_call_depth: usize) -> Self {
        Executor {
            module,
            store,
            stack: Stack::new(),
            labels: LabelStack::new(),
            frames: Vec::new(),
            max_call_depth,
        }
    }

    /// Call a function with already type-checked arguments and return its
    /// results in declaration order.
    pub fn call(&mut self, func_idx: u32, args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
        let module = self.module;
        let ty = module
            .function_type(func_idx)
            .ok_or(RuntimeError::InvalidIndex("function", func_idx))?;

        self.stack.push_all(args.iter().copied());
        self.enter(func_idx)?;
        self.run()?;
        self.stack.pop_values(&ty.return_types)
    }

    /// Start executing `func_idx` with its arguments on the stack. Host
    /// functions run to completion here; wasm functions get a new frame.
    fn enter(&mut self, func_idx: u32) -> Result<(), RuntimeError> {
        let module = self.module;
        let store = &mut *self.store;

        let function = store
            .functions
            .get(func_idx as usize)
            .ok_or(RuntimeError::InvalidIndex("function", func_idx))?;
        match function {
            FunctionInstance::Host { name, func } => {
                trace!("call host {name}");
                let args = self.stack.pop_values(&func.ty().parameters)?;
                let mut caller = Caller::new(store.memory.as_mut());
                let results = func.call(name, &mut caller, &args)?;
                self.stack.push_all(results);
            }
            FunctionInstance::Wasm { type_idx, code_idx } => {
                if self.frames.len() >= self.max_call_depth {
                    return Err(RuntimeError::CallStackExhausted);
                }
                let ty = module
                    .types
                    .get(*type_idx as usize)
                    .ok_or(RuntimeError::InvalidIndex("type", *type_idx))?;
                let body = module
                    .code
                    .get(*code_idx)
                    .ok_or(RuntimeError::InvalidIndex("function", func_idx))?;
                trace!("call {func_idx} {ty} depth={}", self.frames.len() + 1);

                let mut locals = self.stack.pop_values(&ty.parameters)?;
                locals.extend(body.locals.iter().map(|t| Value::default_for(*t)));

                let label_base = self.labels.len();
                self.labels.push(Label {
                    kind: LabelKind::Function,
                    branch_arity: ty.return_types.len(),
                    end_arity: ty.return_types.len(),
                    stack_height: self.stack.depth(),
                    continuation: body.code.len(),
                });
                self.frames.push(CallFrame {
                    function_idx: func_idx,
                    code_idx: *code_idx,
                    pc: 0,
                    locals,
                    label_base,
                });
            }
        }
        Ok(())
    }

    /// Pop the current frame, leaving only its results above the caller's
    /// operands.
    fn leave(&mut self) -> Result<(), RuntimeError> {
        let frame = self.frames.pop().ok_or(RuntimeError::StackUnderflow)?;
        let label = *self
            .labels
            .at(frame.label_base)
            .ok_or(RuntimeError::StackUnderflow)?;
        self.stack.unwind(label.stack_height, label.end_arity)?;
        self.labels.truncate(frame.label_base);
        trace!("return from {}", frame.function_idx);
        Ok(())
    }

    fn frame(&mut self) -> Result<&mut CallFrame, RuntimeError> {
        self.frames.last_mut().ok_or(RuntimeError::StackUnderflow)
    }

    fn run(&mut self) -> Result<(), RuntimeError> {
        let module = self.module;
        while let Some(frame) = self.frames.last_mut() {
            let pc = frame.pc;
            frame.pc += 1;
            match module.code.get(frame.code_idx).and_then(|body| body.code.get(pc)) {
                Some(instruction) => self.step(pc, instruction)?,
                // running off the end of a body is an implicit return
                None => self.leave()?,
            }
        }
        Ok(())
    }

    /// Execute the instruction at `pc`; the frame's pc already points past it.
    fn step(&mut self, pc: usize, instruction: &Instruction) -> Result<(), RuntimeError> {
        use Instruction::*;
        let module = self.module;

        match instruction {
            // ----------------------------------------------------------------
            // Control
            Unreachable => return Err(RuntimeError::Unreachable),
            Nop => {}
            Block { block_type, end } => {
                let (params, results) = block_arity(module, block_type);
                self.push_label(LabelKind::Block, params, results, end + 1)?;
            }
            Loop { block_type } => {
                let (params, results) = block_arity(module, block_type);
                self.push_label(LabelKind::Loop, params, results, pc + 1)?;
            }
            If {
                block_type,
                else_at,
                end,
            } => {
                let condition = self.stack.pop_i32()?;
                let (params, results) = block_arity(module, block_type);
                self.push_label(LabelKind::If, params, results, end + 1)?;
                if condition == 0 {
                    // without an else arm, land on the `end` so it pops the label
                    self.frame()?.pc = else_at.map_or(*end, |at| at + 1);
                }
            }
            Else { end } => {
                self.frame()?.pc = *end;
            }
            End => {
                let label_base = self.frame()?.label_base;
                if self.labels.len() > label_base + 1 {
                    let label = self.labels.pop().ok_or(RuntimeError::StackUnderflow)?;
                    self.stack.unwind(label.stack_height, label.end_arity)?;
                } else {
                    self.leave()?;
                }
            }
            Br { label_idx } => self.branch(*label_idx)?,
            BrIf { label_idx } => {
                if self.stack.pop_i32()? != 0 {
                    self.branch(*label_idx)?;
                }
            }
            BrTable { labels, default } => {
                let index = self.stack.pop_i32()? as u32 as usize;
                let label_idx = labels.get(index).copied().unwrap_or(*default);
                self.branch(label_idx)?;
            }
            Return => self.leave()?,
            Call { func_idx } => self.enter(*func_idx)?,
            CallIndirect { type_idx, .. } => {
                let element = self.stack.pop_i32()? as u32;
                let table = self.store.table.as_ref().ok_or(RuntimeError::TableOutOfBounds)?;
                let func_idx = table.get(element)?;
                let expected = module
                    .types
                    .get(*type_idx as usize)
                    .ok_or(RuntimeError::InvalidIndex("type", *type_idx))?;
                let actual = module
                    .function_type(func_idx)
                    .ok_or(RuntimeError::InvalidIndex("function", func_idx))?;
                if expected != actual {
                    return Err(RuntimeError::IndirectCallTypeMismatch {
                        expected: expected.to_string(),
                        actual: actual.to_string(),
                    });
                }
                self.enter(func_idx)?;
            }

            // ----------------------------------------------------------------
            // Parametric
            Drop => {
                self.stack.pop()?;
            }
            Select => {
                let condition = self.stack.pop_i32()?;
                let second = self.stack.pop()?;
                let first = self.stack.pop()?;
                if first.typ() != second.typ() {
                    return Err(RuntimeError::TypeMismatch {
                        expected: first.typ(),
                        actual: second.typ(),
                    });
                }
                self.stack.push(if condition != 0 { first } else { second });
            }

            // ----------------------------------------------------------------
            // Variables
            LocalGet { local_idx } => {
                let value = *self.local(*local_idx)?;
                self.stack.push(value);
            }
            LocalSet { local_idx } => {
                let value = self.stack.pop()?;
                self.set_local(*local_idx, value)?;
            }
            LocalTee { local_idx } => {
                let value = *self.stack.peek().ok_or(RuntimeError::StackUnderflow)?;
                self.set_local(*local_idx, value)?;
            }
            GlobalGet { global_idx } => {
                let value = self.store.global(*global_idx)?.value;
                self.stack.push(value);
            }
            GlobalSet { global_idx } => {
                let value = self.stack.pop()?;
                self.store.set_global(*global_idx, value)?;
            }

            // ----------------------------------------------------------------
            // Memory
            Load { op, memarg } => {
                let memory = self.store.memory.as_ref().ok_or(RuntimeError::MemoryOutOfBounds)?;
                ops::memory::load(&mut self.stack, memory, *op, memarg)?;
            }
            Store { op, memarg } => {
                let memory = self.store.memory.as_mut().ok_or(RuntimeError::MemoryOutOfBounds)?;
                ops::memory::store(&mut self.stack, memory, *op, memarg)?;
            }
            MemorySize => {
                let memory = self.store.memory.as_ref().ok_or(RuntimeError::MemoryOutOfBounds)?;
                self.stack.push(Value::I32(memory.size() as i32));
            }
            MemoryGrow => {
                let memory = self.store.memory.as_mut().ok_or(RuntimeError::MemoryOutOfBounds)?;
                ops::memory::grow(&mut self.stack, memory)?;
            }

            // ----------------------------------------------------------------
            // Numeric
            I32Const { value } => self.stack.push(Value::I32(*value)),
            I64Const { value } => self.stack.push(Value::I64(*value)),
            F32Const { value } => self.stack.push(Value::F32(*value)),
            F64Const { value } => self.stack.push(Value::F64(*value)),
            Numeric(op) => ops::numeric::execute(*op, &mut self.stack)?,
        }
        Ok(())
    }

    /// Enter a block whose `params` operands are already on the stack
    fn push_label(
        &mut self,
        kind: LabelKind,
        params: usize,
        results: usize,
        continuation: usize,
    ) -> Result<(), RuntimeError> {
        let stack_height = self
            .stack
            .depth()
            .checked_sub(params)
            .ok_or(RuntimeError::StackUnderflow)?;
        let branch_arity = match kind {
            LabelKind::Loop => params,
            _ => results,
        };
        self.labels.push(Label {
            kind,
            branch_arity,
            end_arity: results,
            stack_height,
            continuation,
        });
        Ok(())
    }

    /// `br depth`: keep the label's branch arity values, drop the rest of the
    /// block's operands and continue at the label's target.
    fn branch(&mut self, depth: u32) -> Result<(), RuntimeError> {
        let label_base = self.frame()?.label_base;
        let position = self
            .labels
            .position(depth)
            .filter(|position| *position >= label_base)
            .ok_or(RuntimeError::InvalidIndex("label", depth))?;
        let label = *self.labels.at(position).ok_or(RuntimeError::StackUnderflow)?;

        match label.kind {
            LabelKind::Function => return self.leave(),
            // a loop label survives the branch, its body runs again
            LabelKind::Loop => self.labels.truncate(position + 1),
            LabelKind::Block | LabelKind::If => self.labels.truncate(position),
        }
        self.stack.unwind(label.stack_height, label.branch_arity)?;
        self.frame()?.pc = label.continuation;
        Ok(())
    }

    fn local(&mut self, local_idx: u32) -> Result<&mut Value, RuntimeError> {
        self.frame()?
            .locals
            .get_mut(local_idx as usize)
            .ok_or(RuntimeError::InvalidIndex("local", local_idx))
    }

    fn set_local(&mut self, local_idx: u32, value: Value) -> Result<(), RuntimeError> {
        let slot = self.local(local_idx)?;
        if slot.typ() != value.typ() {
            return Err(RuntimeError::TypeMismatch {
                expected: slot.typ(),
                actual: value.typ(),
            });
        }
        *slot = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::test_utils::test::{invoke, ExecutorTest};
    use rstest::rstest;

    mod control {
        use super::*;

        #[test]
        fn nop_and_const() {
            ExecutorTest::new()
                .inst(Instruction::Nop)
                .inst(Instruction::I32Const { value: 42 })
                .inst(Instruction::Nop)
                .expect_stack(vec![Value::I32(42)]);
        }

        #[test]
        fn args_become_locals() {
            ExecutorTest::new()
                .args(vec![Value::I32(1), Value::F64(2.5)])
                .inst(Instruction::LocalGet { local_idx: 1 })
                .inst(Instruction::LocalGet { local_idx: 0 })
                .expect_stack(vec![Value::F64(2.5), Value::I32(1)]);
        }

        #[test]
        fn block_branch_discards_operands() {
            let wat = r#"(module
                (func (export "run") (result i32)
                    (block (result i32)
                        i32.const 1
                        i32.const 2
                        i32.const 3
                        br 0)
                    i32.const 10
                    i32.add))"#;
            assert_eq!(invoke(wat, "run", &[]).unwrap(), vec![Value::I32(13)]);
        }

        #[rstest]
        #[case(1, 10)]
        #[case(0, 20)]
        fn if_else(#[case] condition: i32, #[case] expected: i32) {
            let wat = r#"(module
                (func (export "choose") (param i32) (result i32)
                    (if (result i32) (local.get 0)
                        (then (i32.const 10))
                        (else (i32.const 20)))))"#;
            assert_eq!(
                invoke(wat, "choose", &[Value::I32(condition)]).unwrap(),
                vec![Value::I32(expected)]
            );
        }

        #[rstest]
        #[case(0, 1)]
        #[case(1, 2)]
        fn if_without_else(#[case] condition: i32, #[case] expected: i32) {
            let wat = r#"(module
                (func (export "bump") (param i32) (result i32)
                    (local i32)
                    i32.const 1
                    local.set 1
                    (if (local.get 0)
                        (then (local.set 1 (i32.const 2))))
                    local.get 1))"#;
            assert_eq!(
                invoke(wat, "bump", &[Value::I32(condition)]).unwrap(),
                vec![Value::I32(expected)]
            );
        }

        #[test]
        fn loop_sums_to_n() {
            let wat = r#"(module
                (func (export "sum") (param i32) (result i32)
                    (local i32)
                    (block
                        (loop
                            (br_if 1 (i32.eqz (local.get 0)))
                            (local.set 1 (i32.add (local.get 1) (local.get 0)))
                            (local.set 0 (i32.sub (local.get 0) (i32.const 1)))
                            (br 0)))
                    local.get 1))"#;
            assert_eq!(invoke(wat, "sum", &[Value::I32(100)]).unwrap(), vec![Value::I32(5050)]);
        }

        #[test]
        fn loop_falls_through_with_its_result() {
            let wat = r#"(module
                (func (export "f") (result i32)
                    (loop (result i32) (i32.const 5))))"#;
            assert_eq!(invoke(wat, "f", &[]).unwrap(), vec![Value::I32(5)]);
        }

        #[rstest]
        #[case(0, 10)]
        #[case(7, 10)]
        #[case(20, 21)]
        fn branch_to_loop_carries_its_params(#[case] start: i32, #[case] expected: i32) {
            let wat = r#"(module
                (func (export "count_up") (param i32) (result i32)
                    (local i32)
                    local.get 0
                    (loop (param i32) (result i32)
                        i32.const 1
                        i32.add
                        local.tee 1
                        (br_if 0 (i32.lt_s (local.get 1) (i32.const 10))))))"#;
            assert_eq!(
                invoke(wat, "count_up", &[Value::I32(start)]).unwrap(),
                vec![Value::I32(expected)]
            );
        }

        #[test]
        fn code_after_a_nested_loop_runs() {
            let wat = r#"(module
                (func (export "run") (result i32)
                    (block (result i32)
                        (loop (result i32) (i32.const 2))
                        i32.const 3
                        i32.mul)
                    i32.const 1
                    i32.add))"#;
            assert_eq!(invoke(wat, "run", &[]).unwrap(), vec![Value::I32(7)]);
        }

        #[rstest]
        #[case(0, 100)]
        #[case(1, 200)]
        #[case(2, 300)]
        #[case(7, 300)]
        #[case(-1, 300)]
        fn br_table(#[case] index: i32, #[case] expected: i32) {
            let wat = r#"(module
                (func (export "dispatch") (param i32) (result i32)
                    (block
                        (block
                            (block
                                (br_table 0 1 2 (local.get 0)))
                            (return (i32.const 100)))
                        (return (i32.const 200)))
                    i32.const 300))"#;
            assert_eq!(
                invoke(wat, "dispatch", &[Value::I32(index)]).unwrap(),
                vec![Value::I32(expected)]
            );
        }

        #[test]
        fn return_from_nested_blocks() {
            let wat = r#"(module
                (func (export "early") (result i64)
                    (block
                        (loop
                            i64.const 7
                            return))
                    i64.const 0))"#;
            assert_eq!(invoke(wat, "early", &[]).unwrap(), vec![Value::I64(7)]);
        }

        #[test]
        fn block_with_params() {
            let wat = r#"(module
                (type $binop (func (param i32 i32) (result i32)))
                (func (export "run") (result i32)
                    i32.const 6
                    i32.const 7
                    (block (type $binop)
                        i32.mul)))"#;
            assert_eq!(invoke(wat, "run", &[]).unwrap(), vec![Value::I32(42)]);
        }

        #[test]
        fn unreachable_traps() {
            ExecutorTest::new()
                .inst(Instruction::Unreachable)
                .expect_error("unreachable executed");
        }
    }

    mod calls {
        use super::*;

        const FACTORIAL: &str = r#"(module
            (func $fac (export "fac") (param i64) (result i64)
                (if (result i64) (i64.le_u (local.get 0) (i64.const 1))
                    (then (i64.const 1))
                    (else (i64.mul (local.get 0)
                                   (call $fac (i64.sub (local.get 0) (i64.const 1)))))))
            (func (export "forever") (call 1)))"#;

        #[test]
        fn recursion() {
            assert_eq!(
                invoke(FACTORIAL, "fac", &[Value::I64(20)]).unwrap(),
                vec![Value::I64(2432902008176640000)]
            );
        }

        #[test]
        fn unbounded_recursion_exhausts_the_stack() {
            let err = invoke(FACTORIAL, "forever", &[]).unwrap_err();
            assert_eq!(err.to_string(), "runtime trap: call stack exhausted");
        }

        #[test]
        fn call_indirect() {
            let wat = r#"(module
                (type $unary (func (param i32) (result i32)))
                (table 3 funcref)
                (elem (i32.const 0) $double $square)
                (func $double (param i32) (result i32) (i32.mul (local.get 0) (i32.const 2)))
                (func $square (param i32) (result i32) (i32.mul (local.get 0) (local.get 0)))
                (func $nullary (result i32) (i32.const 0))
                (func (export "apply") (param i32 i32) (result i32)
                    (call_indirect (type $unary) (local.get 1) (local.get 0)))
                (func (export "wrong_type") (result i32)
                    (call_indirect (type $unary) (i32.const 1) (i32.const 0))
                    drop
                    (call_indirect (result i32) (i32.const 0))))"#;
            assert_eq!(
                invoke(wat, "apply", &[Value::I32(0), Value::I32(21)]).unwrap(),
                vec![Value::I32(42)]
            );
            assert_eq!(
                invoke(wat, "apply", &[Value::I32(1), Value::I32(9)]).unwrap(),
                vec![Value::I32(81)]
            );
            let uninitialized = invoke(wat, "apply", &[Value::I32(2), Value::I32(1)]).unwrap_err();
            assert_eq!(uninitialized.to_string(), "runtime trap: uninitialized element 2");
            let undefined = invoke(wat, "apply", &[Value::I32(3), Value::I32(1)]).unwrap_err();
            assert_eq!(undefined.to_string(), "runtime trap: undefined element 3");
            let mismatch = invoke(wat, "wrong_type", &[]).unwrap_err();
            assert_eq!(
                mismatch.to_string(),
                "runtime trap: indirect call type mismatch: expected () -> i32, got (i32) -> i32"
            );
        }
    }

    mod variables {
        use super::*;

        #[test]
        fn locals_and_tee() {
            let wat = r#"(module
                (func (export "run") (param i32) (result i32 i32)
                    (local f64)
                    (local.tee 0 (i32.add (local.get 0) (i32.const 1)))
                    local.get 0))"#;
            assert_eq!(
                invoke(wat, "run", &[Value::I32(4)]).unwrap(),
                vec![Value::I32(5), Value::I32(5)]
            );
        }

        #[test]
        fn globals() {
            let wat = r#"(module
                (global $counter (mut i32) (i32.const 40))
                (func (export "next") (result i32)
                    (global.set $counter (i32.add (global.get $counter) (i32.const 1)))
                    global.get $counter))"#;
            assert_eq!(invoke(wat, "next", &[]).unwrap(), vec![Value::I32(41)]);
        }

        #[test]
        fn select() {
            ExecutorTest::new()
                .inst(Instruction::I64Const { value: 1 })
                .inst(Instruction::I64Const { value: 2 })
                .inst(Instruction::I32Const { value: 0 })
                .inst(Instruction::Select)
                .expect_stack(vec![Value::I64(2)]);
        }

        #[test]
        fn select_operands_must_agree() {
            ExecutorTest::new()
                .inst(Instruction::I64Const { value: 1 })
                .inst(Instruction::F32Const { value: 2.0 })
                .inst(Instruction::I32Const { value: 1 })
                .inst(Instruction::Select)
                .expect_error("type mismatch: expected i64, got f32");
        }
    }

    mod memory {
        use super::*;

        const MEMORY: &str = r#"(module
            (memory 1 2)
            (data (i32.const 8) "\2a\00\00\00")
            (func (export "load") (param i32) (result i32) (i32.load (local.get 0)))
            (func (export "size") (result i32) memory.size)
            (func (export "grow") (param i32) (result i32) (memory.grow (local.get 0))))"#;

        #[test]
        fn load_data_segment() {
            assert_eq!(invoke(MEMORY, "load", &[Value::I32(8)]).unwrap(), vec![Value::I32(42)]);
        }

        #[test]
        fn load_out_of_bounds() {
            let err = invoke(MEMORY, "load", &[Value::I32(65534)]).unwrap_err();
            assert_eq!(err.to_string(), "runtime trap: out of bounds memory access");
        }

        #[test]
        fn size_and_grow() {
            assert_eq!(invoke(MEMORY, "size", &[]).unwrap(), vec![Value::I32(1)]);
            assert_eq!(invoke(MEMORY, "grow", &[Value::I32(1)]).unwrap(), vec![Value::I32(1)]);
            assert_eq!(invoke(MEMORY, "grow", &[Value::I32(2)]).unwrap(), vec![Value::I32(-1)]);
        }
    }

    mod numeric {
        use super::*;
        use crate::parser::instruction::NumericOp;

        #[test]
        fn division_by_zero() {
            ExecutorTest::new()
                .inst(Instruction::I32Const { value: 1 })
                .inst(Instruction::I32Const { value: 0 })
                .inst(Instruction::Numeric(NumericOp::I32DivS))
                .expect_error("integer divide by zero");
        }

        #[test]
        fn operand_types_checked() {
            ExecutorTest::new()
                .inst(Instruction::I32Const { value: 1 })
                .inst(Instruction::I64Const { value: 1 })
                .inst(Instruction::Numeric(NumericOp::I32Add))
                .expect_error("type mismatch: expected i32, got i64");
        }
    }
}
