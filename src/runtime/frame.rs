//! Call frame for a function being executed

use super::Value;

#[derive(Debug)]
pub struct CallFrame {
    /// Function index in the module
    pub function_idx: u32,
    /// Index into the module's code section
    pub code_idx: usize,
    /// Next instruction to execute
    pub pc: usize,
    /// Parameters followed by declared locals
    pub locals: Vec<Value>,
    /// Position of this frame's function label on the label stack
    pub label_base: usize,
}
