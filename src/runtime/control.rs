//! Label stack for structured control flow
//!
//! Labels carry arities and a branch target. A single label stack is shared
//! by all frames of an invocation; each frame records where its own labels
//! start, and the bottom label of a frame stands for the function body so
//! that `return` is a branch to it.

use crate::parser::instruction::BlockType;
use crate::parser::module::Module;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    Block,
    /// Branches target the start of the loop, not its end
    Loop,
    If,
    /// Implicit outermost block of a function body
    Function,
}

#[derive(Debug, Clone, Copy)]
pub struct Label {
    pub kind: LabelKind,
    /// Number of values a branch to this label carries: the parameters of a
    /// loop, the results of anything else
    pub branch_arity: usize,
    /// Number of values left when control falls through the block's `end`
    pub end_arity: usize,
    /// Height of the value stack beneath the block's parameters
    pub stack_height: usize,
    /// Instruction to continue at after a branch
    pub continuation: usize,
}

#[derive(Debug, Default)]
pub struct LabelStack {
    labels: Vec<Label>,
}

impl LabelStack {
    pub fn new() -> Self {
        LabelStack { labels: Vec::new() }
    }

    pub fn push(&mut self, label: Label) {
        self.labels.push(label);
    }

    pub fn pop(&mut self) -> Option<Label> {
        self.labels.pop()
    }

    /// Absolute position of the label `depth` levels from the top
    pub fn position(&self, depth: u32) -> Option<usize> {
        self.labels.len().checked_sub(depth as usize + 1)
    }

    pub fn at(&self, position: usize) -> Option<&Label> {
        self.labels.get(position)
    }

    pub fn truncate(&mut self, len: usize) {
        self.labels.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Parameter and result counts of a block type
pub fn block_arity(module: &Module, block_type: &BlockType) -> (usize, usize) {
    match block_type {
        BlockType::Empty => (0, 0),
        BlockType::Value(_) => (0, 1),
        BlockType::FuncType(type_idx) => module
            .types
            .get(*type_idx as usize)
            .map_or((0, 0), |ty| (ty.parameters.len(), ty.return_types.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::module::{FunctionType, ValueType};

    fn label(kind: LabelKind, continuation: usize) -> Label {
        Label {
            kind,
            branch_arity: 0,
            end_arity: 0,
            stack_height: 0,
            continuation,
        }
    }

    #[test]
    fn positions_count_from_the_top() {
        let mut labels = LabelStack::new();
        labels.push(label(LabelKind::Function, 0));
        labels.push(label(LabelKind::Block, 10));
        labels.push(label(LabelKind::Loop, 3));

        assert_eq!(labels.position(0), Some(2));
        assert_eq!(labels.position(2), Some(0));
        assert_eq!(labels.position(3), None);
        assert_eq!(labels.at(1).map(|l| l.continuation), Some(10));

        labels.truncate(1);
        assert_eq!(labels.len(), 1);
        assert_eq!(labels.pop().map(|l| l.kind), Some(LabelKind::Function));
        assert!(labels.is_empty());
    }

    #[test]
    fn block_arities() {
        let mut module = Module::new("test");
        module.types.push(FunctionType::new(
            vec![ValueType::I32, ValueType::I32],
            vec![ValueType::I64],
        ));
        assert_eq!(block_arity(&module, &BlockType::Empty), (0, 0));
        assert_eq!(block_arity(&module, &BlockType::Value(ValueType::F32)), (0, 1));
        assert_eq!(block_arity(&module, &BlockType::FuncType(0)), (2, 1));
    }
}
