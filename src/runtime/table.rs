//! WebAssembly tables
//!
//! Only funcref tables exist in this runtime. A slot holds the index of a
//! function in the owning instance's function index space, or nothing.
//! `call_indirect` must check the callee's signature before calling through a
//! slot; a mismatch traps.

use super::RuntimeError;
use crate::parser::limits::MAX_TABLE_SIZE;
use crate::parser::module::Limits;

#[derive(Debug, Clone)]
pub struct Table {
    elements: Vec<Option<u32>>,
    limits: Limits,
}

impl Table {
    /// Create a table of `limits.min` empty slots
    pub fn new(limits: Limits) -> Result<Table, RuntimeError> {
        if limits.min > MAX_TABLE_SIZE {
            return Err(RuntimeError::TableOutOfBounds);
        }
        Ok(Table {
            elements: vec![None; limits.min as usize],
            limits,
        })
    }

    pub fn size(&self) -> u32 {
        self.elements.len() as u32
    }

    /// Limits reflecting the current size, as import matching sees them
    pub fn limits(&self) -> Limits {
        Limits {
            min: self.size(),
            max: self.limits.max,
        }
    }

    /// Function index stored at `index`
    ///
    /// Out of range is `UndefinedElement`, an empty slot `UninitializedElement`.
    pub fn get(&self, index: u32) -> Result<u32, RuntimeError> {
        match self.elements.get(index as usize) {
            Some(Some(func_idx)) => Ok(*func_idx),
            Some(None) => Err(RuntimeError::UninitializedElement(index)),
            None => Err(RuntimeError::UndefinedElement(index)),
        }
    }

    pub fn set(&mut self, index: u32, func_idx: Option<u32>) -> Result<(), RuntimeError> {
        let slot = self
            .elements
            .get_mut(index as usize)
            .ok_or(RuntimeError::TableOutOfBounds)?;
        *slot = func_idx;
        Ok(())
    }

    /// Copy an element segment into the table at `offset`, all or nothing.
    pub fn init(&mut self, offset: u32, functions: &[u32]) -> Result<(), RuntimeError> {
        let start = offset as usize;
        let end = start
            .checked_add(functions.len())
            .filter(|end| *end <= self.elements.len())
            .ok_or(RuntimeError::TableOutOfBounds)?;
        for (slot, func_idx) in self.elements[start..end].iter_mut().zip(functions) {
            *slot = Some(*func_idx);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(min: u32) -> Table {
        Table::new(Limits { min, max: None }).unwrap()
    }

    #[test]
    fn test_slots() {
        let mut table = table(3);
        assert_eq!(table.size(), 3);
        assert!(matches!(table.get(0), Err(RuntimeError::UninitializedElement(0))));
        assert!(matches!(table.get(3), Err(RuntimeError::UndefinedElement(3))));

        table.set(1, Some(7)).unwrap();
        assert_eq!(table.get(1).unwrap(), 7);
        table.set(1, None).unwrap();
        assert!(table.get(1).is_err());
        assert!(matches!(table.set(3, Some(0)), Err(RuntimeError::TableOutOfBounds)));
    }

    #[test]
    fn test_init() {
        let mut table = table(4);
        table.init(1, &[5, 6]).unwrap();
        assert_eq!(table.get(1).unwrap(), 5);
        assert_eq!(table.get(2).unwrap(), 6);

        assert!(matches!(table.init(3, &[1, 2]), Err(RuntimeError::TableOutOfBounds)));
        // nothing was written by the failed init
        assert!(table.get(3).is_err());
        table.init(4, &[]).unwrap();
    }
}
