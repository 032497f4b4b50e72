//! Engine configuration

use crate::parser::limits::MAX_MEMORY_PAGES;

/// Wasm-to-wasm call depth allowed before a call traps
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Frames an invocation may have live at once
    pub max_call_depth: usize,
    /// Ceiling in pages for memory an instance allocates or grows
    pub max_memory_pages: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_memory_pages: MAX_MEMORY_PAGES,
        }
    }
}

impl Config {
    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn max_memory_pages(mut self, pages: u32) -> Self {
        self.max_memory_pages = pages.min(MAX_MEMORY_PAGES);
        self
    }
}
