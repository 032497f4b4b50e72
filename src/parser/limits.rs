//! Decoder limits.
//!
//! Counts read from the binary are checked against these before anything is
//! allocated, so a few malformed bytes can't claim billions of entries. The
//! values follow the limits mainstream engines enforce.

// =============================================================================
// Module-level limits
// =============================================================================

/// Maximum number of type definitions in a module
pub const MAX_TYPES: u32 = 1_000_000;

/// Maximum number of defined functions in a module
pub const MAX_FUNCTIONS: u32 = 1_000_000;

/// Maximum number of imports in a module
pub const MAX_IMPORTS: u32 = 100_000;

/// Maximum number of exports in a module
pub const MAX_EXPORTS: u32 = 100_000;

/// Maximum number of globals in a module
pub const MAX_GLOBALS: u32 = 1_000_000;

/// Maximum number of data segments in a module
pub const MAX_DATA_SEGMENTS: u32 = 100_000;

/// Maximum number of element segments in a module
pub const MAX_ELEMENT_SEGMENTS: u32 = 100_000;

// =============================================================================
// Function-level limits
// =============================================================================

/// Maximum function body size in bytes
pub const MAX_FUNCTION_SIZE: u32 = 7_654_321;

/// Maximum number of function parameters (and of results)
pub const MAX_FUNCTION_PARAMS: u32 = 1_000;

/// Maximum number of local variables in a function
pub const MAX_FUNCTION_LOCALS: u32 = 50_000;

/// Maximum number of labels in a br_table instruction
pub const MAX_BR_TABLE_LABELS: u32 = 65_536;

// =============================================================================
// Memory and table limits
// =============================================================================

/// Maximum memory pages for 32-bit addressing (4 GB)
pub const MAX_MEMORY_PAGES: u32 = 65_536;

/// Maximum table size (number of elements)
pub const MAX_TABLE_SIZE: u32 = 10_000_000;
