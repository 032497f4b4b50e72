//! WebAssembly linear memory
//!
//! All access is bounds checked against the current size; effective
//! addresses are computed in 64 bits so `addr + offset` can never wrap.

use byteorder::{ByteOrder, LittleEndian};

use super::RuntimeError;
use crate::parser::limits::MAX_MEMORY_PAGES;
use crate::parser::module::Limits;

/// WebAssembly page size in bytes (64KB)
pub const PAGE_SIZE: usize = 65536;

#[derive(Debug)]
pub struct Memory {
    data: Vec<u8>,
    limits: Limits,
    /// Hard ceiling in pages from the engine configuration
    ceiling: u32,
}

impl Memory {
    /// Allocate `limits.min` zeroed pages.
    ///
    /// Fails with a resource error when `limits.min` is above `ceiling` or the
    /// allocation itself cannot be satisfied.
    pub fn new(limits: Limits, ceiling: u32) -> Result<Memory, RuntimeError> {
        let ceiling = ceiling.min(MAX_MEMORY_PAGES);
        if limits.min > ceiling {
            return Err(RuntimeError::MemoryLimitExceeded {
                requested: limits.min,
                limit: ceiling,
            });
        }
        let bytes = limits.min as usize * PAGE_SIZE;
        let mut data = Vec::new();
        data.try_reserve_exact(bytes)
            .map_err(|_| RuntimeError::AllocationFailed(bytes))?;
        data.resize(bytes, 0);
        Ok(Memory {
            data,
            limits,
            ceiling,
        })
    }

    /// A host-created memory, limited only by the 4GiB address space.
    pub fn with_pages(min: u32, max: Option<u32>) -> Result<Memory, RuntimeError> {
        Memory::new(Limits { min, max }, MAX_MEMORY_PAGES)
    }

    /// Current size in pages
    pub fn size(&self) -> u32 {
        (self.data.len() / PAGE_SIZE) as u32
    }

    /// Limits reflecting the current size, as import matching sees them
    pub fn limits(&self) -> Limits {
        Limits {
            min: self.size(),
            max: self.limits.max,
        }
    }

    /// Grow by `delta` pages, returning the previous size or -1 when the
    /// maximum, the ceiling or the allocator says no.
    pub fn grow(&mut self, delta: u32) -> i32 {
        let current = self.size();
        let Some(new_pages) = current.checked_add(delta) else {
            return -1;
        };
        let max = self.limits.max.unwrap_or(MAX_MEMORY_PAGES).min(self.ceiling);
        if new_pages > max {
            return -1;
        }
        let new_bytes = new_pages as usize * PAGE_SIZE;
        if self.data.try_reserve_exact(new_bytes - self.data.len()).is_err() {
            return -1;
        }
        self.data.resize(new_bytes, 0);
        current as i32
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn range(&self, addr: u32, offset: u32, len: usize) -> Result<std::ops::Range<usize>, RuntimeError> {
        let start = addr as u64 + offset as u64;
        let end = start + len as u64;
        if end > self.data.len() as u64 {
            return Err(RuntimeError::MemoryOutOfBounds);
        }
        Ok(start as usize..end as usize)
    }

    pub fn read(&self, addr: u32, offset: u32, len: usize) -> Result<&[u8], RuntimeError> {
        let range = self.range(addr, offset, len)?;
        Ok(&self.data[range])
    }

    pub fn write(&mut self, addr: u32, offset: u32, bytes: &[u8]) -> Result<(), RuntimeError> {
        let range = self.range(addr, offset, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_u8(&self, addr: u32, offset: u32) -> Result<u8, RuntimeError> {
        Ok(self.read(addr, offset, 1)?[0])
    }

    pub fn read_u16(&self, addr: u32, offset: u32) -> Result<u16, RuntimeError> {
        Ok(LittleEndian::read_u16(self.read(addr, offset, 2)?))
    }

    pub fn read_u32(&self, addr: u32, offset: u32) -> Result<u32, RuntimeError> {
        Ok(LittleEndian::read_u32(self.read(addr, offset, 4)?))
    }

    pub fn read_u64(&self, addr: u32, offset: u32) -> Result<u64, RuntimeError> {
        Ok(LittleEndian::read_u64(self.read(addr, offset, 8)?))
    }

    pub fn write_u8(&mut self, addr: u32, offset: u32, value: u8) -> Result<(), RuntimeError> {
        self.write(addr, offset, &[value])
    }

    pub fn write_u16(&mut self, addr: u32, offset: u32, value: u16) -> Result<(), RuntimeError> {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, value);
        self.write(addr, offset, &buf)
    }

    pub fn write_u32(&mut self, addr: u32, offset: u32, value: u32) -> Result<(), RuntimeError> {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.write(addr, offset, &buf)
    }

    pub fn write_u64(&mut self, addr: u32, offset: u32, value: u64) -> Result<(), RuntimeError> {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, value);
        self.write(addr, offset, &buf)
    }
}
