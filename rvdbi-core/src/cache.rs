//! The code cache (spec §4.1): a single RWX region holding translated
//! guest basic blocks. Allocation is append-only via a write cursor;
//! the only eviction path is a full flush (cursor reset to zero), never
//! incremental reclamation of individual blocks.

use crate::error::{EngineError, Result};
use region::Protection;

pub struct CodeCache {
    region: region::Allocation,
    capacity: usize,
    cursor: usize,
}

impl CodeCache {
    pub fn new(capacity: usize) -> Result<Self> {
        let region = region::alloc(capacity, Protection::READ_WRITE_EXECUTE)
            .map_err(|e| EngineError::CacheAlloc(e.to_string()))?;
        Ok(CodeCache {
            region,
            capacity,
            cursor: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn base(&self) -> u64 {
        self.region.as_ptr::<u8>() as u64
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.cursor
    }

    /// Address a given byte offset corresponds to, as seen by emitted
    /// cache code (absolute host address, since guest and engine share
    /// one address space).
    pub fn address_of(&self, offset: usize) -> u64 {
        self.base() + offset as u64
    }

    /// Append `words` (little-endian 32-bit instruction words) to the
    /// cache, returning the address they now live at. Synchronizes the
    /// instruction cache over the written range before returning.
    pub fn emit(&mut self, words: &[u32]) -> Result<u64> {
        let byte_len = words.len() * 4;
        if byte_len > self.remaining() {
            return Err(EngineError::CacheExhausted {
                requested: byte_len,
                capacity: self.capacity,
            });
        }
        let start = self.cursor;
        let ptr = unsafe { self.region.as_mut_ptr::<u8>().add(start) };
        for (i, word) in words.iter().enumerate() {
            let bytes = word.to_le_bytes();
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(i * 4), 4);
            }
        }
        self.cursor += byte_len;
        unsafe { rvdbi_icache::synchronize(ptr, byte_len) };
        Ok(self.address_of(start))
    }

    /// Overwrite an already-materialized range in place (exit-link
    /// backpatching, §4.4). The range must lie entirely within bytes
    /// already written by `emit`.
    pub fn patch(&mut self, offset: usize, words: &[u32]) -> Result<()> {
        let byte_len = words.len() * 4;
        if offset + byte_len > self.cursor {
            return Err(EngineError::GuestFault {
                pc: 0,
                block_id: None,
                detail: format!(
                    "patch at offset {offset} (len {byte_len}) falls outside the materialized \
                     range (cursor {cursor})",
                    cursor = self.cursor
                ),
            });
        }
        let ptr = unsafe { self.region.as_mut_ptr::<u8>().add(offset) };
        for (i, word) in words.iter().enumerate() {
            let bytes = word.to_le_bytes();
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(i * 4), 4);
            }
        }
        unsafe { rvdbi_icache::synchronize(ptr, byte_len) };
        Ok(())
    }

    /// Discard every materialized block by rewinding the write cursor.
    /// This is the engine's only eviction primitive (spec §4.1: "flush,
    /// never incremental reclamation").
    pub fn flush(&mut self) {
        log::debug!("code cache flush: discarding {} bytes", self.cursor);
        self.cursor = 0;
    }

    pub fn offset_of(&self, address: u64) -> Option<usize> {
        let base = self.base();
        if address < base {
            return None;
        }
        let offset = (address - base) as usize;
        if offset <= self.cursor {
            Some(offset)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_advances_cursor_and_returns_distinct_addresses() {
        let mut cache = CodeCache::new(4096).unwrap();
        let a = cache.emit(&[0x00000013]).unwrap(); // nop
        let b = cache.emit(&[0x00000013, 0x00000013]).unwrap();
        assert_eq!(a + 4, b);
        assert_eq!(cache.cursor(), 12);
    }

    #[test]
    fn emit_past_capacity_is_rejected() {
        let mut cache = CodeCache::new(8).unwrap();
        assert!(cache.emit(&[1, 2]).is_ok());
        assert!(matches!(
            cache.emit(&[3]),
            Err(EngineError::CacheExhausted { .. })
        ));
    }

    #[test]
    fn patch_rewrites_already_emitted_bytes() {
        let mut cache = CodeCache::new(4096).unwrap();
        let addr = cache.emit(&[0x00000013, 0x00000013]).unwrap();
        let offset = cache.offset_of(addr).unwrap();
        cache.patch(offset, &[0xdeadbeefu32]).unwrap();
        let ptr = cache.base() as *const u32;
        let word = unsafe { std::ptr::read_unaligned(ptr) };
        assert_eq!(word, 0xdeadbeef);
    }

    #[test]
    fn patch_outside_materialized_range_fails() {
        let mut cache = CodeCache::new(4096).unwrap();
        cache.emit(&[1]).unwrap();
        assert!(cache.patch(100, &[2]).is_err());
    }

    #[test]
    fn flush_rewinds_cursor_to_zero() {
        let mut cache = CodeCache::new(4096).unwrap();
        cache.emit(&[1, 2, 3]).unwrap();
        cache.flush();
        assert_eq!(cache.cursor(), 0);
        assert_eq!(cache.remaining(), cache.capacity());
    }
}
