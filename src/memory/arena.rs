//! First-fit arena over the local-memory scratch region
//!
//! Tracks free blocks and live allocations over a fixed capacity. Every
//! allocation must be paired with exactly one free; nothing is garbage
//! collected. Freeing coalesces with adjacent free blocks so long-lived
//! contexts do not fragment.

use std::collections::HashMap;

use crate::error::{ForgeResult, NpuForgeError};

/// Free block within the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeBlock {
    /// Byte offset from the start of local memory
    offset: usize,
    /// Size in bytes
    size: usize,
}

impl FreeBlock {
    fn new(offset: usize, size: usize) -> Self {
        Self { offset, size }
    }

    /// Check if this block is immediately before another block
    fn is_adjacent_to(&self, other: &FreeBlock) -> bool {
        self.offset + self.size == other.offset
    }
}

/// First-fit allocator over the fixed scratch capacity
///
/// Addresses handed out are byte offsets from the start of local memory,
/// exactly what the command records carry.
#[derive(Debug)]
pub struct LocalMemoryArena {
    /// Total capacity in bytes
    capacity: usize,
    /// Currently allocated bytes
    allocated: usize,
    /// Free blocks, sorted by offset
    free_blocks: Vec<FreeBlock>,
    /// Live allocations by address, for free() validation
    live: HashMap<u32, usize>,
}

impl LocalMemoryArena {
    /// Create an arena over `capacity` bytes of local memory
    pub fn new(capacity: usize) -> ForgeResult<Self> {
        if capacity == 0 {
            return Err(NpuForgeError::InvalidAllocation(
                "arena capacity cannot be zero".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            allocated: 0,
            free_blocks: vec![FreeBlock::new(0, capacity)],
            live: HashMap::new(),
        })
    }

    /// Allocate `size` bytes at the given alignment
    ///
    /// First-fit: the lowest-addressed free block that can satisfy the
    /// request wins. An alignment of 1 means unaligned.
    ///
    /// # Errors
    /// - `InvalidAllocation` for a zero size or non-power-of-two alignment
    /// - `OutOfMemory` if no free block fits
    pub fn alloc(&mut self, size: usize, alignment: usize) -> ForgeResult<u32> {
        if size == 0 {
            return Err(NpuForgeError::InvalidAllocation(
                "allocation size cannot be zero".to_string(),
            ));
        }
        if !alignment.is_power_of_two() {
            return Err(NpuForgeError::InvalidAllocation(format!(
                "alignment must be a power of two, got {}",
                alignment
            )));
        }

        let idx = self.find_first_fit(size, alignment).ok_or_else(|| {
            NpuForgeError::OutOfMemory {
                needed: size,
                free: self.remaining_capacity(),
            }
        })?;

        let block = self.free_blocks[idx];
        let offset = align_up(block.offset, alignment);
        let padding = offset - block.offset;
        let remaining = block.size - padding - size;

        self.free_blocks.remove(idx);
        if remaining > 0 {
            self.free_blocks.push(FreeBlock::new(offset + size, remaining));
        }
        if padding > 0 {
            self.free_blocks.push(FreeBlock::new(block.offset, padding));
        }
        self.sort_free_blocks();

        self.allocated += size;
        self.live.insert(offset as u32, size);

        tracing::trace!(
            "lmem alloc: {} bytes at {:#x} (alignment={})",
            size,
            offset,
            alignment
        );
        Ok(offset as u32)
    }

    /// Free a previous allocation by its address
    ///
    /// # Errors
    /// `InvalidHandle` if the address is not a live allocation (unknown
    /// address or double free).
    pub fn free(&mut self, address: u32) -> ForgeResult<()> {
        let size = self
            .live
            .remove(&address)
            .ok_or(NpuForgeError::InvalidHandle(address))?;

        self.allocated -= size;
        self.free_blocks.push(FreeBlock::new(address as usize, size));
        self.sort_free_blocks();

        tracing::trace!("lmem free: {} bytes at {:#x}", size, address);
        Ok(())
    }

    /// Release every allocation at once (context teardown)
    pub fn reset(&mut self) {
        self.live.clear();
        self.allocated = 0;
        self.free_blocks.clear();
        self.free_blocks.push(FreeBlock::new(0, self.capacity));
        tracing::debug!("lmem arena reset, {} bytes free", self.capacity);
    }

    /// Get remaining free capacity
    pub fn remaining_capacity(&self) -> usize {
        self.free_blocks.iter().map(|b| b.size).sum()
    }

    /// Get currently allocated bytes
    pub fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    /// Get total capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live allocations
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Whether an address is a live allocation
    pub fn is_live(&self, address: u32) -> bool {
        self.live.contains_key(&address)
    }

    /// Number of free fragments
    pub fn fragment_count(&self) -> usize {
        self.free_blocks.len()
    }

    /// First free block (lowest offset) where the aligned request fits
    fn find_first_fit(&self, size: usize, alignment: usize) -> Option<usize> {
        self.free_blocks.iter().position(|block| {
            let aligned_offset = align_up(block.offset, alignment);
            if aligned_offset >= block.offset + block.size {
                return false;
            }
            let padding = aligned_offset - block.offset;
            block.size - padding >= size
        })
    }

    /// Sort free blocks by offset and merge adjacent ones
    fn sort_free_blocks(&mut self) {
        self.free_blocks.sort_by_key(|b| b.offset);
        let mut i = 0;
        while i + 1 < self.free_blocks.len() {
            let current = self.free_blocks[i];
            let next = self.free_blocks[i + 1];
            if current.is_adjacent_to(&next) {
                self.free_blocks[i].size += next.size;
                self.free_blocks.remove(i + 1);
            } else {
                i += 1;
            }
        }
    }
}

/// Align offset up to a power-of-two alignment
fn align_up(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}
