use super::constants::BLOCK_SIZE;
use crate::error::BlockError;
use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

/// A fixed-size span of raw memory, aligned to its own size.
///
/// Owns its backing storage: dropping a `Block` releases the memory back
/// to the OS. While a block is in use, the heap writes a `BlockMeta` at
/// its base and carves the rest into cell slots.
pub struct Block {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl Block {
    pub fn new() -> Result<Block, BlockError> {
        // BLOCK_SIZE is a power of two, so size == align is valid.
        let layout = unsafe { Layout::from_size_align_unchecked(BLOCK_SIZE, BLOCK_SIZE) };

        Ok(Block {
            ptr: Self::alloc_block(layout)?,
            layout,
        })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn base_addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub fn at_offset(&self, offset: usize) -> *mut u8 {
        assert!(offset < BLOCK_SIZE);

        unsafe { self.ptr.as_ptr().add(offset) }
    }

    fn alloc_block(layout: Layout) -> Result<NonNull<u8>, BlockError> {
        unsafe {
            let ptr = alloc(layout);

            match NonNull::new(ptr) {
                Some(ptr) => Ok(ptr),
                None => Err(BlockError::Oom),
            }
        }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}
