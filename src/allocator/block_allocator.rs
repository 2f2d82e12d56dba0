use super::block::Block;
use crate::error::BlockError;
use log::debug;
use std::cell::{Cell, RefCell};

/// Acquires, pools, and recycles [`Block`]s.
///
/// Freed blocks are kept in a bounded cache and handed back in LIFO
/// order, so a `deallocate_block` immediately followed by an
/// `allocate_block` returns the same backing storage. The `tag` passed to
/// both operations attributes traffic to a subsystem in the debug log; it
/// never affects which block gets reused.
pub struct BlockAllocator {
    free: RefCell<Vec<Block>>,
    cache_limit: usize,
    blocks_in_use: Cell<usize>,
}

impl BlockAllocator {
    pub fn new(cache_limit: usize) -> Self {
        Self {
            free: RefCell::new(vec![]),
            cache_limit,
            blocks_in_use: Cell::new(0),
        }
    }

    pub fn allocate_block(&self, tag: &'static str) -> Result<Block, BlockError> {
        self.blocks_in_use.set(self.blocks_in_use.get() + 1);

        if let Some(block) = self.free.borrow_mut().pop() {
            debug!("block reused from cache (tag: {tag})");
            return Ok(block);
        }

        debug!("fresh block allocated (tag: {tag})");
        Block::new()
    }

    pub fn deallocate_block(&self, block: Block, tag: &'static str) {
        self.blocks_in_use.set(self.blocks_in_use.get() - 1);

        let mut free = self.free.borrow_mut();
        if free.len() < self.cache_limit {
            debug!("block returned to cache (tag: {tag})");
            free.push(block);
        } else {
            debug!("block released to the OS (tag: {tag})");
            drop(block);
        }
    }

    pub fn cached_blocks(&self) -> usize {
        self.free.borrow().len()
    }

    pub fn blocks_in_use(&self) -> usize {
        self.blocks_in_use.get()
    }
}
