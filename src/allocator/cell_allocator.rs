use super::block::Block;
use super::block_allocator::BlockAllocator;
use super::block_meta::BlockMeta;
use super::header::CellHeader;
use crate::error::BlockError;
use crate::heap::HeapInner;
use std::cell::RefCell;
use std::collections::HashSet;
use std::ptr::NonNull;

/// What one sweep pass over an allocator's blocks found and freed.
#[derive(Copy, Clone, Debug, Default)]
pub struct SweepTally {
    pub live_cells: usize,
    pub live_bytes: usize,
    pub collected_cells: usize,
    pub collected_bytes: usize,
    pub freed_blocks: usize,
}

impl SweepTally {
    pub fn absorb(&mut self, other: SweepTally) {
        self.live_cells += other.live_cells;
        self.live_bytes += other.live_bytes;
        self.collected_cells += other.collected_cells;
        self.collected_bytes += other.collected_bytes;
        self.freed_blocks += other.freed_blocks;
    }
}

/// Owns every block of one cell size class.
///
/// `usable` is a stack of blocks known to have room; allocation always
/// serves from its top so partially filled blocks fill up before fresh
/// ones are requested.
pub struct CellAllocator {
    cell_size: usize,
    tag: &'static str,
    blocks: RefCell<Vec<Block>>,
    usable: RefCell<Vec<NonNull<BlockMeta>>>,
}

impl CellAllocator {
    pub fn new(cell_size: usize) -> Self {
        Self {
            cell_size,
            tag: size_class_tag(cell_size),
            blocks: RefCell::new(vec![]),
            usable: RefCell::new(vec![]),
        }
    }

    /// Hands out a dead slot, acquiring a new block when every owned
    /// block is full.
    pub fn allocate_cell(
        &self,
        block_allocator: &BlockAllocator,
        live_blocks: &RefCell<HashSet<usize>>,
        heap: *const HeapInner,
    ) -> Result<NonNull<CellHeader>, BlockError> {
        loop {
            let meta = {
                let usable = self.usable.borrow();
                usable.last().copied()
            };

            if let Some(meta) = meta {
                let meta_ref = unsafe { meta.as_ref() };
                if let Some(header) = meta_ref.alloc_cell() {
                    if meta_ref.is_full() {
                        self.usable.borrow_mut().pop();
                    }
                    return Ok(header);
                }
                // Stale entry for a block that filled up.
                self.usable.borrow_mut().pop();
                continue;
            }

            let block = block_allocator.allocate_block(self.tag)?;
            let meta = BlockMeta::init(&block, self.cell_size, heap);
            live_blocks.borrow_mut().insert(block.base_addr());
            self.blocks.borrow_mut().push(block);
            self.usable.borrow_mut().push(meta);
        }
    }

    /// Finalizes every unmarked live cell, clears surviving marks,
    /// rebuilds the usable list, and hands blocks with no survivors back
    /// to the block allocator.
    pub fn sweep(
        &self,
        block_allocator: &BlockAllocator,
        live_blocks: &RefCell<HashSet<usize>>,
    ) -> SweepTally {
        let mut tally = SweepTally::default();
        let mut blocks = self.blocks.borrow_mut();
        let mut usable = self.usable.borrow_mut();
        usable.clear();

        let swept = std::mem::take(&mut *blocks);
        for block in swept {
            let meta = unsafe { &*(block.as_ptr() as *const BlockMeta) };
            let mut survivors = 0;

            meta.for_each_cell(|header| {
                if !header.is_live() {
                    return;
                }
                if header.is_marked() {
                    header.set_marked(false);
                    survivors += 1;
                    tally.live_cells += 1;
                    tally.live_bytes += self.cell_size;
                } else {
                    unsafe { header.finalize() };
                    meta.free_cell(NonNull::from(header));
                    tally.collected_cells += 1;
                    tally.collected_bytes += self.cell_size;
                }
            });

            if survivors == 0 {
                live_blocks.borrow_mut().remove(&block.base_addr());
                block_allocator.deallocate_block(block, self.tag);
                tally.freed_blocks += 1;
            } else {
                if !meta.is_full() {
                    usable.push(NonNull::from(meta));
                }
                blocks.push(block);
            }
        }

        tally
    }

    /// Finalizes every live cell unconditionally. Used at heap teardown.
    pub fn finalize_all(&self) {
        for block in self.blocks.borrow().iter() {
            let meta = unsafe { &*(block.as_ptr() as *const BlockMeta) };
            meta.for_each_cell(|header| {
                if header.is_live() {
                    unsafe { header.finalize() };
                }
            });
        }
    }
}

fn size_class_tag(cell_size: usize) -> &'static str {
    match cell_size {
        64 => "cells/64",
        96 => "cells/96",
        128 => "cells/128",
        256 => "cells/256",
        512 => "cells/512",
        1024 => "cells/1024",
        3072 => "cells/3072",
        _ => "cells",
    }
}
