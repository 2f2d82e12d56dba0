/// Size of a heap block. Blocks are allocated with alignment equal to
/// their size so that any address inside a block maps back to the block
/// base with a single mask.
pub const BLOCK_SIZE: usize = 16 * 1024;

/// Byte offset of the first cell slot inside a block. The gap holds the
/// in-place [`super::BlockMeta`] plus padding that keeps slot addresses
/// 32-byte aligned for every size class.
pub const CELLS_OFFSET: usize = 64;

/// Slot sizes (header included) a heap hands out, smallest first.
pub const CELL_SIZE_CLASSES: [usize; 7] = [64, 96, 128, 256, 512, 1024, 3072];

pub const fn block_base(addr: usize) -> usize {
    addr & !(BLOCK_SIZE - 1)
}
