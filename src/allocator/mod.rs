mod block;
mod block_allocator;
mod block_meta;
mod cell_allocator;
mod constants;
mod header;


pub use block_allocator::BlockAllocator;
pub use block_meta::BlockMeta;
pub use cell_allocator::{CellAllocator, SweepTally};
pub use constants::{block_base, BLOCK_SIZE, CELL_SIZE_CLASSES};
pub use header::{vtable_of, CellHeader, CELL_HEADER_SIZE};

#[cfg(test)]
pub use block::Block;
#[cfg(test)]
pub use constants::CELLS_OFFSET;
#[cfg(test)]
pub use header::CellState;
