/// Configuration settings for a [`crate::Heap`].
#[derive(Copy, Clone, Debug)]
pub struct HeapConfig {
    /// Floor for the allocation-pressure trigger. A collection fires once
    /// the bytes allocated since the last cycle exceed the current
    /// threshold; after every sweep the threshold retunes to the surviving
    /// byte count, but never below this floor.
    pub gc_min_bytes_threshold: usize,

    /// How many freed blocks the block allocator keeps pooled for reuse.
    /// Blocks freed beyond this limit are released back to the OS.
    pub block_cache_size: usize,

    /// Stress mode: run a full collection before every allocation.
    /// Catastrophically slow, but flushes out missing roots and
    /// under-marking bugs early. Off by default.
    pub collect_on_every_allocation: bool,
}

pub const HEAP_CONFIG_DEFAULT_GC_MIN_BYTES_THRESHOLD: usize = 4 * 1024 * 1024;
pub const HEAP_CONFIG_DEFAULT_BLOCK_CACHE_SIZE: usize = 64;

// All the heuristic constant values used by the heap are collected here.
// The defaults are good for most embedders; the stress flag exists for
// the embedder's own test suites.
impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig {
            gc_min_bytes_threshold: HEAP_CONFIG_DEFAULT_GC_MIN_BYTES_THRESHOLD,
            block_cache_size: HEAP_CONFIG_DEFAULT_BLOCK_CACHE_SIZE,
            collect_on_every_allocation: false,
        }
    }
}
