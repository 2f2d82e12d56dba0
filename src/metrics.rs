/// Point-in-time snapshot of heap statistics, taken via
/// [`crate::Heap::metrics`].
#[derive(Copy, Clone, Debug, Default)]
pub struct HeapMetrics {
    /// Completed collection cycles.
    pub collections: u64,
    pub live_cells: usize,
    pub live_bytes: usize,
    /// Cells reclaimed by the most recent cycle.
    pub last_collected_cells: usize,
    pub last_collected_bytes: usize,
    pub last_mark_micros: u64,
    pub last_sweep_micros: u64,
    pub blocks_in_use: usize,
    pub blocks_cached: usize,
    /// Current allocation-pressure trigger point.
    pub gc_bytes_threshold: usize,
    pub registered_roots: usize,
    pub registered_conservative_vectors: usize,
    pub registered_weak_containers: usize,
}
