//! A single-threaded, non-moving, mark-and-sweep garbage collector.
//!
//! Memory is carved out of 16 KiB blocks, each dedicated to one cell
//! size class. A [`Heap`] owns its blocks exclusively and collects
//! stop-the-world: marking walks every registered root (exact pins and
//! conservatively scanned buffers alike), then sweeping finalizes the
//! unmarked cells and returns empty blocks to a pooled cache.
//!
//! ```
//! use cellar::{Heap, Root, Trace};
//!
//! #[derive(Trace)]
//! struct Node {
//!     next: Option<cellar::Ref<Node>>,
//! }
//!
//! let heap = Heap::new();
//! let first = heap.allocate(Node { next: None });
//! let second = heap.allocate(Node { next: Some(first) });
//!
//! let root = Root::new(second);
//! heap.collect_garbage();
//!
//! // Both cells survive: `second` is pinned and `first` is reachable
//! // through it.
//! assert_eq!(heap.live_cell_count(), 2);
//! drop(root);
//! ```
//!
//! Cell types implement [`Trace`] (usually via the derive) to report
//! every cell reference they hold; a missed field is an
//! eventual use-after-free, which is why the impl is `unsafe` to write
//! by hand. References ([`Ref`]) carry no liveness of their own; a
//! cell survives only while reachable from a [`Root`], [`Handle`],
//! [`ConservativeVector`], or another live cell.

// Lets the derive-generated `cellar::` paths resolve inside this
// crate's own tests.
extern crate self as cellar;

mod allocator;
mod config;
mod conservative_vec;
mod defer;
mod error;
mod heap;
mod metrics;
mod roots;
mod trace;
mod value;
mod weak;

#[cfg(test)]
mod test;

pub use cellar_derive::{Trace, TraceLeaf};

pub use config::{
    HeapConfig, HEAP_CONFIG_DEFAULT_BLOCK_CACHE_SIZE, HEAP_CONFIG_DEFAULT_GC_MIN_BYTES_THRESHOLD,
};
pub use conservative_vec::ConservativeVector;
pub use defer::DeferGc;
pub use error::BlockError;
pub use heap::{CellPtr, Heap, HeapState, Ref};
pub use metrics::HeapMetrics;
pub use roots::{Handle, Root, RootCensusEntry, RootKind};
pub use trace::{Trace, TraceLeaf, Tracer};
pub use value::Value;
pub use weak::{LiveSet, WeakContainer, WeakRegistration};
