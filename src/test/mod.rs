use crate::{
    CellPtr, ConservativeVector, Handle, Heap, HeapConfig, HeapState, LiveSet, Ref, Root,
    RootKind, Trace, TraceLeaf, Tracer, Value, WeakContainer,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Trace)]
struct Node {
    value: usize,
    next: Cell<Option<Ref<Node>>>,
}

impl Node {
    fn new(value: usize) -> Node {
        Node {
            value,
            next: Cell::new(None),
        }
    }
}

#[derive(Trace)]
struct List {
    items: RefCell<Vec<Ref<Node>>>,
}

struct DropProbe {
    drops: Rc<Cell<usize>>,
}

unsafe impl Trace for DropProbe {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}

impl Drop for DropProbe {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

#[test]
fn fresh_heap_is_idle_and_empty() {
    let heap = Heap::new();
    assert_eq!(heap.state(), HeapState::Idle);
    assert_eq!(heap.live_cell_count(), 0);
    assert_eq!(heap.root_count(), 0);
}

#[test]
fn rooted_chain_survives_collection() {
    let heap = Heap::new();

    let tail = heap.allocate(Node::new(2));
    let mid = heap.allocate(Node::new(1));
    mid.next.set(Some(tail));
    let head = heap.allocate(Node::new(0));
    head.next.set(Some(mid));

    let root = Root::new(head);
    heap.collect_garbage();

    assert_eq!(heap.live_cell_count(), 3);
    assert_eq!(root.get().next.get().unwrap().next.get().unwrap().value, 2);
}

#[test]
fn unreachable_cells_are_reclaimed() {
    let heap = Heap::new();

    let keep = Root::new(heap.allocate(Node::new(0)));
    for i in 0..100 {
        heap.allocate(Node::new(i));
    }
    assert_eq!(heap.live_cell_count(), 101);

    heap.collect_garbage();
    assert_eq!(heap.live_cell_count(), 1);
    assert_eq!(keep.value, 0);
}

#[test]
fn dead_cells_are_finalized_exactly_once() {
    let heap = Heap::new();
    let drops = Rc::new(Cell::new(0));

    for _ in 0..10 {
        heap.allocate(DropProbe {
            drops: drops.clone(),
        });
    }

    heap.collect_garbage();
    assert_eq!(drops.get(), 10);

    // A second cycle finds nothing left to finalize.
    heap.collect_garbage();
    assert_eq!(drops.get(), 10);
}

#[test]
fn survivors_are_finalized_at_heap_teardown() {
    let drops = Rc::new(Cell::new(0));

    {
        let heap = Heap::new();
        let _root = Root::new(heap.allocate(DropProbe {
            drops: drops.clone(),
        }));

        heap.collect_garbage();
        assert_eq!(drops.get(), 0);
    }

    assert_eq!(drops.get(), 1);
}

#[test]
fn cycles_are_collected_and_marking_terminates() {
    let heap = Heap::new();

    let a = heap.allocate(Node::new(0));
    let b = heap.allocate(Node::new(1));
    a.next.set(Some(b));
    b.next.set(Some(a));

    {
        let root = Root::new(a);
        heap.collect_garbage();
        assert_eq!(heap.live_cell_count(), 2);
        drop(root);
    }

    heap.collect_garbage();
    assert_eq!(heap.live_cell_count(), 0);
}

#[test]
fn root_count_balances_across_nested_scopes() {
    let heap = Heap::new();
    let baseline = heap.root_count();

    {
        let outer = Root::new(heap.allocate(Node::new(0)));
        {
            let _inner = Root::new(heap.allocate(Node::new(1)));
            let _handle = Handle::new(outer.get());
            assert_eq!(heap.root_count(), baseline + 3);
        }
        assert_eq!(heap.root_count(), baseline + 1);
    }

    assert_eq!(heap.root_count(), baseline);
}

#[test]
fn root_count_balances_across_unwinding() {
    let heap = Heap::new();
    let baseline = heap.root_count();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _root = Root::new(heap.allocate(Node::new(0)));
        panic!("early exit");
    }));

    assert!(result.is_err());
    assert_eq!(heap.root_count(), baseline);
}

#[test]
fn roots_can_be_repointed() {
    let heap = Heap::new();

    let first = heap.allocate(Node::new(1));
    let second = heap.allocate(Node::new(2));
    let root = Root::new(first);
    root.set(second);

    heap.collect_garbage();
    assert_eq!(heap.live_cell_count(), 1);
    assert_eq!(root.value, 2);
}

#[test]
fn empty_handle_pins_nothing_until_set() {
    let heap = Heap::new();

    let handle: Handle<Node> = Handle::empty(&heap);
    assert!(handle.is_empty());

    let cell = heap.allocate(Node::new(9));
    handle.set(Some(cell));

    heap.collect_garbage();
    assert_eq!(heap.live_cell_count(), 1);
    assert_eq!(handle.get().unwrap().value, 9);

    handle.set(None);
    heap.collect_garbage();
    assert_eq!(heap.live_cell_count(), 0);
}

#[test]
fn deferred_collection_runs_when_last_guard_drops() {
    let heap = Heap::new();

    heap.allocate(Node::new(0));
    heap.allocate(Node::new(1));

    let outer = heap.defer_gc();
    let inner = heap.defer_gc();

    heap.collect_garbage();
    assert_eq!(heap.state(), HeapState::Deferred);
    assert_eq!(heap.live_cell_count(), 2);

    drop(inner);
    assert_eq!(heap.state(), HeapState::Deferred);
    assert_eq!(heap.live_cell_count(), 2);

    drop(outer);
    assert_eq!(heap.state(), HeapState::Idle);
    assert_eq!(heap.live_cell_count(), 0);
}

#[test]
fn defer_without_request_collects_nothing() {
    let heap = Heap::new();
    heap.allocate(Node::new(0));

    drop(heap.defer_gc());
    assert_eq!(heap.live_cell_count(), 1);
}

#[test]
fn conservative_vector_retains_matching_bit_patterns() {
    let heap = Heap::new();

    let cell = heap.allocate(Node::new(7));
    let mut scanned = ConservativeVector::<usize>::new(&heap);
    scanned.push(cell.as_ptr() as usize);

    heap.collect_garbage();
    assert_eq!(heap.live_cell_count(), 1);
    assert_eq!(cell.value, 7);

    scanned.clear();
    heap.collect_garbage();
    assert_eq!(heap.live_cell_count(), 0);
}

#[test]
fn conservative_scan_retains_interior_pointers() {
    let heap = Heap::new();

    let cell = heap.allocate(Node::new(7));
    let mut scanned = ConservativeVector::<usize>::new(&heap);
    scanned.push(cell.as_ptr() as usize + 8);

    heap.collect_garbage();
    assert_eq!(heap.live_cell_count(), 1);
}

#[test]
fn conservative_scan_ignores_non_heap_words() {
    let heap = Heap::new();

    let mut scanned = ConservativeVector::<usize>::new(&heap);
    scanned.push(0);
    scanned.push(usize::MAX);
    scanned.push(&heap as *const Heap as usize);

    heap.allocate(Node::new(0));
    heap.collect_garbage();
    assert_eq!(heap.live_cell_count(), 0);
}

struct WeakTable {
    entries: RefCell<Vec<CellPtr>>,
}

impl WeakContainer for WeakTable {
    fn prune_dead_cells(&self, live: &LiveSet) {
        self.entries.borrow_mut().retain(|cell| live.is_live(*cell));
    }
}

#[test]
fn weak_container_entries_are_invalidated_not_retained() {
    let heap = Heap::new();

    let kept = heap.allocate(Node::new(0));
    let first_dropped = heap.allocate(Node::new(1));
    let second_dropped = heap.allocate(Node::new(2));
    let root = Root::new(kept);

    let table = Rc::new(WeakTable {
        entries: RefCell::new(vec![
            kept.erased(),
            first_dropped.erased(),
            second_dropped.erased(),
        ]),
    });
    let registration = heap.register_weak_container(table.clone());

    heap.collect_garbage();

    // The weak entries never acted as roots, and the dead ones are gone.
    assert_eq!(heap.live_cell_count(), 1);
    assert_eq!(table.entries.borrow().len(), 1);
    assert_eq!(table.entries.borrow()[0], root.get().erased());

    registration.deregister();
    // Idempotent: explicit deregistration followed by drop is fine.
    registration.deregister();
}

#[test]
fn dropped_weak_container_is_skipped() {
    let heap = Heap::new();

    let table = Rc::new(WeakTable {
        entries: RefCell::new(vec![]),
    });
    let _registration = heap.register_weak_container(table.clone());
    drop(table);

    // Prune must not blow up on the dead registration.
    heap.collect_garbage();
}

#[test]
fn guards_release_their_registrations_before_the_heap_drops() {
    let heap = Heap::new();

    // Both guard types borrow the heap, so they can only be dropped
    // first; verify each releases its registry slot when it is.
    let registration = heap.register_weak_container(Rc::new(WeakTable {
        entries: RefCell::new(vec![]),
    }));
    let scanned = ConservativeVector::<usize>::new(&heap);

    assert_eq!(heap.metrics().registered_weak_containers, 1);
    assert_eq!(heap.metrics().registered_conservative_vectors, 1);

    drop(scanned);
    drop(registration);

    assert_eq!(heap.metrics().registered_weak_containers, 0);
    assert_eq!(heap.metrics().registered_conservative_vectors, 0);
}

#[test]
fn allocation_pressure_triggers_collection() {
    let heap = Heap::with_config(HeapConfig {
        gc_min_bytes_threshold: 4096,
        ..HeapConfig::default()
    });

    for i in 0..1000 {
        heap.allocate(Node::new(i));
    }

    let metrics = heap.metrics();
    assert!(metrics.collections > 0);
    assert!(heap.live_cell_count() < 1000);
}

#[test]
fn defer_suppresses_the_pressure_trigger() {
    let heap = Heap::with_config(HeapConfig {
        gc_min_bytes_threshold: 4096,
        ..HeapConfig::default()
    });

    let guard = heap.defer_gc();
    for i in 0..1000 {
        heap.allocate(Node::new(i));
    }
    assert_eq!(heap.metrics().collections, 0);
    assert_eq!(heap.live_cell_count(), 1000);

    drop(guard);
    assert!(heap.metrics().collections > 0);
}

#[test]
fn stress_mode_collects_on_every_allocation() {
    let heap = Heap::with_config(HeapConfig {
        collect_on_every_allocation: true,
        ..HeapConfig::default()
    });

    let root = Root::new(heap.allocate(Node::new(0)));
    heap.allocate(Node::new(1));
    heap.allocate(Node::new(2));

    assert_eq!(heap.metrics().collections, 3);
    // Only the rooted cell and the just-allocated one remain.
    assert_eq!(heap.live_cell_count(), 2);
    assert_eq!(root.value, 0);
}

#[test]
fn census_reports_kind_and_registration_site() {
    let heap = Heap::new();

    let _root = Root::new(heap.allocate(Node::new(0)));
    let _pin = Root::with_kind(heap.allocate(Node::new(1)), RootKind::MustSurviveGc);
    let _scanned = ConservativeVector::<usize>::new(&heap);

    let census = heap.root_census();
    assert_eq!(census.len(), 3);
    assert!(census.iter().any(|e| e.kind == RootKind::Root && e.occupied));
    assert!(census.iter().any(|e| e.kind == RootKind::MustSurviveGc));
    assert!(census
        .iter()
        .any(|e| e.kind == RootKind::ConservativeVector && !e.occupied));
    assert!(census.iter().all(|e| e.location.file().ends_with(".rs")));

    assert_eq!(heap.root_count_of_kind(RootKind::Root), 1);
    assert_eq!(heap.root_count_of_kind(RootKind::MustSurviveGc), 1);
    assert_eq!(heap.root_count_of_kind(RootKind::Handle), 0);
}

#[test]
fn metrics_report_the_last_cycle() {
    let heap = Heap::new();

    let _root = Root::new(heap.allocate(Node::new(0)));
    for i in 0..50 {
        heap.allocate(Node::new(i));
    }
    heap.collect_garbage();

    let metrics = heap.metrics();
    assert_eq!(metrics.collections, 1);
    assert_eq!(metrics.live_cells, 1);
    assert_eq!(metrics.last_collected_cells, 50);
    assert!(metrics.last_collected_bytes > 0);
    assert_eq!(metrics.registered_roots, 1);
}

#[test]
fn empty_blocks_return_to_the_cache() {
    let heap = Heap::new();

    for i in 0..1000 {
        heap.allocate(Node::new(i));
    }
    let in_use_before = heap.metrics().blocks_in_use;
    assert!(in_use_before > 1);

    heap.collect_garbage();

    let metrics = heap.metrics();
    assert_eq!(metrics.blocks_in_use, 0);
    assert!(metrics.blocks_cached > 0);
}

#[test]
fn erased_cells_report_their_payload_type() {
    let heap = Heap::new();

    let cell = heap.allocate(Node::new(0));
    assert!(cell.erased().type_name().ends_with("Node"));
}

#[test]
fn values_gate_interpretation_on_the_discriminant() {
    let heap = Heap::new();

    let number = Value::number(3.5);
    assert!(number.is_number());
    assert!(!number.is_cell());
    assert_eq!(number.as_number(), Some(3.5));
    assert_eq!(number.as_cell(), None);

    let cell: Value = heap.allocate(Node::new(4)).into();
    assert!(cell.is_cell());
    assert_eq!(cell.as_number(), None);
    assert!(cell.as_cell().is_some());
}

#[derive(Trace)]
struct Frame {
    slots: RefCell<Vec<Value>>,
}

#[test]
fn traced_values_pin_their_cells() {
    let heap = Heap::new();

    let node = heap.allocate(Node::new(11));
    let frame = heap.allocate(Frame {
        slots: RefCell::new(vec![Value::number(1.0), Value::cell(node)]),
    });
    let root = Root::new(frame);

    heap.collect_garbage();
    assert_eq!(heap.live_cell_count(), 2);

    let slots = root.slots.borrow();
    let pinned = unsafe { slots[1].as_cell().unwrap().downcast::<Node>() };
    assert_eq!(pinned.value, 11);
}

#[derive(Trace)]
enum Shape {
    Leaf(u64),
    Pair { left: Ref<Node>, right: Ref<Node> },
}

#[test]
fn derived_enum_traces_every_variant() {
    let heap = Heap::new();

    let left = heap.allocate(Node::new(1));
    let right = heap.allocate(Node::new(2));
    let pair = Root::new(heap.allocate(Shape::Pair { left, right }));
    let _leaf = Root::new(heap.allocate(Shape::Leaf(3)));

    heap.collect_garbage();
    assert_eq!(heap.live_cell_count(), 4);

    match &*pair {
        Shape::Pair { left, right } => {
            assert_eq!(left.value, 1);
            assert_eq!(right.value, 2);
        }
        Shape::Leaf(_) => unreachable!(),
    }
}

#[derive(TraceLeaf, Clone, Copy)]
struct Rgb {
    r: u8,
    g: u8,
    b: u8,
}

#[test]
fn leaf_types_allocate_and_survive() {
    let heap = Heap::new();

    let root = Root::new(heap.allocate(Rgb { r: 1, g: 2, b: 3 }));
    heap.collect_garbage();
    assert_eq!((root.r, root.g, root.b), (1, 2, 3));
}

#[test]
fn oversized_cells_use_the_largest_class() {
    let heap = Heap::new();

    let root = Root::new(heap.allocate([0u64; 256]));
    heap.collect_garbage();
    assert_eq!(heap.live_cell_count(), 1);
    assert_eq!(root.len(), 256);
}

#[test]
#[should_panic(expected = "does not fit any cell size class")]
fn cells_beyond_the_largest_class_are_rejected() {
    let heap = Heap::new();
    heap.allocate([0u64; 1024]);
}

#[test]
fn heaps_collect_independently() {
    let first = Heap::new();
    let second = Heap::new();

    let _root = Root::new(first.allocate(Node::new(0)));
    second.allocate(Node::new(1));

    second.collect_garbage();
    assert_eq!(first.live_cell_count(), 1);
    assert_eq!(second.live_cell_count(), 0);
}

#[test]
fn random_churn_keeps_exactly_the_reachable_set() {
    let heap = Heap::new();
    let mut rng = StdRng::seed_from_u64(0xCE11A8);

    let list = Root::new(heap.allocate(List {
        items: RefCell::new(vec![]),
    }));

    let mut expected = 0;
    for round in 0..20 {
        for i in 0..200 {
            let node = heap.allocate(Node::new(i));
            if rng.gen_bool(0.3) {
                list.items.borrow_mut().push(node);
                expected += 1;
            }
        }

        if rng.gen_bool(0.5) {
            let keep = rng.gen_range(0..=expected);
            list.items.borrow_mut().truncate(keep);
            expected = keep;
        }

        heap.collect_garbage();
        assert_eq!(heap.live_cell_count(), expected + 1, "round {round}");
    }
}
