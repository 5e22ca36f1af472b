//! Tracing garbage collector.
//!
//! Mark-sweep over the value graph. Values live in reference-counted heap
//! cells; the collector's job is only to break cycles. Marking walks an
//! iterative worklist from the roots; sweeping clears the outgoing edges of
//! every unmarked cell, after which ordinary reference counting reclaims the
//! now-acyclic garbage.
//!
//! The allocation registry is interpreter-thread-local: pure NAAb code runs
//! on one thread, and parallel polyglot snapshots cross the thread boundary
//! as owned payloads, never as handles (see `polyglot::payload`).

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use tracing::debug;

/// A node in the traced graph: heap cells and environments.
pub trait GcNode {
    fn gc_id(&self) -> u64;
    /// Push every directly-owned child node.
    fn gc_children(&self, out: &mut Vec<Rc<dyn GcNode>>);
    /// Drop all outgoing edges so reference counting can finish the job.
    fn gc_clear(&self);
}

thread_local! {
    static REGISTRY: RefCell<Vec<Weak<dyn GcNode>>> = const { RefCell::new(Vec::new()) };
    /// Long-lived roots (interpreter globals). Held weakly so a dropped
    /// interpreter stops rooting its graph without explicit deregistration.
    static PERSISTENT_ROOTS: RefCell<Vec<Weak<dyn GcNode>>> = const { RefCell::new(Vec::new()) };
    static NEXT_ID: RefCell<u64> = const { RefCell::new(1) };
    static ALLOCS_SINCE_GC: RefCell<usize> = const { RefCell::new(0) };
}

/// Root `node` for every future collection on this thread, for as long as it
/// stays strongly referenced.
pub fn register_persistent_root(node: &Rc<dyn GcNode>) {
    PERSISTENT_ROOTS.with(|r| r.borrow_mut().push(Rc::downgrade(node)));
}

pub fn next_id() -> u64 {
    NEXT_ID.with(|n| {
        let mut n = n.borrow_mut();
        let id = *n;
        *n += 1;
        id
    })
}

/// Record a freshly allocated node and bump the trigger counter.
pub fn register(node: &Rc<dyn GcNode>) {
    REGISTRY.with(|r| r.borrow_mut().push(Rc::downgrade(node)));
    ALLOCS_SINCE_GC.with(|a| *a.borrow_mut() += 1);
}

/// Allocations since the last collection; the interpreter compares this
/// against its configured threshold.
pub fn allocations_since_collect() -> usize {
    ALLOCS_SINCE_GC.with(|a| *a.borrow())
}

/// Live (still-referenced) nodes in the registry. Test probes use this to
/// observe cycle reclamation.
pub fn live_count() -> usize {
    REGISTRY.with(|r| r.borrow().iter().filter(|w| w.strong_count() > 0).count())
}

/// Run a full mark-sweep from the given roots. Returns the number of cells
/// whose edges were cleared.
pub fn collect(roots: &[Rc<dyn GcNode>]) -> usize {
    // Mark: iterative worklist keyed by node identity.
    let mut marked: HashSet<u64> = HashSet::new();
    let mut worklist: Vec<Rc<dyn GcNode>> = roots.to_vec();
    PERSISTENT_ROOTS.with(|r| {
        let mut persistent = r.borrow_mut();
        persistent.retain(|w| w.strong_count() > 0);
        worklist.extend(persistent.iter().filter_map(|w| w.upgrade()));
    });
    while let Some(node) = worklist.pop() {
        if !marked.insert(node.gc_id()) {
            continue;
        }
        node.gc_children(&mut worklist);
    }

    // Sweep: clear edges of unmarked-but-alive cells, drop dead weak refs.
    let mut cleared = 0;
    let victims: Vec<Rc<dyn GcNode>> = REGISTRY.with(|r| {
        let mut registry = r.borrow_mut();
        registry.retain(|w| w.strong_count() > 0);
        registry
            .iter()
            .filter_map(|w| w.upgrade())
            .filter(|n| !marked.contains(&n.gc_id()))
            .collect()
    });
    for victim in victims {
        victim.gc_clear();
        cleared += 1;
    }

    ALLOCS_SINCE_GC.with(|a| *a.borrow_mut() = 0);
    debug!(marked = marked.len(), cleared, "gc cycle complete");
    cleared
}
