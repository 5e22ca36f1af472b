//! Lexical environments.
//!
//! A chain of frames, innermost first. Closures capture the frame itself, not
//! a snapshot, so mutations made after capture stay visible. Frames are
//! GC-tracked: a closure stored in the frame it captured forms a cycle.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::gc::{self, GcNode};
use crate::value::Value;

pub struct Env {
    id: u64,
    bindings: RefCell<IndexMap<String, Value>>,
    parent: RefCell<Option<Rc<Env>>>,
}

impl Env {
    pub fn root() -> Rc<Env> {
        Self::alloc(None)
    }

    pub fn child(parent: &Rc<Env>) -> Rc<Env> {
        Self::alloc(Some(parent.clone()))
    }

    fn alloc(parent: Option<Rc<Env>>) -> Rc<Env> {
        let env = Rc::new(Env {
            id: gc::next_id(),
            bindings: RefCell::new(IndexMap::new()),
            parent: RefCell::new(parent),
        });
        let node: Rc<dyn GcNode> = env.clone();
        gc::register(&node);
        env
    }

    /// Bind in this frame, shadowing any outer binding of the same name.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.bindings.borrow_mut().insert(name.into(), value);
    }

    /// Mutate the innermost existing binding. Returns false when the name is
    /// not bound anywhere in the chain.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        if let Some(slot) = self.bindings.borrow_mut().get_mut(name) {
            *slot = value;
            return true;
        }
        match self.parent.borrow().as_ref() {
            Some(parent) => parent.assign(name, value),
            None => false,
        }
    }

    /// Resolve a name, walking toward the root.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.bindings.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.borrow().as_ref().and_then(|p| p.get(name))
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names bound directly in this frame, insertion order.
    pub fn local_names(&self) -> Vec<String> {
        self.bindings.borrow().keys().cloned().collect()
    }

    /// Every name visible from this frame, for "did you mean?" candidates.
    pub fn visible_names(&self) -> Vec<String> {
        let mut names = self.local_names();
        if let Some(parent) = self.parent.borrow().as_ref() {
            names.extend(parent.visible_names());
        }
        names
    }

}

impl GcNode for Env {
    fn gc_id(&self) -> u64 {
        self.id
    }

    fn gc_children(&self, out: &mut Vec<Rc<dyn GcNode>>) {
        for value in self.bindings.borrow().values() {
            value.push_gc_node(out);
        }
        if let Some(parent) = self.parent.borrow().as_ref() {
            out.push(parent.clone() as Rc<dyn GcNode>);
        }
    }

    fn gc_clear(&self) {
        self.bindings.borrow_mut().clear();
        self.parent.borrow_mut().take();
    }
}
