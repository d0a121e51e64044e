//! Heap containers and the live-object registry.
//!
//! Every container is a [`GcBox`] behind an `Rc`, so ordinary reference
//! counting frees acyclic garbage as soon as the last holder lets go. The
//! [`Heap`] keeps a weak registry of everything it allocated so the cycle
//! detector in [`cycle`] can find what refcounting alone never frees.

pub mod cycle;
pub mod dict;
pub mod host;
pub mod iter;
pub mod list;
pub mod object;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

pub use dict::{Dict, DictKey};
pub use host::{with_host, HostObject};
pub use iter::{Cursor, IteratorObject};
pub use list::List;
pub use object::Object;

use crate::value::{Reference, Value};

pub type Gc = Rc<GcBox>;

pub struct GcBox {
    /// Scratch counter owned by the cycle detector.
    pub(crate) gc_refs: Cell<usize>,
    /// Position in the detector's working set during a pass.
    pub(crate) slot: Cell<usize>,
    pub body: RefCell<HeapObject>,
}

impl fmt::Debug for GcBox {
    // Objects can reach themselves; print the kind, never the contents.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.body.try_borrow() {
            Ok(body) => write!(f, "GcBox<{}>", body.kind_name()),
            Err(_) => f.write_str("GcBox<borrowed>"),
        }
    }
}

#[derive(Debug)]
pub enum HeapObject {
    Object(Object),
    List(List),
    Dict(Dict),
    Iter(IteratorObject),
    Host(Box<dyn HostObject>),
}

impl HeapObject {
    pub fn kind_name(&self) -> &'static str {
        match self {
            HeapObject::Object(_) => "object",
            HeapObject::List(_) => "list",
            HeapObject::Dict(_) => "dict",
            HeapObject::Iter(_) => "iterator",
            HeapObject::Host(h) => h.kind_name(),
        }
    }

    fn collectable(&self) -> &dyn Collectable {
        match self {
            HeapObject::Object(o) => o,
            HeapObject::List(l) => l,
            HeapObject::Dict(d) => d,
            HeapObject::Iter(i) => i,
            HeapObject::Host(h) => h,
        }
    }

    fn collectable_mut(&mut self) -> &mut dyn Collectable {
        match self {
            HeapObject::Object(o) => o,
            HeapObject::List(l) => l,
            HeapObject::Dict(d) => d,
            HeapObject::Iter(i) => i,
            HeapObject::Host(h) => h,
        }
    }

    /// Every heap object this one holds a strong reference to, through
    /// all three collector hooks.
    pub(crate) fn for_each_child(&self, f: &mut dyn FnMut(&Gc)) {
        let c = self.collectable();
        c.for_each_value(&mut |v| for_each_gc(v, f));
        c.for_each_key(f);
        c.for_each_extra(f);
    }
}

/// The hooks the cycle detector drives. A container that can hold a
/// reference to another heap object must report it through one of the
/// visitors, and must be able to let go of it in `clear_zombie_refs`.
pub trait Collectable {
    fn for_each_value(&self, f: &mut dyn FnMut(&Value));

    fn for_each_key(&self, _f: &mut dyn FnMut(&Gc)) {}

    fn for_each_extra(&self, _f: &mut dyn FnMut(&Gc)) {}

    /// Move every reference to a doomed object into `graveyard` without
    /// dropping it, so the doomed set can be torn down in one go.
    fn clear_zombie_refs(&mut self, is_zombie: &dyn Fn(&Gc) -> bool, graveyard: &mut Vec<Value>);
}

/// Calls `f` on each heap object that `v` keeps alive.
pub fn for_each_gc(v: &Value, f: &mut dyn FnMut(&Gc)) {
    match v {
        Value::Obj(gc) | Value::Method { this: gc, .. } => f(gc),
        Value::Ref(r) => {
            if let Some(gc) = r.gc() {
                f(gc);
            }
            if let Reference::Key { key: DictKey::Obj(k), .. } = r {
                f(k);
            }
        }
        _ => {}
    }
}

/// True if `v` holds any reference the predicate accepts.
pub(crate) fn refers_to(v: &Value, is_zombie: &dyn Fn(&Gc) -> bool) -> bool {
    let mut hit = false;
    for_each_gc(v, &mut |gc| hit |= is_zombie(gc));
    hit
}

/// Replace `slot` by `Value::None` if it refers to a zombie.
pub fn bury(slot: &mut Value, is_zombie: &dyn Fn(&Gc) -> bool, graveyard: &mut Vec<Value>) {
    if refers_to(slot, is_zombie) {
        graveyard.push(std::mem::take(slot));
    }
}

// ── Registry ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Heap {
    live: Vec<Weak<GcBox>>,
    prune_at: usize,
}

impl Heap {
    pub fn new() -> Self {
        Heap { live: Vec::new(), prune_at: 256 }
    }

    pub fn alloc(&mut self, body: HeapObject) -> Gc {
        if self.live.len() >= self.prune_at {
            self.live.retain(|w| w.strong_count() > 0);
            self.prune_at = (self.live.len() * 2).max(256);
        }
        let gc = Rc::new(GcBox {
            gc_refs: Cell::new(0),
            slot: Cell::new(0),
            body: RefCell::new(body),
        });
        self.live.push(Rc::downgrade(&gc));
        gc
    }

    pub fn object(&mut self, parent: Option<Gc>) -> Gc {
        self.alloc(HeapObject::Object(Object::new(parent)))
    }

    pub fn list(&mut self, items: Vec<Value>) -> Gc {
        self.alloc(HeapObject::List(List::from(items)))
    }

    pub fn dict(&mut self) -> Gc {
        self.alloc(HeapObject::Dict(Dict::new()))
    }

    pub fn iter(&mut self, it: IteratorObject) -> Gc {
        self.alloc(HeapObject::Iter(it))
    }

    pub fn host(&mut self, obj: Box<dyn HostObject>) -> Gc {
        self.alloc(HeapObject::Host(obj))
    }

    /// Number of heap objects still alive.
    pub fn live_count(&self) -> usize {
        self.live.iter().filter(|w| w.strong_count() > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refcounting_frees_acyclic_objects() {
        let mut heap = Heap::new();
        let a = heap.list(vec![Value::Int(1)]);
        let b = heap.object(None);
        assert_eq!(heap.live_count(), 2);
        drop(a);
        assert_eq!(heap.live_count(), 1);
        drop(b);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn children_include_parent_and_dict_keys() {
        let mut heap = Heap::new();
        let parent = heap.object(None);
        let child = heap.object(Some(parent.clone()));
        let d = heap.dict();
        if let HeapObject::Dict(dict) = &mut *d.body.borrow_mut() {
            dict.set(DictKey::Obj(child.clone()), Value::Int(1));
        }
        let mut seen = Vec::new();
        child.body.borrow().for_each_child(&mut |g| seen.push(g.clone()));
        assert!(Rc::ptr_eq(&seen[0], &parent));
        let mut seen = Vec::new();
        d.body.borrow().for_each_child(&mut |g| seen.push(g.clone()));
        assert_eq!(seen.len(), 1);
        assert!(Rc::ptr_eq(&seen[0], &child));
    }
}
