use std::collections::BTreeMap;

use super::{bury, Collectable, Gc, HeapObject};
use crate::value::Value;
use crate::vm::{VmError, VmResult};

/// A property bag keyed by name constant id (or by `hash(k)` for `o[k]`),
/// with an optional parent that lookups fall back to.
#[derive(Debug, Default)]
pub struct Object {
    props: BTreeMap<u32, Value>,
    parent: Option<Gc>,
}

impl Object {
    pub fn new(parent: Option<Gc>) -> Self {
        Object { props: BTreeMap::new(), parent }
    }

    pub fn parent(&self) -> Option<&Gc> {
        self.parent.as_ref()
    }

    /// Own property only.
    pub fn get_own(&self, key: u32) -> Option<&Value> {
        self.props.get(&key)
    }

    /// Stores always land on this object, never on a parent.
    pub fn set(&mut self, key: u32, v: Value) {
        self.props.insert(key, v);
    }

    pub fn remove(&mut self, key: u32) -> bool {
        self.props.remove(&key).is_some()
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = u32> + '_ {
        self.props.keys().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.props.values()
    }
}

/// Property lookup through the parent chain.
pub fn lookup(obj: &Gc, key: u32) -> Option<Value> {
    let mut cur = obj.clone();
    loop {
        let next = match &*cur.body.borrow() {
            HeapObject::Object(o) => {
                if let Some(v) = o.get_own(key) {
                    return Some(v.clone());
                }
                o.parent.clone()
            }
            _ => None,
        };
        cur = next?;
    }
}

/// True if `obj` or any ancestor defines `key`.
pub fn has(obj: &Gc, key: u32) -> bool {
    lookup(obj, key).is_some()
}

/// Only plain objects can be the parent of a clone.
pub fn check_cloneable(proto: &Gc) -> VmResult<()> {
    match &*proto.body.borrow() {
        HeapObject::Object(_) => Ok(()),
        _ => Err(VmError::Type("cannot make an object of a different type into a clone".into())),
    }
}

impl Collectable for Object {
    fn for_each_value(&self, f: &mut dyn FnMut(&Value)) {
        self.props.values().for_each(f);
    }

    fn for_each_extra(&self, f: &mut dyn FnMut(&Gc)) {
        if let Some(p) = &self.parent {
            f(p);
        }
    }

    fn clear_zombie_refs(&mut self, is_zombie: &dyn Fn(&Gc) -> bool, graveyard: &mut Vec<Value>) {
        for v in self.props.values_mut() {
            bury(v, is_zombie, graveyard);
        }
        if self.parent.as_ref().is_some_and(|p| is_zombie(p)) {
            if let Some(p) = self.parent.take() {
                graveyard.push(Value::Obj(p));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    fn set(gc: &Gc, key: u32, v: Value) {
        if let HeapObject::Object(o) = &mut *gc.body.borrow_mut() {
            o.set(key, v);
        }
    }

    #[test]
    fn lookup_walks_parents_but_stores_do_not() {
        let mut heap = Heap::new();
        let base = heap.object(None);
        set(&base, 1, Value::Int(10));
        let derived = heap.object(Some(base.clone()));
        assert!(matches!(lookup(&derived, 1), Some(Value::Int(10))));

        set(&derived, 1, Value::Int(20));
        assert!(matches!(lookup(&derived, 1), Some(Value::Int(20))));
        assert!(matches!(lookup(&base, 1), Some(Value::Int(10))));
        assert!(lookup(&derived, 2).is_none());
    }

    #[test]
    fn only_objects_clone() {
        let mut heap = Heap::new();
        let l = heap.list(vec![]);
        assert!(check_cloneable(&l).is_err());
        assert!(check_cloneable(&heap.object(None)).is_ok());
    }
}
