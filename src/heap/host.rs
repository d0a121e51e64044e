//! Heap objects defined by the embedding program.
//!
//! A host type lives on the heap like the built-in containers, so the
//! cycle detector sees every reference it holds. It reports those
//! references through the [`Collectable`] hooks, answers property reads
//! and writes by name, and gets methods from natives registered under its
//! kind name (`kind$method`).

use std::any::Any;
use std::fmt;

use super::{Collectable, Gc, HeapObject};
use crate::value::Value;
use crate::vm::{VmError, VmResult};

pub trait HostObject: Collectable + fmt::Debug {
    /// Shown in messages and used as the prefix of method names.
    fn kind_name(&self) -> &'static str;

    /// `None` reads as an undefined property.
    fn get_prop(&self, name: &str) -> VmResult<Option<Value>>;

    fn set_prop(&mut self, name: &str, v: Value) -> VmResult<()>;

    /// True if something was removed.
    fn del_prop(&mut self, _name: &str) -> bool {
        false
    }

    fn size(&self) -> Option<i32> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl Collectable for Box<dyn HostObject> {
    fn for_each_value(&self, f: &mut dyn FnMut(&Value)) {
        (**self).for_each_value(f)
    }

    fn for_each_key(&self, f: &mut dyn FnMut(&Gc)) {
        (**self).for_each_key(f)
    }

    fn for_each_extra(&self, f: &mut dyn FnMut(&Gc)) {
        (**self).for_each_extra(f)
    }

    fn clear_zombie_refs(&mut self, is_zombie: &dyn Fn(&Gc) -> bool, graveyard: &mut Vec<Value>) {
        (**self).clear_zombie_refs(is_zombie, graveyard)
    }
}

/// Run `f` on the host object of type `T` inside `gc`.
pub fn with_host<T, R>(gc: &Gc, f: impl FnOnce(&mut T) -> VmResult<R>) -> VmResult<R>
where
    T: HostObject + 'static,
{
    let mut body = gc.body.borrow_mut();
    let kind = body.kind_name();
    match &mut *body {
        HeapObject::Host(h) => match h.as_any_mut().downcast_mut::<T>() {
            Some(t) => f(t),
            None => Err(VmError::Type(format!("wrong kind of {kind}"))),
        },
        _ => Err(VmError::Type(format!("expected a host object, got {kind}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{bury, Heap};

    #[derive(Debug, Default)]
    struct Pair {
        left: Value,
        right: Value,
    }

    impl Collectable for Pair {
        fn for_each_value(&self, f: &mut dyn FnMut(&Value)) {
            f(&self.left);
            f(&self.right);
        }

        fn clear_zombie_refs(&mut self, is_zombie: &dyn Fn(&Gc) -> bool, graveyard: &mut Vec<Value>) {
            bury(&mut self.left, is_zombie, graveyard);
            bury(&mut self.right, is_zombie, graveyard);
        }
    }

    impl HostObject for Pair {
        fn kind_name(&self) -> &'static str {
            "pair"
        }

        fn get_prop(&self, name: &str) -> VmResult<Option<Value>> {
            Ok(match name {
                "left" => Some(self.left.clone()),
                "right" => Some(self.right.clone()),
                _ => None,
            })
        }

        fn set_prop(&mut self, name: &str, v: Value) -> VmResult<()> {
            match name {
                "left" => self.left = v,
                "right" => self.right = v,
                _ => return Err(VmError::Type(format!("pair has no property '{name}'"))),
            }
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn host_links_are_traced() {
        let mut heap = Heap::new();
        let a = heap.host(Box::new(Pair::default()));
        let b = heap.host(Box::new(Pair::default()));
        let list = heap.list(vec![]);
        with_host::<Pair, _>(&a, |p| p.set_prop("left", Value::Obj(b.clone()))).unwrap();
        with_host::<Pair, _>(&b, |p| p.set_prop("right", Value::Obj(a.clone()))).unwrap();
        with_host::<Pair, _>(&b, |p| p.set_prop("left", Value::Obj(list.clone()))).unwrap();
        drop((a, b, list));
        assert_eq!(heap.live_count(), 3);
        assert_eq!(heap.detect(), 3);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn downcast_checks_the_type() {
        let mut heap = Heap::new();
        let a = heap.host(Box::new(Pair::default()));
        let l = heap.list(vec![]);
        assert!(with_host::<Pair, _>(&a, |p| Ok(p.left.is_none())).unwrap());
        let e = with_host::<Pair, _>(&l, |_| Ok(())).unwrap_err();
        assert_eq!(e.to_string(), "expected a host object, got list");
    }
}
