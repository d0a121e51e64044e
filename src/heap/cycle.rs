//! Whole-heap cycle detection.
//!
//! Refcounting frees everything except reference cycles. A pass works out,
//! for each live object, how many of its strong references come from
//! outside the heap graph. Objects with outside holders, and everything
//! they reach, survive. The rest can only be reached from each other and
//! are torn down together.

use std::rc::Rc;

use super::{Gc, Heap};
use crate::value::Value;

/// `gc_refs` marker for objects that are about to be destroyed.
const ZOMBIE: usize = usize::MAX;

impl Heap {
    /// Reclaim unreachable cycles and return how many objects were freed.
    pub fn detect(&mut self) -> usize {
        let objs: Vec<Gc> = self.live.iter().filter_map(|w| w.upgrade()).collect();
        let n = objs.len();

        let index_of = |gc: &Gc| -> Option<usize> {
            let i = gc.slot.get();
            (i < n && Rc::ptr_eq(&objs[i], gc)).then_some(i)
        };

        // 1. every strong reference, minus the one `objs` holds
        for (i, o) in objs.iter().enumerate() {
            o.slot.set(i);
            o.gc_refs.set(Rc::strong_count(o) - 1);
        }

        // 2. discount references that come from inside the heap
        for o in &objs {
            o.body.borrow().for_each_child(&mut |child| {
                if index_of(child).is_some() {
                    child.gc_refs.set(child.gc_refs.get().saturating_sub(1));
                }
            });
        }

        // 3. anything still referenced from outside is reachable, and so
        //    is everything it reaches
        let mut moved = vec![false; n];
        let mut reachable = Vec::with_capacity(n);
        let mut stack = Vec::new();
        for i in 0..n {
            if moved[i] || objs[i].gc_refs.get() == 0 {
                continue;
            }
            moved[i] = true;
            objs[i].gc_refs.set(1);
            stack.push(i);
            while let Some(j) = stack.pop() {
                reachable.push(j);
                objs[j].body.borrow().for_each_child(&mut |child| {
                    if let Some(k) = index_of(child) {
                        if !moved[k] && child.gc_refs.get() == 0 {
                            moved[k] = true;
                            child.gc_refs.set(1);
                            stack.push(k);
                        }
                    }
                });
            }
        }

        // 4. what is left is garbage; cut the links between the doomed
        //    objects so dropping them frees them
        let zombies: Vec<usize> = (0..n).filter(|&i| !moved[i]).collect();
        for &i in &zombies {
            objs[i].gc_refs.set(ZOMBIE);
        }
        let is_zombie = |gc: &Gc| index_of(gc).is_some() && gc.gc_refs.get() == ZOMBIE;
        let mut graveyard: Vec<Value> = Vec::new();
        for &i in &zombies {
            objs[i].body.borrow_mut().collectable_mut().clear_zombie_refs(&is_zombie, &mut graveyard);
        }

        // 5. survivors become the registry
        self.live = reachable.iter().map(|&i| Rc::downgrade(&objs[i])).collect();
        let reclaimed = zombies.len();
        tracing::debug!(target: "sable::gc", live = n, reclaimed, "cycle detection pass");
        drop(graveyard);
        drop(objs);
        reclaimed
    }
}
