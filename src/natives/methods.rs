//! Methods of the built-in containers. Each is registered under
//! `kind$name` and bound to its receiver when looked up as a property.

use super::{method_name, NativeRegistry};
use crate::heap::{Dict, DictKey, Gc, HeapObject, IteratorObject, List};
use crate::vm::{Vm, VmError, VmResult};

type Method = fn(&mut Vm<'_>, usize) -> VmResult<()>;

const LIST: &[(&str, usize, bool, Method)] = &[
    ("append", 1, false, list_append),
    ("push", 1, false, list_append),
    ("pop", 0, true, list_pop),
    ("peek", 0, true, list_peek),
    ("shift", 1, false, list_shift),
    ("unshift", 0, true, list_unshift),
    ("insert", 2, false, list_insert),
    ("remove", 1, false, list_remove),
];

const DICT: &[(&str, usize, bool, Method)] = &[("size", 0, true, dict_size), ("del", 1, true, dict_del)];

const ITERATOR: &[(&str, usize, bool, Method)] = &[
    ("first", 0, false, iter_first),
    ("next", 0, false, iter_next),
    ("isDone", 0, true, iter_is_done),
    ("current", 0, true, iter_current),
];

pub(super) fn register(reg: &mut NativeRegistry) {
    for (kind, table) in [("list", LIST), ("dict", DICT), ("iterator", ITERATOR)] {
        for &(name, argc, returns, func) in table {
            reg.register(&method_name(kind, name), Some(argc), returns, func);
        }
    }
}

fn kind_error(expected: &str, body: &HeapObject) -> VmError {
    VmError::Type(format!("expected a {expected}, got {}", body.kind_name()))
}

fn with_list<R>(gc: &Gc, f: impl FnOnce(&mut List) -> VmResult<R>) -> VmResult<R> {
    match &mut *gc.body.borrow_mut() {
        HeapObject::List(l) => f(l),
        other => Err(kind_error("list", other)),
    }
}

fn with_dict<R>(gc: &Gc, f: impl FnOnce(&mut Dict) -> VmResult<R>) -> VmResult<R> {
    match &mut *gc.body.borrow_mut() {
        HeapObject::Dict(d) => f(d),
        other => Err(kind_error("dict", other)),
    }
}

fn with_iter<R>(gc: &Gc, f: impl FnOnce(&mut IteratorObject) -> VmResult<R>) -> VmResult<R> {
    match &mut *gc.body.borrow_mut() {
        HeapObject::Iter(it) => f(it),
        other => Err(kind_error("iterator", other)),
    }
}

// ── list ────────────────────────────────────────────────────────────

fn list_append(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let v = vm.pop_value()?;
    with_list(&vm.this_object()?, |l| {
        l.append(v);
        Ok(())
    })
}

fn list_pop(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let v = with_list(&vm.this_object()?, |l| l.pop())?;
    vm.push(v)
}

fn list_peek(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let v = with_list(&vm.this_object()?, |l| l.peek())?;
    vm.push(v)
}

fn list_shift(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let v = vm.pop_value()?;
    with_list(&vm.this_object()?, |l| {
        l.shift(v);
        Ok(())
    })
}

fn list_unshift(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let v = with_list(&vm.this_object()?, |l| l.unshift())?;
    vm.push(v)
}

fn list_insert(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let v = vm.pop_value()?;
    let i = vm.pop_int()?;
    with_list(&vm.this_object()?, |l| {
        l.insert(i, v);
        Ok(())
    })
}

fn list_remove(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let i = vm.pop_int()?;
    with_list(&vm.this_object()?, |l| {
        l.remove(i);
        Ok(())
    })
}

// ── dict ────────────────────────────────────────────────────────────

fn dict_size(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let n = with_dict(&vm.this_object()?, |d| Ok(d.len()))?;
    vm.push_int(n as i32)
}

fn dict_del(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let key = DictKey::from_value(&vm.pop_value()?)?;
    let removed = with_dict(&vm.this_object()?, |d| Ok(d.remove(&key)))?;
    vm.push_bool(removed)
}

// ── iterator ────────────────────────────────────────────────────────

fn iter_first(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    with_iter(&vm.this_object()?, |it| {
        it.first();
        Ok(())
    })
}

fn iter_next(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    with_iter(&vm.this_object()?, |it| {
        it.next();
        Ok(())
    })
}

fn iter_is_done(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let done = with_iter(&vm.this_object()?, |it| Ok(it.is_done()))?;
    vm.push_bool(done)
}

fn iter_current(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let v = with_iter(&vm.this_object()?, |it| it.current())?;
    vm.push(v)
}
