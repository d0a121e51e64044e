//! The core library: conversions, output, containers, maths and the
//! debugging hooks.

use std::io::BufRead;

use super::{pop_args, NativeRegistry};
use crate::heap::{object, IteratorObject};
use crate::value::Value;
use crate::vm::{Vm, VmError, VmResult};

/// Internal-name prefix of natives that scripts see as globals.
pub const CORE_PREFIX: &str = "core$";

type Native = fn(&mut Vm<'_>, usize) -> VmResult<()>;

// name, argc (None = any), returns
const CORE: &[(&str, Option<usize>, bool, Native)] = &[
    ("str", Some(1), true, str),
    ("int", Some(1), true, int),
    ("float", Some(1), true, float),
    ("hash", Some(1), true, hash),
    ("print", Some(1), false, print),
    ("printrepr", Some(2), false, printrepr),
    ("create", Some(0), true, create),
    ("clone", Some(1), true, clone),
    ("gc", Some(0), true, gc),
    ("gccount", Some(0), true, gccount),
    ("dict", Some(0), true, dict),
    ("list", None, true, list),
    ("range", Some(2), true, range),
    ("defined", Some(1), true, defined),
    ("del", Some(1), true, del),
    ("size", Some(1), true, size),
    ("keys", Some(1), true, keys),
    ("values", Some(1), true, values),
    ("native", Some(1), true, native),
    ("args", Some(0), true, args),
    ("pow", Some(2), true, pow),
    ("sin", Some(1), true, sin),
    ("cos", Some(1), true, cos),
    ("tan", Some(1), true, tan),
    ("instcount", Some(0), true, instcount),
    ("resetinstcount", Some(0), false, resetinstcount),
    ("setdebug", Some(1), false, setdebug),
    ("instring", Some(1), true, instring),
    ("assert", Some(1), false, assert),
];

pub(super) fn register(reg: &mut NativeRegistry) {
    for &(name, argc, returns, func) in CORE {
        reg.register(&format!("{CORE_PREFIX}{name}"), argc, returns, func);
    }
}

// ── Conversions ─────────────────────────────────────────────────────

fn str(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let s = vm.pop_value()?.to_str();
    vm.push(Value::Str(s))
}

fn int(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let n = vm.pop_int()?;
    vm.push_int(n)
}

fn float(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let x = vm.pop_float()?;
    vm.push_float(x)
}

fn hash(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let h = vm.pop_value()?.hash_key()?;
    vm.push_int(h)
}

// ── Output ──────────────────────────────────────────────────────────

fn print(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let s = vm.pop_value()?.to_str();
    vm.write_line(&s)
}

fn printrepr(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let v = vm.pop_value()?;
    let label = vm.pop_str()?;
    vm.write_line(&format!("{label}: {}", v.repr()))
}

fn instring(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let prompt = vm.pop_str()?;
    vm.write(&prompt)?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| vm.error(format!("cannot read input: {e}")))?;
    let line = line.trim_end_matches(['\n', '\r']);
    vm.push_str(line)
}

// ── Objects and containers ──────────────────────────────────────────

fn create(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let o = vm.heap().object(None);
    vm.push(Value::Obj(o))
}

fn clone(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let Value::Obj(proto) = vm.pop_value()? else {
        return Err(VmError::Type("can only clone an object".into()));
    };
    object::check_cloneable(&proto)?;
    let o = vm.heap().object(Some(proto));
    vm.push(Value::Obj(o))
}

fn dict(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let d = vm.heap().dict();
    vm.push(Value::Obj(d))
}

fn list(vm: &mut Vm<'_>, argc: usize) -> VmResult<()> {
    let items = pop_args(vm, argc)?;
    let l = vm.heap().list(items);
    vm.push(Value::Obj(l))
}

fn range(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let top = vm.pop_int()?;
    let bottom = vm.pop_int()?;
    let it = vm.heap().iter(IteratorObject::range(bottom, top));
    vm.push(Value::Obj(it))
}

fn keys(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let source = vm.pop_value()?;
    let it = IteratorObject::over(&source, true)?;
    let it = vm.heap().iter(it);
    vm.push(Value::Obj(it))
}

fn values(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let source = vm.pop_value()?;
    let it = IteratorObject::over(&source, false)?;
    let it = vm.heap().iter(it);
    vm.push(Value::Obj(it))
}

fn size(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let n = vm.pop_value()?.size()?;
    vm.push_int(n)
}

/// Takes the reference, not what it points at.
fn defined(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let r = vm.pop_raw()?;
    let d = vm.is_defined(&r);
    vm.push_bool(d)
}

fn del(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let r = vm.pop_raw()?;
    let removed = vm.delete(&r)?;
    vm.push_bool(removed)
}

// ── Runtime ─────────────────────────────────────────────────────────

fn gc(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let reclaimed = vm.heap().detect();
    tracing::debug!(target: "sable::gc", reclaimed, live = vm.heap().live_count(), "collected from script");
    vm.push_int(reclaimed as i32)
}

fn gccount(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let n = vm.heap().live_count();
    vm.push_int(n as i32)
}

fn native(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let name = vm.pop_str()?;
    let found = vm.natives().find(&name).or_else(|| vm.natives().find(&format!("{CORE_PREFIX}{name}")));
    match found {
        Some(id) => vm.push(Value::Native(id)),
        None => Err(vm.error(format!("unknown native function: {name}"))),
    }
}

fn args(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let items = vm.script_args().iter().map(|a| Value::str(a)).collect();
    let l = vm.heap().list(items);
    vm.push(Value::Obj(l))
}

fn instcount(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let n = vm.instcount();
    vm.push_int(n.min(i32::MAX as u64) as i32)
}

fn resetinstcount(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    vm.reset_instcount();
    Ok(())
}

/// Bit 0 turns on source markers, bit 1 instruction tracing, bit 2
/// listings.
fn setdebug(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let bits = vm.pop_int()?;
    let config = vm.config_mut();
    config.source_debug = bits & 1 != 0;
    config.trace = bits & 2 != 0;
    config.dump = bits & 4 != 0;
    Ok(())
}

fn assert(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    if vm.pop_bool()? { Ok(()) } else { Err(VmError::AssertionFailed) }
}

// ── Maths ───────────────────────────────────────────────────────────

fn pow(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let e = vm.pop_float()?;
    let b = vm.pop_float()?;
    vm.push_float(b.powf(e))
}

fn sin(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let x = vm.pop_float()?;
    vm.push_float(x.sin())
}

fn cos(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let x = vm.pop_float()?;
    vm.push_float(x.cos())
}

fn tan(vm: &mut Vm<'_>, _: usize) -> VmResult<()> {
    let x = vm.pop_float()?;
    vm.push_float(x.tan())
}
