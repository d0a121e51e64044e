//! Host functions callable from scripts.
//!
//! Every native lives in one registry under a unique name. Core library
//! functions are also bound to globals so scripts can call them by their
//! short name; container methods are only reachable through a property
//! lookup on a list, dict or iterator.

mod builtins;
mod methods;

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::value::Value;
use crate::vm::{Vm, VmResult};

pub use self::builtins::CORE_PREFIX;

/// Index of a native in its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeId(pub u32);

/// A native pops its `argc` arguments (last argument on top) and, if it
/// was registered as returning, pushes exactly one result.
pub type NativeFn = Rc<dyn Fn(&mut Vm<'_>, usize) -> VmResult<()>>;

#[derive(Clone)]
pub struct NativeDef {
    pub name: String,
    /// `None` accepts any number of arguments.
    pub argc: Option<usize>,
    pub returns: bool,
    pub func: NativeFn,
}

impl fmt::Debug for NativeDef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("NativeDef")
            .field("name", &self.name)
            .field("argc", &self.argc)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct NativeRegistry {
    defs: Vec<NativeDef>,
    by_name: HashMap<String, NativeId>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        NativeRegistry::default()
    }

    /// The core library and the container methods.
    pub fn with_builtins() -> Self {
        let mut reg = NativeRegistry::new();
        builtins::register(&mut reg);
        methods::register(&mut reg);
        reg
    }

    /// Add a native. Registering a name again replaces the earlier entry
    /// for lookups by name; the old id stays valid.
    pub fn register<F>(&mut self, name: &str, argc: Option<usize>, returns: bool, func: F) -> NativeId
    where
        F: Fn(&mut Vm<'_>, usize) -> VmResult<()> + 'static,
    {
        let id = NativeId(self.defs.len() as u32);
        self.defs.push(NativeDef { name: name.to_string(), argc, returns, func: Rc::new(func) });
        self.by_name.insert(name.to_string(), id);
        tracing::trace!(target: "sable::natives", name, id = id.0, "registered native");
        id
    }

    pub fn get(&self, id: NativeId) -> Option<&NativeDef> {
        self.defs.get(id.0 as usize)
    }

    pub fn find(&self, name: &str) -> Option<NativeId> {
        self.by_name.get(name).copied()
    }

    /// The method `name` of a container kind, as named by
    /// [`HeapObject::kind_name`](crate::heap::HeapObject::kind_name).
    pub fn method(&self, kind: &str, name: &str) -> Option<NativeId> {
        self.find(&method_name(kind, name))
    }

    /// Natives that should be bound to a global of the same short name.
    pub fn core(&self) -> impl Iterator<Item = (&str, NativeId)> {
        self.defs
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.name.strip_prefix(CORE_PREFIX).map(|short| (short, NativeId(i as u32))))
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

pub(crate) fn method_name(kind: &str, name: &str) -> String {
    format!("{kind}${name}")
}

/// Pop `argc` arguments and return them in call order.
pub(crate) fn pop_args(vm: &mut Vm<'_>, argc: usize) -> VmResult<Vec<Value>> {
    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        args.push(vm.pop_value()?);
    }
    args.reverse();
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_found_by_name() {
        let reg = NativeRegistry::with_builtins();
        assert!(reg.find("core$print").is_some());
        assert!(reg.method("list", "append").is_some());
        assert!(reg.method("dict", "append").is_none());
        assert!(reg.core().any(|(name, _)| name == "range"));
        assert!(reg.core().all(|(name, _)| !name.contains('$')));
    }

    #[test]
    fn later_registration_wins_by_name() {
        let mut reg = NativeRegistry::new();
        let a = reg.register("f", Some(0), false, |_, _| Ok(()));
        let b = reg.register("f", Some(1), false, |_, _| Ok(()));
        assert_ne!(a, b);
        assert_eq!(reg.find("f"), Some(b));
        assert_eq!(reg.get(a).map(|d| d.argc), Some(Some(0)));
    }
}
