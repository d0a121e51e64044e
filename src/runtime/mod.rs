//! The shared half of an interpreter: constants, globals, the heap, the
//! native registry and the VM's stacks. Any number of sessions can feed
//! code into one runtime.

use std::io::Write;
use std::rc::Rc;

use crate::arena::CapacityResult;
use crate::config::Config;
use crate::consts::Constants;
use crate::heap::{Heap, HostObject};
use crate::natives::{method_name, NativeId, NativeRegistry};
use crate::value::Value;
use crate::vars::{GlobalVars, VarExists, Vars};
use crate::vm::{RuntimeError, Vm, VmResult, VmState};

/// Name of the global that holds the tolerance used by `~=` and `!~`.
pub const EPSILON_GLOBAL: &str = "arithEpsilon";

pub struct Runtime {
    pub(crate) consts: Constants,
    pub(crate) globals: GlobalVars,
    pub(crate) natives: NativeRegistry,
    pub(crate) heap: Heap,
    pub(crate) config: Config,
    vm: VmState,
    out: Box<dyn Write>,
    args: Vec<String>,
    epsilon_slot: Option<usize>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("globals", &self.globals.len())
            .field("natives", &self.natives.len())
            .field("live", &self.heap.live_count())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new() -> CapacityResult<Self> {
        Runtime::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> CapacityResult<Self> {
        let mut rt = Runtime {
            consts: Constants::new()?,
            globals: GlobalVars::new(),
            natives: NativeRegistry::with_builtins(),
            heap: Heap::new(),
            vm: VmState::new(&config),
            config,
            out: Box::new(std::io::stdout()),
            args: Vec::new(),
            epsilon_slot: None,
        };
        let core: Vec<(String, NativeId)> = rt.natives.core().map(|(n, id)| (n.to_string(), id)).collect();
        for (name, id) in core {
            rt.bind_global(&name, Value::Native(id))?;
        }
        let eps = rt.bind_global(EPSILON_GLOBAL, Value::Float(rt.config.epsilon))?;
        rt.epsilon_slot = Some(eps);
        // everything from here on belongs to the user
        rt.globals.mark_user();
        tracing::debug!(target: "sable::runtime", natives = rt.natives.len(), globals = rt.globals.len(), "runtime ready");
        Ok(rt)
    }

    fn bind_global(&mut self, name: &str, v: Value) -> CapacityResult<usize> {
        let slot = self.find_or_create_global(name)?;
        if let Some(var) = self.globals.get_mut(slot) {
            *var = v;
        }
        Ok(slot)
    }

    /// Send script output somewhere other than stdout.
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.out = out;
    }

    /// Arguments handed to scripts through `args()`.
    pub fn set_args(&mut self, args: Vec<String>) {
        self.args = args;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn consts(&self) -> &Constants {
        &self.consts
    }

    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    /// Run a compiled top-level block with `session` as its session store.
    pub fn run(&mut self, code: Rc<[u32]>, session: &mut Vars) -> Result<Option<Value>, RuntimeError> {
        let mut vm = Vm {
            consts: &mut self.consts,
            globals: &mut self.globals,
            session,
            natives: &self.natives,
            heap: &mut self.heap,
            state: &mut self.vm,
            config: &mut self.config,
            out: &mut *self.out,
            args: &self.args,
            epsilon_slot: self.epsilon_slot,
        };
        vm.interpret(code)
    }

    /// Reclaim unreachable cycles. Returns the number of objects freed.
    pub fn gc(&mut self) -> usize {
        let reclaimed = self.heap.detect();
        tracing::debug!(target: "sable::gc", reclaimed, live = self.heap.live_count(), "collected");
        reclaimed
    }

    pub fn live_objects(&self) -> usize {
        self.heap.live_count()
    }

    pub fn instcount(&self) -> u64 {
        self.vm.instcount()
    }

    pub fn reset_instcount(&mut self) {
        self.vm.reset_instcount();
    }

    /// Operand stack depth between runs; zero unless something leaked.
    pub fn vm_depth(&self) -> usize {
        self.vm.depth()
    }

    pub(crate) fn write_line(&mut self, s: &str) -> std::io::Result<()> {
        writeln!(self.out, "{s}")?;
        self.out.flush()
    }

    // ── Natives ─────────────────────────────────────────────────────

    /// Register a host function and bind it to a global of the same name.
    /// `argc` of `None` accepts any number of arguments; a returning
    /// native must push exactly one value.
    pub fn register_native<F>(&mut self, name: &str, argc: Option<usize>, returns: bool, func: F) -> CapacityResult<NativeId>
    where
        F: Fn(&mut Vm<'_>, usize) -> VmResult<()> + 'static,
    {
        let id = self.natives.register(name, argc, returns, func);
        self.bind_global(name, Value::Native(id))?;
        Ok(id)
    }

    /// Register a method for heap objects of kind `kind`, reachable as
    /// `x.name(...)`. No global is bound.
    pub fn register_method<F>(&mut self, kind: &str, name: &str, argc: Option<usize>, returns: bool, func: F) -> NativeId
    where
        F: Fn(&mut Vm<'_>, usize) -> VmResult<()> + 'static,
    {
        self.natives.register(&method_name(kind, name), argc, returns, func)
    }

    /// Put a host object on this runtime's heap.
    pub fn host_object(&mut self, obj: Box<dyn HostObject>) -> Value {
        Value::Obj(self.heap.host(obj))
    }

    // ── Globals ─────────────────────────────────────────────────────

    pub fn find_global(&self, name: &str) -> Option<usize> {
        self.globals.find_by_name(&self.consts, name)
    }

    pub fn find_or_create_global(&mut self, name: &str) -> CapacityResult<usize> {
        let id = self.consts.find_or_create_string(name)?;
        Ok(self.globals.find_or_create(id))
    }

    /// Create a global holding `v`; fails if one of that name exists.
    pub fn register_global(&mut self, name: &str, v: Value) -> Result<usize, crate::Error> {
        let id = self.consts.find_or_create_string(name)?;
        let slot = self.globals.create(id).map_err(|VarExists| crate::Error::Exists(name.to_string()))?;
        if let Some(var) = self.globals.get_mut(slot) {
            *var = v;
        }
        Ok(slot)
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.find_global(name).and_then(|slot| self.globals.get(slot)).cloned()
    }

    pub fn set_global(&mut self, name: &str, v: Value) -> CapacityResult<()> {
        self.bind_global(name, v).map(|_| ())
    }

    /// Remove every global created after setup. Natives stay bound.
    pub fn clear_globals(&mut self) {
        self.globals.clear_user();
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.vm.flush();
        self.globals.clear_values();
        let reclaimed = self.heap.detect();
        tracing::debug!(target: "sable::gc", reclaimed, "runtime teardown");
    }
}
