//! The stack machine.
//!
//! A block runs until `END` or `RETURN` executes with no call frame left.
//! Expression operands live on the operand stack; function locals live in
//! a flat slot array that each call slices with a base/next pair.

use std::fmt;
use std::io::Write;
use std::rc::Rc;

use crate::arena::{CapacityError, Stack};
use crate::bytecode::{self, *};
use crate::config::Config;
use crate::consts::{ConstId, ConstType, Constants, FuncDesc};
use crate::heap::{object, with_host, DictKey, Gc, Heap, HeapObject, HostObject, IteratorObject};
use crate::natives::{NativeId, NativeRegistry};
use crate::value::ops::{self, ArithOp, CmpOp};
use crate::value::{Reference, Value};
use crate::vars::{GlobalVars, Vars};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("{0}")]
    Type(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("use of undefined value")]
    Undefined,
    #[error("call of undefined function")]
    UndefinedFunction,
    #[error("cannot call a {0}")]
    NotCallable(&'static str),
    #[error("wrong number of arguments: expected {expected}, got {got}")]
    Arity { expected: usize, got: usize },
    #[error("assertion failed")]
    AssertionFailed,
    #[error("end of function without returning a value")]
    NoReturnValue,
    #[error("bad constant {0}")]
    BadConstant(ConstId),
    #[error("not yet implemented: opcode {0}")]
    UnknownOpcode(u8),
    /// Raised by native code.
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Capacity(#[from] CapacityError),
}

pub type VmResult<T> = Result<T, VmError>;

/// File name reported when no source marker has been seen.
pub const IMMEDIATE: &str = "<<immediate>>";

/// A VM failure with the best-known source position.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{file} line {line} : {error}")]
pub struct RuntimeError {
    pub error: VmError,
    pub file: String,
    pub line: usize,
}

impl RuntimeError {
    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

// ── State ───────────────────────────────────────────────────────────

/// Where to go back to when a guest function returns.
#[derive(Debug)]
struct CallFrame {
    code: Rc<[u32]>,
    ip: usize,
    this: Option<Gc>,
    base: usize,
    next: usize,
    ldt: Option<ConstId>,
    stack_base: usize,
    stmt_depth: usize,
    file: Option<ConstId>,
    line: u32,
    returns: bool,
}

/// Everything the VM keeps between instructions. Owned by the runtime so
/// the allocations survive from one block to the next.
#[derive(Debug)]
pub struct VmState {
    stack: Stack<Value>,
    vars: Vec<Value>,
    frames: Vec<CallFrame>,
    frame_depth: usize,
    this: Option<Gc>,
    base: usize,
    next: usize,
    ldt: Option<ConstId>,
    stmt_depth: usize,
    file: Option<ConstId>,
    line: u32,
    instcount: u64,
}

impl VmState {
    pub fn new(config: &Config) -> Self {
        VmState {
            stack: Stack::new("operand stack", config.stack_size),
            vars: vec![Value::None; config.var_slots],
            frames: Vec::with_capacity(16),
            frame_depth: config.frame_depth,
            this: None,
            base: 0,
            next: 0,
            ldt: None,
            stmt_depth: 0,
            file: None,
            line: 0,
            instcount: 0,
        }
    }

    pub fn instcount(&self) -> u64 {
        self.instcount
    }

    pub fn reset_instcount(&mut self) {
        self.instcount = 0;
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Release every value the VM is holding and forget all calls.
    pub fn flush(&mut self) {
        self.stack.clear();
        for v in &mut self.vars {
            *v = Value::None;
        }
        self.frames.clear();
        self.this = None;
        self.base = 0;
        self.next = 0;
        self.ldt = None;
        self.stmt_depth = 0;
    }
}

// ── Vm ──────────────────────────────────────────────────────────────

/// The runtime's parts, borrowed for one run. Native functions receive
/// this and use the marshalling methods to read arguments and push results.
pub struct Vm<'a> {
    pub(crate) consts: &'a mut Constants,
    pub(crate) globals: &'a mut GlobalVars,
    pub(crate) session: &'a mut Vars,
    pub(crate) natives: &'a NativeRegistry,
    pub(crate) heap: &'a mut Heap,
    pub(crate) state: &'a mut VmState,
    pub(crate) config: &'a mut Config,
    pub(crate) out: &'a mut dyn Write,
    pub(crate) args: &'a [String],
    pub(crate) epsilon_slot: Option<usize>,
}

impl fmt::Debug for Vm<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Vm").field("depth", &self.state.depth()).finish_non_exhaustive()
    }
}

impl Vm<'_> {
    /// Run a top-level block. Returns the value left on the stack, if any;
    /// on failure the VM state is flushed before the error comes back.
    pub fn interpret(&mut self, code: Rc<[u32]>) -> Result<Option<Value>, RuntimeError> {
        self.state.flush();
        self.state.file = None;
        self.state.line = 0;
        match self.execute(code).and_then(|()| self.leftover()) {
            Ok(leftover) => {
                self.state.flush();
                Ok(leftover)
            }
            Err(error) => {
                let e = self.runtime_error(error);
                tracing::debug!(target: "sable::vm", error = %e, "run failed");
                self.state.flush();
                Err(e)
            }
        }
    }

    fn leftover(&mut self) -> VmResult<Option<Value>> {
        match self.state.stack.pop() {
            Ok(v) => Ok(Some(self.deref(&v)?)),
            Err(_) => Ok(None),
        }
    }

    fn runtime_error(&self, error: VmError) -> RuntimeError {
        let file = self
            .state
            .file
            .and_then(|id| self.consts.str(id))
            .unwrap_or(IMMEDIATE)
            .to_string();
        RuntimeError { error, file, line: self.state.line as usize }
    }

    fn epsilon(&self) -> f32 {
        self.epsilon_slot
            .and_then(|slot| self.globals.get(slot))
            .and_then(|v| v.to_float().ok())
            .unwrap_or(self.config.epsilon)
    }

    fn execute(&mut self, mut code: Rc<[u32]>) -> VmResult<()> {
        let mut ip = 0usize;
        loop {
            let at = ip;
            let Some(&inst) = code.get(at) else {
                return Err(VmError::Type("ran off the end of the code".into()));
            };
            ip += 1;
            self.state.instcount += 1;
            let (op, data) = (bytecode::op(inst), bytecode::data(inst));
            if self.config.trace {
                tracing::trace!(target: "sable::vm", at, op = bytecode::name(op), data, depth = self.state.stack.len());
            }

            match op {
                // ── literals and references ──
                OP_LIT => {
                    let v = self.literal(ConstId(data))?;
                    self.push(v)?;
                }
                OP_IMMED => self.push(Value::Int(data as i32))?,
                OP_LITIDENT => self.push(Value::Int(data as i32))?,
                OP_TRUE => self.push(Value::Bool(true))?,
                OP_FALSE => self.push(Value::Bool(false))?,
                OP_THIS => {
                    let Some(this) = self.state.this.clone() else {
                        return Err(VmError::Type("cannot use 'this' outside a method function/procedure".into()));
                    };
                    self.push(Value::Obj(this))?;
                }
                OP_VARREFLOC | OP_VARREFPRM => {
                    let slot = self.state.base + data as usize;
                    self.push(Value::Ref(Reference::Local(slot)))?;
                }
                OP_VARREFSES => self.push(Value::Ref(Reference::Session(data as usize)))?,
                OP_VARREFGLB => self.push(Value::Ref(Reference::Global(data as usize)))?,
                OP_GET => {
                    let v = self.pop_value()?;
                    self.push(v)?;
                }
                OP_SQB => {
                    let idx = self.pop_value()?;
                    let container = self.pop_value()?;
                    let r = index_ref(&container, &idx)?;
                    self.push(Value::Ref(r))?;
                }
                OP_PROPREF => {
                    let target = self.pop_value()?;
                    let v = self.property(&target, ConstId(data))?;
                    self.push(v)?;
                }
                OP_SET => {
                    let v = self.pop_value()?;
                    if matches!(v, Value::Method { .. }) {
                        return Err(VmError::Type(
                            "cannot store a reference to a native method in user code".into(),
                        ));
                    }
                    match self.pop_raw()? {
                        Value::Ref(r) => self.store(&r, v)?,
                        other => {
                            return Err(VmError::Type(format!("cannot assign to a {}", other.type_name())));
                        }
                    }
                }

                // ── operators ──
                OP_ADD | OP_SUB | OP_MUL | OP_DIV | OP_MOD => {
                    let b = self.pop_value()?;
                    let a = self.pop_value()?;
                    let op = match op {
                        OP_ADD => ArithOp::Add,
                        OP_SUB => ArithOp::Sub,
                        OP_MUL => ArithOp::Mul,
                        OP_DIV => ArithOp::Div,
                        _ => ArithOp::Mod,
                    };
                    self.push(ops::arith(op, &a, &b)?)?;
                }
                OP_EQUALS | OP_NEQUALS | OP_NEAREQ | OP_NNEAREQ | OP_LT | OP_LTE | OP_GT | OP_GTE => {
                    let b = self.pop_value()?;
                    let a = self.pop_value()?;
                    let op = match op {
                        OP_EQUALS => CmpOp::Eq,
                        OP_NEQUALS => CmpOp::Ne,
                        OP_NEAREQ => CmpOp::NearEq,
                        OP_NNEAREQ => CmpOp::NotNearEq,
                        OP_LT => CmpOp::Lt,
                        OP_LTE => CmpOp::Lte,
                        OP_GT => CmpOp::Gt,
                        _ => CmpOp::Gte,
                    };
                    let r = ops::compare(op, &a, &b, self.epsilon())?;
                    self.push(Value::Bool(r))?;
                }
                OP_LOGAND | OP_LOGOR | OP_BITAND | OP_BITOR | OP_XOR => {
                    let b = self.pop_value()?;
                    let a = self.pop_value()?;
                    let r = match op {
                        OP_LOGAND => ops::logical_and(&a, &b)?,
                        OP_LOGOR => ops::logical_or(&a, &b)?,
                        OP_BITAND => ops::bitand(&a, &b)?,
                        OP_BITOR => ops::bitor(&a, &b)?,
                        _ => ops::xor(&a, &b)?,
                    };
                    self.push(r)?;
                }
                OP_NEGATE | OP_NOT | OP_BITNOT => {
                    let a = self.pop_value()?;
                    let r = match op {
                        OP_NEGATE => ops::negate(&a)?,
                        OP_NOT => ops::not(&a)?,
                        _ => ops::bitnot(&a)?,
                    };
                    self.push(r)?;
                }

                // ── statements ──
                OP_STARTESTMT => self.state.stmt_depth = self.state.stack.len(),
                OP_ENDESTMT => {
                    let depth = self.state.stmt_depth;
                    self.state.stack.truncate(depth);
                }
                OP_ENDESTMT2 => {}

                // ── control flow ──
                OP_IF | OP_ELSEIF | OP_QUICKIF | OP_WHILE => {
                    if !self.pop_value()?.to_bool()? {
                        ip = at + data as usize;
                    }
                }
                OP_UNTIL => {
                    if !self.pop_value()?.to_bool()? {
                        ip = at - data as usize;
                    }
                }
                OP_ELSE | OP_JMPELSEIF | OP_GOTOFW | OP_BREAK => ip = at + data as usize,
                OP_ENDWHILE | OP_GOTOBK | OP_CONTINUE => ip = at - data as usize,
                OP_FOR => {
                    if self.for_start()? {
                        ip = at + data as usize;
                    }
                }
                OP_NEXT => {
                    if self.for_next()? {
                        ip = at - data as usize;
                    }
                }
                OP_ENDFOR => {
                    self.pop_raw()?;
                    self.pop_raw()?;
                }

                // ── calls ──
                OP_CALL => {
                    let argc = data as usize;
                    if let Some((func, this)) = self.call(argc)? {
                        if self.state.frames.len() >= self.state.frame_depth {
                            return Err(CapacityError::StackOverflow { what: "call frame stack" }.into());
                        }
                        let st = &mut *self.state;
                        st.frames.push(CallFrame {
                            code: std::mem::replace(&mut code, func.code),
                            ip,
                            this: std::mem::replace(&mut st.this, this),
                            base: st.base,
                            next: st.next,
                            ldt: st.ldt,
                            stack_base: st.stack.len() - argc - 1,
                            stmt_depth: st.stmt_depth,
                            file: st.file,
                            line: st.line,
                            returns: func.returns,
                        });
                        ip = 0;
                    }
                }
                OP_LOCALS => self.enter_locals(ConstId(data))?,
                OP_RETURN | OP_END => {
                    let value = if op == OP_RETURN && data != 0 { Some(self.pop_value()?) } else { None };
                    let Some(frame) = self.state.frames.pop() else {
                        return Ok(());
                    };
                    if op == OP_END && frame.returns {
                        return Err(VmError::NoReturnValue);
                    }
                    let st = &mut *self.state;
                    for v in &mut st.vars[st.base..st.next] {
                        *v = Value::None;
                    }
                    st.stack.truncate(frame.stack_base);
                    st.this = frame.this;
                    st.base = frame.base;
                    st.next = frame.next;
                    st.ldt = frame.ldt;
                    st.stmt_depth = frame.stmt_depth;
                    st.file = frame.file;
                    st.line = frame.line;
                    if let Some(v) = value {
                        self.push(v)?;
                    }
                    code = frame.code;
                    ip = frame.ip;
                }

                // ── markers ──
                OP_SRCFILE => self.state.file = Some(ConstId(data)),
                OP_SRCLINE => self.state.line = data,
                OP_SPECIAL => self.special(data)?,
                OP_DUMMY | OP_REPEAT | OP_ENDIF | OP_PAREN | OP_BLANKLINE | OP_COMMENT_SOL | OP_COMMENT_EOL
                | OP_COMMENT_EOFD | OP_GOTOMARKER | OP_LABEL | OP_SPARE1 => {}
                other => return Err(VmError::UnknownOpcode(other)),
            }
        }
    }

    fn literal(&mut self, id: ConstId) -> VmResult<Value> {
        let desc = self.consts.get(id).ok_or(VmError::Type("no literal".into()))?;
        match desc.ty {
            ConstType::String => self.consts.string(id).map(Value::Str).ok_or(VmError::BadConstant(id)),
            ConstType::Int => self.consts.int(id).map(Value::Int).ok_or(VmError::BadConstant(id)),
            ConstType::Float => self.consts.float(id).map(Value::Float).ok_or(VmError::BadConstant(id)),
            ConstType::Func => Ok(Value::Func(id)),
            ConstType::Comment | ConstType::Ldt => {
                Err(VmError::Type(format!("cannot push a {} constant", desc.ty.name())))
            }
        }
    }

    fn property(&mut self, target: &Value, key: ConstId) -> VmResult<Value> {
        match target {
            Value::Obj(gc) => {
                let kind = match &*gc.body.borrow() {
                    HeapObject::Object(_) => None,
                    other => Some((other.kind_name(), matches!(other, HeapObject::Host(_)))),
                };
                match kind {
                    None => Ok(Value::Ref(Reference::Prop { obj: gc.clone(), key: key.0 })),
                    Some((kind, host)) => {
                        let name = self.consts.str(key).unwrap_or("");
                        match self.natives.method(kind, name) {
                            Some(native) => Ok(Value::Method { this: gc.clone(), native }),
                            // host objects answer the rest by name
                            None if host => Ok(Value::Ref(Reference::Prop { obj: gc.clone(), key: key.0 })),
                            None => Err(VmError::Type(format!("{kind} has no method '{name}'"))),
                        }
                    }
                }
            }
            Value::Str(s) if key == self.consts.props.size => Ok(Value::Int(s.len() as i32)),
            _ => Err(VmError::Type("cannot get non-standard property of non-object".into())),
        }
    }

    // ── for loops ───────────────────────────────────────────────────
    //
    // The loop variable's reference sits under the iterator on the stack
    // for the whole loop.

    /// Start a loop. True if there is nothing to iterate.
    fn for_start(&mut self) -> VmResult<bool> {
        let top = self.state.stack.peek()?.clone();
        let source = self.deref(&top)?;
        let iter = match &source {
            Value::Obj(gc) if matches!(&*gc.body.borrow(), HeapObject::Iter(_)) => gc.clone(),
            _ => {
                // wrap on the stack; the variable holding the source is untouched
                let it = IteratorObject::over(&source, false)?;
                let gc = self.heap.iter(it);
                *self.state.stack.peek_n_mut(0)? = Value::Obj(gc.clone());
                gc
            }
        };
        let current = match &mut *iter.body.borrow_mut() {
            HeapObject::Iter(it) => {
                it.first();
                if it.is_done() { None } else { Some(it.current()?) }
            }
            _ => None,
        };
        match current {
            None => Ok(true),
            Some(v) => {
                self.store_loop_var(v)?;
                Ok(false)
            }
        }
    }

    /// Step a loop. True if the body should run again.
    fn for_next(&mut self) -> VmResult<bool> {
        let top = self.state.stack.peek()?.clone();
        let iter = match self.deref(&top)? {
            Value::Obj(gc) if matches!(&*gc.body.borrow(), HeapObject::Iter(_)) => gc,
            _ => return Err(VmError::Type("can only iterate an iterator object".into())),
        };
        let current = match &mut *iter.body.borrow_mut() {
            HeapObject::Iter(it) => {
                it.next();
                if it.is_done() { None } else { Some(it.current()?) }
            }
            _ => None,
        };
        match current {
            None => Ok(false),
            Some(v) => {
                self.store_loop_var(v)?;
                Ok(true)
            }
        }
    }

    fn store_loop_var(&mut self, v: Value) -> VmResult<()> {
        match self.state.stack.peek_n(1)?.clone() {
            Value::Ref(r) => self.store(&r, v),
            other => Err(VmError::Type(format!("cannot use a {} as a loop variable", other.type_name()))),
        }
    }

    // ── calls ───────────────────────────────────────────────────────

    /// Call whatever sits under the top `argc` values. Natives run here
    /// and now; for a guest function the caller sets up the frame.
    fn call(&mut self, argc: usize) -> VmResult<Option<(FuncDesc, Option<Gc>)>> {
        let pos = self
            .state
            .stack
            .len()
            .checked_sub(argc + 1)
            .ok_or(CapacityError::StackUnderflow { what: "operand stack" })?;
        let raw = self.state.stack.peek_n(argc)?.clone();
        let this = match &raw {
            Value::Ref(Reference::Prop { obj, .. }) => Some(obj.clone()),
            _ => None,
        };
        match self.deref(&raw)? {
            Value::Native(id) => {
                self.call_native(id, this, argc, pos)?;
                Ok(None)
            }
            Value::Method { this, native } => {
                self.call_native(native, Some(this), argc, pos)?;
                Ok(None)
            }
            Value::Func(id) => {
                let func = self.consts.func(id).ok_or(VmError::BadConstant(id))?;
                let header = self.consts.ldt_header(func.ldt).ok_or(VmError::BadConstant(func.ldt))?;
                let expected = header.numparams as usize;
                if expected != argc {
                    return Err(VmError::Arity { expected, got: argc });
                }
                Ok(Some((func, this)))
            }
            Value::None => Err(VmError::UndefinedFunction),
            other => Err(VmError::NotCallable(other.type_name())),
        }
    }

    fn call_native(&mut self, id: NativeId, this: Option<Gc>, argc: usize, pos: usize) -> VmResult<()> {
        let def = self.natives.get(id).ok_or(VmError::UndefinedFunction)?;
        if let Some(expected) = def.argc {
            if expected != argc {
                return Err(VmError::Arity { expected, got: argc });
            }
        }
        let (func, returns) = (def.func.clone(), def.returns);
        let saved = std::mem::replace(&mut self.state.this, this);
        let r = func(self, argc);
        self.state.this = saved;
        r?;
        let result = if returns { Some(self.pop_raw()?) } else { None };
        self.state.stack.truncate(pos);
        if let Some(v) = result {
            self.push(v)?;
        }
        Ok(())
    }

    /// First instruction of a function body: move the arguments into
    /// parameter slots, clear the locals and drop the callee.
    fn enter_locals(&mut self, ldt: ConstId) -> VmResult<()> {
        let header = self.consts.ldt_header(ldt).ok_or(VmError::BadConstant(ldt))?;
        let np = header.numparams as usize;
        let base = self.state.next;
        let next = base + header.slots();
        if next > self.state.vars.len() {
            return Err(CapacityError::StackOverflow { what: "variable stack" }.into());
        }
        for i in (0..np).rev() {
            let v = self.pop_value()?;
            self.state.vars[base + i] = v;
        }
        for v in &mut self.state.vars[base + np..next] {
            *v = Value::None;
        }
        self.pop_raw()?;
        self.state.base = base;
        self.state.next = next;
        self.state.ldt = Some(ldt);
        Ok(())
    }

    fn special(&mut self, which: u32) -> VmResult<()> {
        match which {
            0 => {
                let Some(ldt) = self.state.ldt.and_then(|id| self.consts.ldt(id)) else {
                    return self.write_line("no locals");
                };
                let names: Vec<ConstId> = ldt.params.iter().chain(&ldt.locals).copied().collect();
                for (i, name) in names.into_iter().enumerate() {
                    let name = self.consts.str(name).unwrap_or("?").to_string();
                    let v = self.state.vars[self.state.base + i].repr();
                    self.write_line(&format!("{name}: {v}"))?;
                }
                Ok(())
            }
            _ => {
                tracing::info!(target: "sable::vm", depth = self.state.stack.len(), frames = self.state.frames.len(), line = self.state.line, "breakpoint");
                Ok(())
            }
        }
    }

    // ── references ──────────────────────────────────────────────────

    /// The value a reference points at; anything else is returned as is.
    pub fn deref(&self, v: &Value) -> VmResult<Value> {
        let Value::Ref(r) = v else {
            return Ok(v.clone());
        };
        Ok(match r {
            Reference::Local(i) => self.state.vars.get(*i).cloned().unwrap_or_default(),
            Reference::Session(s) => self.session.get(*s).cloned().unwrap_or_default(),
            Reference::Global(g) => self.globals.get(*g).cloned().unwrap_or_default(),
            Reference::Prop { obj, key } => match &*obj.body.borrow() {
                HeapObject::Host(h) => h.get_prop(prop_name(self.consts(), *key)?)?.unwrap_or_default(),
                _ => object::lookup(obj, *key).unwrap_or_default(),
            },
            Reference::Index { list, index } => match &*list.body.borrow() {
                HeapObject::List(l) => l.get(*index)?,
                _ => Value::None,
            },
            Reference::Key { dict, key } => match &*dict.body.borrow() {
                HeapObject::Dict(d) => d.get(key).cloned().unwrap_or_default(),
                _ => Value::None,
            },
        })
    }

    pub fn store(&mut self, r: &Reference, v: Value) -> VmResult<()> {
        let slot = match r {
            Reference::Local(i) => self.state.vars.get_mut(*i),
            Reference::Session(s) => self.session.get_mut(*s),
            Reference::Global(g) => self.globals.get_mut(*g),
            Reference::Prop { obj, key } => {
                match &mut *obj.body.borrow_mut() {
                    HeapObject::Object(o) => o.set(*key, v),
                    HeapObject::Host(h) => h.set_prop(prop_name(self.consts(), *key)?, v)?,
                    _ => {}
                }
                return Ok(());
            }
            Reference::Index { list, index } => {
                if let HeapObject::List(l) = &mut *list.body.borrow_mut() {
                    l.set(*index, v)?;
                }
                return Ok(());
            }
            Reference::Key { dict, key } => {
                if let HeapObject::Dict(d) = &mut *dict.body.borrow_mut() {
                    d.set(key.clone(), v);
                }
                return Ok(());
            }
        };
        let slot = slot.ok_or(CapacityError::BadOffset)?;
        *slot = v;
        Ok(())
    }

    /// Whether the target of a reference holds a value.
    pub fn is_defined(&self, v: &Value) -> bool {
        match v {
            Value::Ref(Reference::Prop { obj, key }) => match &*obj.body.borrow() {
                HeapObject::Host(h) => prop_name(self.consts(), *key)
                    .and_then(|name| h.get_prop(name))
                    .is_ok_and(|v| v.is_some_and(|v| !v.is_none())),
                _ => object::has(obj, *key),
            },
            Value::Ref(Reference::Index { list, index }) => match &*list.body.borrow() {
                HeapObject::List(l) => l.has(*index),
                _ => false,
            },
            Value::Ref(_) => self.deref(v).is_ok_and(|v| !v.is_none()),
            other => !other.is_none(),
        }
    }

    /// Remove the element a container reference points at.
    pub fn delete(&mut self, v: &Value) -> VmResult<bool> {
        Ok(match v {
            Value::Ref(Reference::Prop { obj, key }) => match &mut *obj.body.borrow_mut() {
                HeapObject::Object(o) => o.remove(*key),
                HeapObject::Host(h) => h.del_prop(prop_name(self.consts(), *key)?),
                _ => false,
            },
            Value::Ref(Reference::Index { list, index }) => match &mut *list.body.borrow_mut() {
                HeapObject::List(l) => l.remove(*index),
                _ => false,
            },
            Value::Ref(Reference::Key { dict, key }) => match &mut *dict.body.borrow_mut() {
                HeapObject::Dict(d) => d.remove(key),
                _ => false,
            },
            Value::Ref(r) => {
                self.store(r, Value::None)?;
                true
            }
            _ => return Err(VmError::Type("can only delete through a reference".into())),
        })
    }

    // ── Marshalling ─────────────────────────────────────────────────

    #[inline(always)]
    pub fn push(&mut self, v: Value) -> VmResult<()> {
        Ok(self.state.stack.push(v)?)
    }

    /// Pop without dereferencing.
    #[inline(always)]
    pub fn pop_raw(&mut self) -> VmResult<Value> {
        Ok(self.state.stack.pop()?)
    }

    #[inline(always)]
    pub fn pop_value(&mut self) -> VmResult<Value> {
        let v = self.pop_raw()?;
        self.deref(&v)
    }

    pub fn pop_int(&mut self) -> VmResult<i32> {
        self.pop_value()?.to_int()
    }

    pub fn pop_float(&mut self) -> VmResult<f32> {
        self.pop_value()?.to_float()
    }

    pub fn pop_str(&mut self) -> VmResult<Rc<str>> {
        let v = self.pop_value()?;
        if v.is_none() {
            return Err(VmError::Undefined);
        }
        Ok(v.to_str())
    }

    /// Only a boolean will do.
    pub fn pop_bool(&mut self) -> VmResult<bool> {
        self.pop_value()?.to_bool()
    }

    pub fn push_int(&mut self, n: i32) -> VmResult<()> {
        self.push(Value::Int(n))
    }

    pub fn push_float(&mut self, x: f32) -> VmResult<()> {
        self.push(Value::Float(x))
    }

    pub fn push_str(&mut self, s: &str) -> VmResult<()> {
        self.push(Value::str(s))
    }

    pub fn push_bool(&mut self, b: bool) -> VmResult<()> {
        self.push(Value::Bool(b))
    }

    /// The object a native method was called on.
    pub fn this_object(&self) -> VmResult<Gc> {
        self.state.this.clone().ok_or_else(|| VmError::Type("not called as a method".into()))
    }

    /// Run `f` on the host object a native method was called on.
    pub fn with_this<T, R>(&self, f: impl FnOnce(&mut T) -> VmResult<R>) -> VmResult<R>
    where
        T: HostObject + 'static,
    {
        with_host(&self.this_object()?, f)
    }

    /// An error raised from native code.
    pub fn error(&self, message: impl Into<String>) -> VmError {
        VmError::Failed(message.into())
    }

    pub fn heap(&mut self) -> &mut Heap {
        &mut *self.heap
    }

    pub fn consts(&self) -> &Constants {
        &*self.consts
    }

    pub fn natives(&self) -> &NativeRegistry {
        self.natives
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut *self.config
    }

    pub fn script_args(&self) -> &[String] {
        self.args
    }

    pub fn instcount(&self) -> u64 {
        self.state.instcount()
    }

    pub fn reset_instcount(&mut self) {
        self.state.reset_instcount();
    }

    pub fn write_line(&mut self, s: &str) -> VmResult<()> {
        writeln!(self.out, "{s}").map_err(|e| VmError::Failed(format!("cannot write output: {e}")))
    }

    pub fn write(&mut self, s: &str) -> VmResult<()> {
        write!(self.out, "{s}")
            .and_then(|_| self.out.flush())
            .map_err(|e| VmError::Failed(format!("cannot write output: {e}")))
    }
}

/// `container[idx]` as a reference.
fn index_ref(container: &Value, idx: &Value) -> VmResult<Reference> {
    if let Value::Obj(gc) = container {
        match &*gc.body.borrow() {
            HeapObject::Object(_) => {
                return Ok(Reference::Prop { obj: gc.clone(), key: idx.hash_key()? as u32 });
            }
            HeapObject::List(_) => return Ok(Reference::Index { list: gc.clone(), index: idx.to_int()? }),
            HeapObject::Dict(_) => {
                return Ok(Reference::Key { dict: gc.clone(), key: DictKey::from_value(idx)? });
            }
            HeapObject::Iter(_) | HeapObject::Host(_) => {}
        }
    }
    Err(VmError::Type(format!("cannot use x[] when x is {}", container.type_name())))
}

/// Host objects see property names, not constant ids.
fn prop_name(consts: &Constants, key: u32) -> VmResult<&str> {
    consts.str(ConstId(key)).ok_or(VmError::BadConstant(ConstId(key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use crate::session::Session;

    fn run_lines(lines: &[&str]) -> (Runtime, Session) {
        let mut rt = Runtime::new().unwrap();
        let mut ses = Session::new();
        for line in lines {
            ses.feed(&mut rt, line).unwrap();
        }
        (rt, ses)
    }

    fn int_var(rt: &Runtime, ses: &Session, name: &str) -> i32 {
        match ses.var(rt, name) {
            Some(Value::Int(n)) => n,
            other => panic!("{name} is {other:?}"),
        }
    }

    #[test]
    fn runs_arithmetic_into_a_session_var() {
        let (rt, ses) = run_lines(&["x = 3 + 4 * 2"]);
        assert_eq!(int_var(&rt, &ses, "x"), 11);
    }

    #[test]
    fn counts_instructions() {
        let (rt, _) = run_lines(&["x = 1"]);
        // STARTESTMT VARREFSES IMMED SET ENDESTMT2 END
        assert_eq!(rt.instcount(), 6);
    }

    #[test]
    fn call_checks_arity() {
        let mut rt = Runtime::new().unwrap();
        let mut ses = Session::new();
        ses.feed(&mut rt, "f = function(a) return a end").unwrap();
        let e = ses.feed(&mut rt, "f(1, 2)").unwrap_err().to_string();
        assert!(e.contains("wrong number of arguments: expected 1, got 2"), "{e}");
    }

    #[test]
    fn failure_flushes_the_stacks() {
        let mut rt = Runtime::new().unwrap();
        let mut ses = Session::new();
        ses.feed(&mut rt, "f = function(a) return a + undefinedthing end").unwrap();
        assert!(ses.feed(&mut rt, "x = 1 + f(2)").is_err());
        assert_eq!(rt.vm_depth(), 0);
        ses.feed(&mut rt, "y = 2").unwrap();
        assert_eq!(int_var(&rt, &ses, "y"), 2);
    }

    #[test]
    fn this_outside_a_method_fails() {
        let mut rt = Runtime::new().unwrap();
        let mut ses = Session::new();
        let e = ses.feed(&mut rt, "x = this").unwrap_err().to_string();
        assert!(e.contains("cannot use 'this' outside a method"), "{e}");
    }

    #[test]
    fn index_refs_by_container_kind() {
        let mut heap = Heap::new();
        let l = Value::Obj(heap.list(vec![]));
        assert!(matches!(index_ref(&l, &Value::Int(2)), Ok(Reference::Index { index: 2, .. })));
        let e = index_ref(&Value::Int(1), &Value::Int(2)).unwrap_err();
        assert_eq!(e.to_string(), "cannot use x[] when x is int");
    }
}
