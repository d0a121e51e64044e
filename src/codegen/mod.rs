//! Compile contexts.
//!
//! Each function literal being compiled gets its own [`Context`]: the code
//! buffer plus the bookkeeping the compiler needs while control structures
//! and expressions are still open. Contexts nest, so the outer one is
//! parked on a stack while a function body is compiled.

mod code;
mod label;

use std::collections::BTreeMap;

use crate::arena::{CapacityError, Stack};
use crate::bytecode::{self, OP_END, OP_LOCALS, OP_RETURN};
use crate::consts::{ConstId, Constants};

pub use code::Code;
pub use label::{Label, MAX_PENDING_JUMPS};

/// Nested function literals allowed at once.
pub const MAX_CONTEXTS: usize = 8;
pub const MAX_LOCALS: usize = 256;
const ESTACK_SIZE: usize = 32;
const CSTACK_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CodeGenError {
    #[error("overly complex expression")]
    ExprOverflow,
    #[error("out of context stack in compiler")]
    ContextOverflow,
    #[error("context stack underflow in compiler")]
    ContextUnderflow,
    #[error("too many local variables")]
    TooManyLocals,
    #[error("duplicate label: {0}")]
    DuplicateLabel(String),
    #[error("undefined label: {0}")]
    UndefinedLabel(String),
    #[error("mismatch at `end': missing endif/until/endwhile?")]
    OpenAtEnd,
    #[error("end of function without returning a value")]
    NoReturnValue,
    #[error("function returns a value when not declared as 'returns'")]
    UndeclaredReturn,
    #[error("return in function without returning a value")]
    BareReturn,
    #[error(transparent)]
    Capacity(#[from] CapacityError),
}

pub type CodeGenResult<T> = Result<T, CodeGenError>;

/// An entry on the control stack: the location of an unpatched jump, or
/// the mark that opens an `if` chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ctl {
    At(usize),
    Chain,
}

/// An operator waiting on the expression stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExprItem {
    pub op: u8,
    pub prec: u8,
}

#[derive(Debug, Clone, Default)]
pub struct LoopLabels {
    pub cont: Label,
    pub brk: Label,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopJump {
    Break,
    Continue,
}

// ── Context ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Context {
    /// Identity across a line, for restoring contexts the line closed.
    id: u32,
    code: Code,
    estack: Stack<ExprItem>,
    eframes: Vec<usize>,
    cstack: Stack<Ctl>,
    loops: Vec<LoopLabels>,
    labels: BTreeMap<ConstId, Label>,
    pub params: Vec<ConstId>,
    pub locals: Vec<ConstId>,
    pub returns: bool,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            id: 0,
            code: Code::default(),
            estack: Stack::new("estack", ESTACK_SIZE),
            eframes: Vec::new(),
            cstack: Stack::new("cstack", CSTACK_SIZE),
            loops: Vec::new(),
            labels: BTreeMap::new(),
            params: Vec::new(),
            locals: Vec::new(),
            returns: false,
        }
    }
}

/// The parts of a context a line can change, other than its code.
#[derive(Debug, Clone)]
struct Book {
    estack: Stack<ExprItem>,
    eframes: Vec<usize>,
    cstack: Stack<Ctl>,
    loops: Vec<LoopLabels>,
    labels: BTreeMap<ConstId, Label>,
    params: Vec<ConstId>,
    locals: Vec<ConstId>,
    returns: bool,
}

impl Context {
    pub fn code(&self) -> &[u32] {
        self.code.words()
    }

    fn book(&self) -> Book {
        Book {
            estack: self.estack.clone(),
            eframes: self.eframes.clone(),
            cstack: self.cstack.clone(),
            loops: self.loops.clone(),
            labels: self.labels.clone(),
            params: self.params.clone(),
            locals: self.locals.clone(),
            returns: self.returns,
        }
    }

    fn set_book(&mut self, book: Book) {
        self.estack = book.estack;
        self.eframes = book.eframes;
        self.cstack = book.cstack;
        self.loops = book.loops;
        self.labels = book.labels;
        self.params = book.params;
        self.locals = book.locals;
        self.returns = book.returns;
    }

    pub fn here(&self) -> usize {
        self.code.len()
    }

    pub fn emit(&mut self, op: u8, data: u32) -> usize {
        let at = self.code.len();
        tracing::trace!(target: "sable::emit", at, op = bytecode::name(op), data);
        self.code.push(bytecode::encode(op, data));
        at
    }

    pub fn op_at(&self, at: usize) -> u8 {
        self.code.op_at(at)
    }

    pub fn data_at(&self, at: usize) -> u32 {
        bytecode::data(self.code.get(at))
    }

    pub fn set_inst(&mut self, at: usize, op: u8, data: u32) {
        self.code.set(at, bytecode::encode(op, data));
    }

    /// Point the forward jump at `at` to the current end of the code.
    pub fn patch(&mut self, at: usize) {
        let op = self.op_at(at);
        let dist = self.here() - at;
        self.set_inst(at, op, dist as u32);
    }

    // control stack

    pub fn cpush(&mut self, c: Ctl) -> CodeGenResult<()> {
        Ok(self.cstack.push(c)?)
    }

    pub fn cpush_here(&mut self) -> CodeGenResult<()> {
        let here = self.here();
        self.cpush(Ctl::At(here))
    }

    pub fn cpop(&mut self) -> CodeGenResult<Ctl> {
        Ok(self.cstack.pop()?)
    }

    pub fn cpeek(&self) -> Option<Ctl> {
        self.cstack.peek().ok().copied()
    }

    pub fn cstack_is_empty(&self) -> bool {
        self.cstack.is_empty()
    }

    // expression stack, framed so call arguments parse independently

    pub fn epush(&mut self, item: ExprItem) -> CodeGenResult<()> {
        self.estack.push(item).map_err(|_| CodeGenError::ExprOverflow)
    }

    pub fn epop(&mut self) -> Option<ExprItem> {
        if self.estack.len() > self.frame_base() {
            self.estack.pop().ok()
        } else {
            None
        }
    }

    pub fn epeek(&self) -> Option<ExprItem> {
        if self.estack.len() > self.frame_base() {
            self.estack.peek().ok().copied()
        } else {
            None
        }
    }

    fn frame_base(&self) -> usize {
        self.eframes.last().copied().unwrap_or(0)
    }

    pub fn push_frame(&mut self) {
        self.eframes.push(self.estack.len());
    }

    pub fn pop_frame(&mut self) {
        if let Some(base) = self.eframes.pop() {
            self.estack.truncate(base);
        }
    }

    /// Drop the operators of the current frame.
    pub fn clear_frame(&mut self) {
        let base = self.frame_base();
        self.estack.truncate(base);
    }

    // loops

    pub fn push_loop(&mut self, head: Option<usize>) {
        let mut l = LoopLabels::default();
        if let Some(h) = head {
            l.cont.set(&mut self.code, h);
        }
        self.loops.push(l);
    }

    pub fn in_loop(&self) -> bool {
        !self.loops.is_empty()
    }

    /// Make the innermost loop's continue label land at `pos`.
    pub fn set_continue(&mut self, pos: usize) {
        if let Some(l) = self.loops.last_mut() {
            l.cont.set(&mut self.code, pos);
        }
    }

    /// Route the break or continue emitted at `at` to the innermost loop.
    pub fn loop_jump(&mut self, kind: LoopJump, at: usize) -> CodeGenResult<bool> {
        let Some(l) = self.loops.last_mut() else {
            return Ok(false);
        };
        let label = match kind {
            LoopJump::Break => &mut l.brk,
            LoopJump::Continue => &mut l.cont,
        };
        label.jump_from(&mut self.code, at)?;
        Ok(true)
    }

    /// Close the innermost loop; its breaks land here.
    pub fn end_loop(&mut self) {
        if let Some(mut l) = self.loops.pop() {
            let here = self.code.len();
            l.brk.set(&mut self.code, here);
        }
    }

    // goto labels

    pub fn goto(&mut self, name: ConstId, at: usize) -> CodeGenResult<()> {
        let label = self.labels.entry(name).or_default();
        Ok(label.jump_from(&mut self.code, at)?)
    }

    /// Returns false if the label was already set.
    pub fn set_label(&mut self, name: ConstId) -> bool {
        let here = self.code.len();
        let label = self.labels.entry(name).or_default();
        if label.is_set() {
            return false;
        }
        label.set(&mut self.code, here);
        true
    }

    pub fn unresolved_label(&self) -> Option<ConstId> {
        self.labels.iter().find(|(_, l)| !l.is_set()).map(|(&id, _)| id)
    }

    // variables of a function being compiled

    pub fn find_local(&self, name: ConstId) -> Option<usize> {
        self.locals.iter().position(|&n| n == name)
    }

    pub fn find_param(&self, name: ConstId) -> Option<usize> {
        self.params.iter().position(|&n| n == name)
    }

    pub fn add_local(&mut self, name: ConstId) -> CodeGenResult<usize> {
        if self.locals.len() >= MAX_LOCALS {
            return Err(CodeGenError::TooManyLocals);
        }
        self.locals.push(name);
        Ok(self.locals.len() - 1)
    }

    /// Check the returns of a finished function body against its
    /// declaration.
    fn check_returns(&self) -> CodeGenResult<()> {
        let mut returned = false;
        for &inst in self.code.words() {
            match bytecode::op(inst) {
                OP_RETURN => {
                    let with_value = bytecode::data(inst) != 0;
                    if with_value && !self.returns {
                        return Err(CodeGenError::UndeclaredReturn);
                    }
                    if !with_value && self.returns {
                        return Err(CodeGenError::BareReturn);
                    }
                    returned = true;
                }
                OP_END if self.returns && !returned => return Err(CodeGenError::NoReturnValue),
                _ => {}
            }
        }
        Ok(())
    }
}

// ── CodeGen ─────────────────────────────────────────────────────────

/// Compiler state taken before each fed line: for every open context,
/// outermost first, its identity and bookkeeping. Code is not copied;
/// each buffer is marked and rolled back instead.
#[derive(Debug)]
pub struct Snapshot {
    open: Vec<(u32, Book)>,
}

#[derive(Debug, Clone, Default)]
pub struct CodeGen {
    current: Context,
    outer: Vec<Context>,
    /// Contexts closed since the last snapshot.
    retired: Vec<Context>,
    next_id: u32,
}

impl CodeGen {
    pub fn new() -> Self {
        CodeGen::default()
    }

    /// True while a function literal is open.
    pub fn is_compiling(&self) -> bool {
        !self.outer.is_empty()
    }

    pub fn cx(&self) -> &Context {
        &self.current
    }

    pub fn cx_mut(&mut self) -> &mut Context {
        &mut self.current
    }

    pub fn emit(&mut self, op: u8, data: u32) -> usize {
        self.current.emit(op, data)
    }

    pub fn here(&self) -> usize {
        self.current.here()
    }

    pub fn push_context(&mut self, returns: bool) -> CodeGenResult<()> {
        if self.outer.len() >= MAX_CONTEXTS {
            return Err(CodeGenError::ContextOverflow);
        }
        self.next_id = self.next_id.wrapping_add(1);
        let fresh = Context { id: self.next_id, returns, ..Context::default() };
        self.outer.push(std::mem::replace(&mut self.current, fresh));
        Ok(())
    }

    fn pop_context(&mut self) -> CodeGenResult<Context> {
        let outer = self.outer.pop().ok_or(CodeGenError::ContextUnderflow)?;
        Ok(std::mem::replace(&mut self.current, outer))
    }

    pub fn snapshot(&mut self) -> Snapshot {
        self.retired.clear();
        let mut open = Vec::with_capacity(self.outer.len() + 1);
        for cx in self.outer.iter_mut().chain(std::iter::once(&mut self.current)) {
            cx.code.mark();
            open.push((cx.id, cx.book()));
        }
        Snapshot { open }
    }

    /// Put back every context that was open at `snap`, as it was then.
    /// Contexts opened since are dropped.
    pub fn restore(&mut self, snap: Snapshot) {
        let mut pool: Vec<Context> = self.outer.drain(..).collect();
        pool.push(std::mem::take(&mut self.current));
        pool.append(&mut self.retired);
        let mut open = Vec::with_capacity(snap.open.len());
        for (id, book) in snap.open {
            let Some(i) = pool.iter().position(|cx| cx.id == id) else {
                continue;
            };
            let mut cx = pool.swap_remove(i);
            cx.code.rollback();
            cx.set_book(book);
            open.push(cx);
        }
        self.current = open.pop().unwrap_or_default();
        self.outer = open;
    }

    /// Forget everything, including any open functions.
    pub fn clear(&mut self) {
        self.current = Context::default();
        self.outer.clear();
        self.retired.clear();
    }

    /// Take the code compiled at top level, leaving an empty buffer.
    pub fn take_code(&mut self) -> Vec<u32> {
        self.current.code.take()
    }

    /// Close the function being compiled, after its `END` is emitted.
    ///
    /// The locals table is built and written into the `LOCALS` slot at the
    /// head of the body, the body becomes a function constant, and the
    /// enclosing context is made current again. The caller patches the
    /// literal slot left on the outer control stack.
    pub fn finish_function(&mut self, consts: &mut Constants) -> CodeGenResult<ConstId> {
        let cx = &mut self.current;
        let locals_at = match cx.cpop()? {
            Ctl::At(at) => at,
            Ctl::Chain => return Err(CodeGenError::OpenAtEnd),
        };
        if !cx.cstack_is_empty() || cx.in_loop() {
            return Err(CodeGenError::OpenAtEnd);
        }
        if let Some(id) = cx.unresolved_label() {
            let name = consts.str(id).unwrap_or("?").to_string();
            return Err(CodeGenError::UndefinedLabel(name));
        }
        cx.check_returns()?;
        let ldt = consts.create_ldt(cx.returns, &cx.params, &cx.locals)?;
        cx.set_inst(locals_at, OP_LOCALS, ldt.0);

        let body = self.pop_context()?;
        let func = consts.create_func(body.code.words().to_vec(), ldt, body.returns)?;
        tracing::debug!(target: "sable::compile", %func, params = body.params.len(), locals = body.locals.len(), "function compiled");
        self.retired.push(body);
        Ok(func)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{data, op, OP_DUMMY, OP_GOTOFW, OP_IF, OP_IMMED, OP_LIT};

    #[test]
    fn patch_measures_from_the_jump() {
        let mut cx = Context::default();
        let at = cx.emit(OP_IF, 0);
        cx.emit(OP_IMMED, 1);
        cx.emit(OP_IMMED, 2);
        cx.patch(at);
        assert_eq!(data(cx.code()[at]), 3);
        assert_eq!(op(cx.code()[at]), OP_IF);
    }

    #[test]
    fn frames_hide_outer_operators() {
        let mut cx = Context::default();
        cx.epush(ExprItem { op: OP_LIT, prec: 6 }).unwrap();
        cx.push_frame();
        assert_eq!(cx.epeek(), None);
        cx.epush(ExprItem { op: OP_DUMMY, prec: 5 }).unwrap();
        assert_eq!(cx.epop().map(|e| e.prec), Some(5));
        assert_eq!(cx.epop(), None);
        cx.pop_frame();
        assert_eq!(cx.epeek().map(|e| e.prec), Some(6));
    }

    #[test]
    fn expression_stack_is_bounded() {
        let mut cx = Context::default();
        for _ in 0..ESTACK_SIZE {
            cx.epush(ExprItem { op: OP_DUMMY, prec: 2 }).unwrap();
        }
        assert!(matches!(cx.epush(ExprItem { op: OP_DUMMY, prec: 2 }), Err(CodeGenError::ExprOverflow)));
    }

    #[test]
    fn breaks_resolve_at_loop_end() {
        let mut cx = Context::default();
        cx.push_loop(Some(0));
        let b = cx.emit(crate::bytecode::OP_BREAK, 0);
        cx.emit(OP_DUMMY, 0);
        assert!(cx.loop_jump(LoopJump::Break, b).unwrap());
        cx.end_loop();
        assert_eq!(data(cx.code()[b]), 2);
        assert!(!cx.loop_jump(LoopJump::Break, b).unwrap());
    }

    #[test]
    fn labels_detect_duplicates_and_leftovers() {
        let mut cx = Context::default();
        let g = cx.emit(OP_GOTOFW, 0);
        cx.goto(ConstId(9), g).unwrap();
        assert_eq!(cx.unresolved_label(), Some(ConstId(9)));
        assert!(cx.set_label(ConstId(9)));
        assert!(!cx.set_label(ConstId(9)));
        assert_eq!(cx.unresolved_label(), None);
        assert_eq!(data(cx.code()[g]), 1);
    }

    #[test]
    fn restore_drops_partial_work() {
        let mut cg = CodeGen::new();
        cg.emit(OP_IMMED, 1);
        let snap = cg.snapshot();
        cg.emit(OP_IMMED, 2);
        cg.push_context(false).unwrap();
        assert!(cg.is_compiling());
        cg.restore(snap);
        assert!(!cg.is_compiling());
        assert_eq!(cg.here(), 1);
    }

    #[test]
    fn restore_reopens_a_function_closed_by_the_line() {
        let mut consts = Constants::new().unwrap();
        let mut cg = CodeGen::new();
        cg.push_context(false).unwrap();
        cg.cx_mut().cpush_here().unwrap();
        cg.emit(OP_DUMMY, 0);
        let jump = cg.emit(OP_IF, 0);
        cg.cx_mut().cpush(Ctl::At(jump)).unwrap();
        let snap = cg.snapshot();

        let Ok(Ctl::At(at)) = cg.cx_mut().cpop() else {
            panic!("expected the if jump");
        };
        cg.cx_mut().patch(at);
        cg.emit(OP_END, 0);
        cg.finish_function(&mut consts).unwrap();
        assert!(!cg.is_compiling());

        cg.restore(snap);
        assert!(cg.is_compiling());
        assert_eq!(cg.cx().code(), &[bytecode::encode(OP_DUMMY, 0), bytecode::encode(OP_IF, 0)]);
        assert_eq!(cg.cx().cpeek(), Some(Ctl::At(jump)));
    }

    #[test]
    fn context_depth_is_limited() {
        let mut cg = CodeGen::new();
        for _ in 0..MAX_CONTEXTS {
            cg.push_context(false).unwrap();
        }
        assert!(matches!(cg.push_context(false), Err(CodeGenError::ContextOverflow)));
    }

    #[test]
    fn finishing_a_function_builds_its_constant() {
        let mut consts = Constants::new().unwrap();
        let mut cg = CodeGen::new();
        cg.push_context(true).unwrap();
        cg.cx_mut().cpush_here().unwrap();
        cg.emit(OP_DUMMY, 101);
        cg.emit(OP_IMMED, 3);
        cg.emit(OP_RETURN, 1);
        cg.emit(OP_END, 0);
        let id = cg.finish_function(&mut consts).unwrap();
        assert!(!cg.is_compiling());
        let f = consts.func(id).unwrap();
        assert!(f.returns);
        assert_eq!(op(f.code[0]), OP_LOCALS);
    }

    #[test]
    fn function_without_return_is_rejected() {
        let mut consts = Constants::new().unwrap();
        let mut cg = CodeGen::new();
        cg.push_context(true).unwrap();
        cg.cx_mut().cpush_here().unwrap();
        cg.emit(OP_DUMMY, 101);
        cg.emit(OP_END, 0);
        assert!(matches!(cg.finish_function(&mut consts), Err(CodeGenError::NoReturnValue)));
    }
}
