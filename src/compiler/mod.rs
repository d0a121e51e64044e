//! Line-at-a-time compiler.
//!
//! Each fed line is lexed and scanned statement by statement into the
//! current compile context. A line either completes a top-level block,
//! which is handed back ready to run, or leaves a function literal open
//! for the lines that follow. A line that fails to compile leaves no trace:
//! the code generator is restored to its state before the line.

mod expr;

use std::fmt;

use crate::bytecode::*;
use crate::codegen::{CodeGen, CodeGenError, Ctl, LoopJump};
use crate::config::Config;
use crate::consts::{ConstId, Constants};
use crate::lexer::{Token, TokenStream};
use crate::vars::{GlobalVars, Vars};

use expr::ExprEnd;

/// File name reported for lines that were not read from a file.
pub const INTERACTIVE: &str = "<<unknown>>";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{file} line {line} : {message}")]
pub struct ParseError {
    pub message: String,
    pub file: String,
    pub line: usize,
    /// Byte offset into the line, when known.
    pub column: Option<usize>,
}

pub type ParseResult<T> = Result<T, ParseError>;

/// What the compiler needs from the runtime and session while it scans.
pub struct CompileEnv<'a> {
    pub consts: &'a mut Constants,
    pub globals: &'a mut GlobalVars,
    pub session: &'a mut Vars,
    pub config: &'a Config,
}

#[derive(Debug)]
pub struct Compiler {
    cg: CodeGen,
    file: String,
    line: usize,
    loads: Vec<String>,
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Compiler { cg: CodeGen::new(), file: INTERACTIVE.to_string(), line: 1, loads: Vec::new() }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn line(&self) -> usize {
        self.line
    }

    /// Start counting lines of a new source file.
    pub fn set_file(&mut self, file: &str) {
        self.file = file.to_string();
        self.line = 1;
    }

    /// True while a function literal is still open.
    pub fn is_compiling(&self) -> bool {
        self.cg.is_compiling()
    }

    /// Drop any half-compiled function.
    pub fn reset(&mut self) {
        self.cg.clear();
        self.loads.clear();
    }

    /// Files named by `load` statements in the last compiled line.
    pub fn take_loads(&mut self) -> Vec<String> {
        std::mem::take(&mut self.loads)
    }

    /// Compile one line. Returns the finished block when the line leaves
    /// nothing open at top level.
    pub fn compile_line(&mut self, env: &mut CompileEnv<'_>, text: &str) -> ParseResult<Option<Vec<u32>>> {
        tracing::debug!(target: "sable::feed", file = %self.file, line = self.line, text, "compiling line");
        let snap = self.cg.snapshot();
        if let Err(e) = self.scan(env, text) {
            self.cg.restore(snap);
            self.loads.clear();
            return Err(e);
        }
        self.line += 1;
        if self.cg.is_compiling() {
            return Ok(None);
        }
        self.cg.emit(OP_END, 0);
        Ok(Some(self.cg.take_code()))
    }

    fn scan(&mut self, env: &mut CompileEnv<'_>, text: &str) -> ParseResult<()> {
        let ts = TokenStream::new(text).map_err(|e| ParseError {
            message: e.to_string(),
            file: self.file.clone(),
            line: self.line,
            column: Some(e.position),
        })?;
        let mut s = Scanner {
            cg: &mut self.cg,
            env,
            ts,
            file: &self.file,
            line: self.line,
            loads: &mut self.loads,
            started: false,
        };
        s.debug_markers()?;
        s.scan_line()?;
        if !s.cg.is_compiling() && !s.cg.cx().cstack_is_empty() {
            return Err(s.error("unterminated control structure"));
        }
        Ok(())
    }
}

// ── Scanner ─────────────────────────────────────────────────────────

/// Scanning state for one line.
struct Scanner<'c, 'e> {
    cg: &'c mut CodeGen,
    env: &'c mut CompileEnv<'e>,
    ts: TokenStream,
    file: &'c str,
    line: usize,
    loads: &'c mut Vec<String>,
    /// Set once the first statement of the line has been scanned.
    started: bool,
}

impl Scanner<'_, '_> {
    fn error(&self, message: impl fmt::Display) -> ParseError {
        ParseError {
            message: message.to_string(),
            file: self.file.to_string(),
            line: self.line,
            column: Some(self.ts.span().start),
        }
    }

    fn emit(&mut self, op: u8, data: u32) -> usize {
        self.cg.emit(op, data)
    }

    fn string_const(&mut self, s: &str) -> ParseResult<ConstId> {
        self.env.consts.find_or_create_string(s).map_err(|e| self.error(e))
    }

    fn cg_result<T>(&self, r: Result<T, CodeGenError>) -> ParseResult<T> {
        r.map_err(|e| self.error(e))
    }

    fn require_compiling(&self, what: &str) -> ParseResult<()> {
        if self.cg.is_compiling() {
            Ok(())
        } else {
            Err(self.error(format!("must be compiling a function/procedure to use '{what}'")))
        }
    }

    /// The jump recorded on top of the control stack, if it is one of `ops`.
    fn pop_jump(&mut self, ops: &[u8], mismatch: &str) -> ParseResult<usize> {
        match self.cg.cx().cpeek() {
            Some(Ctl::At(at)) if ops.contains(&self.cg.cx().op_at(at)) => {
                self.cg.cx_mut().cpop().map_err(|e| self.error(e))?;
                Ok(at)
            }
            _ => Err(self.error(mismatch)),
        }
    }

    fn skip_colon(&mut self) {
        if self.ts.peek() == Some(&Token::Colon) {
            self.ts.next();
        }
    }

    /// Source position markers, when debug data is on.
    fn debug_markers(&mut self) -> ParseResult<()> {
        if !self.env.config.source_debug {
            return Ok(());
        }
        let file = self.string_const(self.file)?;
        self.emit(OP_SRCFILE, file.0);
        self.emit(OP_SRCLINE, self.line as u32);
        Ok(())
    }

    fn scan_line(&mut self) -> ParseResult<()> {
        if self.ts.is_empty() {
            if !self.env.config.strip_comments {
                self.emit(OP_BLANKLINE, 0);
            }
            return Ok(());
        }
        while !self.ts.at_end() {
            self.statement()?;
            self.started = true;
        }
        Ok(())
    }

    fn statement(&mut self) -> ParseResult<()> {
        let Some(tok) = self.ts.next() else {
            return Ok(());
        };
        match tok {
            Token::Semi => Ok(()),
            Token::Comment(text) => self.comment(&text),
            Token::If => self.if_stmt(),
            Token::ElseIf => self.elseif_stmt(),
            Token::Else => self.else_stmt(),
            Token::EndIf => self.endif_stmt(),
            Token::While => self.while_stmt(),
            Token::EndWhile => self.endwhile_stmt(),
            Token::Repeat => self.repeat_stmt(),
            Token::Until => self.until_stmt(),
            Token::For => self.for_stmt(),
            Token::EndFor => self.endfor_stmt(),
            Token::Break => self.loop_jump(LoopJump::Break),
            Token::Continue => self.loop_jump(LoopJump::Continue),
            Token::Return => self.return_stmt(),
            Token::Goto => self.goto_stmt(),
            Token::End => self.end_stmt(),
            Token::Load => self.load_stmt(),
            Token::Ident(name) if self.ts.peek() == Some(&Token::Colon) => self.label(&name),
            Token::Ident(name) if name == "dumplocs" => {
                self.emit(OP_SPECIAL, 0);
                Ok(())
            }
            Token::Ident(name) if name == "breakpoint" => {
                self.emit(OP_SPECIAL, 1);
                Ok(())
            }
            Token::CParen => Err(self.error("misplaced closing parenthesis")),
            t if expr::starts_value(&t) => {
                self.ts.rewind();
                self.expr_stmt()
            }
            t => Err(self.error(format!("unexpected token '{t}'"))),
        }
    }

    fn comment(&mut self, text: &str) -> ParseResult<()> {
        if self.env.config.strip_comments {
            return Ok(());
        }
        let pos = self.ts.span().start.min(u16::MAX as usize) as u16;
        let id = self.env.consts.create_comment(text, pos).map_err(|e| self.error(e))?;
        let op = if self.started { OP_COMMENT_EOL } else { OP_COMMENT_SOL };
        self.emit(op, id.0);
        Ok(())
    }

    fn expr_stmt(&mut self) -> ParseResult<()> {
        self.emit(OP_STARTESTMT, 0);
        if self.expression()? == ExprEnd::Function {
            // the body follows; `end` closes the statement
            return Ok(());
        }
        // only an immediate statement outside any block keeps its value
        let keep = !self.cg.is_compiling() && self.cg.cx().cstack_is_empty();
        self.emit(if keep { OP_ENDESTMT2 } else { OP_ENDESTMT }, 0);
        Ok(())
    }

    // ── Conditionals ────────────────────────────────────────────────

    fn if_stmt(&mut self) -> ParseResult<()> {
        let r = self.cg.cx_mut().cpush(Ctl::Chain);
        self.cg_result(r)?;
        self.condition()?;
        let r = self.cg.cx_mut().cpush_here();
        self.cg_result(r)?;

        let quick = if self.ts.peek() == Some(&Token::Colon) {
            self.ts.next();
            !matches!(
                self.ts.peek(),
                None | Some(Token::Comment(_) | Token::ElseIf | Token::Else | Token::EndIf)
            )
        } else {
            false
        };
        if !quick {
            self.emit(OP_IF, 0);
            return Ok(());
        }

        let at = self.emit(OP_QUICKIF, 0);
        self.statement()?;
        if matches!(self.ts.peek(), Some(Token::ElseIf | Token::Else | Token::EndIf)) {
            // the chain goes on, so this is a block if written on one line
            self.cg.cx_mut().set_inst(at, OP_IF, 0);
            return Ok(());
        }
        let q = self.pop_jump(&[OP_QUICKIF], "not a simple statement in quick-if")?;
        self.cg.cx_mut().patch(q);
        match self.cg.cx_mut().cpop() {
            Ok(Ctl::Chain) => Ok(()),
            _ => Err(self.error("badly formed conditional statement")),
        }
    }

    fn elseif_stmt(&mut self) -> ParseResult<()> {
        let prev = self.pop_jump(&[OP_IF, OP_ELSEIF], "mismatched elseif")?;
        let r = self.cg.cx_mut().cpush_here();
        self.cg_result(r)?;
        self.emit(OP_JMPELSEIF, 0);
        self.cg.cx_mut().patch(prev);
        self.condition()?;
        self.skip_colon();
        let r = self.cg.cx_mut().cpush_here();
        self.cg_result(r)?;
        self.emit(OP_ELSEIF, 0);
        Ok(())
    }

    fn else_stmt(&mut self) -> ParseResult<()> {
        let prev = self.pop_jump(&[OP_IF, OP_ELSEIF], "mismatched else")?;
        let at = self.emit(OP_ELSE, 0);
        self.cg.cx_mut().patch(prev);
        let r = self.cg.cx_mut().cpush(Ctl::At(at));
        self.cg_result(r)?;
        self.skip_colon();
        Ok(())
    }

    fn endif_stmt(&mut self) -> ParseResult<()> {
        let last = self.pop_jump(&[OP_IF, OP_ELSEIF, OP_ELSE], "mismatched endif")?;
        self.emit(OP_ENDIF, 0);
        self.cg.cx_mut().patch(last);
        loop {
            match self.cg.cx_mut().cpop() {
                Ok(Ctl::Chain) => return Ok(()),
                Ok(Ctl::At(at)) if self.cg.cx().op_at(at) == OP_JMPELSEIF => self.cg.cx_mut().patch(at),
                _ => return Err(self.error("badly formed conditional statement")),
            }
        }
    }

    /// An expression that must produce a value, as in a condition.
    fn condition(&mut self) -> ParseResult<()> {
        match self.expression()? {
            ExprEnd::Value => Ok(()),
            ExprEnd::Function => Err(self.error("function/procedure must follow assignment operator")),
        }
    }

    // ── Loops ───────────────────────────────────────────────────────

    fn while_stmt(&mut self) -> ParseResult<()> {
        let head = self.cg.here();
        let r = self.cg.cx_mut().cpush(Ctl::At(head));
        self.cg_result(r)?;
        self.cg.cx_mut().push_loop(Some(head));
        self.condition()?;
        self.skip_colon();
        let r = self.cg.cx_mut().cpush_here();
        self.cg_result(r)?;
        self.emit(OP_WHILE, 0);
        Ok(())
    }

    fn endwhile_stmt(&mut self) -> ParseResult<()> {
        let w = self.pop_jump(&[OP_WHILE], "mismatched endwhile")?;
        let head = match self.cg.cx_mut().cpop() {
            Ok(Ctl::At(head)) => head,
            _ => return Err(self.error("mismatched endwhile")),
        };
        let here = self.cg.here();
        self.emit(OP_ENDWHILE, (here - head) as u32);
        let cx = self.cg.cx_mut();
        cx.patch(w);
        cx.end_loop();
        Ok(())
    }

    fn repeat_stmt(&mut self) -> ParseResult<()> {
        let r = self.cg.cx_mut().cpush_here();
        self.cg_result(r)?;
        self.cg.cx_mut().push_loop(None);
        self.emit(OP_REPEAT, 0);
        Ok(())
    }

    fn until_stmt(&mut self) -> ParseResult<()> {
        let here = self.cg.here();
        self.cg.cx_mut().set_continue(here);
        self.condition()?;
        let r = self.pop_jump(&[OP_REPEAT], "mismatched `until'")?;
        let here = self.cg.here();
        self.emit(OP_UNTIL, (here - r - 1) as u32);
        self.cg.cx_mut().end_loop();
        Ok(())
    }

    fn for_stmt(&mut self) -> ParseResult<()> {
        let Some(Token::Ident(name)) = self.ts.next() else {
            return Err(self.error("expected an identifier after 'for'"));
        };
        self.var_ref(&name)?;
        if self.ts.next() != Some(Token::In) {
            return Err(self.error("expected 'in' after 'for' variable"));
        }
        self.condition()?;
        self.skip_colon();
        self.cg.cx_mut().push_loop(None);
        let r = self.cg.cx_mut().cpush_here();
        self.cg_result(r)?;
        self.emit(OP_FOR, 0);
        Ok(())
    }

    fn endfor_stmt(&mut self) -> ParseResult<()> {
        let f = self.pop_jump(&[OP_FOR], "mismatched endfor")?;
        let here = self.cg.here();
        self.cg.cx_mut().set_continue(here);
        self.emit(OP_NEXT, (here - f - 1) as u32);
        let cx = self.cg.cx_mut();
        cx.patch(f);
        cx.end_loop();
        self.emit(OP_ENDFOR, 0);
        Ok(())
    }

    fn loop_jump(&mut self, kind: LoopJump) -> ParseResult<()> {
        let op = match kind {
            LoopJump::Break => OP_BREAK,
            LoopJump::Continue => OP_CONTINUE,
        };
        let at = self.emit(op, 0);
        let r = self.cg.cx_mut().loop_jump(kind, at);
        if self.cg_result(r)? {
            Ok(())
        } else if kind == LoopJump::Break {
            Err(self.error("break with no loop"))
        } else {
            Err(self.error("continue with no loop"))
        }
    }

    // ── Functions, labels and the rest ──────────────────────────────

    fn return_stmt(&mut self) -> ParseResult<()> {
        self.require_compiling("return")?;
        let bare = self.ts.peek().is_none_or(Token::ends_expression);
        let returns = self.cg.cx().returns;
        if bare {
            if returns {
                return Err(self.error("functions must return a value"));
            }
            self.emit(OP_RETURN, 0);
        } else {
            if !returns {
                return Err(self.error("procedures cannot return a value"));
            }
            self.condition()?;
            self.emit(OP_RETURN, 1);
        }
        Ok(())
    }

    fn goto_stmt(&mut self) -> ParseResult<()> {
        self.require_compiling("goto")?;
        let Some(Token::Ident(name)) = self.ts.next() else {
            return Err(self.error("expected identifier after goto"));
        };
        let id = self.string_const(&name)?;
        self.emit(OP_GOTOMARKER, id.0);
        let at = self.emit(OP_GOTOFW, 0);
        let r = self.cg.cx_mut().goto(id, at);
        self.cg_result(r)
    }

    fn label(&mut self, name: &str) -> ParseResult<()> {
        self.ts.next(); // the colon
        if !self.cg.is_compiling() {
            return Err(self.error("must be compiling a function/procedure to set a label"));
        }
        if !matches!(self.ts.peek(), None | Some(Token::Comment(_))) {
            return Err(self.error("trailing garbage at end of line"));
        }
        let id = self.string_const(name)?;
        if !self.cg.cx_mut().set_label(id) {
            return Err(self.error(format!("duplicate label: {name}")));
        }
        self.emit(OP_LABEL, id.0);
        Ok(())
    }

    fn end_stmt(&mut self) -> ParseResult<()> {
        if !self.cg.is_compiling() {
            return Err(self.error("must be compiling a function/procedure for `end' to make sense"));
        }
        self.emit(OP_END, 0);
        let r = self.cg.finish_function(self.env.consts);
        let func = self.cg_result(r)?;

        // back in the enclosing context: fill in the literal and finish
        // the assignment that started the function
        let slot = match self.cg.cx_mut().cpop() {
            Ok(Ctl::At(slot)) => slot,
            _ => return Err(self.error("mismatch at `end': missing endif/until/endwhile?")),
        };
        let cx = self.cg.cx_mut();
        cx.set_inst(slot, OP_LIT, func.0);
        cx.emit(OP_SET, 0);
        cx.emit(OP_ENDESTMT, 0);
        cx.clear_frame();
        Ok(())
    }

    fn load_stmt(&mut self) -> ParseResult<()> {
        if self.cg.is_compiling() {
            return Err(self.error("can only run 'load' in interactive mode"));
        }
        let Some(Token::Str(path)) = self.ts.next() else {
            return Err(self.error("expected a string after 'load'"));
        };
        self.loads.push(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        consts: Constants,
        globals: GlobalVars,
        session: Vars,
        config: Config,
        compiler: Compiler,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                consts: Constants::new().unwrap(),
                globals: GlobalVars::new(),
                session: Vars::new(),
                config: Config { strip_comments: true, ..Config::default() },
                compiler: Compiler::new(),
            }
        }

        fn compile(&mut self, line: &str) -> ParseResult<Option<Vec<u32>>> {
            let mut env = CompileEnv {
                consts: &mut self.consts,
                globals: &mut self.globals,
                session: &mut self.session,
                config: &self.config,
            };
            self.compiler.compile_line(&mut env, line)
        }

        fn ops(&mut self, line: &str) -> Vec<u8> {
            self.compile(line).unwrap().unwrap().iter().map(|&i| op(i)).collect()
        }
    }

    #[test]
    fn precedence_orders_operators() {
        let mut f = Fixture::new();
        assert_eq!(
            f.ops("1+2*3"),
            [OP_STARTESTMT, OP_IMMED, OP_IMMED, OP_IMMED, OP_MUL, OP_ADD, OP_ENDESTMT2, OP_END]
        );
        assert_eq!(
            f.ops("(1+2)*3"),
            [OP_STARTESTMT, OP_IMMED, OP_IMMED, OP_ADD, OP_IMMED, OP_MUL, OP_ENDESTMT2, OP_END]
        );
    }

    #[test]
    fn unary_minus_binds_tighter_than_binary() {
        let mut f = Fixture::new();
        assert_eq!(
            f.ops("-2*3"),
            [OP_STARTESTMT, OP_IMMED, OP_NEGATE, OP_IMMED, OP_MUL, OP_ENDESTMT2, OP_END]
        );
    }

    #[test]
    fn top_level_names_become_session_vars() {
        let mut f = Fixture::new();
        f.compile("foo=5").unwrap();
        assert!(f.session.find_by_name(&f.consts, "foo").is_some());
        f.compile("$bar=5").unwrap();
        assert!(f.globals.find_by_name(&f.consts, "$bar").is_some());
        assert!(f.session.find_by_name(&f.consts, "$bar").is_none());
    }

    #[test]
    fn large_ints_go_to_the_pool() {
        let mut f = Fixture::new();
        assert_eq!(f.ops("20000000"), [OP_STARTESTMT, OP_LIT, OP_ENDESTMT2, OP_END]);
        assert!(f.consts.find_int(20_000_000).is_some());
    }

    #[test]
    fn function_spans_lines() {
        let mut f = Fixture::new();
        assert_eq!(f.compile("f = function(a,b)").unwrap(), None);
        assert!(f.compiler.is_compiling());
        assert_eq!(f.compile("return a+b").unwrap(), None);
        let code = f.compile("end").unwrap().unwrap();
        assert!(!f.compiler.is_compiling());
        let lit = code.iter().find(|&&i| op(i) == OP_LIT).copied().unwrap();
        let func = f.consts.func(ConstId(data(lit))).unwrap();
        let body: Vec<u8> = func.code.iter().map(|&i| op(i)).collect();
        assert_eq!(
            body,
            [OP_LOCALS, OP_VARREFPRM, OP_VARREFPRM, OP_ADD, OP_RETURN, OP_END]
        );
    }

    #[test]
    fn failed_line_is_rolled_back() {
        let mut f = Fixture::new();
        f.compile("q = procedure()").unwrap();
        let before = f.compiler.cg.here();
        assert!(f.compile("x = (1 +").is_err());
        assert_eq!(f.compiler.cg.here(), before);
        assert!(f.compiler.is_compiling());
    }

    #[test]
    fn quick_if_patches_over_one_statement() {
        let mut f = Fixture::new();
        let code = f.compile("if 1: x=2").unwrap().unwrap();
        let q = code.iter().position(|&i| op(i) == OP_QUICKIF).unwrap();
        let target = jump_target(q, code[q]).unwrap();
        assert_eq!(op(code[target]), OP_END);
    }

    #[test]
    fn open_block_at_top_level_is_an_error() {
        let mut f = Fixture::new();
        let e = f.compile("while 1").unwrap_err();
        assert_eq!(e.message, "unterminated control structure");
        assert_eq!(f.compile("endif").unwrap_err().message, "mismatched endif");
    }

    #[test]
    fn errors_carry_file_and_line() {
        let mut f = Fixture::new();
        f.compiler.set_file("prog.sb");
        f.compile("x=1").unwrap();
        let e = f.compile("x=)").unwrap_err();
        assert_eq!(e.line, 2);
        assert_eq!(e.to_string(), "prog.sb line 2 : misplaced closing parenthesis");
    }

    #[test]
    fn returns_must_match_declaration() {
        let mut f = Fixture::new();
        f.compile("p = procedure()").unwrap();
        assert_eq!(f.compile("return 1").unwrap_err().message, "procedures cannot return a value");
        f.compile("end").unwrap();
        f.compile("g = function()").unwrap();
        assert_eq!(f.compile("return").unwrap_err().message, "functions must return a value");
        assert_eq!(f.compile("end").unwrap_err().message, "end of function without returning a value");
    }

    #[test]
    fn labels_must_be_resolved_by_end() {
        let mut f = Fixture::new();
        f.compile("p = procedure()").unwrap();
        f.compile("goto nowhere").unwrap();
        assert_eq!(f.compile("end").unwrap_err().message, "undefined label: nowhere");
        f.compile("nowhere:").unwrap();
        assert!(f.compile("end").unwrap().is_some());
    }

    #[test]
    fn load_is_collected_for_the_session() {
        let mut f = Fixture::new();
        f.compile("load \"lib.sb\"").unwrap();
        assert_eq!(f.compiler.take_loads(), ["lib.sb"]);
    }
}
