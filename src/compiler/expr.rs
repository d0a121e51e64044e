//! Expressions, by shunting yard.
//!
//! Operands are emitted as soon as they are read; operators wait on the
//! context's expression stack until something of looser binding arrives.
//! Lower precedence numbers bind tighter.

use super::{ParseResult, Scanner};
use crate::bytecode::*;
use crate::codegen::ExprItem;
use crate::lexer::Token;

const PREC_BRACKET: u8 = 2;
const PREC_UNARY: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ExprEnd {
    Value,
    /// A function literal opened; its body follows.
    Function,
}

/// Tokens that can begin an operand.
pub(super) fn starts_value(t: &Token) -> bool {
    matches!(
        t,
        Token::Int(_)
            | Token::Float(_)
            | Token::Str(_)
            | Token::Ident(_)
            | Token::True
            | Token::False
            | Token::This
            | Token::Backtick
            | Token::OParen
            | Token::Sub
            | Token::Pling
            | Token::BitNot
            | Token::Function
            | Token::Procedure
    )
}

fn binary(t: &Token) -> Option<ExprItem> {
    let (op, prec) = match t {
        Token::Mul => (OP_MUL, 5),
        Token::Div => (OP_DIV, 5),
        Token::Perc => (OP_MOD, 5),
        Token::Add => (OP_ADD, 6),
        Token::Sub => (OP_SUB, 6),
        Token::Lt => (OP_LT, 8),
        Token::Gt => (OP_GT, 8),
        Token::Lte => (OP_LTE, 8),
        Token::Gte => (OP_GTE, 8),
        Token::EqEq => (OP_EQUALS, 9),
        Token::NotEq => (OP_NEQUALS, 9),
        Token::NearEq => (OP_NEAREQ, 9),
        Token::NotNearEq => (OP_NNEAREQ, 9),
        Token::BitAnd => (OP_BITAND, 10),
        Token::Xor => (OP_XOR, 11),
        Token::BitOr => (OP_BITOR, 12),
        Token::AndAnd => (OP_LOGAND, 13),
        Token::OrOr => (OP_LOGOR, 14),
        Token::Assign => (OP_SET, 16),
        _ => return None,
    };
    Some(ExprItem { op, prec })
}

fn is_bracket(item: &ExprItem) -> bool {
    item.op == OP_PAREN || item.op == OP_SQB
}

impl Scanner<'_, '_> {
    pub(super) fn expression(&mut self) -> ParseResult<ExprEnd> {
        let mut expecting = true;
        while let Some(tok) = self.ts.next() {
            if tok.ends_expression() || tok == Token::Comma {
                self.ts.rewind();
                break;
            }
            if expecting {
                match tok {
                    Token::OParen => self.epush(OP_PAREN, PREC_BRACKET)?,
                    Token::Sub => self.epush(OP_NEGATE, PREC_UNARY)?,
                    Token::Pling => self.epush(OP_NOT, PREC_UNARY)?,
                    Token::BitNot => self.epush(OP_BITNOT, PREC_UNARY)?,
                    Token::Function => return self.function_literal(true),
                    Token::Procedure => return self.function_literal(false),
                    t => {
                        self.operand(t)?;
                        expecting = false;
                    }
                }
                continue;
            }
            match tok {
                Token::Dot => self.property()?,
                Token::OSqb => {
                    self.epush(OP_SQB, PREC_BRACKET)?;
                    expecting = true;
                }
                Token::OParen => self.call()?,
                Token::CParen => {
                    if !self.close_paren()? {
                        // closes a call's argument list
                        self.ts.rewind();
                        break;
                    }
                }
                Token::CSqb => self.close_sqb()?,
                Token::Pling | Token::BitNot => return Err(self.error(format!("invalid operator '{tok}'"))),
                t => match binary(&t) {
                    Some(item) => {
                        self.binop(item)?;
                        expecting = true;
                    }
                    None => return Err(self.error(format!("unexpected token '{t}'"))),
                },
            }
        }
        if expecting {
            return Err(self.error("expected a value"));
        }
        while let Some(item) = self.cg.cx_mut().epop() {
            if is_bracket(&item) {
                return Err(self.error("misplaced separator or mismatched parentheses"));
            }
            self.emit(item.op, 0);
        }
        Ok(ExprEnd::Value)
    }

    fn epush(&mut self, op: u8, prec: u8) -> ParseResult<()> {
        let r = self.cg.cx_mut().epush(ExprItem { op, prec });
        self.cg_result(r)
    }

    fn operand(&mut self, tok: Token) -> ParseResult<()> {
        match tok {
            Token::Int(n) if n >= 0 && n as u32 <= MAX_DATA => {
                self.emit(OP_IMMED, n as u32);
            }
            Token::Int(n) => {
                let id = self.env.consts.find_or_create_int(n).map_err(|e| self.error(e))?;
                self.emit(OP_LIT, id.0);
            }
            Token::Float(x) => {
                let id = self.env.consts.find_or_create_float(x).map_err(|e| self.error(e))?;
                self.emit(OP_LIT, id.0);
            }
            Token::Str(s) => {
                let id = self.string_const(&s)?;
                self.emit(OP_LIT, id.0);
            }
            Token::True => {
                self.emit(OP_TRUE, 0);
            }
            Token::False => {
                self.emit(OP_FALSE, 0);
            }
            Token::This => {
                self.emit(OP_THIS, 0);
            }
            Token::Ident(name) => self.var_ref(&name)?,
            Token::Backtick => {
                let Some(Token::Ident(name)) = self.ts.next() else {
                    return Err(self.error("expecting an identifier after `"));
                };
                let id = self.string_const(&name)?;
                self.emit(OP_LITIDENT, id.0);
            }
            Token::CParen => return Err(self.error("misplaced closing parenthesis")),
            t if binary(&t).is_some() => {
                return Err(self.error("invalid binary operator after operator or ("));
            }
            t => return Err(self.error(format!("unexpected token '{t}'"))),
        }
        Ok(())
    }

    fn binop(&mut self, item: ExprItem) -> ParseResult<()> {
        while let Some(top) = self.cg.cx().epeek() {
            if is_bracket(&top) || item.prec < top.prec {
                break;
            }
            self.cg.cx_mut().epop();
            self.emit(top.op, 0);
        }
        self.epush(item.op, item.prec)
    }

    /// Unwind to the matching `(`. False if the current frame has none.
    fn close_paren(&mut self) -> ParseResult<bool> {
        loop {
            match self.cg.cx_mut().epop() {
                None => return Ok(false),
                Some(ExprItem { op: OP_PAREN, .. }) => return Ok(true),
                Some(ExprItem { op: OP_SQB, .. }) => return Err(self.error("mismatched ')'")),
                Some(item) => {
                    self.emit(item.op, 0);
                }
            }
        }
    }

    fn close_sqb(&mut self) -> ParseResult<()> {
        loop {
            match self.cg.cx_mut().epop() {
                Some(ExprItem { op: OP_SQB, .. }) => {
                    self.emit(OP_SQB, 0);
                    return Ok(());
                }
                None | Some(ExprItem { op: OP_PAREN, .. }) => return Err(self.error("mismatched ']'")),
                Some(item) => {
                    self.emit(item.op, 0);
                }
            }
        }
    }

    fn property(&mut self) -> ParseResult<()> {
        let Some(Token::Ident(name)) = self.ts.next() else {
            return Err(self.error("expected a property name after '.'"));
        };
        let id = self.string_const(&name)?;
        self.emit(OP_PROPREF, id.0);
        Ok(())
    }

    /// The callee is already on the stack; each argument is scanned in a
    /// frame of its own so the operators around the call stay put.
    fn call(&mut self) -> ParseResult<()> {
        let mut argc = 0;
        if self.ts.peek() == Some(&Token::CParen) {
            self.ts.next();
        } else {
            loop {
                self.cg.cx_mut().push_frame();
                let end = self.expression()?;
                self.cg.cx_mut().pop_frame();
                if end == ExprEnd::Function {
                    return Err(self.error("function/procedure must follow assignment operator"));
                }
                argc += 1;
                match self.ts.next() {
                    Some(Token::Comma) => continue,
                    Some(Token::CParen) => break,
                    _ => return Err(self.error("expected ) or , in argument list")),
                }
            }
        }
        self.emit(OP_CALL, argc);
        Ok(())
    }

    /// Emit a reference to the variable `name`, creating it if needed.
    pub(super) fn var_ref(&mut self, name: &str) -> ParseResult<()> {
        let id = self.string_const(name)?;
        let global = name.starts_with('$');
        if self.cg.is_compiling() {
            let cx = self.cg.cx();
            let np = cx.params.len();
            let (op, slot) = if let Some(i) = cx.find_local(id) {
                (OP_VARREFLOC, np + i)
            } else if let Some(i) = cx.find_param(id) {
                (OP_VARREFPRM, i)
            } else if let Some(s) = self.env.session.find(id) {
                (OP_VARREFSES, s)
            } else if let Some(g) = self.env.globals.find(id) {
                (OP_VARREFGLB, g)
            } else if global {
                (OP_VARREFGLB, self.env.globals.find_or_create(id))
            } else {
                let r = self.cg.cx_mut().add_local(id);
                (OP_VARREFLOC, np + self.cg_result(r)?)
            };
            self.emit(op, slot as u32);
            return Ok(());
        }
        let (op, slot) = if let Some(s) = self.env.session.find(id) {
            (OP_VARREFSES, s)
        } else if let Some(g) = self.env.globals.find(id) {
            (OP_VARREFGLB, g)
        } else if global {
            (OP_VARREFGLB, self.env.globals.find_or_create(id))
        } else {
            (OP_VARREFSES, self.env.session.find_or_create(id, 0))
        };
        self.emit(op, slot as u32);
        Ok(())
    }

    /// `function(a, b)` or `procedure(a)` after an assignment. Leaves a
    /// slot for the literal in the enclosing context and opens a new one.
    fn function_literal(&mut self, returns: bool) -> ParseResult<ExprEnd> {
        if self.cg.cx().epeek().map(|e| e.op) != Some(OP_SET) {
            return Err(self.error("function/procedure must follow assignment operator"));
        }
        let r = self.cg.cx_mut().cpush_here();
        self.cg_result(r)?;
        self.emit(OP_DUMMY, 100);
        let r = self.cg.push_context(returns);
        self.cg_result(r)?;
        // becomes LOCALS once the body's variables are known
        let r = self.cg.cx_mut().cpush_here();
        self.cg_result(r)?;
        self.emit(OP_DUMMY, 101);

        if self.ts.next() != Some(Token::OParen) {
            return Err(self.error("expecting ("));
        }
        if self.ts.peek() == Some(&Token::CParen) {
            self.ts.next();
        } else {
            loop {
                let Some(Token::Ident(name)) = self.ts.next() else {
                    return Err(self.error("expected a parameter name"));
                };
                let id = self.string_const(&name)?;
                self.cg.cx_mut().params.push(id);
                match self.ts.next() {
                    Some(Token::Comma) => continue,
                    Some(Token::CParen) => break,
                    _ => return Err(self.error("expected , or )")),
                }
            }
        }
        if let Some(Token::Comment(text)) = self.ts.peek().cloned() {
            self.ts.next();
            if !self.env.config.strip_comments {
                let id = self.env.consts.create_comment(&text, 0).map_err(|e| self.error(e))?;
                self.emit(OP_COMMENT_EOFD, id.0);
            }
        }
        self.debug_markers()?;
        Ok(ExprEnd::Function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operand_starters() {
        assert!(starts_value(&Token::Sub));
        assert!(starts_value(&Token::Ident("x".into())));
        assert!(!starts_value(&Token::Mul));
        assert!(!starts_value(&Token::CParen));
    }

    #[test]
    fn assignment_binds_loosest() {
        let set = binary(&Token::Assign).unwrap();
        for t in [Token::Mul, Token::Add, Token::EqEq, Token::OrOr] {
            assert!(binary(&t).unwrap().prec < set.prec);
        }
        assert_eq!(binary(&Token::Pling), None);
    }
}
