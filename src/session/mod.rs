//! A stream of source lines with its own variables, compiled and run
//! against a shared [`Runtime`].

use std::rc::Rc;

use crate::arena::CapacityResult;
use crate::bytecode;
use crate::compiler::{CompileEnv, Compiler, ParseError, ParseResult, INTERACTIVE};
use crate::runtime::Runtime;
use crate::value::Value;
use crate::vars::Vars;
use crate::Error;

#[derive(Debug, Default)]
pub struct Session {
    vars: Vars,
    compiler: Compiler,
}

impl Session {
    pub fn new() -> Self {
        Session::default()
    }

    /// Compile one line. A finished top-level block comes back ready to
    /// run; `None` means a function is still open.
    pub fn compile_line(&mut self, rt: &mut Runtime, text: &str) -> ParseResult<Option<Rc<[u32]>>> {
        let mut env = CompileEnv {
            consts: &mut rt.consts,
            globals: &mut rt.globals,
            session: &mut self.vars,
            config: &rt.config,
        };
        Ok(self.compiler.compile_line(&mut env, text)?.map(Rc::from))
    }

    /// Compile and run one line. Any value the block leaves behind is
    /// printed and returned.
    pub fn feed(&mut self, rt: &mut Runtime, line: &str) -> Result<Option<Value>, Error> {
        let code = self.compile_line(rt, line)?;
        for path in self.compiler.take_loads() {
            tracing::debug!(target: "sable::feed", path = %path, "load");
            Session::new().feed_file(rt, &path)?;
        }
        let Some(code) = code else {
            return Ok(None);
        };
        if rt.config.dump {
            let title = format!("{} line {}", self.compiler.file(), self.compiler.line() - 1);
            let listing = bytecode::disassemble(&title, &code, &rt.consts);
            let text = if rt.config.dump_json {
                serde_json::to_string(&listing).unwrap_or_default()
            } else {
                listing.to_string().trim_end().to_string()
            };
            rt.write_line(&text).map_err(|source| Error::Io { path: "<output>".into(), source })?;
        }
        if rt.config.no_run {
            return Ok(None);
        }
        let leftover = rt.run(code, &mut self.vars)?;
        if let Some(v) = &leftover {
            rt.write_line(&v.to_string()).map_err(|source| Error::Io { path: "<output>".into(), source })?;
        }
        Ok(leftover)
    }

    /// Feed every line of a file. The session reports errors against the
    /// file's name and line numbers, then goes back to interactive naming.
    pub fn feed_file(&mut self, rt: &mut Runtime, path: &str) -> Result<(), Error> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io { path: path.to_string(), source })?;
        tracing::debug!(target: "sable::feed", path, lines = text.lines().count(), "feeding file");
        self.compiler.set_file(path);
        let r = self.feed_lines(rt, &text);
        self.compiler.set_file(INTERACTIVE);
        r
    }

    fn feed_lines(&mut self, rt: &mut Runtime, text: &str) -> Result<(), Error> {
        for line in text.lines() {
            self.feed(rt, line)?;
        }
        if self.compiler.is_compiling() {
            let e = ParseError {
                message: "end of file inside a function".to_string(),
                file: self.compiler.file().to_string(),
                line: self.compiler.line(),
                column: None,
            };
            self.compiler.reset();
            return Err(e.into());
        }
        Ok(())
    }

    /// True while a function literal is open and more lines are needed.
    pub fn awaiting_more_input(&self) -> bool {
        self.compiler.is_compiling()
    }

    /// Abandon a half-entered function.
    pub fn reset(&mut self) {
        self.compiler.reset();
    }

    pub fn var(&self, rt: &Runtime, name: &str) -> Option<Value> {
        let slot = self.vars.find_by_name(&rt.consts, name)?;
        self.vars.get(slot).cloned()
    }

    pub fn set_var(&mut self, rt: &mut Runtime, name: &str, v: Value) -> CapacityResult<()> {
        let id = rt.consts.find_or_create_string(name)?;
        let slot = self.vars.find_or_create(id, 0);
        if let Some(var) = self.vars.get_mut(slot) {
            *var = v;
        }
        Ok(())
    }

    pub fn vars(&self) -> &Vars {
        &self.vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn functions_span_lines() {
        let mut rt = Runtime::new().unwrap();
        let mut ses = Session::new();
        assert!(ses.feed(&mut rt, "sq = function(a)").unwrap().is_none());
        assert!(ses.awaiting_more_input());
        ses.feed(&mut rt, "return a * a").unwrap();
        ses.feed(&mut rt, "end").unwrap();
        assert!(!ses.awaiting_more_input());
        ses.feed(&mut rt, "x = sq(7)").unwrap();
        assert!(matches!(ses.var(&rt, "x"), Some(Value::Int(49))));
    }

    #[test]
    fn sessions_keep_their_own_variables() {
        let mut rt = Runtime::new().unwrap();
        let (mut a, mut b) = (Session::new(), Session::new());
        a.feed(&mut rt, "v = 1").unwrap();
        b.feed(&mut rt, "v = 2").unwrap();
        assert!(matches!(a.var(&rt, "v"), Some(Value::Int(1))));
        assert!(matches!(b.var(&rt, "v"), Some(Value::Int(2))));
    }

    #[test]
    fn set_var_is_visible_to_code() {
        let mut rt = Runtime::new().unwrap();
        let mut ses = Session::new();
        ses.set_var(&mut rt, "n", Value::Int(5)).unwrap();
        ses.feed(&mut rt, "m = n + 1").unwrap();
        assert!(matches!(ses.var(&rt, "m"), Some(Value::Int(6))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let mut rt = Runtime::new().unwrap();
        let e = Session::new().feed_file(&mut rt, "/nonexistent/x.sb").unwrap_err();
        assert_eq!(e.to_string(), "cannot open file /nonexistent/x.sb");
    }
}
