pub mod ansi;
pub mod json;

use std::ops::Range;

use crate::compiler::ParseError;
use crate::vm::RuntimeError;

/// A user-facing report of one failure, rendered by [`ansi`] or [`json`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// "parse error", "runtime error" or plain "error".
    pub kind: &'static str,
    pub message: String,
    pub file: Option<String>,
    /// 1-based.
    pub line: Option<usize>,
    /// Byte range within `source`, the text of the offending line.
    pub span: Option<Range<usize>>,
    pub notes: Vec<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            kind: "error",
            message: message.into(),
            file: None,
            line: None,
            span: None,
            notes: Vec::new(),
            source: None,
        }
    }

    fn with_kind(mut self, kind: &'static str) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_location(mut self, file: impl Into<String>, line: usize) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    pub fn with_span(mut self, span: Range<usize>) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Attach the line the error happened on, for the caret display.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// 1-based column of the span start.
    pub fn column(&self) -> Option<usize> {
        self.span.as_ref().map(|s| s.start + 1)
    }
}

impl From<&ParseError> for Diagnostic {
    fn from(e: &ParseError) -> Self {
        let mut d = Diagnostic::error(&e.message).with_kind("parse error").with_location(&e.file, e.line);
        if let Some(col) = e.column {
            d = d.with_span(col..col + 1);
        }
        d
    }
}

impl From<&RuntimeError> for Diagnostic {
    fn from(e: &RuntimeError) -> Self {
        Diagnostic::error(e.message()).with_kind("runtime error").with_location(&e.file, e.line)
    }
}

impl From<&crate::Error> for Diagnostic {
    fn from(e: &crate::Error) -> Self {
        match e {
            crate::Error::Parse(p) => p.into(),
            crate::Error::Runtime(r) => r.into(),
            crate::Error::Io { source, .. } => Diagnostic::error(e.to_string()).with_note(source.to_string()),
            other => Diagnostic::error(other.to_string()),
        }
    }
}
