use super::Diagnostic;

pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn paint(&self, code: &str, s: &str) -> String {
        if self.use_color { format!("\x1b[{code}m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold(&self, s: &str) -> String {
        self.paint("1", s)
    }

    fn bold_red(&self, s: &str) -> String {
        self.paint("1;31", s)
    }

    fn cyan(&self, s: &str) -> String {
        self.paint("36", s)
    }

    fn dim(&self, s: &str) -> String {
        self.paint("2", s)
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = format!("{}: {}\n", self.bold_red(d.kind), self.bold(&d.message));

        if let (Some(file), Some(line)) = (&d.file, d.line) {
            match d.column() {
                Some(col) => out.push_str(&format!("  {} {file}:{line}:{col}\n", self.cyan("-->"))),
                None => out.push_str(&format!("  {} {file}:{line}\n", self.cyan("-->"))),
            }
        }

        if let Some(source) = &d.source {
            let number = d.line.map(|l| l.to_string()).unwrap_or_default();
            let pad = " ".repeat(number.len());
            let pipe = self.cyan("|");
            out.push_str(&format!("{pad} {pipe}\n"));
            out.push_str(&format!("{} {pipe} {source}\n", self.cyan(&number)));
            if let Some(span) = &d.span {
                let indent = " ".repeat(span.start.min(source.len()));
                let carets = "^".repeat(span.len().max(1));
                out.push_str(&format!("{pad} {pipe} {indent}{}\n", self.bold_red(&carets)));
            }
        }

        for note in &d.notes {
            out.push_str(&format!("  {} note: {note}\n", self.dim("=")));
        }
        out
    }
}
