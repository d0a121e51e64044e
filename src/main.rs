use std::io::{self, BufRead, IsTerminal, Write};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sable::diagnostic::{ansi::AnsiRenderer, json, Diagnostic};
use sable::{Config, Error, Runtime, Session};

/// Run a sable script, or talk to the interpreter.
#[derive(Debug, Parser)]
#[command(name = "sable", version, about)]
struct Cli {
    /// Script to run. Without one, start the interactive prompt.
    file: Option<String>,
    /// Arguments passed to the script, readable with `args()`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
    /// Go interactive after running the script.
    #[arg(short, long)]
    repl: bool,
    /// Print a listing of every compiled block.
    #[arg(short, long)]
    dump: bool,
    /// Record file and line markers so runtime errors say where they happened.
    #[arg(short = 'g', long = "debug-info")]
    debug_info: bool,
    /// Do not compile comments and blank lines.
    #[arg(long)]
    strip_comments: bool,
    /// Compile only.
    #[arg(long)]
    no_run: bool,
    /// Report errors, and listings with --dump, as JSON.
    #[arg(long)]
    json: bool,
    /// Debug logging on stderr.
    #[arg(short, long)]
    verbose: bool,
    /// Log every executed instruction.
    #[arg(long)]
    trace: bool,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            source_debug: self.debug_info,
            strip_comments: self.strip_comments,
            no_run: self.no_run,
            dump: self.dump,
            dump_json: self.json,
            trace: self.trace,
            ..Config::default()
        }
    }

    fn log_filter(&self) -> EnvFilter {
        EnvFilter::try_from_env("SABLE_LOG").unwrap_or_else(|_| {
            EnvFilter::new(match (self.trace, self.verbose) {
                (true, _) => "sable=trace",
                (false, true) => "sable=debug",
                _ => "sable=warn",
            })
        })
    }
}

struct Reporter {
    json: bool,
    ansi: AnsiRenderer,
}

impl Reporter {
    fn report(&self, e: &Error, source: Option<&str>) {
        let mut d = Diagnostic::from(e);
        if let Some(text) = source {
            d = d.with_source(text);
        }
        if self.json {
            eprintln!("{}", json::render(&d));
        } else {
            eprint!("{}", self.ansi.render(&d));
        }
    }
}

/// The text of the line an error points at, if it came from `text`.
fn failing_line<'a>(e: &Error, path: &str, text: &'a str) -> Option<&'a str> {
    let (file, line) = match e {
        Error::Parse(p) => (&p.file, p.line),
        Error::Runtime(r) => (&r.file, r.line),
        _ => return None,
    };
    if file != path || line == 0 {
        return None;
    }
    text.lines().nth(line - 1)
}

fn run_file(rt: &mut Runtime, ses: &mut Session, path: &str, reporter: &Reporter) -> bool {
    match ses.feed_file(rt, path) {
        Ok(()) => true,
        Err(e) => {
            let text = std::fs::read_to_string(path).unwrap_or_default();
            reporter.report(&e, failing_line(&e, path, &text));
            false
        }
    }
}

fn repl(rt: &mut Runtime, ses: &mut Session, reporter: &Reporter) -> io::Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        let prompt = if ses.awaiting_more_input() { " > " } else { ". " };
        print!("{prompt}");
        io::stdout().flush()?;
        let Some(line) = lines.next().transpose()? else {
            println!();
            return Ok(());
        };
        if let Err(e) = ses.feed(rt, &line) {
            reporter.report(&e, Some(&line));
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_env_filter(cli.log_filter()).with_writer(io::stderr).init();

    let reporter = Reporter { json: cli.json, ansi: AnsiRenderer { use_color: io::stderr().is_terminal() } };
    let mut rt = match Runtime::with_config(cli.config()) {
        Ok(rt) => rt,
        Err(e) => {
            reporter.report(&Error::from(e), None);
            return ExitCode::FAILURE;
        }
    };
    rt.set_args(cli.args.clone());
    let mut ses = Session::new();

    let mut ok = true;
    if let Some(path) = &cli.file {
        ok = run_file(&mut rt, &mut ses, path, &reporter);
        if !cli.repl {
            return if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE };
        }
    }
    if let Err(e) = repl(&mut rt, &mut ses, &reporter) {
        eprintln!("sable: {e}");
        ok = false;
    }
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
