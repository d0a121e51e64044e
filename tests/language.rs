use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use sable::{Config, Error, Runtime, Session, Value};

#[derive(Clone, Default)]
struct Output(Rc<RefCell<Vec<u8>>>);

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Fixture {
    rt: Runtime,
    ses: Session,
    out: Output,
}

impl Fixture {
    fn new() -> Self {
        Fixture::with_config(Config { strip_comments: true, ..Config::default() })
    }

    fn with_config(config: Config) -> Self {
        let mut rt = Runtime::with_config(config).unwrap();
        let out = Output::default();
        rt.set_output(Box::new(out.clone()));
        Fixture { rt, ses: Session::new(), out }
    }

    fn feed(&mut self, line: &str) -> Result<Option<Value>, Error> {
        self.ses.feed(&mut self.rt, line)
    }

    fn run(&mut self, lines: &[&str]) {
        for line in lines {
            if let Err(e) = self.feed(line) {
                panic!("{line:?} failed: {e}");
            }
        }
    }

    fn var(&self, name: &str) -> Value {
        self.ses.var(&self.rt, name).unwrap_or_default()
    }

    fn int(&self, name: &str) -> i32 {
        match self.var(name) {
            Value::Int(n) => n,
            other => panic!("{name} is {other:?}"),
        }
    }

    fn bool(&self, name: &str) -> bool {
        match self.var(name) {
            Value::Bool(b) => b,
            other => panic!("{name} is {other:?}"),
        }
    }

    fn text(&self, name: &str) -> String {
        match self.var(name) {
            Value::Str(s) => s.to_string(),
            other => panic!("{name} is {other:?}"),
        }
    }

    fn output(&self) -> String {
        String::from_utf8_lossy(&self.out.0.borrow()).into_owned()
    }

    fn parse_error(&mut self, line: &str) -> String {
        match self.feed(line) {
            Err(Error::Parse(e)) => e.message,
            other => panic!("{line:?} should not compile, got {other:?}"),
        }
    }

    fn runtime_error(&mut self, line: &str) -> String {
        match self.feed(line) {
            Err(Error::Runtime(e)) => e.message(),
            other => panic!("{line:?} should fail at runtime, got {other:?}"),
        }
    }
}

// ── Arithmetic and strings ──────────────────────────────────────────

#[test]
fn most_specific_operand_wins() {
    let mut f = Fixture::new();
    f.run(&["a = 7 / 2", "b = 7 / 2.0", "c = 3 * 1.5", "d = 1-1.1==-0.1", "e = 1-1.1~-0.1", "m = 17 % 5"]);
    assert_eq!(f.int("a"), 3);
    assert!(matches!(f.var("b"), Value::Float(x) if x == 3.5));
    assert!(matches!(f.var("c"), Value::Float(x) if x == 4.5));
    assert!(!f.bool("d"));
    assert!(f.bool("e"));
    assert_eq!(f.int("m"), 2);
}

#[test]
fn near_equality_follows_the_epsilon_global() {
    let mut f = Fixture::new();
    f.run(&["a = 1.0 ~ 1.01", "arithEpsilon = 0.1", "b = 1.0 ~ 1.01"]);
    assert!(!f.bool("a"));
    assert!(f.bool("b"));
}

#[test]
fn integer_division_by_zero_fails() {
    let mut f = Fixture::new();
    assert_eq!(f.runtime_error("x = 1 / 0"), "division by zero");
}

#[test]
fn string_repeat_and_concat() {
    let mut f = Fixture::new();
    f.run(&["s = \"ab\" * 3", "t = \"ab\" + \"cd\"", "n = \"hello\".size", "z = \"x\" * 0"]);
    assert_eq!(f.text("s"), "ababab");
    assert_eq!(f.text("t"), "abcd");
    assert_eq!(f.int("n"), 5);
    assert_eq!(f.text("z"), "");
}

#[test]
fn string_size_counts_bytes() {
    let mut f = Fixture::new();
    f.run(&["a = \"h\u{e9}llo\".size", "b = size(\"\u{1f600}\")"]);
    assert_eq!(f.int("a"), 6);
    assert_eq!(f.int("b"), 4);
}

#[test]
fn logical_not_of_a_number_is_an_int() {
    let mut f = Fixture::new();
    f.run(&["a = !0", "b = !7", "c = !0.25", "d = !true"]);
    assert_eq!(f.int("a"), 1);
    assert_eq!(f.int("b"), 0);
    assert_eq!(f.int("c"), 1);
    assert!(!f.bool("d"));
}

#[test]
fn conversions_use_leading_prefixes() {
    let mut f = Fixture::new();
    f.run(&["a = int(\"42abc\")", "b = float(\"2.5x\")", "c = str(12)", "d = int(3.9)"]);
    assert_eq!(f.int("a"), 42);
    assert!(matches!(f.var("b"), Value::Float(x) if x == 2.5));
    assert_eq!(f.text("c"), "12");
    assert_eq!(f.int("d"), 3);
}

// ── References ──────────────────────────────────────────────────────

#[test]
fn index_store_then_load_for_every_container() {
    let mut f = Fixture::new();
    f.run(&[
        "o = create()",
        "o[\"y\"] = 3",
        "assert(o[\"y\"] == 3)",
        "l = list(1, 2)",
        "l[1] = 7",
        "assert(l[1] == 7)",
        "d = dict()",
        "d[\"k\"] = 9",
        "assert(d[\"k\"] == 9)",
    ]);
}

#[test]
fn backtick_identifiers_name_properties() {
    let mut f = Fixture::new();
    f.run(&["o = create()", "o.foo = 11", "v = o[`foo]"]);
    assert_eq!(f.int("v"), 11);
}

#[test]
fn defined_and_del_share_the_reference() {
    let mut f = Fixture::new();
    f.run(&[
        "d = dict()",
        "d[\"a\"] = 1",
        "before = defined(d[\"a\"])",
        "gone = del(d[\"a\"])",
        "after = defined(d[\"a\"])",
        "again = del(d[\"a\"])",
    ]);
    assert!(f.bool("before"));
    assert!(f.bool("gone"));
    assert!(!f.bool("after"));
    assert!(!f.bool("again"));
}

#[test]
fn reading_an_unset_list_slot_fails() {
    let mut f = Fixture::new();
    f.run(&["l = list()", "l[2] = 1"]);
    assert_eq!(f.runtime_error("x = l[0]"), "unset value in list");
}

#[test]
fn immediate_value_of_an_unset_slot_fails() {
    let mut f = Fixture::new();
    f.run(&["l = list()", "l[2] = 1"]);
    assert_eq!(f.runtime_error("l[0]"), "unset value in list");
    assert!(matches!(f.feed("l[2]"), Ok(Some(Value::Int(1)))));
}

#[test]
fn indexing_a_number_fails() {
    let mut f = Fixture::new();
    f.run(&["n = 3"]);
    assert_eq!(f.runtime_error("x = n[0]"), "cannot use x[] when x is int");
}

// ── Garbage collection ──────────────────────────────────────────────

#[test]
fn gc_without_cycles_reclaims_nothing() {
    let mut f = Fixture::new();
    f.run(&["a = create()", "a.l = list(1, 2)", "b = dict()"]);
    let live = f.rt.live_objects();
    assert_eq!(live, 3);
    assert_eq!(f.rt.gc(), 0);
    assert_eq!(f.rt.live_objects(), live);
    f.run(&["assert(size(a.l) == 2)"]);
}

#[test]
fn cycles_survive_refcounting_until_gc() {
    let mut f = Fixture::new();
    f.run(&["a = create()", "b = create()", "a.other = b", "b.other = a", "a = 0", "b = 0"]);
    assert_eq!(f.rt.live_objects(), 2);
    assert_eq!(f.rt.gc(), 2);
    assert_eq!(f.rt.live_objects(), 0);
}

#[test]
fn gc_is_callable_from_scripts() {
    let mut f = Fixture::new();
    f.run(&["l = list()", "l.append(l)", "l = 0", "n = gc()", "c = gccount()"]);
    assert_eq!(f.int("n"), 1);
    assert_eq!(f.int("c"), 0);
}

// ── Control flow ────────────────────────────────────────────────────

#[test]
fn if_chain_takes_exactly_one_branch() {
    let mut f = Fixture::new();
    f.run(&["t1 = 0; if false: elseif false: elseif true: t1=12 else t1=99 endif"]);
    assert_eq!(f.int("t1"), 12);
}

#[test]
fn quick_if_guards_one_statement() {
    let mut f = Fixture::new();
    f.run(&["a = 1", "if a == 1: a = 2", "if a == 1: a = 3"]);
    assert_eq!(f.int("a"), 2);
}

#[test]
fn mismatched_closers_do_not_compile() {
    let mut f = Fixture::new();
    assert_eq!(f.parse_error("endif"), "mismatched endif");
    assert!(f.feed("while 1").is_err());
    assert!(f.feed("endwhile").is_err());
    assert!(f.feed("until 1").is_err());
    assert!(f.feed("break").is_err());
    assert!(f.feed("continue").is_err());
}

#[test]
fn for_over_a_range_accumulates() {
    let mut f = Fixture::new();
    f.run(&["ct = 0", "for x in range(0,10): ct=ct+x endfor"]);
    assert_eq!(f.int("ct"), 45);
}

#[test]
fn for_iterates_lists_dicts_and_keys() {
    let mut f = Fixture::new();
    f.run(&[
        "l = list(1, 2, 3)",
        "s = 0; for v in l: s = s + v endfor",
        "d = dict(); d[\"a\"] = 10; d[\"b\"] = 20",
        "t = 0; for v in d: t = t + v endfor",
        "k = \"\"; for v in keys(d): k = k + v endfor",
    ]);
    assert_eq!(f.int("s"), 6);
    assert_eq!(f.int("t"), 30);
    assert_eq!(f.text("k"), "ab");
}

#[test]
fn for_leaves_the_source_variable_alone() {
    let mut f = Fixture::new();
    f.run(&["l = list(4)", "for v in l: endfor", "n = size(l)"]);
    assert_eq!(f.int("n"), 1);
}

#[test]
fn break_and_continue_hit_the_innermost_loop() {
    let mut f = Fixture::new();
    f.run(&[
        "w = function()",
        "  t = 0",
        "  i = 0",
        "  while i < 10",
        "    i = i + 1",
        "    if i == 3: continue",
        "    if i == 6: break",
        "    t = t + i",
        "  endwhile",
        "  return t",
        "end",
        "nested = function()",
        "  n = 0",
        "  for a in range(0, 3)",
        "    for b in range(0, 10)",
        "      if b == 2: break",
        "      n = n + 1",
        "    endfor",
        "  endfor",
        "  return n",
        "end",
        "r1 = w()",
        "r2 = nested()",
    ]);
    assert_eq!(f.int("r1"), 12);
    assert_eq!(f.int("r2"), 6);
}

#[test]
fn repeat_runs_until_the_condition_holds() {
    let mut f = Fixture::new();
    f.run(&["r = function(n)", "  c = 0", "  repeat", "    c = c + 1", "  until c >= n", "  return c", "end"]);
    f.run(&["a = r(4)", "b = r(0)"]);
    assert_eq!(f.int("a"), 4);
    assert_eq!(f.int("b"), 1);
}

#[test]
fn goto_resolves_forward_and_backward() {
    let mut f = Fixture::new();
    f.run(&[
        "g = function()",
        "  x = 0",
        "  goto skip",
        "  x = 100",
        "skip:",
        "  x = x + 1",
        "  if x < 5: goto skip",
        "  return x",
        "end",
        "r = g()",
    ]);
    assert_eq!(f.int("r"), 5);
}

#[test]
fn unresolved_label_fails_at_end() {
    let mut f = Fixture::new();
    f.run(&["g = function()", "goto nowhere", "return 1"]);
    assert_eq!(f.parse_error("end"), "undefined label: nowhere");
    // the failed `end` leaves the function open
    assert!(f.ses.awaiting_more_input());
}

#[test]
fn labels_belong_in_functions() {
    let mut f = Fixture::new();
    assert!(f.feed("lab:").is_err());
    assert!(f.feed("goto lab").is_err());
}

// ── Functions and objects ───────────────────────────────────────────

#[test]
fn one_line_function() {
    let mut f = Fixture::new();
    f.run(&["f=function(a,b) return a+b end; assert(f(3,4)==7)"]);
}

#[test]
fn procedures_cannot_return_values() {
    let mut f = Fixture::new();
    f.run(&["p = procedure(a)"]);
    assert!(f.feed("return a").is_err());
    f.run(&["return", "end", "p(1)"]);
}

#[test]
fn recursion() {
    let mut f = Fixture::new();
    f.run(&[
        "fact = function(n)",
        "  if n <= 1: return 1",
        "  return n * fact(n - 1)",
        "end",
        "x = fact(6)",
    ]);
    assert_eq!(f.int("x"), 720);
}

#[test]
fn wrong_argument_count_fails() {
    let mut f = Fixture::new();
    f.run(&["f = function(a) return a end"]);
    let e = f.runtime_error("f()");
    assert_eq!(e, "wrong number of arguments: expected 1, got 0");
}

#[test]
fn calling_nothing_fails() {
    let mut f = Fixture::new();
    assert_eq!(f.runtime_error("nosuch(1)"), "call of undefined function");
    assert_eq!(f.runtime_error("x = blart.create()"), "cannot get non-standard property of non-object");
}

#[test]
fn clones_inherit_and_methods_see_this() {
    let mut f = Fixture::new();
    f.run(&[
        "p = create()",
        "p.greet = 10",
        "p.get = function() return this.greet end",
        "c = clone(p)",
        "inherited = c.greet",
        "c.greet = 3",
        "own = c.get()",
        "base = p.get()",
    ]);
    assert_eq!(f.int("inherited"), 10);
    assert_eq!(f.int("own"), 3);
    assert_eq!(f.int("base"), 10);
    assert!(f.runtime_error("q = clone(list())").contains("different type"));
}

#[test]
fn list_and_iterator_methods() {
    let mut f = Fixture::new();
    f.run(&[
        "l = list(2)",
        "l.append(3)",
        "l.shift(1)",
        "l.insert(1, 9)",
        "top = l.pop()",
        "front = l.unshift()",
        "n = size(l)",
        "it = range(5, 7)",
        "it.first()",
        "a = it.current()",
        "it.next()",
        "it.next()",
        "done = it.isDone()",
    ]);
    assert_eq!(f.int("top"), 3);
    assert_eq!(f.int("front"), 1);
    assert_eq!(f.int("n"), 2);
    assert_eq!(f.int("a"), 5);
    assert!(f.bool("done"));
}

#[test]
fn containers_compare_by_identity() {
    let mut f = Fixture::new();
    f.run(&["a = list()", "b = list()", "c = a", "x = a == b", "y = a == c"]);
    assert!(!f.bool("x"));
    assert!(f.bool("y"));
}

#[test]
fn numbers_never_equal_containers() {
    let mut f = Fixture::new();
    f.run(&["o = create()", "l = list()"]);
    assert_eq!(f.runtime_error("x = 1 == o"), "cannot compare int with object using ==");
    assert_eq!(f.runtime_error("x = l != true"), "cannot compare list with bool using !=");
}

// ── Sessions, globals and recovery ──────────────────────────────────

#[test]
fn sessions_share_globals_only() {
    let mut f = Fixture::new();
    let mut other = Session::new();
    f.run(&["foo = 5", "$Q = 4"]);
    other.feed(&mut f.rt, "r = $Q + 1").unwrap();
    other.feed(&mut f.rt, "s = defined(foo)").unwrap();
    assert!(matches!(other.var(&f.rt, "r"), Some(Value::Int(5))));
    assert!(matches!(other.var(&f.rt, "s"), Some(Value::Bool(false))));
    assert!(f.rt.find_global("foo").is_none());
    assert!(f.rt.find_global("$Q").is_some());
}

#[test]
fn bad_lines_leave_earlier_state_intact() {
    let mut f = Fixture::new();
    f.run(&["a = 5", "double = function(x) return x * 2 end"]);
    assert!(f.feed("b = (1 +").is_err());
    assert!(f.feed("c = )").is_err());
    f.run(&["c = double(a) + 1"]);
    assert_eq!(f.int("c"), 11);
}

#[test]
fn a_bad_line_inside_a_function_is_dropped() {
    let mut f = Fixture::new();
    f.run(&["f = function(x)"]);
    assert!(f.feed("return x +").is_err());
    f.run(&["return x * 2", "end", "r = f(4)"]);
    assert_eq!(f.int("r"), 8);
}

#[test]
fn runtime_errors_flush_the_vm() {
    let mut f = Fixture::new();
    f.run(&["f = function(n) return n + undefinedthing end"]);
    assert_eq!(f.runtime_error("x = 1 + f(2)"), "use of undefined value");
    assert_eq!(f.rt.vm_depth(), 0);
    f.run(&["y = 2"]);
    assert_eq!(f.int("y"), 2);
}

// ── Output ──────────────────────────────────────────────────────────

#[test]
fn leftover_values_are_printed() {
    let mut f = Fixture::new();
    f.run(&["foo = function(x) return x * 2 end", "foo(5)", "print(\"hi\")", "1.5 + 1"]);
    assert_eq!(f.output(), "10\nhi\n2.500000\n");
}

#[test]
fn printrepr_shows_types() {
    let mut f = Fixture::new();
    f.run(&["printrepr(\"n\", 3)", "printrepr(\"s\", \"q\")"]);
    assert_eq!(f.output(), "n: int:3\ns: string:\"q\"\n");
}

#[test]
fn native_looks_up_by_internal_name() {
    let mut f = Fixture::new();
    f.run(&["p = native(\"list$append\")", "q = native(\"core$size\")", "n = q(\"abc\")"]);
    assert_eq!(f.int("n"), 3);
    assert!(f.runtime_error("x = native(\"nope\")").contains("unknown native function: nope"));
}

// ── Files ───────────────────────────────────────────────────────────

#[test]
fn runtime_errors_report_file_and_line() {
    let mut f = Fixture::with_config(Config { source_debug: true, ..Config::default() });
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("asserter.sb");
    std::fs::write(&path, "foo = function(a, b)\nassert(a > b)\nend\nfoo(1, 2)\n").unwrap();
    let path = path.to_string_lossy().into_owned();
    let e = f.ses.feed_file(&mut f.rt, &path).unwrap_err();
    assert_eq!(e.to_string(), format!("{path} line 2 : assertion failed"));
}

#[test]
fn parse_errors_report_file_and_line() {
    let mut f = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.sb");
    std::fs::write(&path, "a = 1\nb = )\n").unwrap();
    let path = path.to_string_lossy().into_owned();
    let e = f.ses.feed_file(&mut f.rt, &path).unwrap_err();
    assert_eq!(e.to_string(), format!("{path} line 2 : misplaced closing parenthesis"));
    assert_eq!(f.int("a"), 1);
}

#[test]
fn load_runs_a_file_in_its_own_session() {
    let mut f = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lib.sb");
    std::fs::write(&path, "local = 1\n$shared = 41\n").unwrap();
    let load = format!("load \"{}\"", path.to_string_lossy());
    f.run(&[load.as_str(), "x = $shared + 1"]);
    assert_eq!(f.int("x"), 42);
    assert!(f.ses.var(&f.rt, "local").is_none());
}
